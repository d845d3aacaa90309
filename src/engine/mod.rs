pub mod script;
pub mod types;

use anyhow::Result;
use std::path::Path;

pub use types::{EngineDiag, ExtractIn, ExtractOut, RenderedPage};

/// The collaborators the pipeline drives but does not own: rasterizing a PDF
/// into page images and turning one page image into text.
pub trait Engine {
    fn doctor(&self) -> Result<EngineDiag>;
    fn render_pages(&self, input: &Path, out_dir: &Path, dpi: u32) -> Result<Vec<RenderedPage>>;
    fn extract_page(&self, req: &ExtractIn) -> Result<ExtractOut>;
}
