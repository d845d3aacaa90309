use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineDiag {
    pub python_exe: String,
    pub python_version: String,
    #[serde(default)]
    pub renderer: Option<String>,
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedPage {
    pub index: u32, // 1-based
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderOut {
    pub ok: bool,
    #[serde(default)]
    pub pages: Vec<RenderedPage>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractIn {
    pub image_path: String,
    pub page_index: u32,
    pub total_pages: u32,
    pub model: String,
    pub api_base: String,
    pub api_key_env: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractOut {
    pub ok: bool,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub error: Option<String>,
}
