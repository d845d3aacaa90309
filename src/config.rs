use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub render: Render,
    #[serde(default)]
    pub oracle: Oracle,
    #[serde(default)]
    pub cache: Cache,
    #[serde(default)]
    pub classifier: Classifier,
    #[serde(default)]
    pub postprocess: Postprocess,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: Debug,
    #[serde(default)]
    pub security: Security,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }

    /// A stable, normalization-friendly string for hashing.
    pub fn normalized_for_hash(&self) -> String {
        toml::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Global {
    pub resume: bool,
    pub max_parallel_pages: usize,
    pub keep_page_images: bool,
    pub print_summary: bool,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            resume: true,
            max_parallel_pages: 1,
            keep_page_images: true,
            print_summary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub out_dir: String,
    pub cache_dir: String,
    pub scripts_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            out_dir: "out".into(),
            cache_dir: ".pagefold-cache".into(),
            scripts_dir: "scripts".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Render {
    pub dpi: u32,
    pub timeout_seconds: u64,
}
impl Default for Render {
    fn default() -> Self {
        Self {
            dpi: 300,
            timeout_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Oracle {
    pub python_exe: String,
    pub api_base: String,
    pub api_key_env: String,
    /// Also the cache scope: payloads produced by one model never satisfy another.
    pub model: String,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}
impl Default for Oracle {
    fn default() -> Self {
        Self {
            python_exe: "python3".into(),
            api_base: "https://dashscope.aliyuncs.com/compatible-mode/v1".into(),
            api_key_env: "PAGEFOLD_API_KEY".into(),
            model: "qwen-vl-max".into(),
            max_tokens: 8000,
            timeout_seconds: 60,
            max_retries: 2,
            initial_backoff_ms: 5000,
            max_backoff_ms: 30_000,
            env: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Cache {
    pub enabled: bool,
}
impl Default for Cache {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Classifier {
    /// The word between `##` and the identifier in a unit heading, e.g. `Problem`.
    pub unit_keyword: String,
    pub max_data_page_lines: usize,
    pub fallback_keywords: Vec<String>,
    pub localized_sample_markers: Vec<String>,
}
impl Default for Classifier {
    fn default() -> Self {
        Self {
            unit_keyword: "Problem".into(),
            max_data_page_lines: 10,
            fallback_keywords: vec![
                "input".into(),
                "output".into(),
                "constraint".into(),
                "limit".into(),
                "example".into(),
            ],
            localized_sample_markers: vec![
                "样例输入".into(),
                "样例输出".into(),
                "输入样例".into(),
                "输出样例".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Postprocess {
    pub strip_markdown_fence: bool,
    pub normalize_newlines: bool,
    pub normalize_unicode: bool,
    pub trim_trailing_whitespace: bool,
}
impl Default for Postprocess {
    fn default() -> Self {
        Self {
            strip_markdown_fence: true,
            normalize_newlines: true,
            normalize_unicode: false,
            trim_trailing_whitespace: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Output {
    pub document_filename: String,
    pub report_filename: String,
    pub write_report_json: bool,
    pub write_index_json: bool,
    pub write_unit_files: bool,
    pub unit_index_filename: String,
    pub max_filename_len: usize,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            document_filename: "units.md".into(),
            report_filename: "report.json".into(),
            write_report_json: true,
            write_index_json: true,
            write_unit_files: true,
            unit_index_filename: "index.md".into(),
            max_filename_len: 80,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: true,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Debug {
    pub dump_effective_config: bool,
    pub write_page_texts: bool,
}
impl Default for Debug {
    fn default() -> Self {
        Self {
            dump_effective_config: true,
            write_page_texts: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Security {
    pub reject_url_inputs: bool,
    pub pin_scripts_dir: bool,
}
impl Default for Security {
    fn default() -> Self {
        Self {
            reject_url_inputs: true,
            pin_scripts_dir: true,
        }
    }
}
