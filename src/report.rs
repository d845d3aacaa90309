use crate::merge::{FoldOutcome, MergeStats};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub input: String,
    pub scope: String,
    pub started: String,
    pub finished: String,
    pub stats: JobStats,
    #[serde(default)]
    pub contest: ContestStats,
    pub pages: Vec<PageReport>,
    pub units: Vec<UnitSummary>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub pages_total: u32,
    pub pages_empty: u32,
    pub units_started: u32,
    pub continuations: u32,
    pub fragments: u32,
    pub pages_discarded: u32,
    pub units_emitted: u32,
    pub cache_hits: u32,
    pub cache_misses: u32,
    pub oracle_failures: u32,
}

impl JobStats {
    pub fn absorb_merge(&mut self, m: &MergeStats) {
        self.pages_empty = m.pages_empty;
        self.units_started = m.units_started;
        self.continuations = m.continuations;
        self.fragments = m.fragments;
        self.pages_discarded = m.pages_discarded;
        self.units_emitted = m.units_emitted;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageSource {
    Cache,
    Oracle,
    /// The oracle never produced text; the page folds as empty.
    Failed,
    /// Text supplied directly, no oracle involved.
    Provided,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageReport {
    pub index: u32,
    #[serde(default)]
    pub artifact_hash: Option<String>,
    pub source: PageSource,
    pub chars: usize,
    /// `None` for empty pages, which never reach the fold.
    #[serde(default)]
    pub outcome: Option<FoldOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSummary {
    pub ordinal: u32,
    pub title: String,
    pub pages: Vec<u32>,
    #[serde(default)]
    pub time_limit: Option<String>,
    #[serde(default)]
    pub memory_limit: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
}

/// Distribution of limits across the keyword-titled units of one document.
/// Units without a stated limit are left out of the histogram.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContestStats {
    pub total_units: u32,
    pub time_limits: BTreeMap<String, u32>,
    pub memory_limits: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Ok,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    pub input: PathBuf,
    pub name: String,
    pub status: BatchStatus,
    #[serde(default)]
    pub job_dir: Option<PathBuf>,
    #[serde(default)]
    pub units: u32,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub input_dir: PathBuf,
    pub started: String,
    pub finished: String,
    pub succeeded: u32,
    pub failed: u32,
    pub contests: Vec<BatchEntry>,
}
