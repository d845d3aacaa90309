//! Folds classified pages, in index order, into logical units.
//!
//! The state machine has two states. With no active unit, only a unit heading
//! opens one; evidence-bearing orphan pages become standalone fragments and
//! everything else is dropped. With an active unit, every non-heading page is
//! appended to it no matter what it looks like, so a trailing sample page is
//! never lost.

use crate::classify::{Classification, PageClassifier, UnitPattern};
use crate::config::Config;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

const CONTENT_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalUnit {
    pub title: String,
    pub content: String,
    pub pages: Vec<u32>,
}

impl LogicalUnit {
    fn start(title: String, page: u32, text: &str) -> Self {
        Self {
            title,
            content: text.to_string(),
            pages: vec![page],
        }
    }

    fn append(&mut self, page: u32, text: &str) {
        self.content.push_str(CONTENT_SEPARATOR);
        self.content.push_str(text);
        self.pages.push(page);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MergeState {
    #[default]
    NoActiveUnit,
    ActiveUnit(LogicalUnit),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldOutcome {
    Started,
    Continued,
    Fragment,
    Discarded,
}

/// Result of one transition: the next state plus at most one finished unit.
#[derive(Debug)]
pub struct Fold {
    pub state: MergeState,
    pub emitted: Option<LogicalUnit>,
    pub outcome: FoldOutcome,
}

/// The parts of the fold that are configuration rather than classification.
#[derive(Debug, Clone)]
pub struct FoldRules {
    unit: UnitPattern,
    fallback_keywords: Vec<String>,
}

impl FoldRules {
    pub fn new(unit: UnitPattern, fallback_keywords: &[String]) -> Self {
        Self {
            unit,
            fallback_keywords: fallback_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn from_config(cfg: &Config, classifier: &PageClassifier) -> Self {
        Self::new(
            classifier.unit_pattern().clone(),
            &cfg.classifier.fallback_keywords,
        )
    }

    fn mentions_fallback_keyword(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.fallback_keywords.iter().any(|k| lower.contains(k.as_str()))
    }
}

impl MergeState {
    pub fn fold(self, page: u32, text: &str, class: &Classification, rules: &FoldRules) -> Fold {
        if class.is_unit_start {
            let emitted = match self {
                MergeState::ActiveUnit(unit) => Some(unit),
                MergeState::NoActiveUnit => None,
            };
            let title = rules.unit.title(text).unwrap_or_default();
            return Fold {
                state: MergeState::ActiveUnit(LogicalUnit::start(title, page, text)),
                emitted,
                outcome: FoldOutcome::Started,
            };
        }

        match self {
            MergeState::ActiveUnit(mut unit) => {
                unit.append(page, text);
                Fold {
                    state: MergeState::ActiveUnit(unit),
                    emitted: None,
                    outcome: FoldOutcome::Continued,
                }
            }
            MergeState::NoActiveUnit => {
                if class.has_evidence() || rules.mentions_fallback_keyword(text) {
                    Fold {
                        state: MergeState::NoActiveUnit,
                        emitted: Some(LogicalUnit::start(
                            format!("Fragment (page {page})"),
                            page,
                            text.trim(),
                        )),
                        outcome: FoldOutcome::Fragment,
                    }
                } else {
                    Fold {
                        state: MergeState::NoActiveUnit,
                        emitted: None,
                        outcome: FoldOutcome::Discarded,
                    }
                }
            }
        }
    }

    pub fn flush(self) -> (MergeState, Option<LogicalUnit>) {
        match self {
            MergeState::ActiveUnit(unit) if !unit.content.trim().is_empty() => {
                (MergeState::NoActiveUnit, Some(unit))
            }
            _ => (MergeState::NoActiveUnit, None),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    pub pages_folded: u32,
    pub pages_empty: u32,
    pub units_started: u32,
    pub continuations: u32,
    pub fragments: u32,
    pub pages_discarded: u32,
    pub units_emitted: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub units: Vec<LogicalUnit>,
    pub stats: MergeStats,
}

/// Drives [`MergeState`] over a page sequence and collects emitted units.
pub struct Merger<'a> {
    classifier: &'a PageClassifier,
    rules: FoldRules,
    state: MergeState,
    units: Vec<LogicalUnit>,
    stats: MergeStats,
    last_page: Option<u32>,
}

impl<'a> Merger<'a> {
    pub fn new(classifier: &'a PageClassifier, rules: FoldRules) -> Self {
        Self {
            classifier,
            rules,
            state: MergeState::NoActiveUnit,
            units: Vec::new(),
            stats: MergeStats::default(),
            last_page: None,
        }
    }

    /// Classifies and folds one page. Whitespace-only pages are counted and
    /// skipped. Page indices must be strictly increasing.
    pub fn push(&mut self, page: u32, text: &str) -> Result<Option<FoldOutcome>> {
        let class = self.classifier.classify(text);
        self.push_classified(page, text, class)
    }

    /// Folds one page under a classification computed elsewhere.
    pub fn push_classified(
        &mut self,
        page: u32,
        text: &str,
        class: Classification,
    ) -> Result<Option<FoldOutcome>> {
        if let Some(last) = self.last_page {
            if page <= last {
                bail!("page {page} folded after page {last}; indices must strictly increase");
            }
        }
        self.last_page = Some(page);

        if text.trim().is_empty() {
            self.stats.pages_empty += 1;
            debug!(page, "empty page skipped");
            return Ok(None);
        }

        debug!(
            page,
            unit_start = class.is_unit_start,
            data_sample = class.has_data_sample,
            data_page = class.is_likely_data_page,
            "classified page"
        );

        let state = std::mem::take(&mut self.state);
        let fold = state.fold(page, text, &class, &self.rules);
        self.state = fold.state;
        if let Some(unit) = fold.emitted {
            self.emit(unit);
        }

        self.stats.pages_folded += 1;
        match fold.outcome {
            FoldOutcome::Started => self.stats.units_started += 1,
            FoldOutcome::Continued => self.stats.continuations += 1,
            FoldOutcome::Fragment => self.stats.fragments += 1,
            FoldOutcome::Discarded => {
                self.stats.pages_discarded += 1;
                debug!(page, "page discarded: no active unit and no evidence");
            }
        }
        Ok(Some(fold.outcome))
    }

    pub fn finish(mut self) -> MergeOutcome {
        let state = std::mem::take(&mut self.state);
        let (_, unit) = state.flush();
        if let Some(unit) = unit {
            self.emit(unit);
        }
        MergeOutcome {
            units: self.units,
            stats: self.stats,
        }
    }

    fn emit(&mut self, mut unit: LogicalUnit) {
        if unit.title.trim().is_empty() {
            unit.title = format!("Unit {}", self.units.len() + 1);
        }
        self.stats.units_emitted += 1;
        self.units.push(unit);
    }
}

/// Classifies and folds `pages` in order, then flushes.
pub fn run<I, S>(cfg: &Config, pages: I) -> Result<MergeOutcome>
where
    I: IntoIterator<Item = (u32, S)>,
    S: AsRef<str>,
{
    let classifier = PageClassifier::new(cfg)?;
    let rules = FoldRules::from_config(cfg, &classifier);
    let mut merger = Merger::new(&classifier, rules);
    for (page, text) in pages {
        merger.push(page, text.as_ref())?;
    }
    Ok(merger.finish())
}
