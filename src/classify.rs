//! Page classification from extracted text alone.
//!
//! Every decision here is syntactic. A page starts a unit only when it carries
//! an explicit `## <Keyword> <Id>.` heading; everything else is evidence for
//! samples or raw data that the merge step uses to decide whether an orphan
//! page is worth keeping.

use crate::config::Config;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub is_unit_start: bool,
    pub has_data_sample: bool,
    pub is_likely_data_page: bool,
}

impl Classification {
    /// Evidence strong enough to keep a page that has no unit to join.
    pub fn has_evidence(&self) -> bool {
        self.has_data_sample || self.is_likely_data_page
    }
}

/// The one authoritative shape of a unit heading. Classification and title
/// extraction both go through this type so they can never disagree.
#[derive(Debug, Clone)]
pub struct UnitPattern {
    keyword: String,
    re: Regex,
}

impl UnitPattern {
    pub fn new(keyword: &str) -> Result<Self> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            anyhow::bail!("classifier.unit_keyword must not be empty");
        }
        let re = Regex::new(&format!(
            r"(?mi)^##[ \t]*{}[ \t]+\w+\.",
            regex::escape(keyword)
        ))
        .with_context(|| format!("compiling unit pattern for keyword {keyword:?}"))?;
        Ok(Self {
            keyword: keyword.to_string(),
            re,
        })
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.re.is_match(text)
    }

    /// First heading line in `text`, trimmed.
    pub fn title(&self, text: &str) -> Option<String> {
        text.lines()
            .find(|line| self.re.is_match(line))
            .map(|line| line.trim().to_string())
    }
}

/// A named text predicate. Kept separate so each signal can be tested and
/// reported on its own.
#[derive(Debug, Clone)]
pub struct Signal {
    pub name: &'static str,
    re: Regex,
}

impl Signal {
    fn new(name: &'static str, pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern).with_context(|| format!("compiling signal {name}"))?;
        Ok(Self { name, re })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.re.is_match(text)
    }
}

#[derive(Debug, Clone)]
pub struct PageClassifier {
    unit: UnitPattern,
    sample_signals: Vec<Signal>,
    data_line_signals: Vec<Signal>,
    max_data_page_lines: usize,
}

impl PageClassifier {
    pub fn new(cfg: &Config) -> Result<Self> {
        let unit = UnitPattern::new(&cfg.classifier.unit_keyword)?;

        let mut sample_signals = vec![
            Signal::new("sample_heading", r"(?i)\bsample[ \t]+(?:input|output)\b")?,
            Signal::new(
                "io_label_line_start",
                r"(?mi)^[ \t]*(?:\*\*|#+[ \t]*)?(?:input|output)[ \t]*:",
            )?,
            Signal::new(
                "io_label_line_end",
                r"(?mi)\b(?:input|output):?[ \t]*(?:\*\*)?[ \t]*$",
            )?,
            Signal::new("table_row", r"(?m)^[ \t]*\|(?:[^|\n]*\|){2,}[ \t]*$")?,
            Signal::new("fenced_block", r"(?ms)^[ \t]*```[^\n]*\n.*?^[ \t]*```")?,
            Signal::new("stacked_numbers", r"(?m)^[ \t]*\d+[ \t]*\n[ \t]*\d+[ \t]*$")?,
        ];

        let localized: Vec<String> = cfg
            .classifier
            .localized_sample_markers
            .iter()
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .map(regex::escape)
            .collect();
        if !localized.is_empty() {
            sample_signals.push(Signal::new(
                "localized_sample",
                &format!("(?i){}", localized.join("|")),
            )?);
        }

        // Matched against single trimmed lines.
        let data_line_signals = vec![
            Signal::new("pure_digits", r"^\d+$")?,
            Signal::new("spaced_digits", r"^\d+(?:\s+\d+)+$")?,
            Signal::new("table_row", r"^\|.*\|$")?,
            Signal::new("digits_and_space", r"^[\d\s]+$")?,
            Signal::new("fence_delimiter", r"^```")?,
        ];

        Ok(Self {
            unit,
            sample_signals,
            data_line_signals,
            max_data_page_lines: cfg.classifier.max_data_page_lines,
        })
    }

    pub fn unit_pattern(&self) -> &UnitPattern {
        &self.unit
    }

    pub fn classify(&self, text: &str) -> Classification {
        if text.trim().is_empty() {
            return Classification::default();
        }
        Classification {
            is_unit_start: self.unit.is_match(text),
            has_data_sample: self.sample_signals.iter().any(|s| s.is_match(text)),
            is_likely_data_page: self.is_likely_data_page(text),
        }
    }

    /// Names of the sample signals that fire on `text`, for diagnostics.
    pub fn matched_signals(&self, text: &str) -> Vec<&'static str> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        self.sample_signals
            .iter()
            .filter(|s| s.is_match(text))
            .map(|s| s.name)
            .collect()
    }

    /// Short pages that are mostly raw numbers, table rows or fences. Recovers
    /// evidence-only pages that carry no sample keywords.
    pub fn is_likely_data_page(&self, text: &str) -> bool {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if lines.is_empty() || lines.len() > self.max_data_page_lines {
            return false;
        }

        let matching = lines
            .iter()
            .filter(|l| self.data_line_signals.iter().any(|s| s.is_match(l)))
            .count();

        matching >= 2 && matching * 2 >= lines.len()
    }
}
