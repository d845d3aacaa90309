use crate::{
    config::Config,
    merge::LogicalUnit,
    postprocess::join_pages,
    report::{ContestStats, UnitSummary},
    util::{ensure_dir, sanitize_filename},
};
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

struct LimitPatterns {
    time: Regex,
    memory: Regex,
}

impl LimitPatterns {
    fn new() -> Result<Self> {
        Ok(Self {
            time: Regex::new(r"(?mi)^[ \t]*(?:\*\*)?[ \t]*time[ \t]+limit[ \t]*:[ \t]*(.+)$")?,
            memory: Regex::new(r"(?mi)^[ \t]*(?:\*\*)?[ \t]*memory[ \t]+limit[ \t]*:[ \t]*(.+)$")?,
        })
    }
}

fn capture_value(re: &Regex, content: &str) -> Option<String> {
    let raw = re.captures(content)?.get(1)?.as_str();
    let v = raw.trim().trim_end_matches("**").trim();
    (!v.is_empty()).then(|| v.to_string())
}

pub fn summarize_units(units: &[LogicalUnit]) -> Result<Vec<UnitSummary>> {
    let limits = LimitPatterns::new()?;
    Ok(units
        .iter()
        .enumerate()
        .map(|(i, u)| UnitSummary {
            ordinal: i as u32 + 1,
            title: u.title.clone(),
            pages: u.pages.clone(),
            time_limit: capture_value(&limits.time, &u.content),
            memory_limit: capture_value(&limits.memory, &u.content),
            file: None,
        })
        .collect())
}

fn names_keyword(title: &str, keyword: &str) -> bool {
    !keyword.is_empty() && title.to_lowercase().contains(keyword)
}

/// Counts keyword-titled units and tallies their time and memory limits.
pub fn contest_stats(summaries: &[UnitSummary], keyword: &str) -> ContestStats {
    let keyword = keyword.trim().to_lowercase();
    let mut stats = ContestStats::default();
    for s in summaries.iter().filter(|s| names_keyword(&s.title, &keyword)) {
        stats.total_units += 1;
        if let Some(t) = &s.time_limit {
            *stats.time_limits.entry(t.clone()).or_default() += 1;
        }
        if let Some(m) = &s.memory_limit {
            *stats.memory_limits.entry(m.clone()).or_default() += 1;
        }
    }
    stats
}

/// Writes each unit whose title names the unit keyword to its own file under
/// `dir`, records the relative file name in its summary, and writes an index.
/// Fragments and placeholder-titled units stay only in the combined document.
pub fn write_unit_files(
    cfg: &Config,
    units: &[LogicalUnit],
    summaries: &mut [UnitSummary],
    dir: &Path,
) -> Result<usize> {
    let keyword = cfg.classifier.unit_keyword.trim().to_lowercase();
    let mut used: HashSet<String> = HashSet::new();
    let mut written = 0usize;

    for (unit, summary) in units.iter().zip(summaries.iter_mut()) {
        if !names_keyword(&unit.title, &keyword) {
            continue;
        }
        if written == 0 {
            ensure_dir(dir)?;
        }

        let stem = sanitize_filename(&unit.title, cfg.output.max_filename_len);
        let mut name = format!("{stem}.md");
        let mut n = 2;
        while !used.insert(name.clone()) {
            name = format!("{stem}-{n}.md");
            n += 1;
        }

        let path = dir.join(&name);
        let body = format!(
            "<!-- unit {}, pages: {} -->\n\n{}\n",
            summary.ordinal,
            join_pages(&unit.pages),
            unit.content.trim()
        );
        std::fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
        summary.file = Some(name);
        written += 1;
    }

    if written > 0 {
        let index_path = dir.join(&cfg.output.unit_index_filename);
        std::fs::write(&index_path, render_unit_index(summaries))
            .with_context(|| format!("write {}", index_path.display()))?;
        info!("wrote {written} unit files to {}", dir.display());
    }
    Ok(written)
}

pub fn render_unit_index(summaries: &[UnitSummary]) -> String {
    let mut out = String::from("# Units\n\n");
    for s in summaries {
        let Some(file) = &s.file else { continue };
        let title = s.title.trim_start_matches('#').trim();
        out.push_str(&format!("- [{title}]({file})"));
        if let Some(t) = &s.time_limit {
            out.push_str(&format!(" (time: {t}"));
            if let Some(m) = &s.memory_limit {
                out.push_str(&format!(", memory: {m}"));
            }
            out.push(')');
        }
        out.push('\n');
    }
    out
}
