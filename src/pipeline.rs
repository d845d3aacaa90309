use crate::{
    cache::PageCache,
    classify::PageClassifier,
    config::Config,
    engine::{Engine, ExtractIn, RenderedPage},
    merge::{FoldRules, LogicalUnit, Merger},
    postprocess,
    report::{JobReport, JobStats, PageReport, PageSource},
    split,
    util::{ensure_dir, hash_file, now_rfc3339},
};
use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct Pipeline<E: Engine> {
    cfg: Config,
    engine: E,
    cache: PageCache,
    classifier: PageClassifier,
}

pub struct JobOutput {
    pub units: Vec<LogicalUnit>,
    pub document: String,
    pub report: JobReport,
}

/// One page's text after pass 1, ready to fold.
#[derive(Debug, Clone)]
pub struct PageText {
    pub index: u32,
    pub text: String,
    pub source: PageSource,
    pub artifact_hash: Option<String>,
}

impl<E: Engine + Sync> Pipeline<E> {
    pub fn new(cfg: &Config, engine: E, cache: PageCache) -> Result<Self> {
        Ok(Self {
            cfg: cfg.clone(),
            engine,
            cache,
            classifier: PageClassifier::new(cfg)?,
        })
    }

    pub fn run_job(&self, input: &Path, job_dir: &Path) -> Result<JobOutput> {
        let started = now_rfc3339();
        let pages_dir = job_dir.join("pages");
        ensure_dir(&pages_dir)?;

        let mut pages = self
            .engine
            .render_pages(input, &pages_dir, self.cfg.render.dpi)
            .with_context(|| format!("rendering pages: {}", input.display()))?;
        pages.sort_by_key(|p| p.index);
        validate_page_indices(pages.iter().map(|p| p.index))?;
        if pages.is_empty() {
            bail!("renderer produced zero pages for {}", input.display());
        }
        info!("rendered {} pages into {}", pages.len(), pages_dir.display());

        let texts = self.extract_all(&pages)?;

        if self.cfg.debug.write_page_texts {
            for p in &texts {
                let path = pages_dir.join(format!("page_{:03}.md", p.index));
                if let Err(err) = std::fs::write(&path, &p.text) {
                    warn!("could not write page text {}: {err}", path.display());
                }
            }
        }

        if !self.cfg.global.keep_page_images {
            for p in &pages {
                let _ = std::fs::remove_file(&p.path);
            }
        }

        fold_pages(
            &self.cfg,
            &self.classifier,
            &input.display().to_string(),
            &texts,
            started,
        )
    }

    /// Pass 1: text for every page, from the cache or the oracle. Pages are
    /// independent here, so this is the only stage that may run concurrently.
    /// `collect` keeps input order whatever order the workers finish in.
    fn extract_all(&self, pages: &[RenderedPage]) -> Result<Vec<PageText>> {
        let total = pages.len() as u32;
        let workers = self.cfg.global.max_parallel_pages.max(1).min(pages.len().max(1));

        if workers == 1 {
            return Ok(pages.iter().map(|p| self.extract_one(p, total)).collect());
        }

        info!("extracting {} pages on {workers} workers", pages.len());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("pagefold-extract-{i}"))
            .build()
            .context("building extraction thread pool")?;
        Ok(pool.install(|| {
            pages
                .par_iter()
                .map(|p| self.extract_one(p, total))
                .collect::<Vec<_>>()
        }))
    }

    fn extract_one(&self, page: &RenderedPage, total: u32) -> PageText {
        let scope = self.cfg.oracle.model.as_str();
        let artifact = Path::new(&page.path);

        let artifact_hash = match hash_file(artifact) {
            Ok(h) => Some(h),
            Err(err) => {
                warn!("page {} artifact not hashable, skipping cache: {err:#}", page.index);
                None
            }
        };

        if let Some(hash) = artifact_hash.as_deref() {
            if let Some(raw) = self.cache.get(hash, scope) {
                debug!("page {} served from cache ({} chars)", page.index, raw.len());
                return PageText {
                    index: page.index,
                    text: postprocess::clean_page(&self.cfg, &raw),
                    source: PageSource::Cache,
                    artifact_hash,
                };
            }
        }

        let req = ExtractIn {
            image_path: page.path.clone(),
            page_index: page.index,
            total_pages: total,
            model: self.cfg.oracle.model.clone(),
            api_base: self.cfg.oracle.api_base.clone(),
            api_key_env: self.cfg.oracle.api_key_env.clone(),
            max_tokens: self.cfg.oracle.max_tokens,
        };

        match self.call_oracle(&req) {
            Some(raw) => {
                if let Some(hash) = artifact_hash.as_deref() {
                    self.cache.put(hash, scope, &raw);
                }
                info!("page {}/{} extracted ({} chars)", page.index, total, raw.len());
                PageText {
                    index: page.index,
                    text: postprocess::clean_page(&self.cfg, &raw),
                    source: PageSource::Oracle,
                    artifact_hash,
                }
            }
            None => {
                warn!("page {}/{} failed extraction; folding as empty", page.index, total);
                PageText {
                    index: page.index,
                    text: String::new(),
                    source: PageSource::Failed,
                    artifact_hash,
                }
            }
        }
    }

    /// First attempt plus `max_retries` retries with doubling backoff.
    fn call_oracle(&self, req: &ExtractIn) -> Option<String> {
        let attempts = self.cfg.oracle.max_retries + 1;
        for attempt in 1..=attempts {
            match self.engine.extract_page(req) {
                Ok(out) if out.ok => return Some(out.text),
                Ok(out) => warn!(
                    "page {} attempt {attempt}/{attempts}: {}",
                    req.page_index,
                    out.error.as_deref().unwrap_or("extract returned ok=false")
                ),
                Err(err) => warn!("page {} attempt {attempt}/{attempts}: {err:#}", req.page_index),
            }
            if attempt < attempts {
                std::thread::sleep(backoff_delay(
                    self.cfg.oracle.initial_backoff_ms,
                    self.cfg.oracle.max_backoff_ms,
                    attempt,
                ));
            }
        }
        None
    }
}

pub fn backoff_delay(initial_ms: u64, max_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.saturating_sub(1).min(20);
    Duration::from_millis(initial_ms.saturating_mul(factor).min(max_ms))
}

fn validate_page_indices(indices: impl Iterator<Item = u32>) -> Result<()> {
    let mut last = 0u32;
    for i in indices {
        if i == 0 {
            bail!("page indices are 1-based; got 0");
        }
        if i <= last {
            bail!("duplicate page index {i}");
        }
        last = i;
    }
    Ok(())
}

/// Pass 2: classify and fold in index order, then build the document and
/// report. Shared by the oracle-backed run and by merging pre-extracted text.
pub fn fold_pages(
    cfg: &Config,
    classifier: &PageClassifier,
    name: &str,
    pages: &[PageText],
    started: String,
) -> Result<JobOutput> {
    let rules = FoldRules::from_config(cfg, classifier);
    let mut merger = Merger::new(classifier, rules);
    let mut page_reports = Vec::with_capacity(pages.len());
    let mut stats = JobStats {
        pages_total: pages.len() as u32,
        ..JobStats::default()
    };

    for p in pages {
        match p.source {
            PageSource::Cache => stats.cache_hits += 1,
            PageSource::Oracle => stats.cache_misses += 1,
            PageSource::Failed => {
                stats.cache_misses += 1;
                stats.oracle_failures += 1;
            }
            PageSource::Provided => {}
        }

        let outcome = merger.push(p.index, &p.text)?;
        page_reports.push(PageReport {
            index: p.index,
            artifact_hash: p.artifact_hash.clone(),
            source: p.source,
            chars: p.text.chars().count(),
            outcome,
        });
    }

    let merged = merger.finish();
    stats.absorb_merge(&merged.stats);

    let doc_name = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    let document = postprocess::render_document(doc_name, stats.pages_total, &merged.units);
    let units = split::summarize_units(&merged.units)?;
    let contest = split::contest_stats(&units, &cfg.classifier.unit_keyword);

    info!(
        "merged {} pages into {} units (fragments={} discarded={} empty={} cache_hits={})",
        stats.pages_total,
        stats.units_emitted,
        stats.fragments,
        stats.pages_discarded,
        stats.pages_empty,
        stats.cache_hits
    );
    info!(
        "{} keyword units; time limits {:?}; memory limits {:?}",
        contest.total_units, contest.time_limits, contest.memory_limits
    );
    for u in &units {
        info!(
            "unit {}: {} (pages {})",
            u.ordinal,
            u.title,
            postprocess::join_pages(&u.pages)
        );
    }

    Ok(JobOutput {
        units: merged.units,
        document,
        report: JobReport {
            input: name.to_string(),
            scope: cfg.oracle.model.clone(),
            started,
            finished: now_rfc3339(),
            stats,
            contest,
            pages: page_reports,
            units,
        },
    })
}

/// Reads already-extracted page texts (`*.md` / `*.txt`) from `dir`. The page
/// index is the first run of digits in each file stem.
pub fn load_page_texts(cfg: &Config, dir: &Path) -> Result<Vec<PageText>> {
    let digits = Regex::new(r"\d+")?;
    let mut by_index: BTreeMap<u32, PathBuf> = BTreeMap::new();

    for item in std::fs::read_dir(dir).with_context(|| format!("read_dir {}", dir.display()))? {
        let path = item?.path();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        if !matches!(ext.as_deref(), Some("md") | Some("txt")) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(m) = digits.find(stem) else {
            warn!("skipping page file without an index: {}", path.display());
            continue;
        };
        let index: u32 = m
            .as_str()
            .parse()
            .with_context(|| format!("page index in {}", path.display()))?;
        if let Some(prev) = by_index.insert(index, path.clone()) {
            bail!(
                "page {index} provided twice: {} and {}",
                prev.display(),
                path.display()
            );
        }
    }

    if by_index.is_empty() {
        bail!("no page files (*.md, *.txt) in {}", dir.display());
    }
    validate_page_indices(by_index.keys().copied())?;

    by_index
        .into_iter()
        .map(|(index, path)| {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            Ok(PageText {
                index,
                text: postprocess::clean_page(cfg, &raw),
                source: PageSource::Provided,
                artifact_hash: None,
            })
        })
        .collect()
}
