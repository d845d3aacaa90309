use crate::{
    cache::PageCache,
    classify::PageClassifier,
    config::Config,
    engine::{script::ScriptEngine, Engine},
    pipeline::{self, JobOutput, Pipeline},
    report::{BatchEntry, BatchReport, BatchStatus},
    split,
    util::{ensure_dir, hash_file, now_rfc3339, sanitize_filename, sha256_hex},
};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "pagefold")]
#[command(about = "Page-by-page document reconstruction (VLM extraction + cache + unit merge)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./pagefold.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Doctor {},
    /// Classify one page of extracted text.
    Classify {
        #[arg(long)]
        input: PathBuf,
    },
    /// Fold a directory of already-extracted page texts into units.
    Merge {
        #[arg(long)]
        pages_dir: PathBuf,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    Run {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Neither read nor write the page cache.
        #[arg(long)]
        no_cache: bool,
    },
    /// Run every `*.pdf` in a directory, one output folder per document.
    Batch {
        #[arg(long)]
        input_dir: PathBuf,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        #[arg(long)]
        no_cache: bool,
    },
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    Stats,
    Clear,
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref());
    let cfg = Config::load(&cfg_path)?;

    match &args.cmd {
        Command::Doctor {} => {
            let _guard = init_logging(&args, &cfg, None)?;
            doctor(&cfg)
        }
        Command::Classify { input } => {
            let _guard = init_logging(&args, &cfg, None)?;
            classify(&cfg, input)
        }
        Command::Merge { pages_dir, out_dir } => merge(&args, &cfg, pages_dir, out_dir.as_deref()),
        Command::Run {
            input,
            out_dir,
            no_cache,
        } => run(&args, &cfg, input, out_dir.as_deref(), *no_cache),
        Command::Batch {
            input_dir,
            out_dir,
            no_cache,
        } => batch(&args, &cfg, input_dir, out_dir.as_deref(), *no_cache),
        Command::Cache { action } => {
            let _guard = init_logging(&args, &cfg, None)?;
            cache(&cfg, action)
        }
    }
}

fn resolve_config_path(user: Option<&Path>) -> PathBuf {
    if let Some(p) = user {
        return p.to_path_buf();
    }
    let default = PathBuf::from("pagefold.toml");
    if default.exists() {
        default
    } else {
        PathBuf::from("pagefold.example.toml")
    }
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn doctor(cfg: &Config) -> Result<()> {
    let engine = ScriptEngine::new(cfg)?;
    let diag = engine.doctor()?;
    println!("{}", serde_json::to_string_pretty(&diag)?);
    Ok(())
}

fn classify(cfg: &Config, input: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(input)
        .with_context(|| format!("reading page text: {}", input.display()))?;
    let text = crate::postprocess::clean_page(cfg, &raw);
    let classifier = PageClassifier::new(cfg)?;
    let class = classifier.classify(&text);
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "input": input,
            "classification": class,
            "title": classifier.unit_pattern().title(&text),
            "signals": classifier.matched_signals(&text),
        }))?
    );
    Ok(())
}

fn cache(cfg: &Config, action: &CacheAction) -> Result<()> {
    let cache = PageCache::open(Path::new(&cfg.paths.cache_dir));
    match action {
        CacheAction::Stats => {
            println!("{}", serde_json::to_string_pretty(&cache.stats())?);
        }
        CacheAction::Clear => {
            let before = cache.stats();
            cache.clear()?;
            info!("cleared {} cache entries from {}", before.count, cache.dir().display());
        }
    }
    Ok(())
}

fn merge(args: &Args, cfg: &Config, pages_dir: &Path, out_override: Option<&Path>) -> Result<()> {
    if !pages_dir.is_dir() {
        return Err(anyhow!("pages dir does not exist: {}", pages_dir.display()));
    }

    let texts = pipeline::load_page_texts(cfg, pages_dir)?;
    let joined: String = texts
        .iter()
        .map(|p| format!("{}:{}", p.index, sha256_hex(p.text.as_bytes())))
        .collect::<Vec<_>>()
        .join("\n");
    let job_dir = prepare_job_dir(
        cfg,
        &sha256_hex(joined.as_bytes()),
        &out_root(cfg, out_override),
    )?;

    let log_path = resolve_log_path(cfg, Some(&job_dir));
    let _guard = init_logging(args, cfg, log_path.as_deref())?;
    info!("merging {} page files from {}", texts.len(), pages_dir.display());

    let classifier = PageClassifier::new(cfg)?;
    let mut out = pipeline::fold_pages(
        cfg,
        &classifier,
        &pages_dir.display().to_string(),
        &texts,
        now_rfc3339(),
    )?;
    write_outputs(cfg, &job_dir, &mut out)
}

fn run(
    args: &Args,
    cfg: &Config,
    input: &Path,
    out_override: Option<&Path>,
    no_cache: bool,
) -> Result<()> {
    let job_dir = job_dir_for(cfg, input, &out_root(cfg, out_override))?;

    let log_path = resolve_log_path(cfg, Some(&job_dir));
    let _guard = init_logging(args, cfg, log_path.as_deref())?;

    let pipeline = Pipeline::new(cfg, ScriptEngine::new(cfg)?, open_cache(cfg, no_cache))?;
    run_into(cfg, &pipeline, input, &job_dir)?;
    Ok(())
}

fn batch(
    args: &Args,
    cfg: &Config,
    input_dir: &Path,
    out_override: Option<&Path>,
    no_cache: bool,
) -> Result<()> {
    let out_root = out_root(cfg, out_override);
    let log_path = resolve_log_path(cfg, Some(&out_root));
    let _guard = init_logging(args, cfg, log_path.as_deref())?;

    let pipeline = Pipeline::new(cfg, ScriptEngine::new(cfg)?, open_cache(cfg, no_cache))?;
    let report = run_batch(cfg, &pipeline, input_dir, &out_root)?;
    if report.failed > 0 {
        return Err(anyhow!(
            "{} of {} documents failed; see {}",
            report.failed,
            report.contests.len(),
            out_root.join(BATCH_REPORT).display()
        ));
    }
    Ok(())
}

const BATCH_REPORT: &str = "batch.json";

/// Runs every PDF in `input_dir` (sorted by name) through one shared pipeline,
/// each into its own `out_root/<name>/` tree. A failing document is recorded
/// and the batch moves on. The batch report is written to `out_root`.
pub fn run_batch<E: Engine + Sync>(
    cfg: &Config,
    pipeline: &Pipeline<E>,
    input_dir: &Path,
    out_root: &Path,
) -> Result<BatchReport> {
    let mut inputs = Vec::new();
    for item in std::fs::read_dir(input_dir)
        .with_context(|| format!("read_dir {}", input_dir.display()))?
    {
        let path = item?.path();
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        if is_pdf && path.is_file() {
            inputs.push(path);
        }
    }
    if inputs.is_empty() {
        return Err(anyhow!("no PDF files in {}", input_dir.display()));
    }
    inputs.sort();
    info!("batch: {} documents from {}", inputs.len(), input_dir.display());

    let started = now_rfc3339();
    let mut contests = Vec::with_capacity(inputs.len());
    for input in inputs {
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let name = sanitize_filename(stem, cfg.output.max_filename_len);
        let doc_root = out_root.join(&name);

        let result = job_dir_for(cfg, &input, &doc_root).and_then(|job_dir| {
            run_into(cfg, pipeline, &input, &job_dir).map(|units| (job_dir, units))
        });
        let entry = match result {
            Ok((job_dir, units)) => BatchEntry {
                input,
                name,
                status: BatchStatus::Ok,
                job_dir: Some(job_dir),
                units,
                error: None,
            },
            Err(err) => {
                error!("{}: {err:#}", input.display());
                BatchEntry {
                    input,
                    name,
                    status: BatchStatus::Failed,
                    job_dir: None,
                    units: 0,
                    error: Some(format!("{err:#}")),
                }
            }
        };
        contests.push(entry);
    }

    let succeeded = contests
        .iter()
        .filter(|c| c.status == BatchStatus::Ok)
        .count() as u32;
    let report = BatchReport {
        input_dir: input_dir.to_path_buf(),
        started,
        finished: now_rfc3339(),
        succeeded,
        failed: contests.len() as u32 - succeeded,
        contests,
    };

    ensure_dir(out_root)?;
    let path = out_root.join(BATCH_REPORT);
    std::fs::write(&path, serde_json::to_string_pretty(&report)?)
        .with_context(|| format!("write {}", path.display()))?;
    info!(
        "batch finished: {} ok, {} failed",
        report.succeeded, report.failed
    );
    Ok(report)
}

fn out_root(cfg: &Config, out_override: Option<&Path>) -> PathBuf {
    out_override
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&cfg.paths.out_dir))
}

fn open_cache(cfg: &Config, no_cache: bool) -> PageCache {
    let cache_dir = Path::new(&cfg.paths.cache_dir);
    if no_cache || !cfg.cache.enabled {
        info!("page cache disabled");
        PageCache::disabled(cache_dir)
    } else {
        PageCache::open(cache_dir)
    }
}

/// Validates `input` and prepares its job dir under `out_root`.
fn job_dir_for(cfg: &Config, input: &Path, out_root: &Path) -> Result<PathBuf> {
    validate_input(cfg, input)?;
    let input_hash =
        hash_file(input).with_context(|| format!("hashing input: {}", input.display()))?;
    prepare_job_dir(cfg, &input_hash, out_root)
}

/// Runs one PDF into a prepared job dir; returns the number of units written.
fn run_into<E: Engine + Sync>(
    cfg: &Config,
    pipeline: &Pipeline<E>,
    input: &Path,
    job_dir: &Path,
) -> Result<u32> {
    let mut out = pipeline.run_job(input, job_dir)?;
    write_outputs(cfg, job_dir, &mut out)?;
    Ok(out.units.len() as u32)
}

/// Job ids bind the effective config to the input so a config change never
/// reuses an older job directory.
fn prepare_job_dir(cfg: &Config, input_hash: &str, out_root: &Path) -> Result<PathBuf> {
    let cfg_hash = sha256_hex(cfg.normalized_for_hash().as_bytes());
    let job_id = sha256_hex(format!("{}:{}", cfg_hash, input_hash).as_bytes());
    let job_dir = out_root.join(&job_id);

    if job_dir.exists() && !cfg.global.resume {
        return Err(anyhow!(
            "job_dir already exists and resume=false: {}",
            job_dir.display()
        ));
    }

    ensure_dir(&job_dir)?;
    ensure_dir(&job_dir.join("final"))?;
    ensure_dir(&job_dir.join("logs"))?;

    if cfg.debug.dump_effective_config {
        let raw = toml::to_string(cfg).unwrap_or_default();
        std::fs::write(job_dir.join("effective-config.toml"), raw)?;
    }
    Ok(job_dir)
}

/// Persists every artifact of a finished job. Any failure here fails the run:
/// without the document nothing useful was produced.
pub fn write_outputs(cfg: &Config, job_dir: &Path, out: &mut JobOutput) -> Result<()> {
    let final_dir = job_dir.join("final");
    ensure_dir(&final_dir)?;

    let doc_path = final_dir.join(&cfg.output.document_filename);
    std::fs::write(&doc_path, &out.document)
        .with_context(|| format!("write {}", doc_path.display()))?;

    if cfg.output.write_unit_files {
        split::write_unit_files(
            cfg,
            &out.units,
            &mut out.report.units,
            &job_dir.join("units"),
        )?;
    }

    if cfg.output.write_report_json {
        let report_path = final_dir.join(&cfg.output.report_filename);
        std::fs::write(&report_path, serde_json::to_string_pretty(&out.report)?)
            .with_context(|| format!("write {}", report_path.display()))?;
    }

    let job_id = job_dir
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default();

    if cfg.output.write_index_json {
        let unit_files: Vec<String> = out
            .report
            .units
            .iter()
            .filter_map(|u| u.file.as_ref().map(|f| format!("units/{f}")))
            .collect();
        let index = serde_json::json!({
            "job_id": job_id,
            "started": out.report.started,
            "finished": out.report.finished,
            "document": format!("final/{}", cfg.output.document_filename),
            "report": format!("final/{}", cfg.output.report_filename),
            "units": unit_files,
        });
        std::fs::write(job_dir.join("index.json"), serde_json::to_string_pretty(&index)?)?;
    }

    if out.report.stats.pages_discarded > 0 {
        warn!(
            "{} pages were discarded before any unit started",
            out.report.stats.pages_discarded
        );
    }

    if cfg.global.print_summary {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "job_id": job_id,
                "job_dir": job_dir,
                "stats": out.report.stats,
                "contest": out.report.contest,
                "status": "ok"
            }))?
        );
    }

    Ok(())
}

fn validate_input(cfg: &Config, input: &Path) -> Result<()> {
    let input_str = input.display().to_string();

    if cfg.security.reject_url_inputs && looks_like_url(&input_str) {
        return Err(anyhow!("URL inputs are disabled: {input_str}"));
    }

    if !input.exists() {
        return Err(anyhow!("input does not exist: {}", input.display()));
    }

    if let Some(ext) = input.extension().and_then(|s| s.to_str()) {
        if !ext.eq_ignore_ascii_case("pdf") {
            return Err(anyhow!("input is not a PDF: {}", input.display()));
        }
    } else {
        warn!("input has no extension; assuming PDF: {}", input.display());
    }

    Ok(())
}

fn looks_like_url(s: &str) -> bool {
    let s = s.to_ascii_lowercase();
    s.starts_with("http://") || s.starts_with("https://") || s.starts_with("file://")
}

fn resolve_log_path(cfg: &Config, job_dir: Option<&Path>) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }

    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }

    if let Some(job_dir) = job_dir {
        return Some(job_dir.join("logs").join("pagefold.log"));
    }

    Some(PathBuf::from(&cfg.paths.out_dir).join("pagefold.log"))
}
