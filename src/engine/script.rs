use super::{types::*, Engine};
use crate::config::Config;
use anyhow::{anyhow, bail, Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const RENDER_SCRIPT: &str = "render_pages.py";
pub const EXTRACT_SCRIPT: &str = "vlm_extract.py";

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Runs helper scripts that read one JSON request on stdin and answer with one
/// JSON document on stdout. A non-zero exit or a timeout is an error carrying
/// the script's stderr.
pub struct ScriptEngine {
    interpreter: PathBuf,
    render_script: PathBuf,
    extract_script: PathBuf,
    env: BTreeMap<String, String>,
    render_timeout: Duration,
    extract_timeout: Duration,
}

/// What a finished script left behind.
struct Finished {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl ScriptEngine {
    pub fn new(cfg: &Config) -> Result<Self> {
        let scripts_dir = PathBuf::from(&cfg.paths.scripts_dir);
        if cfg.security.pin_scripts_dir {
            check_pinned(&scripts_dir)?;
        }

        let render_script = scripts_dir.join(RENDER_SCRIPT);
        let extract_script = scripts_dir.join(EXTRACT_SCRIPT);
        for script in [&render_script, &extract_script] {
            if !script.is_file() {
                bail!("missing helper script: {}", script.display());
            }
        }

        Ok(Self {
            interpreter: resolve_interpreter(&cfg.oracle.python_exe),
            render_script,
            extract_script,
            env: cfg.oracle.env.clone(),
            render_timeout: Duration::from_secs(cfg.render.timeout_seconds),
            extract_timeout: Duration::from_secs(cfg.oracle.timeout_seconds),
        })
    }

    fn call<I: Serialize, O: DeserializeOwned>(
        &self,
        script: &Path,
        request: &I,
        timeout: Duration,
    ) -> Result<O> {
        debug!("calling {} (timeout {timeout:?})", script.display());
        let mut child = Command::new(&self.interpreter)
            .arg(script)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| {
                format!(
                    "spawning {} {}",
                    self.interpreter.display(),
                    script.display()
                )
            })?;

        let payload = serde_json::to_vec(request)?;
        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("script stdin unavailable"))?;
            stdin
                .write_all(&payload)
                .with_context(|| format!("sending request to {}", script.display()))?;
        }

        let done = wait_for(&mut child, timeout)
            .with_context(|| format!("running {}", script.display()))?;
        let stderr = String::from_utf8_lossy(&done.stderr);
        if !done.status.success() {
            bail!(
                "{} exited with {}: {}",
                script.display(),
                done.status,
                stderr.trim()
            );
        }
        if !stderr.trim().is_empty() {
            debug!("{} stderr: {}", script.display(), stderr.trim());
        }

        serde_json::from_slice(&done.stdout)
            .with_context(|| format!("parsing JSON answer from {}", script.display()))
    }
}

fn check_pinned(scripts_dir: &Path) -> Result<()> {
    let cwd = std::env::current_dir().context("current_dir")?;
    let canon = scripts_dir
        .canonicalize()
        .with_context(|| format!("canonicalize scripts_dir: {}", scripts_dir.display()))?;
    if !canon.starts_with(&cwd) {
        bail!(
            "scripts_dir {} is outside the working directory and pin_scripts_dir=true",
            canon.display()
        );
    }
    Ok(())
}

/// `auto` (or empty) defers to `PAGEFOLD_PYTHON`, then `python3` on PATH.
fn resolve_interpreter(raw: &str) -> PathBuf {
    let raw = raw.trim();
    if !raw.is_empty() && !raw.eq_ignore_ascii_case("auto") {
        return home_relative(raw);
    }
    std::env::var("PAGEFOLD_PYTHON")
        .ok()
        .map(|v| home_relative(&v))
        .filter(|p| p.exists())
        .unwrap_or_else(|| PathBuf::from("python3"))
}

fn home_relative(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

impl Engine for ScriptEngine {
    fn doctor(&self) -> Result<EngineDiag> {
        self.call(
            &self.render_script,
            &serde_json::json!({"cmd": "doctor"}),
            self.render_timeout,
        )
    }

    fn render_pages(&self, input: &Path, out_dir: &Path, dpi: u32) -> Result<Vec<RenderedPage>> {
        let req = serde_json::json!({
            "cmd": "render",
            "input_pdf": input,
            "out_dir": out_dir,
            "dpi": dpi,
        });
        let out: RenderOut = self.call(&self.render_script, &req, self.render_timeout)?;
        if !out.ok {
            bail!(
                "render failed: {}",
                out.error.as_deref().unwrap_or("no error message")
            );
        }
        Ok(out.pages)
    }

    fn extract_page(&self, req: &ExtractIn) -> Result<ExtractOut> {
        let out: ExtractOut = self.call(
            &self.extract_script,
            &serde_json::json!({"cmd": "extract", "req": req}),
            self.extract_timeout,
        )?;
        if !out.ok {
            warn!(
                "extract returned ok=false for page {}: {}",
                req.page_index,
                out.error.as_deref().unwrap_or("no error message")
            );
        }
        Ok(out)
    }
}

/// Reads a pipe to the end on its own thread so the child never blocks on a
/// full pipe while we poll it.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<std::io::Result<Vec<u8>>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn collect(handle: JoinHandle<std::io::Result<Vec<u8>>>, name: &str) -> Result<Vec<u8>> {
    handle
        .join()
        .map_err(|_| anyhow!("{name} reader panicked"))?
        .with_context(|| format!("reading script {name}"))
}

/// A zero timeout waits indefinitely.
fn wait_for(child: &mut Child, timeout: Duration) -> Result<Finished> {
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let started = Instant::now();

    let status = loop {
        if let Some(status) = child.try_wait().context("polling script")? {
            break status;
        }
        if !timeout.is_zero() && started.elapsed() >= timeout {
            let _ = child.kill();
            child.wait().context("reaping timed-out script")?;
            let stderr = collect(stderr, "stderr").unwrap_or_default();
            bail!(
                "timed out after {timeout:?}: {}",
                String::from_utf8_lossy(&stderr).trim()
            );
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    Ok(Finished {
        status,
        stdout: collect(stdout, "stdout")?,
        stderr: collect(stderr, "stderr")?,
    })
}
