#![cfg(unix)]

use pagefold::{
    config::Config,
    engine::{
        script::{ScriptEngine, EXTRACT_SCRIPT, RENDER_SCRIPT},
        Engine, ExtractIn,
    },
};
use std::path::Path;
use std::time::{Duration, Instant};

const RENDER_STUB: &str = r#"req=$(cat)
case "$req" in
  *'"cmd":"doctor"'*) printf '{"python_exe":"sh","python_version":"stub","ok":true}' ;;
  *) printf '{"ok":true,"pages":[{"index":2,"path":"b.png"},{"index":1,"path":"a.png"}]}' ;;
esac
"#;

const EXTRACT_STUB: &str = r#"cat > "$(dirname "$0")/last_request.json"
if [ -n "$STUB_FAIL" ]; then
  echo "quota exceeded" >&2
  exit 3
fi
printf '{"ok":true,"text":"%s"}' "$STUB_TEXT"
"#;

fn write_scripts(dir: &Path, render: &str, extract: &str) {
    std::fs::write(dir.join(RENDER_SCRIPT), render).unwrap();
    std::fs::write(dir.join(EXTRACT_SCRIPT), extract).unwrap();
}

fn stub_config(dir: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.paths.scripts_dir = dir.display().to_string();
    cfg.security.pin_scripts_dir = false;
    cfg.oracle.python_exe = "/bin/sh".into();
    cfg.oracle.timeout_seconds = 10;
    cfg.render.timeout_seconds = 10;
    cfg
}

fn request(page: u32) -> ExtractIn {
    ExtractIn {
        image_path: format!("page_{page:03}.png"),
        page_index: page,
        total_pages: 3,
        model: "stub-model".into(),
        api_base: "http://localhost".into(),
        api_key_env: "UNUSED_KEY".into(),
        max_tokens: 100,
    }
}

#[test]
fn doctor_and_render_speak_json() {
    let dir = tempfile::tempdir().unwrap();
    write_scripts(dir.path(), RENDER_STUB, EXTRACT_STUB);
    let engine = ScriptEngine::new(&stub_config(dir.path())).unwrap();

    let diag = engine.doctor().unwrap();
    assert!(diag.ok);
    assert_eq!(diag.python_version, "stub");

    let pages = engine
        .render_pages(Path::new("contest.pdf"), dir.path(), 150)
        .unwrap();
    let indices: Vec<u32> = pages.iter().map(|p| p.index).collect();
    assert_eq!(indices, vec![2, 1]);
}

#[test]
fn extract_sends_request_and_passes_configured_env() {
    let dir = tempfile::tempdir().unwrap();
    write_scripts(dir.path(), RENDER_STUB, EXTRACT_STUB);
    let mut cfg = stub_config(dir.path());
    cfg.oracle.env.insert("STUB_TEXT".into(), "## Problem A. Stub".into());
    let engine = ScriptEngine::new(&cfg).unwrap();

    let out = engine.extract_page(&request(2)).unwrap();
    assert!(out.ok);
    assert_eq!(out.text, "## Problem A. Stub");

    let raw = std::fs::read_to_string(dir.path().join("last_request.json")).unwrap();
    let sent: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(sent["cmd"], "extract");
    assert_eq!(sent["req"]["page_index"], 2);
    assert_eq!(sent["req"]["model"], "stub-model");
}

#[test]
fn non_zero_exit_reports_stderr() {
    let dir = tempfile::tempdir().unwrap();
    write_scripts(dir.path(), RENDER_STUB, EXTRACT_STUB);
    let mut cfg = stub_config(dir.path());
    cfg.oracle.env.insert("STUB_FAIL".into(), "1".into());
    let engine = ScriptEngine::new(&cfg).unwrap();

    let err = engine.extract_page(&request(1)).unwrap_err();
    assert!(format!("{err:#}").contains("quota exceeded"), "{err:#}");
}

#[test]
fn slow_script_is_killed_at_the_timeout() {
    let dir = tempfile::tempdir().unwrap();
    write_scripts(dir.path(), RENDER_STUB, "cat > /dev/null\nexec sleep 30\n");
    let mut cfg = stub_config(dir.path());
    cfg.oracle.timeout_seconds = 1;
    let engine = ScriptEngine::new(&cfg).unwrap();

    let started = Instant::now();
    let err = engine.extract_page(&request(1)).unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(format!("{err:#}").contains("timed out"), "{err:#}");
}

#[test]
fn missing_or_unpinned_scripts_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(RENDER_SCRIPT), RENDER_STUB).unwrap();
    assert!(ScriptEngine::new(&stub_config(dir.path())).is_err());

    std::fs::write(dir.path().join(EXTRACT_SCRIPT), EXTRACT_STUB).unwrap();
    let mut cfg = stub_config(dir.path());
    cfg.security.pin_scripts_dir = true;
    assert!(ScriptEngine::new(&cfg).is_err());
}
