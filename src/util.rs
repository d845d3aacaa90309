use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use time::format_description::well_known::Rfc3339;

/// Length of a lowercase hex SHA-256 digest.
pub const HASH_HEX_LEN: usize = 64;

pub fn ensure_dir(p: &Path) -> Result<()> {
    std::fs::create_dir_all(p).with_context(|| format!("create_dir_all {}", p.display()))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    format!("{:x}", h.finalize())
}

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Streams the whole file through SHA-256. Page artifacts are hashed in full so
/// that two renders differing anywhere never share a cache slot.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut f = File::open(path).with_context(|| format!("open file: {}", path.display()))?;
    let mut h = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        h.update(&buf[..n]);
    }
    Ok(format!("{:x}", h.finalize()))
}

pub fn is_hash_hex(s: &str) -> bool {
    s.len() == HASH_HEX_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Turns a unit title into a file stem: alphanumerics, `-` and `_` survive,
/// whitespace runs collapse into one `_`, everything else is dropped.
pub fn sanitize_filename(title: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(title.len());
    let mut pending_sep = false;
    for ch in title.trim().chars() {
        if ch.is_whitespace() {
            pending_sep = !out.is_empty();
            continue;
        }
        if !(ch.is_alphanumeric() || ch == '-' || ch == '_') {
            continue;
        }
        if pending_sep && !out.ends_with('_') {
            out.push('_');
        }
        pending_sep = false;
        out.push(ch);
    }

    let mut trimmed: String = out.chars().take(max_len.max(1)).collect();
    while trimmed.ends_with('_') {
        trimmed.pop();
    }
    if trimmed.is_empty() {
        "unit".to_string()
    } else {
        trimmed
    }
}
