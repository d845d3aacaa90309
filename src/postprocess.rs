use crate::config::Config;
use crate::merge::LogicalUnit;
use unicode_normalization::UnicodeNormalization;

const MARKDOWN_FENCE: &str = "```markdown";

/// Normalizes raw oracle output into the page text that gets classified.
pub fn clean_page(cfg: &Config, raw: &str) -> String {
    let mut s = if cfg.postprocess.normalize_newlines {
        raw.replace("\r\n", "\n").replace('\r', "\n")
    } else {
        raw.to_string()
    };

    if cfg.postprocess.strip_markdown_fence {
        s = strip_markdown_fence(&s);
    }

    if cfg.postprocess.normalize_unicode {
        s = s.nfkc().collect::<String>();
    }

    if cfg.postprocess.trim_trailing_whitespace {
        s = s
            .lines()
            .map(str::trim_end)
            .collect::<Vec<_>>()
            .join("\n");
    }

    s.trim().to_string()
}

/// Models often wrap the whole answer in a ```` ```markdown ```` block; keep
/// only its body when present.
pub fn strip_markdown_fence(s: &str) -> String {
    fenced_body(s)
        .map(|body| body.trim().to_string())
        .unwrap_or_else(|| s.trim().to_string())
}

fn fenced_body(s: &str) -> Option<&str> {
    let open = s.find(MARKDOWN_FENCE)?;
    let after_tag = &s[open + MARKDOWN_FENCE.len()..];
    let line_end = after_tag.find('\n')?;
    if !after_tag[..line_end].trim().is_empty() {
        return None;
    }
    let body = &after_tag[line_end + 1..];
    // Inner sample fences are common; the wrapper closes at the last fence.
    let close = body.rfind("\n```").unwrap_or(body.len());
    Some(&body[..close])
}

/// The full output document: a header, then every unit behind a comment that
/// records its ordinal and source pages, separated by horizontal rules.
pub fn render_document(name: &str, pages_total: u32, units: &[LogicalUnit]) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {name}\n\n"));
    out.push_str(&format!(
        "Processed {pages_total} pages, extracted {} units\n\n",
        units.len()
    ));
    out.push_str("---\n\n");

    for (i, unit) in units.iter().enumerate() {
        out.push_str(&format!(
            "<!-- unit {}, pages: {} -->\n\n",
            i + 1,
            join_pages(&unit.pages)
        ));
        out.push_str(unit.content.trim());
        out.push_str("\n\n---\n\n");
    }
    out
}

pub fn join_pages(pages: &[u32]) -> String {
    pages
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
