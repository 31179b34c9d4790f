//! Ingestion of annotated corpus fragments.
//!
//! Each fragment file is a C/C++ snippet followed by a trailing `//` comment
//! block such as:
//!
//! ```text
//! // CWE-ID Detection: Working
//! // Line Detection: Not Working (Should be line 3)
//!
//! // BigVul Row No: 3886
//! // CppCheck ID: 175
//! // CWE-ID: CWE-119 (Top-19, Improper restriction of operations ...)
//! ```

use super::{RawCwe, RawLine, RawRecord};
use crate::error::Result;
use fancy_regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info};
use walkdir::WalkDir;

const FRAGMENT_EXTENSIONS: &[&str] = &["c", "cc", "cpp", "cxx", "h", "hpp"];

static CWE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*//\s*CWE-ID\s*:\s*(CWE-\d+)").ok());
static ROW_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*//\s*BigVul Row No\s*:\s*(\d+)").ok());
static TOOL_ID_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*//\s*CppCheck ID\s*:\s*(\d+)").ok());
static SHOULD_BE_LINE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)should be line\s+(\d+)").ok());
// Detection notes, but not the `CWE-ID:` label line itself.
static NOTE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?!CWE-ID\s*:).*(?:detection|working|correct cwe)").ok()
});

fn capture(re: &LazyLock<Option<Regex>>, text: &str) -> Option<String> {
    let re = re.as_ref()?;
    let caps = re.captures(text).ok()??;
    caps.get(1).map(|m| m.as_str().to_string())
}

fn is_match(re: &LazyLock<Option<Regex>>, text: &str) -> bool {
    re.as_ref()
        .and_then(|re| re.is_match(text).ok())
        .unwrap_or(false)
}

/// Parse one annotated fragment into a raw record. `fallback_id` (usually the
/// file stem) is used when the fragment carries no tool id.
pub fn parse_fragment(content: &str, fallback_id: &str) -> RawRecord {
    let lines: Vec<&str> = content.lines().collect();
    let body_end = lines
        .iter()
        .rposition(|l| {
            let t = l.trim();
            !t.is_empty() && !t.starts_with("//")
        })
        .map(|i| i + 1)
        .unwrap_or(0);

    let trailer = lines[body_end..].join("\n");
    let source_text = (body_end > 0).then(|| {
        let mut body = lines[..body_end].join("\n");
        body.push('\n');
        body
    });

    let notes: Vec<&str> = lines[body_end..]
        .iter()
        .map(|l| l.trim().trim_start_matches('/').trim())
        .filter(|l| !l.is_empty() && is_match(&NOTE_RE, l))
        .collect();

    let id = capture(&TOOL_ID_RE, &trailer).unwrap_or_else(|| fallback_id.to_string());
    let line = match capture(&SHOULD_BE_LINE_RE, &trailer) {
        Some(n) => RawLine::Text(n),
        None => RawLine::Text("unknown".into()),
    };

    RawRecord {
        id: Some(id),
        source_text,
        fixed_text: None,
        cwe: capture(&CWE_RE, &trailer).map(RawCwe::One),
        line: Some(line),
        provenance_row: capture(&ROW_RE, &trailer),
        clean: false,
        note: (!notes.is_empty()).then(|| notes.join("; ")),
    }
}

/// Walk `root` for fragment files (sorted by name) and parse each.
pub fn load_dir(root: &Path) -> Result<Vec<RawRecord>> {
    let mut records = Vec::new();
    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !entry.file_type().is_file()
            || !path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| FRAGMENT_EXTENSIONS.contains(&e))
        {
            continue;
        }
        let content = std::fs::read_to_string(path)?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!(file = %path.display(), "parsing fragment");
        records.push(parse_fragment(&content, &stem));
    }
    info!(root = %root.display(), count = records.len(), "annotated fragments parsed");
    Ok(records)
}
