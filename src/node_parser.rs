//! Line parser (C2) — extracts a node-name token from a raw log line.
//!
//! Three patterns are tried in order, first match wins. The negative
//! constraint on the general pattern (`list=` / `result.name=` must not
//! appear anywhere on the line) is implemented as a plain substring check
//! after the match rather than a lookahead, since `regex` doesn't support
//! lookaround at all.

use std::sync::LazyLock;

use regex::Regex;

static ENTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[pipeline_data\.name=(.*?)\]\s*\|\s*enter").unwrap());
static COMPLETE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[pipeline_data\.name=(.*?)\]\s*\|\s*complete").unwrap());
static GENERAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[(?:node_name|pipeline_data\.name)=(.*?)\]").unwrap());

/// Extracts the node name from a log line, or `None` if the line carries no
/// recognizable node-execution event.
pub fn extract(line: &str) -> Option<String> {
    // Fast reject: an optimization, must never change the outcome. Matching
    // is case-insensitive, so the check runs against a lowercased copy —
    // otherwise an all-caps line would reject before the regexes below
    // (which are themselves case-insensitive) ever get a chance to match.
    let lower = line.to_ascii_lowercase();
    if !lower.contains("pipeline_data.name") && !lower.contains("node_name") {
        return None;
    }

    if let Some(caps) = ENTER_RE.captures(line) {
        return non_empty_trimmed(&caps[1]);
    }

    if let Some(caps) = COMPLETE_RE.captures(line) {
        return non_empty_trimmed(&caps[1]);
    }

    if let Some(caps) = GENERAL_RE.captures(line) {
        if line.contains("list=") || line.contains("result.name=") {
            return None;
        }
        return non_empty_trimmed(&caps[1]);
    }

    None
}

fn non_empty_trimmed(captured: &str) -> Option<String> {
    let trimmed = captured.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
