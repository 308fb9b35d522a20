//! Phase extraction from free-text plans.
//!
//! Planners are expected to emit either `Description: <text>` lines or a
//! numbered list (`1. <text>`). Labeled descriptions win; the numbered list is
//! only consulted when no labeled line is present.

use std::sync::LazyLock;

use regex::Regex;

static DESCRIPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[\s*\-#>]*\**description\**\s*:\**\s*(.+?)\s*$")
        .expect("description regex is valid")
});

static NUMBERED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*\d+[.)]\s+(.+?)\s*$").expect("numbered regex is valid")
});

/// Ordered phase descriptions found in `plan`. Empty when neither pattern matches.
pub fn extract_phases(plan: &str) -> Vec<String> {
    let described = collect(&DESCRIPTION_RE, plan);
    if !described.is_empty() {
        return described;
    }
    collect(&NUMBERED_RE, plan)
}

fn collect(re: &Regex, plan: &str) -> Vec<String> {
    re.captures_iter(plan)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().trim_matches('*').trim().to_string())
        .filter(|phase| !phase.is_empty())
        .collect()
}
