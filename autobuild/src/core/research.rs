//! Text helpers for documentation research.
//!
//! Detects library-like references a task introduces, and pulls short
//! snippets around a query out of fetched documentation pages.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

/// Reference documentation sources: library name → landing page.
pub const DOC_SOURCES: &[(&str, &str)] = &[
    ("docker", "https://docs.docker.com/"),
    ("docsrs", "https://docs.rs/"),
    ("githubapi", "https://docs.github.com/en/rest"),
    ("nodejs", "https://nodejs.org/en/docs/"),
    ("python", "https://docs.python.org/3/"),
    ("react", "https://react.dev"),
    ("rust", "https://doc.rust-lang.org/std/"),
    ("tailwindcss", "https://tailwindcss.com/docs"),
];

/// Libraries the coordinator already knows; never researched.
pub const KNOWN_LIBRARIES: &[&str] = &[
    "anyhow", "axum", "chrono", "clap", "docker", "fastapi", "git", "hyper", "json", "nextjs",
    "node", "nodejs", "python", "react", "regex", "reqwest", "rust", "serde", "serde_json",
    "sqlite", "std", "tailwindcss", "tokio", "toml", "tracing", "typescript",
];

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "any", "care", "it", "its", "our", "that", "the", "their", "these", "this",
    "those", "to", "your",
];

/// Characters of context kept on each side of a snippet match.
pub const SNIPPET_RADIUS: usize = 50;

static REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:using|use|with|via|import|library|framework|package|crate)\s+`?([A-Za-z][A-Za-z0-9_.\-]*)",
    )
    .expect("reference regex is valid")
});

static SCRIPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript)\b.*?</(script|style|noscript)\s*>")
        .expect("script regex is valid")
});

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag regex is valid"));

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex is valid"));

/// Library-like names introduced in `task` that are not already known.
///
/// Names are lowercased, trailing punctuation is dropped, and the result is
/// sorted and deduplicated.
pub fn unfamiliar_references(task: &str) -> Vec<String> {
    let found: BTreeSet<String> = REFERENCE_RE
        .captures_iter(task)
        .filter_map(|caps| caps.get(1))
        .map(|m| {
            m.as_str()
                .trim_end_matches(['.', '-', '_'])
                .to_lowercase()
        })
        .filter(|name| name.len() > 1)
        .filter(|name| !STOP_WORDS.contains(&name.as_str()))
        .filter(|name| !KNOWN_LIBRARIES.contains(&name.as_str()))
        .collect();
    found.into_iter().collect()
}

/// Visible text of an HTML page with whitespace collapsed.
pub fn html_to_text(html: &str) -> String {
    let without_scripts = SCRIPT_RE.replace_all(html, " ");
    let without_tags = TAG_RE.replace_all(&without_scripts, " ");
    WHITESPACE_RE
        .replace_all(&without_tags, " ")
        .trim()
        .to_string()
}

/// Up to `max` lowercase snippets of `text` surrounding occurrences of `query`.
pub fn extract_snippets(text: &str, query: &str, max: usize) -> Vec<String> {
    let haystack = text.to_lowercase();
    let needle = query.to_lowercase();
    if needle.is_empty() || max == 0 {
        return Vec::new();
    }
    haystack
        .match_indices(&needle)
        .take(max)
        .map(|(start, matched)| {
            let from = floor_char_boundary(&haystack, start.saturating_sub(SNIPPET_RADIUS));
            let to = ceil_char_boundary(
                &haystack,
                (start + matched.len() + SNIPPET_RADIUS).min(haystack.len()),
            );
            haystack[from..to].trim().to_string()
        })
        .collect()
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(s: &str, mut index: usize) -> usize {
    while index < s.len() && !s.is_char_boundary(index) {
        index += 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_unknown_library_mentions() {
        let refs = unfamiliar_references(
            "Build the cache using Moka and parse configs with serde, import `rkyv`.",
        );
        assert_eq!(refs, vec!["moka", "rkyv"]);
    }

    #[test]
    fn ignores_stop_words_and_known_libraries() {
        assert!(unfamiliar_references("Do this with the tokio runtime").is_empty());
        assert!(unfamiliar_references("Write a plain function").is_empty());
    }

    #[test]
    fn html_is_reduced_to_visible_text() {
        let html = "<html><head><style>p{}</style><script>var x=1;</script></head>\
                    <body><p>Hello   <b>world</b></p></body></html>";
        assert_eq!(html_to_text(html), "Hello world");
    }

    #[test]
    fn snippets_are_bounded_and_capped() {
        let text = format!("{} needle {} NEEDLE {}", "x".repeat(80), "y".repeat(80), "z");
        let snippets = extract_snippets(&text, "needle", 1);
        assert_eq!(snippets.len(), 1);
        assert!(snippets[0].contains("needle"));
        assert!(snippets[0].len() <= "needle".len() + 2 * SNIPPET_RADIUS);

        assert_eq!(extract_snippets(&text, "needle", 5).len(), 2);
        assert!(extract_snippets(&text, "", 5).is_empty());
    }
}
