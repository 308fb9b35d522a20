//! Path rules for protected and forbidden write targets.
//!
//! - Forbidden paths (credentials, version-control internals) are never written.
//! - Protected paths (the coordinator's own defining files) require approval.
//!
//! Matching is purely lexical over normalized, `/`-separated relative paths.

use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

/// Files that define the coordinator itself.
pub const DEFAULT_PROTECTED: &[&str] = &[
    "Cargo.toml",
    "autobuild/Cargo.toml",
    "autobuild/src/lib.rs",
    "autobuild/src/main.rs",
    "autobuild/src/dispatch.rs",
    "autobuild/src/build_loop.rs",
    "autobuild/src/core/protection.rs",
    "autobuild/src/io/state_store.rs",
    "autobuild/src/io/approvals.rs",
    "autobuild/src/io/writer.rs",
    "autobuild/src/io/config.rs",
    ".autobuild/config.toml",
];

/// Entries ending in `/` name directories matched at any depth.
pub const DEFAULT_FORBIDDEN: &[&str] = &[".env", ".env.local", ".git/"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionRules {
    pub protected: Vec<String>,
    pub forbidden: Vec<String>,
}

impl Default for ProtectionRules {
    fn default() -> Self {
        Self {
            protected: DEFAULT_PROTECTED.iter().map(|p| p.to_string()).collect(),
            forbidden: DEFAULT_FORBIDDEN.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl ProtectionRules {
    /// True when `path` equals a protected entry or ends with `/<entry>`.
    pub fn is_protected(&self, path: &str) -> bool {
        let normalized = normalize(path);
        self.protected.iter().any(|entry| {
            let entry = normalize(entry);
            normalized == entry || normalized.ends_with(&format!("/{entry}"))
        })
    }

    /// True when `path` is, or lives under, a forbidden entry.
    ///
    /// File entries are prefixes: any segment starting with `.env` is
    /// forbidden, so `.env.production` and `svc/.env.local.bak` are too.
    /// Directory entries match a whole segment at any depth.
    pub fn is_forbidden(&self, path: &str) -> bool {
        let normalized = normalize(path);
        let segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
        self.forbidden.iter().any(|entry| {
            if let Some(dir) = entry.strip_suffix('/') {
                let dir = normalize(dir);
                segments.iter().any(|segment| *segment == dir)
            } else {
                let entry = normalize(entry);
                !entry.is_empty()
                    && (normalized.starts_with(&entry)
                        || segments.iter().any(|segment| segment.starts_with(&entry)))
            }
        })
    }
}

/// Backslashes become `/`, leading `/` and `./` are dropped.
pub fn normalize(path: &str) -> String {
    let replaced = path.replace('\\', "/");
    let mut trimmed = replaced.as_str();
    loop {
        if let Some(rest) = trimmed.strip_prefix("./") {
            trimmed = rest;
        } else if let Some(rest) = trimmed.strip_prefix('/') {
            trimmed = rest;
        } else {
            break;
        }
    }
    trimmed.to_string()
}

/// Whether a relative path stays inside its root (no `..`, no absolute prefix).
pub fn stays_within_root(path: &str) -> bool {
    let replaced = path.replace('\\', "/");
    let path = Path::new(&replaced);
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protected_matches_exact_and_suffix() {
        let rules = ProtectionRules::default();
        assert!(rules.is_protected("autobuild/src/dispatch.rs"));
        assert!(rules.is_protected("/autobuild/src/dispatch.rs"));
        assert!(rules.is_protected("checkout/autobuild/src/dispatch.rs"));
        assert!(rules.is_protected("autobuild\\src\\main.rs"));
        assert!(!rules.is_protected("autobuild/src/dispatch.rs.bak"));
        assert!(!rules.is_protected("src/generated.rs"));
    }

    #[test]
    fn forbidden_matches_env_files_and_git_dirs() {
        let rules = ProtectionRules::default();
        assert!(rules.is_forbidden(".env"));
        assert!(rules.is_forbidden("./.env.local"));
        assert!(rules.is_forbidden("service/.env"));
        assert!(rules.is_forbidden(".git/config"));
        assert!(rules.is_forbidden("vendor/lib/.git/HEAD"));
        assert!(!rules.is_forbidden("src/gitignore.rs"));
        assert!(!rules.is_forbidden("docs/env.md"));
    }

    #[test]
    fn env_variants_are_forbidden_at_any_depth() {
        let rules = ProtectionRules::default();
        for path in [
            ".env.production",
            ".env.development",
            ".envrc",
            "config/.env.prod",
            "svc/.env.local.bak",
            ".env.d/secrets",
        ] {
            assert!(rules.is_forbidden(path), "{path} should be forbidden");
        }
    }

    #[test]
    fn root_escape_is_detected() {
        assert!(stays_within_root("src/lib.rs"));
        assert!(stays_within_root("./src/lib.rs"));
        assert!(!stays_within_root("../outside.rs"));
        assert!(!stays_within_root("src/../../outside.rs"));
        assert!(!stays_within_root("/etc/passwd"));
        assert!(!stays_within_root(""));
    }
}
