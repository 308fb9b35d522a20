//! Lightweight survey of the project tree.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Directories never descended into.
pub const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules", ".autobuild"];

const NO_EXTENSION: &str = "(none)";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepositorySummary {
    pub total_files: usize,
    pub by_extension: BTreeMap<String, usize>,
}

/// Count the project's files by extension. Unreadable entries are skipped.
pub fn inspect_repository(root: &Path) -> RepositorySummary {
    let mut summary = RepositorySummary::default();
    for entry in WalkDir::new(root)
        .sort_by(|a, b| a.path().cmp(b.path()))
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_skipped(entry))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(%err, root = %root.display(), "skipping path during inspection");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let extension = entry
            .path()
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| NO_EXTENSION.to_string());
        *summary.by_extension.entry(extension).or_default() += 1;
        summary.total_files += 1;
    }
    summary
}

fn is_skipped(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRS.contains(&name))
}
