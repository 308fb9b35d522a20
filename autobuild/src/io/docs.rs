//! Best-effort documentation lookup for unfamiliar references.
//!
//! Pages are fetched through a [`DocSource`]; the HTTP source caches each page
//! on disk under the SHA-256 of its URL. Lookup failures never block a task:
//! they are logged and produce no notes.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use crate::core::context::ResearchNote;
use crate::core::research::{DOC_SOURCES, extract_snippets, html_to_text, unfamiliar_references};

/// Fetches a documentation page. `Ok(None)` means "nothing there".
pub trait DocSource {
    fn fetch(&self, url: &str) -> Result<Option<String>>;
}

/// HTTP document source with a per-request timeout and an on-disk page cache.
#[derive(Debug, Clone)]
pub struct HttpDocSource {
    cache_dir: PathBuf,
    timeout: Duration,
}

impl HttpDocSource {
    pub fn new(cache_dir: &Path, timeout: Duration) -> Self {
        Self {
            cache_dir: cache_dir.to_path_buf(),
            timeout,
        }
    }

    pub fn cache_path(&self, url: &str) -> PathBuf {
        let digest = Sha256::digest(url.as_bytes());
        self.cache_dir.join(format!("{}.html", hex::encode(digest)))
    }

    /// Remove every cached page. Returns how many were deleted.
    pub fn clear_cache(&self) -> Result<usize> {
        if !self.cache_dir.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in fs::read_dir(&self.cache_dir)
            .with_context(|| format!("read cache dir {}", self.cache_dir.display()))?
        {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "html") {
                fs::remove_file(&path)
                    .with_context(|| format!("remove cached page {}", path.display()))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl DocSource for HttpDocSource {
    #[instrument(skip(self), fields(timeout_secs = self.timeout.as_secs()))]
    fn fetch(&self, url: &str) -> Result<Option<String>> {
        let cache_path = self.cache_path(url);
        if cache_path.exists() {
            debug!(path = %cache_path.display(), "doc page cache hit");
            let cached = fs::read_to_string(&cache_path)
                .with_context(|| format!("read cached page {}", cache_path.display()))?;
            return Ok(Some(cached));
        }

        let response = match ureq::get(url).timeout(self.timeout).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => {
                debug!(code, "doc page not available");
                return Ok(None);
            }
            Err(err) => return Err(anyhow!("fetch {url}: {err}")),
        };
        let body = response
            .into_string()
            .with_context(|| format!("read body of {url}"))?;

        fs::create_dir_all(&self.cache_dir)
            .with_context(|| format!("create cache dir {}", self.cache_dir.display()))?;
        fs::write(&cache_path, &body)
            .with_context(|| format!("write cached page {}", cache_path.display()))?;
        Ok(Some(body))
    }
}

/// Searches the fixed reference sources for unfamiliar references in a task.
pub struct Researcher {
    source: Box<dyn DocSource + Send + Sync>,
    sources: Vec<(String, String)>,
    max_snippets: usize,
}

impl Researcher {
    pub fn new(source: Box<dyn DocSource + Send + Sync>, max_snippets: usize) -> Self {
        Self {
            source,
            sources: DOC_SOURCES
                .iter()
                .map(|(name, url)| (name.to_string(), url.to_string()))
                .collect(),
            max_snippets,
        }
    }

    /// Snippets for `query` from the landing page of `library`.
    pub fn search(&self, library: &str, query: &str) -> Result<Vec<String>> {
        let library = library.to_lowercase();
        let url = self
            .sources
            .iter()
            .find(|(name, _)| *name == library)
            .map(|(_, url)| url.as_str())
            .ok_or_else(|| anyhow!("unsupported library for research: {library}"))?;
        let Some(html) = self.source.fetch(url)? else {
            return Ok(Vec::new());
        };
        Ok(extract_snippets(&html_to_text(&html), query, self.max_snippets))
    }

    /// Notes for every unfamiliar reference in `task`. Never fails.
    ///
    /// Sources are tried in order; the first one with hits wins for each reference.
    pub fn research(&self, task: &str) -> Vec<ResearchNote> {
        let mut notes = Vec::new();
        for reference in unfamiliar_references(task) {
            for (library, _) in &self.sources {
                match self.search(library, &reference) {
                    Ok(snippets) if !snippets.is_empty() => {
                        debug!(%reference, %library, count = snippets.len(), "found documentation");
                        notes.push(ResearchNote {
                            reference: reference.clone(),
                            source: library.clone(),
                            snippets,
                        });
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(%reference, %library, error = %format!("{err:#}"), "documentation lookup failed");
                    }
                }
            }
        }
        notes
    }
}
