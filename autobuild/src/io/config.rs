//! Coordinator configuration stored under `.autobuild/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::capabilities::{CapabilitySpec, baseline_capabilities};
use crate::core::hot_set::DEFAULT_CAPACITY;
use crate::core::protection::ProtectionRules;
use crate::io::state_store::DEFAULT_CACHE_TTL_SECS;

/// Hard upper bound on the decomposition depth ceiling.
pub const MAX_DEPTH_LIMIT: u32 = 8;
/// Ten years.
pub const MAX_CACHE_TTL_SECS: u64 = 10 * 365 * 24 * 3600;

/// Canonical paths within `.autobuild/` for a project root.
#[derive(Debug, Clone)]
pub struct AutobuildPaths {
    pub root: PathBuf,
    pub autobuild_dir: PathBuf,
    pub config_path: PathBuf,
    pub state_dir: PathBuf,
    pub state_path: PathBuf,
    pub approvals_path: PathBuf,
    /// Held by whichever process is writing `state_path`.
    pub state_lock_path: PathBuf,
    pub docs_cache_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl AutobuildPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let autobuild_dir = root.join(".autobuild");
        let state_dir = autobuild_dir.join("state");
        Self {
            root: root.clone(),
            config_path: autobuild_dir.join("config.toml"),
            state_path: state_dir.join("system_state.json"),
            approvals_path: state_dir.join("approvals.json"),
            state_lock_path: state_dir.join("autobuild.lock"),
            docs_cache_dir: autobuild_dir.join("cache").join("docs"),
            logs_dir: autobuild_dir.join("logs"),
            state_dir,
            autobuild_dir,
        }
    }
}

/// Coordinator configuration (TOML).
///
/// Edited by humans; missing fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildConfig {
    /// Reconciliation cycles per `run` before giving up.
    pub max_iterations: u32,

    /// Pause between cycles, in milliseconds.
    pub cycle_delay_ms: u64,

    /// Deepest dispatch level that may still decompose or execute.
    pub max_depth: u32,

    pub cache_ttl_secs: u64,

    /// Size of the dispatcher's recency set of task hashes.
    pub hot_set_capacity: usize,

    pub executor: ExecutorConfig,
    pub research: ResearchConfig,
    pub validation: ValidationConfig,
    pub protection: ProtectionRules,

    /// Desired-state manifest. Empty means the built-in baseline.
    pub capabilities: Vec<CapabilitySpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Command that receives the rendered request on stdin, e.g. `["codex","exec","-"]`.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResearchConfig {
    pub enabled: bool,
    pub timeout_secs: u64,
    pub max_snippets: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ValidationConfig {
    /// Validation command; empty skips validation.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 10 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 10,
            max_snippets: 3,
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 10 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            cycle_delay_ms: 1000,
            max_depth: 2,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            hot_set_capacity: DEFAULT_CAPACITY,
            executor: ExecutorConfig::default(),
            research: ResearchConfig::default(),
            validation: ValidationConfig::default(),
            protection: ProtectionRules::default(),
            capabilities: Vec::new(),
        }
    }
}

impl BuildConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.max_depth > MAX_DEPTH_LIMIT {
            return Err(anyhow!("max_depth must be <= {MAX_DEPTH_LIMIT}"));
        }
        if self.cache_ttl_secs == 0 || self.cache_ttl_secs > MAX_CACHE_TTL_SECS {
            return Err(anyhow!("cache_ttl_secs must be in 1..={MAX_CACHE_TTL_SECS}"));
        }
        if self.hot_set_capacity == 0 {
            return Err(anyhow!("hot_set_capacity must be > 0"));
        }
        if self.executor.timeout_secs == 0 {
            return Err(anyhow!("executor.timeout_secs must be > 0"));
        }
        if self.executor.output_limit_bytes == 0 {
            return Err(anyhow!("executor.output_limit_bytes must be > 0"));
        }
        if self.research.timeout_secs == 0 {
            return Err(anyhow!("research.timeout_secs must be > 0"));
        }
        if self.validation.timeout_secs == 0 {
            return Err(anyhow!("validation.timeout_secs must be > 0"));
        }
        if self
            .capabilities
            .iter()
            .any(|cap| cap.name.trim().is_empty())
        {
            return Err(anyhow!("capabilities entries need a non-empty name"));
        }
        Ok(())
    }

    /// Executor command, rejecting an empty or blank program.
    pub fn executor_command(&self) -> Result<&[String]> {
        match self.executor.command.first() {
            Some(program) if !program.trim().is_empty() => Ok(&self.executor.command),
            _ => Err(anyhow!("executor.command must be a non-empty array")),
        }
    }

    /// Configured manifest, or the built-in baseline when none is declared.
    pub fn required_capabilities(&self) -> Vec<CapabilitySpec> {
        if self.capabilities.is_empty() {
            baseline_capabilities()
        } else {
            self.capabilities.clone()
        }
    }

    pub fn cycle_delay(&self) -> Duration {
        Duration::from_millis(self.cycle_delay_ms)
    }
}

/// Read `.autobuild/config.toml`; a missing file means all defaults.
pub fn load_config(path: &Path) -> Result<BuildConfig> {
    let cfg = match fs::read_to_string(path) {
        Ok(text) => toml::from_str::<BuildConfig>(&text)
            .with_context(|| format!("invalid config {}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => BuildConfig::default(),
        Err(e) => return Err(e).with_context(|| format!("open config {}", path.display())),
    };
    cfg.validate()
        .with_context(|| format!("check config {}", path.display()))?;
    Ok(cfg)
}

/// Replace the config file in one step so readers never see half a file.
pub fn write_config(path: &Path, cfg: &BuildConfig) -> Result<()> {
    cfg.validate()?;
    let text = format!("{}\n", toml::to_string_pretty(cfg).context("encode config")?.trim_end());
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("config path {} has no parent", path.display()))?;
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let staged = dir.join(".config.toml.partial");
    fs::write(&staged, text).with_context(|| format!("stage {}", staged.display()))?;
    fs::rename(&staged, path).with_context(|| format!("install {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, BuildConfig::default());
        assert_eq!(cfg.max_iterations, 10);
        assert_eq!(cfg.max_depth, 2);
        assert_eq!(cfg.cache_ttl_secs, 3600);
        assert_eq!(cfg.hot_set_capacity, 100);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = BuildConfig {
            capabilities: baseline_capabilities(),
            ..BuildConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "max_iterations = 3\n\n[executor]\ncommand = [\"agent\", \"run\"]\n\n[[capabilities]]\nname = \"docs\"\ndescription = \"Project docs\"\nfile_path = \"README.md\"\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_iterations, 3);
        assert_eq!(cfg.executor_command().expect("command"), ["agent", "run"]);
        assert_eq!(cfg.executor.timeout_secs, 600);
        assert_eq!(cfg.required_capabilities().len(), 1);
        assert_eq!(cfg.required_capabilities()[0].name, "docs");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let cfg = BuildConfig {
            max_depth: MAX_DEPTH_LIMIT + 1,
            ..BuildConfig::default()
        };
        assert!(cfg.validate().is_err());
        assert!(BuildConfig::default().executor_command().is_err());

        let cfg = BuildConfig {
            cache_ttl_secs: 100_000_000_000_000_000,
            ..BuildConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("cache_ttl_secs"), "{err:#}");
        let cfg = BuildConfig {
            cache_ttl_secs: MAX_CACHE_TTL_SECS,
            ..BuildConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }
}
