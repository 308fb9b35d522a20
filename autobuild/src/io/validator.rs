//! Post-generation validation adapter.
//!
//! The build loop runs the configured validation command after each generation
//! pass. Its outcome is recorded and logged; it does not roll anything back.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::io::config::{BuildConfig, ValidationConfig};
use crate::io::process::{Limits, run_bounded};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationOutcome {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct ValidationRequest {
    pub workdir: PathBuf,
    pub log_path: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl ValidationRequest {
    /// Request logging to `logs_dir/validation-<iteration>.log`.
    pub fn for_iteration(
        cfg: &ValidationConfig,
        workdir: &Path,
        logs_dir: &Path,
        iteration: u32,
    ) -> Self {
        Self {
            workdir: workdir.to_path_buf(),
            log_path: logs_dir.join(format!("validation-{iteration:03}.log")),
            timeout: Duration::from_secs(cfg.timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }
}

pub trait Validator {
    fn validate(&self, request: &ValidationRequest) -> Result<ValidationOutcome>;
}

/// Runs a configured command; exit status zero passes.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    command: Vec<String>,
}

impl CommandValidator {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    pub fn from_config(cfg: &BuildConfig) -> Self {
        Self::new(cfg.validation.command.clone())
    }
}

impl Validator for CommandValidator {
    #[instrument(skip_all, fields(log = %request.log_path.display()))]
    fn validate(&self, request: &ValidationRequest) -> Result<ValidationOutcome> {
        let Some((program, args)) = self.command.split_first() else {
            return Ok(ValidationOutcome::Skipped);
        };
        if program.trim().is_empty() {
            return Err(anyhow!("validation.command has a blank program"));
        }
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&request.workdir);

        let limits = Limits {
            timeout: request.timeout,
            output_limit_bytes: request.output_limit_bytes,
        };
        let output = run_bounded(cmd, None, limits)
            .with_context(|| format!("run validator {program}"))?;
        write_validation_log(&request.log_path, &output.transcript("validation"))?;

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "validation timed out");
            return Ok(ValidationOutcome::Fail);
        }
        if output.succeeded() {
            info!("validation passed");
            Ok(ValidationOutcome::Pass)
        } else {
            warn!(exit_code = ?output.status.code(), "validation failed");
            Ok(ValidationOutcome::Fail)
        }
    }
}

fn write_validation_log(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create validation log dir {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write validation log {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(temp: &Path) -> ValidationRequest {
        ValidationRequest {
            workdir: temp.to_path_buf(),
            log_path: temp.join("logs").join("validation.log"),
            timeout: Duration::from_secs(10),
            output_limit_bytes: 1000,
        }
    }

    #[test]
    fn empty_command_is_skipped() {
        let temp = tempfile::tempdir().expect("tempdir");
        let outcome = CommandValidator::new(Vec::new())
            .validate(&request(temp.path()))
            .expect("validate");
        assert_eq!(outcome, ValidationOutcome::Skipped);
        assert!(!temp.path().join("logs").exists());
    }

    #[test]
    fn log_path_is_numbered_by_iteration() {
        let cfg = ValidationConfig::default();
        let req = ValidationRequest::for_iteration(&cfg, Path::new("/w"), Path::new("/w/logs"), 7);
        assert_eq!(req.log_path, Path::new("/w/logs/validation-007.log"));
        assert_eq!(req.output_limit_bytes, 100_000);
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_decides_outcome() {
        let temp = tempfile::tempdir().expect("tempdir");
        let pass = CommandValidator::new(vec!["sh".into(), "-c".into(), "echo ok".into()]);
        assert_eq!(
            pass.validate(&request(temp.path())).expect("pass"),
            ValidationOutcome::Pass
        );
        let log = fs::read_to_string(temp.path().join("logs").join("validation.log")).expect("log");
        assert!(log.contains("ok"));

        let fail = CommandValidator::new(vec!["sh".into(), "-c".into(), "exit 1".into()]);
        assert_eq!(
            fail.validate(&request(temp.path())).expect("fail"),
            ValidationOutcome::Fail
        );
    }
}
