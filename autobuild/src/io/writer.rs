//! The only write path for generated files.
//!
//! Forbidden targets are refused, protected targets are diverted to the
//! approval gate, everything else is written and registered as an artifact.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::protection::{ProtectionRules, normalize, stays_within_root};
use crate::core::types::ApprovalStatus;
use crate::io::approvals::ApprovalGate;
use crate::io::state_store::StateStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WriteOutcome {
    Written { path: String },
    PendingApproval { id: String },
    Blocked { reason: String },
}

pub struct GuardedWriter<'a> {
    root: PathBuf,
    store: &'a StateStore,
    gate: &'a ApprovalGate,
    rules: ProtectionRules,
}

impl<'a> GuardedWriter<'a> {
    pub fn new(
        root: &Path,
        store: &'a StateStore,
        gate: &'a ApprovalGate,
        rules: ProtectionRules,
    ) -> Self {
        Self {
            root: root.to_path_buf(),
            store,
            gate,
            rules,
        }
    }

    #[instrument(skip(self, content), fields(bytes = content.len()))]
    pub fn write(&self, path: &str, content: &str, reason: &str) -> Result<WriteOutcome> {
        if let Some(reason) = self.blocked_reason(path) {
            warn!(path, %reason, "write blocked");
            return Ok(WriteOutcome::Blocked { reason });
        }
        let relative = normalize(path);
        if self.rules.is_protected(&relative) {
            // One open request per path; later attempts wait on the first.
            if let Some(existing) = self.gate.pending_for(&relative) {
                debug!(id = %existing.id, path = %relative, "write already awaiting approval");
                return Ok(WriteOutcome::PendingApproval { id: existing.id });
            }
            let approval = self.gate.request_approval(&relative, content, reason)?;
            return Ok(WriteOutcome::PendingApproval { id: approval.id });
        }
        self.commit(&relative, content, reason)?;
        Ok(WriteOutcome::Written { path: relative })
    }

    /// Perform the write recorded by an approved request.
    pub fn apply_approved(&self, id: &str) -> Result<WriteOutcome> {
        let approval = self
            .gate
            .get(id)
            .ok_or_else(|| anyhow!("unknown approval {id}"))?;
        if approval.status != ApprovalStatus::Approved {
            return Err(anyhow!(
                "approval {id} is {:?}, only approved writes can be applied",
                approval.status
            ));
        }
        if let Some(reason) = self.blocked_reason(&approval.file_path) {
            warn!(id, path = %approval.file_path, %reason, "approved write blocked");
            return Ok(WriteOutcome::Blocked { reason });
        }
        let relative = normalize(&approval.file_path);
        self.commit(&relative, &approval.content, &approval.reason)?;
        info!(id, path = %relative, "approved write applied");
        Ok(WriteOutcome::Written { path: relative })
    }

    fn blocked_reason(&self, path: &str) -> Option<String> {
        if !stays_within_root(&normalize(path)) {
            return Some(format!("{path} escapes the project root"));
        }
        if self.rules.is_forbidden(path) {
            return Some(format!("{path} is a forbidden path"));
        }
        None
    }

    fn commit(&self, relative: &str, content: &str, reason: &str) -> Result<()> {
        let target = self.root.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&target, content).with_context(|| format!("write {}", target.display()))?;
        let description = (!reason.trim().is_empty()).then_some(reason);
        self.store.add_generated_artifact(relative, description)?;
        info!(path = relative, "file written");
        Ok(())
    }
}
