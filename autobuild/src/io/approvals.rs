//! Approval queue for protected writes.
//!
//! The gate owns its own lock and map, independent of the state store, so
//! approval queries never contend with state mutations. Approving only flips
//! the status; applying the write is a separate step (`GuardedWriter`).
//!
//! A file-backed gate is shared with other processes: the loop queues, the
//! CLI resolves. Every read reloads `approvals.json`, and every mutation
//! reloads, applies and rewrites it while holding `approvals.lock`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::core::types::{ApprovalStatus, PendingApproval, generate_id};
use crate::io::lock::FileLock;

const APPROVAL_ID_LEN: usize = 8;

type Records = IndexMap<String, PendingApproval>;

#[derive(Debug)]
pub struct ApprovalGate {
    /// When set, the queue lives in this file.
    path: Option<PathBuf>,
    approvals: Mutex<Records>,
}

impl ApprovalGate {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            approvals: Mutex::new(IndexMap::new()),
        }
    }

    /// File-backed gate. A missing or unreadable file starts an empty queue.
    pub fn open(path: &Path) -> Result<Self> {
        let approvals = read_records(path)?;
        debug!(path = %path.display(), count = approvals.len(), "approval gate opened");
        Ok(Self {
            path: Some(path.to_path_buf()),
            approvals: Mutex::new(approvals),
        })
    }

    /// Queue a write for review. Always creates a new pending record.
    pub fn request_approval(
        &self,
        file_path: &str,
        content: &str,
        reason: &str,
    ) -> Result<PendingApproval> {
        let approval = self.update(|approvals| {
            let mut id = generate_id(APPROVAL_ID_LEN);
            while approvals.contains_key(&id) {
                id = generate_id(APPROVAL_ID_LEN);
            }
            let approval = PendingApproval {
                id: id.clone(),
                file_path: file_path.to_string(),
                content: content.to_string(),
                reason: reason.to_string(),
                requested_at: Utc::now(),
                status: ApprovalStatus::Pending,
                reviewed_at: None,
            };
            approvals.insert(id, approval.clone());
            (approval, true)
        })?;
        info!(id = %approval.id, path = file_path, "protected write queued for approval");
        Ok(approval)
    }

    pub fn approve(&self, id: &str) -> Result<Option<PendingApproval>> {
        self.resolve(id, ApprovalStatus::Approved)
    }

    pub fn deny(&self, id: &str) -> Result<Option<PendingApproval>> {
        self.resolve(id, ApprovalStatus::Denied)
    }

    pub fn get(&self, id: &str) -> Option<PendingApproval> {
        self.view(|approvals| approvals.get(id).cloned())
    }

    /// The oldest still-pending request for `file_path`, if any.
    pub fn pending_for(&self, file_path: &str) -> Option<PendingApproval> {
        self.view(|approvals| {
            approvals
                .values()
                .find(|approval| {
                    approval.status == ApprovalStatus::Pending && approval.file_path == file_path
                })
                .cloned()
        })
    }

    pub fn get_pending(&self) -> Vec<PendingApproval> {
        self.view(|approvals| {
            approvals
                .values()
                .filter(|approval| approval.status == ApprovalStatus::Pending)
                .cloned()
                .collect()
        })
    }

    pub fn get_all(&self) -> Vec<PendingApproval> {
        self.view(|approvals| approvals.values().cloned().collect())
    }

    /// Drop every approved or denied record. Returns how many were removed.
    pub fn clear_resolved(&self) -> Result<usize> {
        let removed = self.update(|approvals| {
            let before = approvals.len();
            approvals.retain(|_, approval| approval.status == ApprovalStatus::Pending);
            let removed = before - approvals.len();
            (removed, removed > 0)
        })?;
        debug!(removed, "cleared resolved approvals");
        Ok(removed)
    }

    /// Pending → `status` exactly once; anything else is a no-op returning `None`.
    fn resolve(&self, id: &str, status: ApprovalStatus) -> Result<Option<PendingApproval>> {
        let resolved = self.update(|approvals| {
            let Some(approval) = approvals.get_mut(id) else {
                debug!(id, "resolve for unknown approval ignored");
                return (None, false);
            };
            if approval.status != ApprovalStatus::Pending {
                debug!(id, status = ?approval.status, "approval already resolved");
                return (None, false);
            }
            approval.status = status;
            approval.reviewed_at = Some(Utc::now());
            (Some(approval.clone()), true)
        })?;
        if let Some(approval) = &resolved {
            info!(id, status = ?status, path = %approval.file_path, "approval resolved");
        }
        Ok(resolved)
    }

    /// Read against the latest queue. A failed reload serves the last known one.
    fn view<T>(&self, read: impl FnOnce(&Records) -> T) -> T {
        let mut approvals = self.approvals.lock();
        if let Some(path) = &self.path {
            match read_records(path) {
                Ok(latest) => *approvals = latest,
                Err(err) => warn!(path = %path.display(), error = %format!("{err:#}"), "approvals reload failed"),
            }
        }
        read(&approvals)
    }

    /// Reload, apply `mutate` and persist when it reports a change, all under
    /// the cross-process lock.
    fn update<T>(&self, mutate: impl FnOnce(&mut Records) -> (T, bool)) -> Result<T> {
        let mut approvals = self.approvals.lock();
        let Some(path) = &self.path else {
            return Ok(mutate(&mut approvals).0);
        };
        let _lock = FileLock::acquire(&path.with_extension("lock"))?;
        *approvals = read_records(path)?;
        let (result, changed) = mutate(&mut approvals);
        if changed {
            write_records(path, &approvals)?;
        }
        Ok(result)
    }
}

fn read_records(path: &Path) -> Result<Records> {
    if !path.exists() {
        return Ok(IndexMap::new());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read approvals {}", path.display()))?;
    match serde_json::from_str::<Vec<PendingApproval>>(&contents) {
        Ok(list) => Ok(list
            .into_iter()
            .map(|approval| (approval.id.clone(), approval))
            .collect()),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "unreadable approvals, starting empty");
            Ok(IndexMap::new())
        }
    }
}

fn write_records(path: &Path, approvals: &Records) -> Result<()> {
    let list: Vec<&PendingApproval> = approvals.values().collect();
    let mut buf = serde_json::to_string_pretty(&list).context("serialize approvals")?;
    buf.push('\n');
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp approvals {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace approvals {}", path.display()))
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self::in_memory()
    }
}
