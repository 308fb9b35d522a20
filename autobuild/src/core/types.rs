//! Shared data model for the coordinator.
//!
//! These types are the persisted contract of `system_state.json` and
//! `approvals.json`. They carry no I/O and must serialize deterministically.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Schema version stamped into freshly created state documents.
pub const STATE_VERSION: &str = "0.1.0";

/// Error text written onto steps found `running` at load time.
pub const INTERRUPTED_ERROR: &str = "process restarted mid-task";

/// Lifecycle of a single [`BuildStep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// The process stopped while the step was running; outcome unknown.
    Interrupted,
}

impl StepStatus {
    /// Status only moves forward; terminal states are final.
    pub fn can_transition_to(self, next: StepStatus) -> bool {
        match self {
            StepStatus::Pending => matches!(
                next,
                StepStatus::Running | StepStatus::Completed | StepStatus::Failed
            ),
            StepStatus::Running => matches!(
                next,
                StepStatus::Completed | StepStatus::Failed | StepStatus::Interrupted
            ),
            StepStatus::Completed | StepStatus::Failed | StepStatus::Interrupted => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Interrupted => "interrupted",
        }
    }
}

/// One record of attempted work. Appended once, then patched in place by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStep {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Name of the component that originated the step.
    pub agent: String,
    pub action: String,
    pub status: StepStatus,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl BuildStep {
    /// A freshly started step with a random id.
    pub fn running(agent: &str, action: impl Into<String>) -> Self {
        Self {
            id: generate_id(16),
            timestamp: Utc::now(),
            agent: agent.to_string(),
            action: action.into(),
            status: StepStatus::Running,
            result: None,
            error: None,
        }
    }
}

/// Declarative requirement the target project should satisfy. Keyed by `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemCapability {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub implemented: bool,
    #[serde(default)]
    pub file_path: Option<String>,
}

impl SystemCapability {
    pub fn new(name: &str, description: &str, file_path: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            implemented: false,
            file_path: file_path.map(str::to_string),
        }
    }
}

/// Aggregate root persisted to `system_state.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    pub version: String,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub build_steps: Vec<BuildStep>,
    #[serde(default)]
    pub capabilities: Vec<SystemCapability>,
    /// Produced artifact paths; set semantics, insertion order.
    #[serde(default)]
    pub generated_files: Vec<String>,
    /// Free-form metadata. Hosts the task result cache under [`TASK_CACHE_KEY`].
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Default for SystemState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            last_updated: Utc::now(),
            build_steps: Vec::new(),
            capabilities: Vec::new(),
            generated_files: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }
}

impl SystemState {
    pub fn capability(&self, name: &str) -> Option<&SystemCapability> {
        self.capabilities.iter().find(|cap| cap.name == name)
    }

    pub fn build_step(&self, id: &str) -> Option<&BuildStep> {
        self.build_steps.iter().find(|step| step.id == id)
    }

    /// Most recent `limit` steps, oldest first.
    pub fn recent_build_steps(&self, limit: usize) -> &[BuildStep] {
        let skip = self.build_steps.len().saturating_sub(limit);
        &self.build_steps[skip..]
    }
}

/// Metadata key holding the serialized task cache map.
pub const TASK_CACHE_KEY: &str = "task_cache";

/// Memoized result of a dispatched task, keyed by the task hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCacheEntry {
    pub hash: String,
    pub result: String,
    pub created_at: DateTime<Utc>,
}

impl TaskCacheEntry {
    /// Valid while `now - created_at < ttl_secs`. A TTL too large for
    /// `TimeDelta` never expires.
    pub fn is_valid_at(&self, now: DateTime<Utc>, ttl_secs: u64) -> bool {
        let ttl = i64::try_from(ttl_secs).ok().and_then(TimeDelta::try_seconds);
        match ttl {
            Some(ttl) => now.signed_duration_since(self.created_at) < ttl,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
}

/// A protected write held back until a human resolves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: String,
    pub file_path: String,
    pub content: String,
    #[serde(default)]
    pub reason: String,
    pub requested_at: DateTime<Utc>,
    pub status: ApprovalStatus,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
}

/// Random lowercase alphanumeric id of `len` characters.
pub fn generate_id(len: usize) -> String {
    use rand::Rng;
    use rand::distributions::Alphanumeric;

    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(len)
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_steps_only_move_forward() {
        assert!(StepStatus::Running.can_transition_to(StepStatus::Completed));
        assert!(StepStatus::Running.can_transition_to(StepStatus::Interrupted));
        assert!(!StepStatus::Completed.can_transition_to(StepStatus::Running));
        assert!(!StepStatus::Failed.can_transition_to(StepStatus::Completed));
        assert!(!StepStatus::Interrupted.can_transition_to(StepStatus::Failed));
    }

    #[test]
    fn cache_entry_expires_at_ttl_boundary() {
        let created_at = Utc::now();
        let entry = TaskCacheEntry {
            hash: "h".to_string(),
            result: "r".to_string(),
            created_at,
        };
        assert!(entry.is_valid_at(created_at + chrono::Duration::seconds(3599), 3600));
        assert!(!entry.is_valid_at(created_at + chrono::Duration::seconds(3600), 3600));
    }

    #[test]
    fn oversized_ttl_never_expires() {
        let created_at = Utc::now();
        let entry = TaskCacheEntry {
            hash: "h".to_string(),
            result: "r".to_string(),
            created_at,
        };
        let later = created_at + chrono::Duration::days(365 * 50);
        assert!(entry.is_valid_at(later, 100_000_000_000_000_000));
        assert!(entry.is_valid_at(later, u64::MAX));
    }

    #[test]
    fn generated_ids_have_requested_length() {
        let id = generate_id(8);
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn step_status_serializes_lowercase() {
        let json = serde_json::to_string(&StepStatus::Interrupted).expect("serialize");
        assert_eq!(json, "\"interrupted\"");
    }
}
