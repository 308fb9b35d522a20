//! Typed context handed to the execution and planning capabilities.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::core::types::SystemCapability;

/// Documentation snippets found for one unfamiliar reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResearchNote {
    pub reference: String,
    pub source: String,
    pub snippets: Vec<String>,
}

/// Everything an external capability is told about the task's surroundings.
///
/// Merge rules (`merge`): a set `project_root` replaces, non-empty
/// `generated_files`/`capabilities` replace, `research` and `phase_outputs`
/// append, `extras` keys from the override win.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskContext {
    pub project_root: Option<PathBuf>,
    pub generated_files: Vec<String>,
    pub capabilities: Vec<SystemCapability>,
    pub research: Vec<ResearchNote>,
    /// Outputs of earlier phases of the same decomposed task, in order.
    pub phase_outputs: Vec<String>,
    pub extras: BTreeMap<String, String>,
}

impl TaskContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<String>) -> Self {
        self.extras.insert(key.to_string(), value.into());
        self
    }

    pub fn merge(&mut self, other: TaskContext) {
        if other.project_root.is_some() {
            self.project_root = other.project_root;
        }
        if !other.generated_files.is_empty() {
            self.generated_files = other.generated_files;
        }
        if !other.capabilities.is_empty() {
            self.capabilities = other.capabilities;
        }
        self.research.extend(other.research);
        self.phase_outputs.extend(other.phase_outputs);
        self.extras.extend(other.extras);
    }

    pub fn merged(mut self, other: TaskContext) -> Self {
        self.merge(other);
        self
    }
}
