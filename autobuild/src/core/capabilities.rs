//! Baseline capability manifest and artifact-derived capability names.

use serde::{Deserialize, Serialize};

use crate::core::types::SystemCapability;

/// One entry of the desired-state manifest (`[[capabilities]]` in config).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub file_path: Option<String>,
    /// Declared as already satisfied when first registered.
    #[serde(default)]
    pub implemented: bool,
}

impl CapabilitySpec {
    pub fn to_capability(&self) -> SystemCapability {
        SystemCapability {
            name: self.name.clone(),
            description: self.description.clone(),
            implemented: self.implemented,
            file_path: self.file_path.clone(),
        }
    }
}

const BASELINE: &[(&str, &str, &str, bool)] = &[
    (
        "dispatcher",
        "Task dispatcher with caching and bounded decomposition",
        "autobuild/src/dispatch.rs",
        true,
    ),
    (
        "build_loop",
        "Reconciliation loop that closes capability gaps",
        "autobuild/src/build_loop.rs",
        true,
    ),
    (
        "state_store",
        "Crash-safe persistent state store",
        "autobuild/src/io/state_store.rs",
        true,
    ),
    (
        "approval_gate",
        "Approval queue for protected writes",
        "autobuild/src/io/approvals.rs",
        true,
    ),
    (
        "planner_agent",
        "Agent that decomposes goals into executable steps",
        "agents/planner.md",
        false,
    ),
    (
        "builder_agent",
        "Agent that writes and updates code files",
        "agents/builder.md",
        false,
    ),
    (
        "validator_agent",
        "Agent that validates generated code",
        "agents/validator.md",
        false,
    ),
    (
        "api_server",
        "HTTP server exposing state and approvals",
        "server/src/main.rs",
        false,
    ),
    (
        "control_ui",
        "Web UI for monitoring and control",
        "ui/index.html",
        false,
    ),
];

/// Built-in desired-state manifest used when config declares none.
pub fn baseline_capabilities() -> Vec<CapabilitySpec> {
    BASELINE
        .iter()
        .map(|(name, description, path, implemented)| CapabilitySpec {
            name: name.to_string(),
            description: description.to_string(),
            file_path: Some(path.to_string()),
            implemented: *implemented,
        })
        .collect()
}

/// Deterministic capability name for a generated artifact path.
///
/// `artifact_` followed by the lowercased path with every run of
/// non-alphanumeric characters collapsed to a single `_`.
pub fn derived_capability_name(path: &str) -> String {
    let mut name = String::from("artifact_");
    let mut pending_sep = false;
    for c in path.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !name.ends_with('_') {
                name.push('_');
            }
            pending_sep = false;
            name.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    name
}
