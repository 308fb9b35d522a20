//! Test-only doubles for the executor, planner, validator and documentation seams.

use std::collections::HashMap;

use anyhow::{Result, anyhow};
use parking_lot::Mutex;
use tempfile::TempDir;

use crate::core::context::TaskContext;
use crate::io::docs::DocSource;
use crate::io::executor::{ExecOutput, Executor, PlanOutput, Planner};
use crate::io::state_store::StateStore;
use crate::io::validator::{ValidationOutcome, ValidationRequest, Validator};

/// A fresh store backed by a file in a new temp dir. Keep the dir alive.
pub fn temp_store() -> (TempDir, StateStore) {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = StateStore::load(&temp.path().join(".autobuild/state/system_state.json"))
        .expect("load store");
    (temp, store)
}

/// Executor answering from a script keyed by task text.
///
/// Unscripted tasks succeed with `executed: <task>`. Every call is recorded.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    script: HashMap<String, std::result::Result<String, String>>,
    calls: Mutex<Vec<(String, TaskContext)>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, task: &str, output: &str) -> Self {
        self.script.insert(task.to_string(), Ok(output.to_string()));
        self
    }

    pub fn with_failure(mut self, task: &str, error: &str) -> Self {
        self.script.insert(task.to_string(), Err(error.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<(String, TaskContext)> {
        self.calls.lock().clone()
    }
}

impl Executor for ScriptedExecutor {
    fn execute(&self, task: &str, context: &TaskContext) -> Result<ExecOutput> {
        self.calls.lock().push((task.to_string(), context.clone()));
        match self.script.get(task) {
            Some(Ok(output)) => Ok(ExecOutput {
                output: output.clone(),
            }),
            Some(Err(error)) => Err(anyhow!("{error}")),
            None => Ok(ExecOutput {
                output: format!("executed: {task}"),
            }),
        }
    }
}

/// Planner answering from a script keyed by goal. Unscripted goals get an empty plan.
#[derive(Debug, Default)]
pub struct ScriptedPlanner {
    plans: HashMap<String, PlanOutput>,
    failures: HashMap<String, String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plan(mut self, goal: &str, plan: PlanOutput) -> Self {
        self.plans.insert(goal.to_string(), plan);
        self
    }

    pub fn with_failure(mut self, goal: &str, error: &str) -> Self {
        self.failures.insert(goal.to_string(), error.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl Planner for ScriptedPlanner {
    fn plan(&self, goal: &str, _context: &TaskContext) -> Result<PlanOutput> {
        self.calls.lock().push(goal.to_string());
        if let Some(error) = self.failures.get(goal) {
            return Err(anyhow!("{error}"));
        }
        Ok(self.plans.get(goal).cloned().unwrap_or_default())
    }
}

/// Validator returning a fixed outcome and recording requests.
#[derive(Debug)]
pub struct ScriptedValidator {
    outcome: ValidationOutcome,
    requests: Mutex<Vec<ValidationRequest>>,
}

impl ScriptedValidator {
    pub fn new(outcome: ValidationOutcome) -> Self {
        Self {
            outcome,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ValidationRequest> {
        self.requests.lock().clone()
    }
}

impl Validator for ScriptedValidator {
    fn validate(&self, request: &ValidationRequest) -> Result<ValidationOutcome> {
        self.requests.lock().push(request.clone());
        Ok(self.outcome)
    }
}

/// In-memory pages keyed by URL. Unknown URLs have no page.
#[derive(Debug, Default)]
pub struct StaticDocSource {
    pages: HashMap<String, String>,
    failing: bool,
}

impl StaticDocSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    /// Every fetch errors, as if the network were down.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }
}

impl DocSource for StaticDocSource {
    fn fetch(&self, url: &str) -> Result<Option<String>> {
        if self.failing {
            return Err(anyhow!("connection refused: {url}"));
        }
        Ok(self.pages.get(url).cloned())
    }
}
