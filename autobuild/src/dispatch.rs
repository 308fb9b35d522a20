//! Task dispatch: de-duplication, bounded decomposition and atomic execution.
//!
//! A dispatched task is answered in one of four ways:
//!
//! - past the depth ceiling, with a fixed sentinel and no execution;
//! - from the durable result cache, when its hash is in the recency hot set;
//! - by decomposing it into phases that run strictly in sequence;
//! - by handing it to the executor as a single atomic task.
//!
//! Decomposition uses an explicit work stack instead of recursion. Each frame
//! is a decomposed task waiting for its phases; a phase that is itself complex
//! pushes another frame one level deeper.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, instrument, warn};

use crate::core::classifier::is_complex;
use crate::core::context::TaskContext;
use crate::core::hot_set::RecentHashes;
use crate::core::phases::extract_phases;
use crate::core::types::{BuildStep, StepStatus};
use crate::io::config::BuildConfig;
use crate::io::docs::Researcher;
use crate::io::executor::{Executor, Planner};
use crate::io::state_store::StateStore;

pub const DEPTH_LIMIT_OUTPUT: &str = "max recursion depth reached";

const AGENT: &str = "dispatcher";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Deepest level that may still run. Complex tasks at this level run atomically.
    pub max_depth: u32,
    pub project_root: Option<PathBuf>,
    pub hot_set_capacity: usize,
    pub research: bool,
}

impl DispatchConfig {
    pub fn from_build_config(cfg: &BuildConfig, project_root: &Path) -> Self {
        Self {
            max_depth: cfg.max_depth,
            project_root: Some(project_root.to_path_buf()),
            hot_set_capacity: cfg.hot_set_capacity,
            research: cfg.research.enabled,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            project_root: None,
            hot_set_capacity: crate::core::hot_set::DEFAULT_CAPACITY,
            research: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchOutput {
    pub output: String,
    pub metadata: DispatchMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchMetadata {
    /// SHA-256 of the task text, hex encoded.
    pub hash: String,
    pub depth: u32,
    pub kind: DispatchKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchKind {
    Atomic {
        step_id: String,
    },
    Cached,
    Decomposed {
        parent_step_id: String,
        phases: Vec<PhaseOutcome>,
    },
    DepthLimited,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseOutcome {
    pub description: String,
    pub output: String,
}

pub fn task_hash(task: &str) -> String {
    hex::encode(Sha256::digest(task.as_bytes()))
}

/// Text cached and returned for a decomposed task.
pub fn phase_summary(phases: &[PhaseOutcome]) -> String {
    let mut buf = format!("Completed {} phases:", phases.len());
    for (index, phase) in phases.iter().enumerate() {
        buf.push_str(&format!(
            "\n\n## Phase {}: {}\n\n{}",
            index + 1,
            phase.description,
            phase.output
        ));
    }
    buf
}

/// How `start` left a task: answered, or waiting on its phases.
enum Started {
    Done(DispatchOutput),
    Decompose(Frame),
}

/// A decomposed task waiting for its phases.
struct Frame {
    hash: String,
    depth: u32,
    context: TaskContext,
    parent_step_id: String,
    remaining: VecDeque<String>,
    current: Option<String>,
    outcomes: Vec<PhaseOutcome>,
}

impl Frame {
    fn record(&mut self, output: DispatchOutput) {
        let description = self.current.take().unwrap_or_default();
        self.outcomes.push(PhaseOutcome {
            description,
            output: output.output,
        });
    }

    /// Context for the next phase: the frame's context plus every earlier phase output.
    fn phase_context(&self) -> TaskContext {
        let mut context = self.context.clone();
        context.phase_outputs = self
            .outcomes
            .iter()
            .map(|outcome| outcome.output.clone())
            .collect();
        context
    }
}

pub struct TaskDispatcher<'a, E: Executor, P: Planner> {
    store: &'a StateStore,
    executor: &'a E,
    planner: &'a P,
    researcher: Option<&'a Researcher>,
    config: DispatchConfig,
    recent: Mutex<RecentHashes>,
}

impl<'a, E: Executor, P: Planner> TaskDispatcher<'a, E, P> {
    pub fn new(store: &'a StateStore, executor: &'a E, planner: &'a P, config: DispatchConfig) -> Self {
        let recent = Mutex::new(RecentHashes::new(config.hot_set_capacity));
        Self {
            store,
            executor,
            planner,
            researcher: None,
            config,
            recent,
        }
    }

    pub fn with_researcher(mut self, researcher: &'a Researcher) -> Self {
        self.researcher = Some(researcher);
        self
    }

    /// Dispatch `task` at `depth`.
    ///
    /// Errors from the executor or planner are recorded on the failing step and
    /// on every enclosing decomposition step, then returned. Nothing is retried.
    #[instrument(skip(self, task, context), fields(task_len = task.len()))]
    pub fn run(&self, task: &str, context: &TaskContext, depth: u32) -> Result<DispatchOutput> {
        let base = self.base_context().merged(context.clone());
        let mut stack: Vec<Frame> = Vec::new();
        let mut step = self.start(task, base, depth);

        loop {
            let output = match step {
                Err(err) => return Err(self.unwind(&mut stack, err)),
                Ok(Started::Decompose(frame)) => {
                    stack.push(frame);
                    step = self.start_next_phase(&mut stack);
                    continue;
                }
                Ok(Started::Done(output)) => output,
            };

            let Some(frame) = stack.last_mut() else {
                return Ok(output);
            };
            frame.record(output);
            step = if frame.remaining.is_empty() {
                match stack.pop() {
                    Some(frame) => self.finish(frame).map(Started::Done),
                    None => Err(anyhow!("decomposition stack underflow")),
                }
            } else {
                self.start_next_phase(&mut stack)
            };
        }
    }

    fn base_context(&self) -> TaskContext {
        let state = self.store.snapshot();
        TaskContext {
            project_root: self.config.project_root.clone(),
            generated_files: state.generated_files,
            capabilities: state.capabilities,
            ..TaskContext::default()
        }
    }

    fn start(&self, task: &str, mut context: TaskContext, depth: u32) -> Result<Started> {
        let hash = task_hash(task);
        if depth > self.config.max_depth {
            debug!(depth, max_depth = self.config.max_depth, "depth ceiling reached");
            return Ok(Started::Done(DispatchOutput {
                output: DEPTH_LIMIT_OUTPUT.to_string(),
                metadata: DispatchMetadata {
                    hash,
                    depth,
                    kind: DispatchKind::DepthLimited,
                },
            }));
        }

        if let Some(cached) = self.lookup_cached(&hash)? {
            info!(%hash, depth, "task served from cache");
            return Ok(Started::Done(DispatchOutput {
                output: cached,
                metadata: DispatchMetadata {
                    hash,
                    depth,
                    kind: DispatchKind::Cached,
                },
            }));
        }

        if self.config.research
            && let Some(researcher) = self.researcher
        {
            let research = researcher.research(task);
            if !research.is_empty() {
                debug!(notes = research.len(), "research notes added to context");
                context.merge(TaskContext {
                    research,
                    ..TaskContext::default()
                });
            }
        }

        if depth < self.config.max_depth
            && is_complex(task)
            && let Some(frame) = self.plan(task, &hash, &context, depth)?
        {
            return Ok(Started::Decompose(frame));
        }

        self.execute_atomic(task, hash, &context, depth)
            .map(Started::Done)
    }

    /// Touch the hot set; consult the store only for hashes seen before.
    fn lookup_cached(&self, hash: &str) -> Result<Option<String>> {
        let seen = {
            let mut recent = self.recent.lock();
            let seen = recent.contains(hash);
            if let Some(evicted) = recent.touch(hash) {
                debug!(%evicted, "hash evicted from hot set");
            }
            seen
        };
        if !seen {
            return Ok(None);
        }
        self.store.get_cached_result(hash)
    }

    /// Records the parent step and asks for a plan. `None` means "run atomically".
    fn plan(
        &self,
        task: &str,
        hash: &str,
        context: &TaskContext,
        depth: u32,
    ) -> Result<Option<Frame>> {
        let parent = BuildStep::running(AGENT, format!("Decompose: {task}"));
        let parent_step_id = parent.id.clone();
        self.store.add_build_step(parent)?;

        let plan = match self.planner.plan(task, context) {
            Ok(plan) => plan,
            Err(err) => {
                let message = format!("{err:#}");
                warn!(error = %message, "planning failed");
                self.store.update_build_step(
                    &parent_step_id,
                    StepStatus::Failed,
                    None,
                    Some(&message),
                )?;
                return Err(err);
            }
        };
        let phases = if plan.phases.is_empty() {
            extract_phases(&plan.output)
        } else {
            plan.phases
        };
        if phases.is_empty() {
            info!("plan produced no phases, executing atomically");
            self.store.update_build_step(
                &parent_step_id,
                StepStatus::Completed,
                Some("plan produced no phases; executed atomically"),
                None,
            )?;
            return Ok(None);
        }

        info!(phases = phases.len(), depth, "task decomposed");
        Ok(Some(Frame {
            hash: hash.to_string(),
            depth,
            context: context.clone(),
            parent_step_id,
            remaining: phases.into(),
            current: None,
            outcomes: Vec::new(),
        }))
    }

    fn start_next_phase(&self, stack: &mut [Frame]) -> Result<Started> {
        let Some(frame) = stack.last_mut() else {
            return Err(anyhow!("no decomposition in progress"));
        };
        let Some(description) = frame.remaining.pop_front() else {
            return Err(anyhow!("decomposition has no remaining phases"));
        };
        debug!(
            phase = frame.outcomes.len() + 1,
            depth = frame.depth + 1,
            "dispatching phase"
        );
        let context = frame.phase_context();
        frame.current = Some(description.clone());
        let depth = frame.depth + 1;
        self.start(&description, context, depth)
    }

    fn finish(&self, frame: Frame) -> Result<DispatchOutput> {
        let summary = phase_summary(&frame.outcomes);
        self.store.update_build_step(
            &frame.parent_step_id,
            StepStatus::Completed,
            Some(&summary),
            None,
        )?;
        self.store.put_cached_result(&frame.hash, &summary)?;
        Ok(DispatchOutput {
            output: summary,
            metadata: DispatchMetadata {
                hash: frame.hash,
                depth: frame.depth,
                kind: DispatchKind::Decomposed {
                    parent_step_id: frame.parent_step_id,
                    phases: frame.outcomes,
                },
            },
        })
    }

    fn execute_atomic(
        &self,
        task: &str,
        hash: String,
        context: &TaskContext,
        depth: u32,
    ) -> Result<DispatchOutput> {
        let step = BuildStep::running(AGENT, task);
        let step_id = step.id.clone();
        self.store.add_build_step(step)?;

        match self.executor.execute(task, context) {
            Ok(exec) => {
                self.store.update_build_step(
                    &step_id,
                    StepStatus::Completed,
                    Some(&exec.output),
                    None,
                )?;
                self.store.put_cached_result(&hash, &exec.output)?;
                info!(%step_id, depth, "atomic task completed");
                Ok(DispatchOutput {
                    output: exec.output,
                    metadata: DispatchMetadata {
                        hash,
                        depth,
                        kind: DispatchKind::Atomic { step_id },
                    },
                })
            }
            Err(err) => {
                let message = format!("{err:#}");
                warn!(%step_id, error = %message, "atomic task failed");
                self.store
                    .update_build_step(&step_id, StepStatus::Failed, None, Some(&message))?;
                Err(err)
            }
        }
    }

    /// Mark every open decomposition failed with the phase error, innermost first.
    fn unwind(&self, stack: &mut Vec<Frame>, err: anyhow::Error) -> anyhow::Error {
        let message = format!("{err:#}");
        while let Some(frame) = stack.pop() {
            if let Err(update_err) = self.store.update_build_step(
                &frame.parent_step_id,
                StepStatus::Failed,
                None,
                Some(&message),
            ) {
                error!(step_id = %frame.parent_step_id, err = %update_err, "could not record failure");
            }
        }
        err
    }
}
