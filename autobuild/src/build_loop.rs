//! Reconciliation loop: inspect, find gaps, generate, validate, persist.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::capabilities::CapabilitySpec;
use crate::core::context::TaskContext;
use crate::core::types::SystemCapability;
use crate::dispatch::{DispatchKind, TaskDispatcher};
use crate::io::config::{AutobuildPaths, BuildConfig, ValidationConfig};
use crate::io::executor::{Executor, Planner};
use crate::io::inspect::inspect_repository;
use crate::io::state_store::StateStore;
use crate::io::validator::{ValidationOutcome, ValidationRequest, Validator};
use crate::io::writer::{GuardedWriter, WriteOutcome};

/// Reason why `BuildLoop::run` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// A cycle found nothing to generate.
    Fixpoint,
    /// `max_iterations` cycles ran and the last one still generated something.
    MaxIterations,
    /// `stop()` was observed at a cycle boundary.
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub iterations: u32,
    pub stop: LoopStop,
    /// Capabilities still not implemented when the loop ended.
    pub remaining: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_iterations: u32,
    pub cycle_delay: Duration,
    /// Desired-state manifest seeded into the store on every run.
    pub capabilities: Vec<CapabilitySpec>,
    pub logs_dir: PathBuf,
    pub validation: ValidationConfig,
}

impl LoopConfig {
    pub fn from_build_config(cfg: &BuildConfig, paths: &AutobuildPaths) -> Self {
        Self {
            max_iterations: cfg.max_iterations,
            cycle_delay: cfg.cycle_delay(),
            capabilities: cfg.required_capabilities(),
            logs_dir: paths.logs_dir.clone(),
            validation: cfg.validation.clone(),
        }
    }
}

/// Cloneable control over a loop, usable from other threads.
#[derive(Debug, Clone, Default)]
pub struct LoopHandle {
    active: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
}

impl LoopHandle {
    /// Ask the loop to stop once the in-flight cycle finishes.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Clears the active flag when a run ends, however it ends.
struct ActiveRun<'h>(&'h AtomicBool);

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub fn generation_task(gap: &SystemCapability) -> String {
    format!(
        "Generate the missing component: {}. Description: {}. Target file: {}. Write complete, executable code.",
        gap.name,
        gap.description,
        gap.file_path.as_deref().unwrap_or("none")
    )
}

pub struct BuildLoop<'a, E: Executor, P: Planner, V: Validator> {
    root: PathBuf,
    store: &'a StateStore,
    dispatcher: &'a TaskDispatcher<'a, E, P>,
    writer: &'a GuardedWriter<'a>,
    validator: &'a V,
    config: LoopConfig,
    handle: LoopHandle,
    iteration: AtomicU32,
}

impl<'a, E: Executor, P: Planner, V: Validator> BuildLoop<'a, E, P, V> {
    pub fn new(
        root: &Path,
        store: &'a StateStore,
        dispatcher: &'a TaskDispatcher<'a, E, P>,
        writer: &'a GuardedWriter<'a>,
        validator: &'a V,
        config: LoopConfig,
    ) -> Self {
        Self {
            root: root.to_path_buf(),
            store,
            dispatcher,
            writer,
            validator,
            config,
            handle: LoopHandle::default(),
            iteration: AtomicU32::new(0),
        }
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// Cycles completed (or started) by the current or last run.
    pub fn iteration(&self) -> u32 {
        self.iteration.load(Ordering::SeqCst)
    }

    /// Add manifest capabilities the store does not know yet. Existing entries are untouched.
    pub fn initialize_required_capabilities(&self) -> Result<usize> {
        let known = self.store.snapshot();
        let mut added = 0;
        for spec in &self.config.capabilities {
            if known.capability(&spec.name).is_some() {
                continue;
            }
            self.store.add_capability(spec.to_capability())?;
            added += 1;
        }
        debug!(added, "required capabilities initialized");
        Ok(added)
    }

    /// Capabilities whose artifact is missing, or that have no artifact and are unimplemented.
    ///
    /// Capabilities whose artifact exists are marked implemented as a side effect.
    pub fn identify_gaps(&self) -> Result<Vec<SystemCapability>> {
        let mut gaps = Vec::new();
        for cap in self.store.snapshot().capabilities {
            let is_gap = match cap.file_path.as_deref() {
                Some(path) if self.root.join(path).exists() => {
                    if !cap.implemented {
                        debug!(name = %cap.name, path, "artifact present, marking implemented");
                        self.store.update_capability(&cap.name, true, Some(path))?;
                    }
                    false
                }
                Some(_) => true,
                None => !cap.implemented,
            };
            if is_gap {
                gaps.push(cap);
            }
        }
        Ok(gaps)
    }

    /// Dispatch one generation task per gap, in order. Returns whether there was anything to do.
    ///
    /// A failing gap is logged and skipped; it stays a gap for the next cycle.
    pub fn generate_missing_components(&self, gaps: &[SystemCapability]) -> Result<bool> {
        if gaps.is_empty() {
            return Ok(false);
        }
        for gap in gaps {
            info!(name = %gap.name, path = ?gap.file_path, "generating component");
            if let Err(err) = self.generate(gap) {
                warn!(name = %gap.name, error = %format!("{err:#}"), "component generation failed");
            }
        }
        Ok(true)
    }

    fn generate(&self, gap: &SystemCapability) -> Result<()> {
        let task = generation_task(gap);
        let output = self.dispatcher.run(&task, &TaskContext::new(), 0)?;

        // Executors that answer with file contents instead of writing the file themselves.
        let answered_inline = matches!(
            output.metadata.kind,
            DispatchKind::Atomic { .. } | DispatchKind::Cached
        );
        if let Some(path) = &gap.file_path
            && answered_inline
            && !output.output.trim().is_empty()
            && !self.root.join(path).exists()
        {
            let reason = format!("generated component {}", gap.name);
            match self.writer.write(path, &output.output, &reason)? {
                WriteOutcome::Written { path } => info!(%path, "component written"),
                WriteOutcome::PendingApproval { id } => {
                    info!(%id, %path, "component write awaits approval");
                }
                WriteOutcome::Blocked { reason } => warn!(%path, %reason, "component write blocked"),
            }
        }

        self.store
            .update_capability(&gap.name, true, gap.file_path.as_deref())
    }

    /// One reconciliation pass. Returns whether any generation happened.
    #[instrument(skip(self), fields(iteration))]
    pub fn run_cycle(&self) -> Result<bool> {
        let iteration = self.iteration.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::Span::current().record("iteration", iteration);

        let summary = inspect_repository(&self.root);
        info!(
            total_files = summary.total_files,
            by_extension = ?summary.by_extension,
            "repository inspected"
        );

        let gaps = self.identify_gaps()?;
        info!(gaps = gaps.len(), "gaps identified");
        if gaps.is_empty() {
            self.store.save()?;
            return Ok(false);
        }

        let changed = self.generate_missing_components(&gaps)?;

        let request = ValidationRequest::for_iteration(
            &self.config.validation,
            &self.root,
            &self.config.logs_dir,
            iteration,
        );
        match self.validator.validate(&request) {
            Ok(ValidationOutcome::Pass) => info!("validation passed"),
            Ok(ValidationOutcome::Skipped) => debug!("validation skipped"),
            Ok(ValidationOutcome::Fail) => warn!(log = %request.log_path.display(), "validation failed"),
            Err(err) => warn!(error = %format!("{err:#}"), "validation could not run"),
        }

        self.store.save()?;
        Ok(changed)
    }

    /// Run cycles until a fixpoint, the iteration ceiling, or a stop request.
    ///
    /// Rejects a second concurrent run instead of queueing it.
    pub fn run(&self) -> Result<LoopOutcome> {
        if self
            .handle
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(anyhow!("build loop already running"));
        }
        let _active = ActiveRun(&self.handle.active);
        self.handle.stop_requested.store(false, Ordering::SeqCst);
        self.iteration.store(0, Ordering::SeqCst);

        self.initialize_required_capabilities()?;
        info!(max_iterations = self.config.max_iterations, "build loop started");

        let mut iterations = 0;
        let stop = loop {
            if self.handle.stop_requested.load(Ordering::SeqCst) {
                break LoopStop::Stopped;
            }
            if iterations >= self.config.max_iterations {
                warn!(iterations, "iteration ceiling reached");
                break LoopStop::MaxIterations;
            }
            let changed = self.run_cycle()?;
            iterations += 1;
            if !changed {
                break LoopStop::Fixpoint;
            }
            if !self.config.cycle_delay.is_zero() {
                thread::sleep(self.config.cycle_delay);
            }
        };

        let remaining: Vec<String> = self
            .store
            .unimplemented_capabilities()
            .into_iter()
            .map(|cap| cap.name)
            .collect();
        info!(iterations, stop = ?stop, remaining = remaining.len(), "build loop finished");
        Ok(LoopOutcome {
            iterations,
            stop,
            remaining,
        })
    }
}
