//! Durable, write-through store for [`SystemState`].
//!
//! Every mutating call takes the store lock, applies the change in memory and
//! rewrites the whole document (temp file + rename) before returning, so no
//! mutation is ever observably partial.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::capabilities::derived_capability_name;
use crate::core::types::{
    BuildStep, INTERRUPTED_ERROR, StepStatus, SystemCapability, SystemState, TASK_CACHE_KEY,
    TaskCacheEntry,
};

/// Default lifetime of a cached task result.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Single owner of the process's [`SystemState`].
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    cache_ttl_secs: u64,
    state: Mutex<SystemState>,
}

impl StateStore {
    /// Load state from `path`, falling back to a fresh default on a missing or
    /// unreadable document.
    ///
    /// Steps still marked `running` are rewritten to `interrupted` and the
    /// result is saved before this returns.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_ttl(path, DEFAULT_CACHE_TTL_SECS)
    }

    pub fn load_with_ttl(path: &Path, cache_ttl_secs: u64) -> Result<Self> {
        debug!(path = %path.display(), "loading system state");
        let (mut state, loaded) = match read_state(path) {
            Ok(Some(state)) => (state, true),
            Ok(None) => {
                debug!(path = %path.display(), "no state file, starting fresh");
                (SystemState::default(), false)
            }
            Err(err) => {
                warn!(path = %path.display(), error = %format!("{err:#}"), "unreadable state, starting fresh");
                (SystemState::default(), false)
            }
        };

        let recovered = if loaded {
            recover_interrupted(&mut state)
        } else {
            0
        };

        let store = Self {
            path: path.to_path_buf(),
            cache_ttl_secs,
            state: Mutex::new(state),
        };
        if recovered > 0 {
            info!(recovered, "marked running steps as interrupted");
            store.save()?;
        }
        Ok(store)
    }

    /// The document as another process left it: no recovery, no save.
    ///
    /// For observers such as `autobuild status`, which must not rewrite a live
    /// run's `running` steps. A missing file reads as a fresh default.
    pub fn read_snapshot(path: &Path) -> Result<SystemState> {
        Ok(read_state(path)?.unwrap_or_default())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cloned view of the current state.
    pub fn snapshot(&self) -> SystemState {
        self.state.lock().clone()
    }

    /// Stamp `last_updated` and rewrite the document.
    pub fn save(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.flush(&mut state)
    }

    pub fn add_build_step(&self, step: BuildStep) -> Result<()> {
        debug!(id = %step.id, agent = %step.agent, status = step.status.as_str(), "adding build step");
        self.mutate(|state| state.build_steps.push(step))
    }

    /// Patch a step by id. Unknown ids and backwards transitions are ignored.
    pub fn update_build_step(
        &self,
        id: &str,
        status: StepStatus,
        result: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        self.mutate(|state| {
            let Some(step) = state.build_steps.iter_mut().find(|step| step.id == id) else {
                debug!(id, "update for unknown build step ignored");
                return;
            };
            if step.status != status && !step.status.can_transition_to(status) {
                warn!(
                    id,
                    from = step.status.as_str(),
                    to = status.as_str(),
                    "ignoring backwards build step transition"
                );
                return;
            }
            step.status = status;
            if let Some(result) = result {
                step.result = Some(result.to_string());
            }
            if let Some(error) = error {
                step.error = Some(error.to_string());
            }
        })
    }

    /// Most recent `limit` steps, oldest first.
    pub fn recent_build_steps(&self, limit: usize) -> Vec<BuildStep> {
        self.state.lock().recent_build_steps(limit).to_vec()
    }

    /// Upsert by name.
    pub fn add_capability(&self, capability: SystemCapability) -> Result<()> {
        self.mutate(|state| upsert_capability(state, capability))
    }

    /// Patch by name; absent names are ignored.
    pub fn update_capability(
        &self,
        name: &str,
        implemented: bool,
        file_path: Option<&str>,
    ) -> Result<()> {
        self.mutate(|state| {
            let Some(cap) = state.capabilities.iter_mut().find(|cap| cap.name == name) else {
                debug!(name, "update for unknown capability ignored");
                return;
            };
            cap.implemented = implemented;
            if let Some(path) = file_path {
                cap.file_path = Some(path.to_string());
            }
        })
    }

    pub fn unimplemented_capabilities(&self) -> Vec<SystemCapability> {
        self.state
            .lock()
            .capabilities
            .iter()
            .filter(|cap| !cap.implemented)
            .cloned()
            .collect()
    }

    /// Record a produced artifact and upsert its derived, implemented capability.
    pub fn add_generated_artifact(&self, path: &str, description: Option<&str>) -> Result<()> {
        let name = derived_capability_name(path);
        debug!(path, capability = %name, "recording generated artifact");
        self.mutate(|state| {
            if !state.generated_files.iter().any(|existing| existing == path) {
                state.generated_files.push(path.to_string());
            }
            upsert_capability(
                state,
                SystemCapability {
                    name,
                    description: description
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("Generated artifact {path}")),
                    implemented: true,
                    file_path: Some(path.to_string()),
                },
            );
        })
    }

    pub fn get_cached_result(&self, hash: &str) -> Result<Option<String>> {
        self.get_cached_result_at(hash, Utc::now())
    }

    /// TTL-checked cache read as of `now`. Expired entries are deleted and the
    /// deletion is persisted.
    pub fn get_cached_result_at(&self, hash: &str, now: DateTime<Utc>) -> Result<Option<String>> {
        let mut state = self.state.lock();
        let mut cache = read_cache(&state);
        let Some(entry) = cache.get(hash) else {
            return Ok(None);
        };
        if entry.is_valid_at(now, self.cache_ttl_secs) {
            return Ok(Some(entry.result.clone()));
        }
        debug!(hash, "purging expired cache entry");
        cache.remove(hash);
        write_cache(&mut state, &cache)?;
        self.flush(&mut state)?;
        Ok(None)
    }

    pub fn put_cached_result(&self, hash: &str, result: &str) -> Result<()> {
        self.put_cached_result_at(hash, result, Utc::now())
    }

    pub fn put_cached_result_at(
        &self,
        hash: &str,
        result: &str,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let mut cache = read_cache(&state);
        cache.insert(
            hash.to_string(),
            TaskCacheEntry {
                hash: hash.to_string(),
                result: result.to_string(),
                created_at,
            },
        );
        write_cache(&mut state, &cache)?;
        self.flush(&mut state)
    }

    fn mutate<F: FnOnce(&mut SystemState)>(&self, apply: F) -> Result<()> {
        let mut state = self.state.lock();
        apply(&mut state);
        self.flush(&mut state)
    }

    /// Caller must hold the state lock.
    fn flush(&self, state: &mut SystemState) -> Result<()> {
        state.last_updated = Utc::now();
        let mut buf = serde_json::to_string_pretty(&*state).context("serialize system state")?;
        buf.push('\n');
        write_atomic(&self.path, &buf)
    }
}

fn read_state(path: &Path) -> Result<Option<SystemState>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read state {}", path.display()))?;
    let state = serde_json::from_str(&contents)
        .with_context(|| format!("parse state {}", path.display()))?;
    Ok(Some(state))
}

fn recover_interrupted(state: &mut SystemState) -> usize {
    let mut recovered = 0;
    for step in &mut state.build_steps {
        if step.status == StepStatus::Running {
            step.status = StepStatus::Interrupted;
            step.error = Some(INTERRUPTED_ERROR.to_string());
            recovered += 1;
        }
    }
    recovered
}

fn upsert_capability(state: &mut SystemState, capability: SystemCapability) {
    match state
        .capabilities
        .iter_mut()
        .find(|cap| cap.name == capability.name)
    {
        Some(existing) => {
            existing.description = capability.description;
            existing.implemented = capability.implemented;
            if capability.file_path.is_some() {
                existing.file_path = capability.file_path;
            }
        }
        None => state.capabilities.push(capability),
    }
}

fn read_cache(state: &SystemState) -> BTreeMap<String, TaskCacheEntry> {
    let Some(value) = state.metadata.get(TASK_CACHE_KEY) else {
        return BTreeMap::new();
    };
    match serde_json::from_value(value.clone()) {
        Ok(cache) => cache,
        Err(err) => {
            warn!(error = %err, "discarding malformed task cache");
            BTreeMap::new()
        }
    }
}

fn write_cache(state: &mut SystemState, cache: &BTreeMap<String, TaskCacheEntry>) -> Result<()> {
    let value: Value = serde_json::to_value(cache).context("serialize task cache")?;
    state.metadata.insert(TASK_CACHE_KEY.to_string(), value);
    Ok(())
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("state path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp state {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace state {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store_in(dir: &Path) -> StateStore {
        StateStore::load(&dir.join("state/system_state.json")).expect("load")
    }

    #[test]
    fn missing_file_yields_default_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(temp.path());
        let state = store.snapshot();
        assert_eq!(state.version, crate::core::types::STATE_VERSION);
        assert!(state.build_steps.is_empty());
        // nothing persisted until the first mutation
        assert!(!store.path().exists());
    }

    #[test]
    fn corrupt_file_falls_back_to_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("system_state.json");
        fs::write(&path, "{not json").expect("write");
        let store = StateStore::load(&path).expect("load");
        assert!(store.snapshot().capabilities.is_empty());
    }

    #[test]
    fn running_steps_become_interrupted_on_load() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("system_state.json");
        {
            let store = StateStore::load(&path).expect("load");
            let running = BuildStep::running("dispatcher", "long task");
            let done = BuildStep {
                status: StepStatus::Completed,
                ..BuildStep::running("dispatcher", "short task")
            };
            store.add_build_step(running).expect("add running");
            store.add_build_step(done).expect("add done");
        }

        let reloaded = StateStore::load(&path).expect("reload");
        let steps = reloaded.snapshot().build_steps;
        assert_eq!(steps[0].status, StepStatus::Interrupted);
        assert_eq!(steps[0].error.as_deref(), Some(INTERRUPTED_ERROR));
        assert_eq!(steps[1].status, StepStatus::Completed);

        // the rewrite was persisted by load itself
        let raw: SystemState =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("parse");
        assert_eq!(raw.build_steps[0].status, StepStatus::Interrupted);
    }

    #[test]
    fn capability_upsert_keeps_one_entry() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(temp.path());
        store
            .add_capability(SystemCapability::new("api", "first", Some("a.rs")))
            .expect("add");
        store
            .add_capability(SystemCapability {
                implemented: true,
                ..SystemCapability::new("api", "second", Some("b.rs"))
            })
            .expect("add again");

        let caps = store.snapshot().capabilities;
        assert_eq!(caps.len(), 1);
        assert_eq!(caps[0].description, "second");
        assert!(caps[0].implemented);
        assert_eq!(caps[0].file_path.as_deref(), Some("b.rs"));
    }

    #[test]
    fn update_of_unknown_ids_is_a_no_op() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(temp.path());
        store
            .update_build_step("missing", StepStatus::Completed, Some("x"), None)
            .expect("update step");
        store
            .update_capability("missing", true, None)
            .expect("update capability");
        let state = store.snapshot();
        assert!(state.build_steps.is_empty());
        assert!(state.capabilities.is_empty());
    }

    #[test]
    fn terminal_steps_are_not_rewritten() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(temp.path());
        let step = BuildStep::running("dispatcher", "task");
        let id = step.id.clone();
        store.add_build_step(step).expect("add");
        store
            .update_build_step(&id, StepStatus::Failed, None, Some("boom"))
            .expect("fail");
        store
            .update_build_step(&id, StepStatus::Completed, Some("late"), None)
            .expect("late complete");

        let state = store.snapshot();
        let step = state.build_step(&id).expect("step");
        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.error.as_deref(), Some("boom"));
        assert_eq!(step.result, None);
    }

    #[test]
    fn generated_artifacts_are_a_set_and_derive_capabilities() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(temp.path());
        store
            .add_generated_artifact("src/api.rs", Some("HTTP routes"))
            .expect("add");
        store.add_generated_artifact("src/api.rs", None).expect("add again");

        let state = store.snapshot();
        assert_eq!(state.generated_files, vec!["src/api.rs"]);
        let cap = state.capability("artifact_src_api_rs").expect("derived");
        assert!(cap.implemented);
        assert_eq!(cap.file_path.as_deref(), Some("src/api.rs"));
        assert_eq!(state.capabilities.len(), 1);
    }

    #[test]
    fn cached_results_honor_ttl() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(temp.path());
        let t = Utc::now();
        store.put_cached_result_at("h1", "result", t).expect("put");

        assert_eq!(
            store
                .get_cached_result_at("h1", t + Duration::minutes(59))
                .expect("get"),
            Some("result".to_string())
        );
        assert_eq!(
            store
                .get_cached_result_at("h1", t + Duration::minutes(61))
                .expect("get expired"),
            None
        );

        // expiry deleted the entry durably
        let reloaded = StateStore::load(store.path()).expect("reload");
        assert_eq!(
            reloaded.get_cached_result_at("h1", t).expect("get after reload"),
            None
        );
    }

    #[test]
    fn recent_steps_are_truncated_for_display_only() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(temp.path());
        for i in 0..5 {
            store
                .add_build_step(BuildStep::running("dispatcher", format!("task {i}")))
                .expect("add");
        }
        let recent = store.recent_build_steps(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].action, "task 4");
        assert_eq!(store.snapshot().build_steps.len(), 5);
    }

    #[test]
    fn read_snapshot_leaves_running_steps_alone() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(temp.path());
        let step = BuildStep::running("dispatcher", "in flight");
        let id = step.id.clone();
        store.add_build_step(step).expect("add");
        let before = fs::read_to_string(store.path()).expect("read");

        let observed = StateStore::read_snapshot(store.path()).expect("peek");
        assert_eq!(observed.build_step(&id).expect("step").status, StepStatus::Running);
        assert_eq!(fs::read_to_string(store.path()).expect("reread"), before);

        let missing = StateStore::read_snapshot(&temp.path().join("absent.json")).expect("absent");
        assert!(missing.build_steps.is_empty());
    }
}
