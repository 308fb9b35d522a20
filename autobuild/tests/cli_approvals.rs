//! CLI tests for `autobuild init`, `status` and `approvals`, including how
//! they share `.autobuild/state/` with a live run.
//!
//! Spawns the binary against a temp project and checks exit codes and the
//! files it leaves behind.

use std::fs;
use std::process::{Command, Output};

use autobuild::core::protection::ProtectionRules;
use autobuild::exit_codes;
use autobuild::io::approvals::ApprovalGate;
use autobuild::core::types::BuildStep;
use autobuild::io::config::{AutobuildPaths, load_config};
use autobuild::io::lock::lock_state;
use autobuild::io::state_store::StateStore;
use autobuild::io::writer::{GuardedWriter, WriteOutcome};

fn autobuild(root: &std::path::Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_autobuild"))
        .arg("--root")
        .arg(root)
        .args(args)
        .output()
        .expect("spawn autobuild")
}

#[test]
fn init_writes_default_config_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = AutobuildPaths::new(temp.path());

    let output = autobuild(temp.path(), &["init"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let cfg = load_config(&paths.config_path).expect("load");
    assert_eq!(cfg.max_iterations, 10);
    assert!(paths.logs_dir.is_dir());

    fs::write(&paths.config_path, "max_iterations = 4\n").expect("edit");
    let output = autobuild(temp.path(), &["init"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(load_config(&paths.config_path).expect("load").max_iterations, 4);
}

#[test]
fn run_without_executor_command_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = autobuild(temp.path(), &["run"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("executor.command"));
}

#[test]
fn status_reports_gaps_as_json() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = AutobuildPaths::new(temp.path());
    {
        let store = StateStore::load(&paths.state_path).expect("store");
        store
            .add_capability(autobuild::core::types::SystemCapability::new(
                "api",
                "HTTP routes",
                Some("src/api.rs"),
            ))
            .expect("add");
    }

    let output = autobuild(temp.path(), &["status"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(report["gaps"], serde_json::json!(["api"]));
    assert_eq!(report["pending_approvals"], 0);
}

#[test]
fn queued_write_is_approved_and_applied_from_the_cli() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = AutobuildPaths::new(temp.path());
    let id = {
        let store = StateStore::load(&paths.state_path).expect("store");
        let gate = ApprovalGate::open(&paths.approvals_path).expect("gate");
        let writer = GuardedWriter::new(temp.path(), &store, &gate, ProtectionRules::default());
        match writer
            .write("Cargo.toml", "[workspace]\n", "add member")
            .expect("write")
        {
            WriteOutcome::PendingApproval { id } => id,
            other => panic!("expected approval, got {other:?}"),
        }
    };

    let output = autobuild(temp.path(), &["approvals", "list"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&output.stdout).contains(&id));

    let output = autobuild(temp.path(), &["approvals", "apply", &id]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(!temp.path().join("Cargo.toml").exists());

    let output = autobuild(temp.path(), &["approvals", "approve", &id]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let output = autobuild(temp.path(), &["approvals", "approve", &id]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));

    let output = autobuild(temp.path(), &["approvals", "apply", &id]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(
        fs::read_to_string(temp.path().join("Cargo.toml")).expect("read"),
        "[workspace]\n"
    );

    let output = autobuild(temp.path(), &["approvals", "clear"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let gate = ApprovalGate::open(&paths.approvals_path).expect("reopen");
    assert!(gate.get_all().is_empty());
}

#[test]
fn status_does_not_recover_a_live_runs_steps() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = AutobuildPaths::new(temp.path());
    let _lock = lock_state(&paths.state_lock_path).expect("lock");
    let store = StateStore::load(&paths.state_path).expect("store");
    let step = BuildStep::running("dispatcher", "long task");
    let id = step.id.clone();
    store.add_build_step(step).expect("add");

    let output = autobuild(temp.path(), &["status"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(report["recent_steps"][0]["id"], serde_json::json!(id));
    assert_eq!(report["recent_steps"][0]["status"], "running");

    let on_disk = fs::read_to_string(&paths.state_path).expect("read");
    assert!(on_disk.contains("\"running\""));
    assert!(!on_disk.contains("\"interrupted\""));
}

#[test]
fn writing_commands_refuse_while_state_is_locked() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = AutobuildPaths::new(temp.path());
    let lock = lock_state(&paths.state_lock_path).expect("lock");

    let output = autobuild(temp.path(), &["approvals", "apply", "abcd1234"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("another autobuild process"));

    drop(lock);
    let output = autobuild(temp.path(), &["approvals", "apply", "abcd1234"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown approval"));
}
