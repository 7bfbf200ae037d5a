//! Integration tests for the changeflow binary.
//!
//! Each test works in its own temporary change root.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn changeflow() -> Command {
    cargo_bin_cmd!("changeflow")
}

fn create_temp_change() -> TempDir {
    TempDir::new().unwrap()
}

/// Write a file under `.changeflow/`.
fn write_state_file(dir: &TempDir, name: &str, content: &str) {
    let state = dir.path().join(".changeflow");
    fs::create_dir_all(&state).unwrap();
    fs::write(state.join(name), content).unwrap();
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_changeflow_help() {
        changeflow()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("resume"));
    }

    #[test]
    fn test_changeflow_version() {
        changeflow().arg("--version").assert().success();
    }

    #[test]
    fn test_unknown_subcommand_fails() {
        changeflow().arg("deploy").assert().failure();
    }
}

// =============================================================================
// Lanes
// =============================================================================

mod lanes {
    use super::*;

    #[test]
    fn test_lanes_lists_all_three() {
        let dir = create_temp_change();

        changeflow()
            .current_dir(dir.path())
            .args(["lanes", "--json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"docs\""))
            .stdout(predicate::str::contains("\"standard\""))
            .stdout(predicate::str::contains("\"heavy\""));
    }

    #[test]
    fn test_lanes_unknown_lane_fails() {
        let dir = create_temp_change();

        changeflow()
            .current_dir(dir.path())
            .args(["lanes", "express"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("express"));
    }

    #[test]
    fn test_lanes_applies_sla_override() {
        let dir = create_temp_change();
        write_state_file(&dir, "flow.toml", "[sla]\ndocs = 42\n");

        changeflow()
            .current_dir(dir.path())
            .args(["lanes", "docs"])
            .assert()
            .success()
            .stdout(predicate::str::contains("SLA: 42s"));
    }
}

// =============================================================================
// Running workflows
// =============================================================================

mod run {
    use super::*;

    #[test]
    fn test_dry_run_touches_nothing() {
        let dir = create_temp_change();

        changeflow()
            .current_dir(dir.path())
            .args(["run", "c1", "--lane", "docs", "--dry-run"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Dry run"))
            .stdout(predicate::str::contains("documentation"));

        assert!(!dir.path().join(".changeflow").exists());
    }

    #[test]
    fn test_run_without_stage_commands_completes() {
        let dir = create_temp_change();

        changeflow()
            .current_dir(dir.path())
            .args(["run", "c1", "--lane", "docs", "--json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"success\": true"));

        assert!(dir.path().join(".changeflow/workflow.json").exists());

        changeflow()
            .current_dir(dir.path())
            .args(["status", "c1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("completed"));
    }

    #[test]
    fn test_run_executes_configured_stage_command() {
        let dir = create_temp_change();
        write_state_file(
            &dir,
            "flow.toml",
            "[stages.initialize]\ncommand = \"echo ready > init.txt\"\n",
        );

        changeflow()
            .current_dir(dir.path())
            .args(["run", "c1", "--lane", "docs"])
            .assert()
            .success();

        let written = fs::read_to_string(dir.path().join("init.txt")).unwrap();
        assert_eq!(written.trim(), "ready");

        changeflow()
            .current_dir(dir.path())
            .args(["checkpoint", "list", "--json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("before initialize"));
    }

    #[test]
    fn test_failing_stage_command_fails_run() {
        let dir = create_temp_change();
        write_state_file(
            &dir,
            "flow.toml",
            "[stages.version_bump]\ncommand = \"exit 3\"\n",
        );

        changeflow()
            .current_dir(dir.path())
            .args(["run", "c1", "--lane", "docs"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("Workflow failed"));

        changeflow()
            .current_dir(dir.path())
            .args(["status", "c1", "--json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"failed\""));
    }

    #[test]
    fn test_blocking_hook_stops_run() {
        let dir = create_temp_change();
        write_state_file(&dir, "flow.toml", "[stages.initialize]\ncommand = \"true\"\n");
        write_state_file(
            &dir,
            "hooks.toml",
            r#"
[[hooks]]
stage = "initialize"
name = "always-fails"
command = "exit 1"
remediation = "Fix the workspace first"
"#,
        );

        changeflow()
            .current_dir(dir.path())
            .args(["run", "c1", "--lane", "docs"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("Fix the workspace first"));

        changeflow()
            .current_dir(dir.path())
            .args(["run", "c1", "--lane", "docs", "--force-hooks"])
            .assert()
            .success();
    }

    /// Rewrite the ledger so the last run looks interrupted.
    fn mark_ledger_incomplete(dir: &TempDir) {
        let path = dir.path().join(".changeflow/workflow.json");
        let mut ledger: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        ledger["status"] = serde_json::json!("incomplete");
        fs::write(&path, serde_json::to_string_pretty(&ledger).unwrap()).unwrap();
    }

    #[test]
    fn test_resume_keeps_the_interrupted_lane() {
        let dir = create_temp_change();

        changeflow()
            .current_dir(dir.path())
            .args(["run", "c1", "--lane", "docs"])
            .assert()
            .success();
        mark_ledger_incomplete(&dir);

        changeflow()
            .current_dir(dir.path())
            .args(["run", "c1", "--resume", "--json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"lane\": \"docs\""))
            .stdout(predicate::str::contains("\"name\": \"implementation\"").not());

        let output = changeflow()
            .current_dir(dir.path())
            .args(["status", "c1", "--json"])
            .output()
            .unwrap();
        let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(status["workflow"]["lane"], "docs");
        assert_eq!(
            status["workflow"]["planned_stages"],
            serde_json::json!([0, 1, 2, 9, 10, 11, 12])
        );
    }

    #[test]
    fn test_resume_with_conflicting_lane_fails() {
        let dir = create_temp_change();

        changeflow()
            .current_dir(dir.path())
            .args(["run", "c1", "--lane", "docs"])
            .assert()
            .success();
        mark_ledger_incomplete(&dir);

        changeflow()
            .current_dir(dir.path())
            .args(["run", "c1", "--resume", "--lane", "heavy"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("docs lane"));
    }

    #[test]
    fn test_resume_without_interrupted_run() {
        let dir = create_temp_change();

        changeflow()
            .current_dir(dir.path())
            .args(["resume", "c1", "--decision", "resume"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No interrupted workflow"));
    }

    #[test]
    fn test_resume_flag_without_interrupted_run_fails() {
        let dir = create_temp_change();

        changeflow()
            .current_dir(dir.path())
            .args(["run", "c1", "--resume"])
            .assert()
            .failure();
    }

    #[test]
    fn test_resume_and_restart_conflict() {
        changeflow()
            .args(["run", "c1", "--resume", "--restart"])
            .assert()
            .failure();
    }
}

// =============================================================================
// Status
// =============================================================================

mod status {
    use super::*;

    #[test]
    fn test_status_without_ledger_fails() {
        let dir = create_temp_change();

        changeflow()
            .current_dir(dir.path())
            .args(["status", "c1"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("No workflow recorded"));
    }

    #[test]
    fn test_status_for_other_change_fails() {
        let dir = create_temp_change();

        changeflow()
            .current_dir(dir.path())
            .args(["run", "c1", "--lane", "docs"])
            .assert()
            .success();

        changeflow()
            .current_dir(dir.path())
            .args(["status", "c2"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("belongs to change 'c1'"));
    }
}

// =============================================================================
// Checkpoints
// =============================================================================

mod checkpoints {
    use super::*;

    #[test]
    fn test_list_empty() {
        let dir = create_temp_change();

        changeflow()
            .current_dir(dir.path())
            .args(["checkpoint", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No checkpoints"));
    }

    #[test]
    fn test_create_and_rollback() {
        let dir = create_temp_change();
        fs::write(dir.path().join("notes.txt"), "first").unwrap();

        changeflow()
            .current_dir(dir.path())
            .args(["checkpoint", "create", "--stage", "lint", "--name", "baseline"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created checkpoint"));

        let listed = changeflow()
            .current_dir(dir.path())
            .args(["checkpoint", "list", "--json"])
            .output()
            .unwrap();
        let checkpoints: serde_json::Value = serde_json::from_slice(&listed.stdout).unwrap();
        let id = checkpoints[0]["id"].as_str().unwrap().to_string();
        assert_eq!(checkpoints[0]["stage"], 5);
        assert_eq!(checkpoints[0]["name"], "baseline");

        fs::write(dir.path().join("notes.txt"), "second").unwrap();
        fs::write(dir.path().join("extra.txt"), "new").unwrap();

        changeflow()
            .current_dir(dir.path())
            .args(["checkpoint", "rollback", &id])
            .assert()
            .success()
            .stdout(predicate::str::contains("Rolled back"));

        assert_eq!(
            fs::read_to_string(dir.path().join("notes.txt")).unwrap(),
            "first"
        );
        assert!(!dir.path().join("extra.txt").exists());
    }

    #[test]
    fn test_rollback_refused_while_a_run_holds_the_ledger() {
        let dir = create_temp_change();
        fs::write(dir.path().join("a.txt"), "old").unwrap();

        changeflow()
            .current_dir(dir.path())
            .args(["checkpoint", "create", "--stage", "3"])
            .assert()
            .success();
        let mut store = changeflow::checkpoint::CheckpointStore::open(dir.path()).unwrap();
        let id = store.list()[0].id.clone();

        let plan = changeflow::resolve("standard").unwrap();
        let _running =
            changeflow::status::StatusTracker::create(dir.path(), "c1", &plan).unwrap();
        fs::write(dir.path().join("a.txt"), "in progress").unwrap();

        changeflow()
            .current_dir(dir.path())
            .args(["checkpoint", "rollback", &id])
            .assert()
            .failure()
            .stderr(predicate::str::contains("locked"));

        assert_eq!(
            fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "in progress"
        );
        store = changeflow::checkpoint::CheckpointStore::open(dir.path()).unwrap();
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn test_rollback_unknown_checkpoint_fails() {
        let dir = create_temp_change();

        changeflow()
            .current_dir(dir.path())
            .args(["checkpoint", "rollback", "missing"])
            .assert()
            .failure();
    }

    #[test]
    fn test_create_with_unknown_stage_fails() {
        let dir = create_temp_change();

        changeflow()
            .current_dir(dir.path())
            .args(["checkpoint", "create", "--stage", "deploy"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown stage"));
    }
}

// =============================================================================
// Hooks
// =============================================================================

mod hooks {
    use super::*;

    #[test]
    fn test_hooks_none_registered() {
        let dir = create_temp_change();

        changeflow()
            .current_dir(dir.path())
            .args(["hooks", "c1", "--stage", "lint"])
            .assert()
            .success()
            .stdout(predicate::str::contains("no hooks registered"));
    }

    #[test]
    fn test_hooks_reports_every_result() {
        let dir = create_temp_change();
        write_state_file(
            &dir,
            "hooks.toml",
            r#"
[[hooks]]
stage = "*"
name = "passes"
command = "true"

[[hooks]]
stage = "lint"
name = "fails"
command = "exit 1"
remediation = "Install the linter"
"#,
        );

        changeflow()
            .current_dir(dir.path())
            .args(["hooks", "c1", "--stage", "5", "--json"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("\"passes\""))
            .stdout(predicate::str::contains("Install the linter"));

        changeflow()
            .current_dir(dir.path())
            .args(["hooks", "c1", "--stage", "documentation"])
            .assert()
            .success()
            .stdout(predicate::str::contains("passed"));
    }
}
