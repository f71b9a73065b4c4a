//! Integration tests for the shepherd binary.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

use shepherd::checkpoint::{CheckpointStore, NewSession, hash_task_spec};
use shepherd::phase::PhaseKind;

fn shepherd() -> Command {
    let mut cmd = cargo_bin_cmd!("shepherd");
    cmd.env_remove("SHEPHERD_POLICY").env_remove("SHEPHERD_LOG");
    cmd
}

fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

fn seed_session(dir: &TempDir, id: &str) {
    let store = CheckpointStore::new(dir.path().join(".shepherd/sessions"));
    store
        .create(NewSession {
            session_id: id.to_string(),
            task_spec_path: dir.path().join("prd.md"),
            task_spec_hash: hash_task_spec(b"# PRD"),
            repo_root: PathBuf::from(dir.path()),
            base_branch: "main".to_string(),
            feature_branch: "shepherd/prd".to_string(),
            selected_phases: vec![PhaseKind::Local, PhaseKind::Pr],
        })
        .unwrap();
}

mod cli_basics {
    use super::*;

    #[test]
    fn test_help_lists_commands() {
        shepherd()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("run"))
            .stdout(predicate::str::contains("sessions"))
            .stdout(predicate::str::contains("policies"));
    }

    #[test]
    fn test_version() {
        shepherd().arg("--version").assert().success();
    }

    #[test]
    fn test_run_help_shows_flags() {
        shepherd()
            .args(["run", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--resume-session"))
            .stdout(predicate::str::contains("--agent-for"))
            .stdout(predicate::str::contains("--idle-grace-minutes"));
    }

    #[test]
    fn test_resume_conflicts_with_force_new() {
        shepherd()
            .args(["run", "prd.md", "--resume", "--force-new"])
            .assert()
            .failure();
    }
}

mod policies {
    use super::*;

    #[test]
    fn test_builtin_policies_and_fallbacks() {
        let dir = create_temp_project();
        shepherd()
            .current_dir(dir.path())
            .arg("policies")
            .assert()
            .success()
            .stdout(predicate::str::contains("Executor policies"))
            .stdout(predicate::str::contains("codex-claude"))
            .stdout(predicate::str::contains("codex -> claude"));
    }

    #[test]
    fn test_policies_reports_config_warnings() {
        let dir = create_temp_project();
        std::fs::create_dir_all(dir.path().join(".shepherd")).unwrap();
        std::fs::write(
            dir.path().join(".shepherd/shepherd.toml"),
            "[policies.broken]\nprimary = \"ghost\"\nfallback = \"nowhere\"\n",
        )
        .unwrap();
        shepherd()
            .current_dir(dir.path())
            .arg("policies")
            .assert()
            .success()
            .stdout(predicate::str::contains("unknown agent 'ghost'"))
            .stdout(predicate::str::contains("unknown policy 'nowhere'"));
    }
}

mod sessions {
    use super::*;

    #[test]
    fn test_list_empty() {
        let dir = create_temp_project();
        shepherd()
            .current_dir(dir.path())
            .args(["sessions", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No sessions found."));
    }

    #[test]
    fn test_list_and_show_seeded_session() {
        let dir = create_temp_project();
        seed_session(&dir, "20260101-000000-abcdef12");

        shepherd()
            .current_dir(dir.path())
            .args(["sessions", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("20260101-000000-abcdef12"))
            .stdout(predicate::str::contains("in_progress"));

        shepherd()
            .current_dir(dir.path())
            .args(["sessions", "show", "20260101-000000-abcdef12"])
            .assert()
            .success()
            .stdout(predicate::str::contains("shepherd/prd"))
            .stdout(predicate::str::contains("prd.md"));
    }

    #[test]
    fn test_show_unknown_session_fails() {
        let dir = create_temp_project();
        shepherd()
            .current_dir(dir.path())
            .args(["sessions", "show", "nope"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No session with id 'nope'"));
    }

    #[test]
    fn test_delete_with_force() {
        let dir = create_temp_project();
        seed_session(&dir, "s-delete");
        shepherd()
            .current_dir(dir.path())
            .args(["sessions", "delete", "s-delete", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Deleted session s-delete"));
        assert!(!dir.path().join(".shepherd/sessions/s-delete.json").exists());
    }

    #[test]
    fn test_cleanup_keeps_in_progress_sessions() {
        let dir = create_temp_project();
        seed_session(&dir, "s-active");
        shepherd()
            .current_dir(dir.path())
            .args(["sessions", "cleanup", "--days", "0"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Removed 0 completed session(s)"));
        assert!(dir.path().join(".shepherd/sessions/s-active.json").exists());
    }
}

mod run {
    use super::*;

    #[test]
    fn test_list_sessions_flag() {
        let dir = create_temp_project();
        shepherd()
            .current_dir(dir.path())
            .args(["run", "--list-sessions"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No sessions found."));
        assert!(dir.path().join(".shepherd/logs").exists());
    }

    #[test]
    fn test_missing_task_spec_fails() {
        let dir = create_temp_project();
        shepherd()
            .current_dir(dir.path())
            .args(["run", "missing.md", "--yes"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Task spec not found"));
    }

    #[test]
    fn test_invalid_agent_for_fails() {
        let dir = create_temp_project();
        std::fs::write(dir.path().join("prd.md"), "# PRD\n").unwrap();
        shepherd()
            .current_dir(dir.path())
            .args(["run", "prd.md", "--agent-for", "deploy=codex"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid phase 'deploy'"));
    }
}
