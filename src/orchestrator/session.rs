//! Creating and resuming sessions.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::checkpoint::{
    CheckpointStore, NewSession, Session, SessionLock, SessionStatus, hash_task_spec,
    new_session_id,
};
use crate::classify::{ErrorCategory, StructuredError};
use crate::errors::OrchestratorError;
use crate::phase::PhaseKind;

/// Identity and shape of the session a run wants.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub task_spec: PathBuf,
    pub repo_root: PathBuf,
    pub base_branch: String,
    pub feature_branch: String,
    pub phases: Vec<PhaseKind>,
}

/// SHA-256 of the task spec at `path`.
pub fn task_spec_hash(path: &Path) -> Result<String, OrchestratorError> {
    let content = std::fs::read(path).map_err(|source| OrchestratorError::TaskSpecRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(hash_task_spec(&content))
}

/// Default feature branch for a task spec: `shepherd/<file stem>`.
pub fn default_feature_branch(task_spec: &Path) -> String {
    let stem = task_spec
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let slug: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        "shepherd/task".to_string()
    } else {
        format!("shepherd/{}", slug)
    }
}

/// Create and persist a fresh session, holding its lock.
pub fn start_session(
    store: &CheckpointStore,
    request: &SessionRequest,
) -> Result<(Session, SessionLock), OrchestratorError> {
    let hash = task_spec_hash(&request.task_spec)?;
    let session_id = new_session_id();
    let lock = store.lock(&session_id)?;
    let session = store.create(NewSession {
        session_id,
        task_spec_path: request.task_spec.clone(),
        task_spec_hash: hash,
        repo_root: request.repo_root.clone(),
        base_branch: request.base_branch.clone(),
        feature_branch: request.feature_branch.clone(),
        selected_phases: request.phases.clone(),
    })?;
    Ok((session, lock))
}

/// Lock a stored session and prepare it for another run.
///
/// The checkpoint is read only once the lock is held, so a second process
/// never writes over the owner's state. A changed task spec is recorded as
/// a warning and its hash refreshed. A failed session goes back to
/// in-progress so its failed phase reruns.
pub fn resume_session(
    store: &CheckpointStore,
    session_id: &str,
) -> Result<(Session, SessionLock), OrchestratorError> {
    let lock = store.lock(session_id)?;
    let mut session = store
        .load(session_id)?
        .ok_or_else(|| OrchestratorError::SessionNotFound {
            session_id: session_id.to_string(),
        })?;
    let hash = task_spec_hash(&session.task_spec_path)?;
    if hash != session.task_spec_hash {
        let message = format!(
            "Task spec {} changed since the session was created; continuing with the new content",
            session.task_spec_path.display()
        );
        warn!(session_id = %session.session_id, "{}", message);
        let entry = StructuredError::warning(ErrorCategory::Validation, message);
        if let Err(e) = store.error_log(&session.session_id).append(&entry) {
            warn!(error = %e, "Failed to append error log entry");
        }
        session.record_error(entry);
        session.task_spec_hash = hash;
    }
    if session.status == SessionStatus::Failed {
        info!(session_id = %session.session_id, "Retrying failed session");
    }
    session.status = SessionStatus::InProgress;
    store.save(&mut session)?;
    Ok((session, lock))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CheckpointError;
    use tempfile::tempdir;

    fn request(dir: &Path) -> SessionRequest {
        let spec = dir.join("My PRD v2.md");
        std::fs::write(&spec, "# PRD\n- [ ] one\n").unwrap();
        SessionRequest {
            task_spec: spec,
            repo_root: dir.to_path_buf(),
            base_branch: "main".to_string(),
            feature_branch: "shepherd/my-prd-v2".to_string(),
            phases: vec![PhaseKind::Local, PhaseKind::Pr],
        }
    }

    #[test]
    fn test_default_feature_branch_slug() {
        assert_eq!(
            default_feature_branch(Path::new("/x/My PRD v2.md")),
            "shepherd/my-prd-v2"
        );
        assert_eq!(default_feature_branch(Path::new("/x/__.md")), "shepherd/task");
    }

    #[test]
    fn test_start_then_find_resumable() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("sessions"));
        let req = request(dir.path());
        let (session, _lock) = start_session(&store, &req).unwrap();
        assert_eq!(session.selected_phases, vec![PhaseKind::Local, PhaseKind::Pr]);

        let found = store
            .find_resumable(&req.task_spec, &req.repo_root)
            .unwrap()
            .unwrap();
        assert_eq!(found.session_id, session.session_id);
    }

    #[test]
    fn test_missing_task_spec_is_error() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("sessions"));
        let mut req = request(dir.path());
        req.task_spec = dir.path().join("missing.md");
        assert!(matches!(
            start_session(&store, &req),
            Err(OrchestratorError::TaskSpecRead { .. })
        ));
    }

    #[test]
    fn test_resume_detects_drift_and_refreshes_hash() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("sessions"));
        let req = request(dir.path());
        let (session, lock) = start_session(&store, &req).unwrap();
        let original_hash = session.task_spec_hash.clone();
        drop(lock);

        std::fs::write(&req.task_spec, "# PRD\n- [ ] one\n- [ ] two\n").unwrap();
        let (resumed, lock) = resume_session(&store, &session.session_id).unwrap();
        assert_ne!(resumed.task_spec_hash, original_hash);
        assert_eq!(resumed.errors.len(), 1);
        assert!(resumed.errors[0].message.contains("changed"));
        drop(lock);

        // unchanged spec: no new warning
        let (again, _lock) = resume_session(&store, &resumed.session_id).unwrap();
        assert_eq!(again.errors.len(), 1);
        assert_eq!(store.error_log(&again.session_id).entries().unwrap().len(), 1);
    }

    #[test]
    fn test_resume_failed_session_reopens_it() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("sessions"));
        let (mut session, lock) = start_session(&store, &request(dir.path())).unwrap();
        session.status = SessionStatus::Failed;
        store.save(&mut session).unwrap();
        drop(lock);
        let (resumed, _lock) = resume_session(&store, &session.session_id).unwrap();
        assert_eq!(resumed.status, SessionStatus::InProgress);
    }

    #[test]
    fn test_resume_of_locked_session_leaves_checkpoint_untouched() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("sessions"));
        let req = request(dir.path());
        let (session, _owner) = start_session(&store, &req).unwrap();
        let path = store.session_path(&session.session_id);
        let before = std::fs::read(&path).unwrap();

        // drift would otherwise be recorded and saved
        std::fs::write(&req.task_spec, "# PRD\n- [x] one\n").unwrap();
        let err = resume_session(&store, &session.session_id).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Checkpoint(CheckpointError::Locked { .. })
        ));
        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert!(store.error_log(&session.session_id).entries().unwrap().is_empty());
    }

    #[test]
    fn test_resume_unknown_session_is_error() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("sessions"));
        assert!(matches!(
            resume_session(&store, "nope"),
            Err(OrchestratorError::SessionNotFound { .. })
        ));
    }
}
