//! On-disk checkpoint store: `<repo>/.shepherd/sessions/<session_id>.json`.
//!
//! Writes are atomic (temp file in the same directory, `sync_all`, rename) and
//! the resulting file is owner read/write only. Each session may also carry a
//! `.lock` file, a `.journal.jsonl` and an `.errors.jsonl` next to it.

use chrono::{Duration, Utc};
use fs2::FileExt;
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::journal::{ErrorLog, Journal};
use super::migration::MigrationEngine;
use super::{NewSession, Session, SessionStatus};
use crate::errors::CheckpointError;

const REQUIRED_STRING_FIELDS: &[&str] = &[
    "session_id",
    "created_at",
    "updated_at",
    "task_spec_path",
    "repo_root",
];

pub struct CheckpointStore {
    dir: PathBuf,
    migrations: MigrationEngine,
}

impl CheckpointStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            migrations: MigrationEngine::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", session_id))
    }

    fn lock_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", session_id))
    }

    pub fn journal(&self, session_id: &str) -> Journal {
        Journal::new(self.dir.join(format!("{}.journal.jsonl", session_id)))
    }

    pub fn error_log(&self, session_id: &str) -> ErrorLog {
        ErrorLog::new(self.dir.join(format!("{}.errors.jsonl", session_id)))
    }

    fn ensure_dir(&self) -> Result<(), CheckpointError> {
        fs::create_dir_all(&self.dir).map_err(|source| CheckpointError::Write {
            path: self.dir.clone(),
            source,
        })
    }

    /// Create and persist a new session.
    pub fn create(&self, params: NewSession) -> Result<Session, CheckpointError> {
        let mut session = Session::new(params);
        self.save(&mut session)?;
        info!(session_id = %session.session_id, "Created session");
        Ok(session)
    }

    /// Atomically persist `session`, refreshing `updated_at`.
    pub fn save(&self, session: &mut Session) -> Result<(), CheckpointError> {
        self.ensure_dir()?;
        session.updated_at = Utc::now();
        let bytes =
            serde_json::to_vec_pretty(session).map_err(|source| CheckpointError::Serialize {
                session_id: session.session_id.clone(),
                source,
            })?;
        let path = self.session_path(&session.session_id);
        write_atomic(&path, &bytes)?;
        debug!(session_id = %session.session_id, path = %path.display(), "Checkpoint saved");
        Ok(())
    }

    /// Load, validate and migrate a session. `Ok(None)` when it doesn't exist.
    pub fn load(&self, session_id: &str) -> Result<Option<Session>, CheckpointError> {
        let path = self.session_path(session_id);
        if !path.exists() {
            return Ok(None);
        }
        self.load_path(&path).map(Some)
    }

    fn load_path(&self, path: &Path) -> Result<Session, CheckpointError> {
        let content = fs::read_to_string(path).map_err(|source| CheckpointError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut doc: Value =
            serde_json::from_str(&content).map_err(|source| CheckpointError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        validate_document(&doc).map_err(|reason| CheckpointError::Invalid {
            path: path.to_path_buf(),
            reason,
        })?;

        let outcome = self.migrations.migrate(&mut doc);
        if outcome.from != outcome.to {
            info!(
                path = %path.display(),
                from = outcome.from,
                to = outcome.to,
                "Migrated checkpoint"
            );
        }

        serde_json::from_value(doc).map_err(|e| CheckpointError::Invalid {
            path: path.to_path_buf(),
            reason: format!("schema v{}: {}", outcome.to, e),
        })
    }

    /// Most recently updated in-progress session for this spec and repo.
    pub fn find_resumable(
        &self,
        task_spec: &Path,
        repo: &Path,
    ) -> Result<Option<Session>, CheckpointError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|s| s.status == SessionStatus::InProgress && s.matches(task_spec, repo))
            .max_by_key(|s| s.updated_at))
    }

    /// All readable sessions, newest first. Unreadable files are skipped with a warning.
    pub fn list(&self) -> Result<Vec<Session>, CheckpointError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.dir).map_err(|source| CheckpointError::Read {
            path: self.dir.clone(),
            source,
        })?;

        let mut sessions = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match self.load_path(&path) {
                Ok(session) => sessions.push(session),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint"),
            }
        }
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    /// Delete a session and its side files. Returns whether the checkpoint existed.
    pub fn delete(&self, session_id: &str) -> Result<bool, CheckpointError> {
        let path = self.session_path(session_id);
        let existed = path.exists();
        let side_files = [
            path,
            self.lock_path(session_id),
            self.journal(session_id).path().to_path_buf(),
            self.error_log(session_id).path().to_path_buf(),
        ];
        for file in side_files {
            match fs::remove_file(&file) {
                Ok(()) => debug!(path = %file.display(), "Removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(CheckpointError::Write { path: file, source }),
            }
        }
        Ok(existed)
    }

    /// Delete completed sessions last updated more than `max_age` ago.
    pub fn cleanup_completed(&self, max_age: Duration) -> Result<Vec<String>, CheckpointError> {
        let cutoff = Utc::now() - max_age;
        let mut removed = Vec::new();
        for session in self.list()? {
            if session.status == SessionStatus::Completed && session.updated_at < cutoff {
                self.delete(&session.session_id)?;
                removed.push(session.session_id);
            }
        }
        if !removed.is_empty() {
            info!(count = removed.len(), "Cleaned up completed sessions");
        }
        Ok(removed)
    }

    /// Remove temp files left behind by an interrupted save.
    pub fn recover_interrupted_writes(&self) {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "tmp") {
                debug!(path = %path.display(), "Removing interrupted write");
                let _ = fs::remove_file(&path);
            }
        }
    }

    /// Take the exclusive single-writer lock for a session.
    pub fn lock(&self, session_id: &str) -> Result<SessionLock, CheckpointError> {
        self.ensure_dir()?;
        let lock_path = self.lock_path(session_id);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|source| CheckpointError::Write {
                path: lock_path.clone(),
                source,
            })?;
        file.try_lock_exclusive()
            .map_err(|_| CheckpointError::Locked {
                session_id: session_id.to_string(),
            })?;
        debug!(path = %lock_path.display(), "Acquired session lock");
        Ok(SessionLock {
            _file: file,
            lock_path,
        })
    }
}

/// Exclusive session lock, released on drop.
pub struct SessionLock {
    _file: File,
    lock_path: PathBuf,
}

impl SessionLock {
    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        // closing the file releases the flock
        debug!(path = %self.lock_path.display(), "Releasing session lock");
    }
}

impl std::fmt::Debug for SessionLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLock")
            .field("lock_path", &self.lock_path)
            .finish()
    }
}

fn validate_document(doc: &Value) -> Result<(), String> {
    let obj = doc
        .as_object()
        .ok_or_else(|| "checkpoint root is not an object".to_string())?;
    for field in REQUIRED_STRING_FIELDS {
        match obj.get(*field) {
            Some(Value::String(_)) => {}
            Some(_) => return Err(format!("`{}` must be a string", field)),
            None => return Err(format!("missing `{}`", field)),
        }
    }
    if let Some(version) = obj.get("version")
        && !version.is_u64()
    {
        return Err("`version` must be a non-negative integer".to_string());
    }
    if let Some(phases) = obj.get("phases")
        && !(phases.is_object() || phases.is_null())
    {
        return Err("`phases` must be an object".to_string());
    }
    if let Some(errors) = obj.get("errors")
        && !errors.is_array()
    {
        return Err("`errors` must be an array".to_string());
    }
    Ok(())
}

/// Write `bytes` to `path` atomically and restrict it to the owner.
///
/// On any failure the temp file is removed and `path` is left as it was.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CheckpointError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "checkpoint".to_string());
    let tmp_path = path.with_file_name(format!(
        ".{}.{}.tmp",
        file_name,
        uuid::Uuid::new_v4().simple()
    ));

    let result = write_temp_and_rename(&tmp_path, path, bytes);
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result.map_err(|source| CheckpointError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn write_temp_and_rename(tmp_path: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(tmp_path)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_all()?;
    drop(file);
    restrict_permissions(tmp_path)?;
    fs::rename(tmp_path, path)?;
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
