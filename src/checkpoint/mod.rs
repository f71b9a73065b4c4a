//! Session checkpoint model.
//!
//! A `Session` is the persisted document for one task-spec/repo pairing. It is
//! versioned (`version`), stored atomically by [`CheckpointStore`] and
//! migrated forward on load by [`MigrationEngine`].

pub mod journal;
pub mod migration;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::classify::StructuredError;
use crate::errors::CheckpointError;
use crate::phase::{PhaseKind, PhaseStatus};

pub use journal::{ErrorLog, Journal, JournalEntry};
pub use migration::{MigrationEngine, MigrationOutcome};
pub use store::{CheckpointStore, SessionLock};

/// Schema version written by this build.
pub const CURRENT_VERSION: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::InProgress => write!(f, "in_progress"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Working-tree snapshot used to tell whether an iteration changed anything.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RepoFingerprint {
    /// Sorted porcelain-style status lines (`<flags> <path>`).
    pub status: String,
    /// Head commit id, `None` on an unborn branch.
    pub head: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LocalPhaseState {
    #[serde(default)]
    pub status: PhaseStatus,
    /// Last fully persisted iteration (0 = none yet).
    #[serde(default)]
    pub iteration: u32,
    #[serde(default)]
    pub no_findings_streak: u32,
    #[serde(default)]
    pub empty_change_streak: u32,
    #[serde(default)]
    pub skipped_review_streak: u32,
    #[serde(default)]
    pub last_remaining: Option<u32>,
    #[serde(default)]
    pub last_fingerprint: Option<RepoFingerprint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PrPhaseState {
    #[serde(default)]
    pub status: PhaseStatus,
    #[serde(default)]
    pub pr_number: Option<u64>,
    #[serde(default)]
    pub pushed: bool,
    #[serde(default)]
    pub pr_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReviewFixPhaseState {
    #[serde(default)]
    pub status: PhaseStatus,
    /// Feedback item ids already handled. Sole de-duplication mechanism.
    #[serde(default)]
    pub acknowledged: BTreeSet<String>,
    #[serde(default)]
    pub cycle: u32,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
}

/// Per-phase state, tagged by phase name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PhaseState {
    Local(LocalPhaseState),
    Pr(PrPhaseState),
    ReviewFix(ReviewFixPhaseState),
}

impl PhaseState {
    pub fn fresh(kind: PhaseKind) -> Self {
        match kind {
            PhaseKind::Local => PhaseState::Local(LocalPhaseState::default()),
            PhaseKind::Pr => PhaseState::Pr(PrPhaseState::default()),
            PhaseKind::ReviewFix => PhaseState::ReviewFix(ReviewFixPhaseState::default()),
        }
    }

    pub fn kind(&self) -> PhaseKind {
        match self {
            PhaseState::Local(_) => PhaseKind::Local,
            PhaseState::Pr(_) => PhaseKind::Pr,
            PhaseState::ReviewFix(_) => PhaseKind::ReviewFix,
        }
    }

    pub fn status(&self) -> PhaseStatus {
        match self {
            PhaseState::Local(s) => s.status,
            PhaseState::Pr(s) => s.status,
            PhaseState::ReviewFix(s) => s.status,
        }
    }

    pub fn set_status(&mut self, status: PhaseStatus) {
        match self {
            PhaseState::Local(s) => s.status = status,
            PhaseState::Pr(s) => s.status = status,
            PhaseState::ReviewFix(s) => s.status = status,
        }
    }
}

/// Inputs for a brand-new session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub session_id: String,
    pub task_spec_path: PathBuf,
    pub task_spec_hash: String,
    pub repo_root: PathBuf,
    pub base_branch: String,
    pub feature_branch: String,
    pub selected_phases: Vec<PhaseKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default = "default_version")]
    pub version: u32,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub status: SessionStatus,
    pub task_spec_path: PathBuf,
    #[serde(default)]
    pub task_spec_hash: String,
    pub repo_root: PathBuf,
    #[serde(default)]
    pub base_branch: String,
    #[serde(default)]
    pub feature_branch: String,
    #[serde(default)]
    pub selected_phases: Vec<PhaseKind>,
    #[serde(default)]
    pub current_phase: Option<PhaseKind>,
    #[serde(default)]
    pub executor_policy: Option<String>,
    #[serde(default)]
    pub summary_posted: bool,
    #[serde(default)]
    pub phases: BTreeMap<PhaseKind, PhaseState>,
    #[serde(default)]
    pub errors: Vec<StructuredError>,
}

fn default_version() -> u32 {
    1
}

impl Session {
    pub fn new(params: NewSession) -> Self {
        let now = Utc::now();
        let mut selected = params.selected_phases;
        selected.sort();
        selected.dedup();
        let phases = selected
            .iter()
            .map(|kind| (*kind, PhaseState::fresh(*kind)))
            .collect();

        Self {
            version: CURRENT_VERSION,
            session_id: params.session_id,
            created_at: now,
            updated_at: now,
            status: SessionStatus::InProgress,
            task_spec_path: params.task_spec_path,
            task_spec_hash: params.task_spec_hash,
            repo_root: params.repo_root,
            base_branch: params.base_branch,
            feature_branch: params.feature_branch,
            selected_phases: selected,
            current_phase: None,
            executor_policy: None,
            summary_posted: false,
            phases,
            errors: Vec::new(),
        }
    }

    pub fn is_selected(&self, phase: PhaseKind) -> bool {
        self.selected_phases.contains(&phase)
    }

    /// Set the active phase. Only selected phases may become current.
    pub fn set_current_phase(&mut self, phase: PhaseKind) -> Result<(), CheckpointError> {
        if !self.is_selected(phase) {
            return Err(CheckpointError::PhaseNotSelected {
                phase,
                session_id: self.session_id.clone(),
            });
        }
        self.current_phase = Some(phase);
        Ok(())
    }

    pub fn phase_status(&self, phase: PhaseKind) -> PhaseStatus {
        self.phases
            .get(&phase)
            .map(PhaseState::status)
            .unwrap_or_default()
    }

    pub fn set_phase_status(&mut self, phase: PhaseKind, status: PhaseStatus) {
        self.phase_entry(phase).set_status(status);
    }

    fn phase_entry(&mut self, phase: PhaseKind) -> &mut PhaseState {
        let entry = self
            .phases
            .entry(phase)
            .or_insert_with(|| PhaseState::fresh(phase));
        if entry.kind() != phase {
            *entry = PhaseState::fresh(phase);
        }
        entry
    }

    pub fn local(&self) -> Option<&LocalPhaseState> {
        match self.phases.get(&PhaseKind::Local) {
            Some(PhaseState::Local(s)) => Some(s),
            _ => None,
        }
    }

    pub fn local_mut(&mut self) -> &mut LocalPhaseState {
        match self.phase_entry(PhaseKind::Local) {
            PhaseState::Local(s) => s,
            _ => unreachable!("phase_entry returns the matching variant"),
        }
    }

    pub fn pr(&self) -> Option<&PrPhaseState> {
        match self.phases.get(&PhaseKind::Pr) {
            Some(PhaseState::Pr(s)) => Some(s),
            _ => None,
        }
    }

    pub fn pr_mut(&mut self) -> &mut PrPhaseState {
        match self.phase_entry(PhaseKind::Pr) {
            PhaseState::Pr(s) => s,
            _ => unreachable!("phase_entry returns the matching variant"),
        }
    }

    pub fn review_fix(&self) -> Option<&ReviewFixPhaseState> {
        match self.phases.get(&PhaseKind::ReviewFix) {
            Some(PhaseState::ReviewFix(s)) => Some(s),
            _ => None,
        }
    }

    pub fn review_fix_mut(&mut self) -> &mut ReviewFixPhaseState {
        match self.phase_entry(PhaseKind::ReviewFix) {
            PhaseState::ReviewFix(s) => s,
            _ => unreachable!("phase_entry returns the matching variant"),
        }
    }

    /// PR number known to this session, if any.
    pub fn pr_number(&self) -> Option<u64> {
        self.pr().and_then(|p| p.pr_number)
    }

    pub fn record_error(&mut self, error: StructuredError) {
        self.errors.push(error);
    }

    pub fn matches(&self, task_spec: &Path, repo: &Path) -> bool {
        self.task_spec_path == task_spec && self.repo_root == repo
    }
}

/// SHA-256 of the task spec contents, lowercase hex.
pub fn hash_task_spec(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// New session id: UTC timestamp plus a short random suffix.
pub fn new_session_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%d-%H%M%S"), &suffix[..8])
}

#[cfg(test)]
pub(crate) fn sample_session(id: &str, phases: &[PhaseKind]) -> Session {
    Session::new(NewSession {
        session_id: id.to_string(),
        task_spec_path: PathBuf::from("/repo/docs/prd.md"),
        task_spec_hash: hash_task_spec(b"# PRD"),
        repo_root: PathBuf::from("/repo"),
        base_branch: "main".to_string(),
        feature_branch: "shepherd/prd".to_string(),
        selected_phases: phases.to_vec(),
    })
}
