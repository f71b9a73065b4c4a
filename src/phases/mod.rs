//! The three phase loops and the collaborators they share.

pub mod local;
pub mod prompts;
pub mod publish;
pub mod review_fix;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::BTreeMap;
use tracing::warn;

use crate::checkpoint::{CheckpointStore, Session};
use crate::classify::StructuredError;
use crate::errors::PhaseError;
use crate::phase::{PhaseKind, PhaseStatus};
use crate::platform::Platform;
use crate::policy::ResolvedPolicy;
use crate::review::ReviewService;
use crate::runner::AgentInvoker;
use crate::tracker::Workspace;
use crate::ui::OrchestratorUI;

pub use local::{
    ChecklistAndCounter, CompletionContext, CompletionPredicate, LocalOutcome, LocalSettings,
};
pub use publish::PublishSettings;
pub use review_fix::{ReviewFixOutcome, ReviewFixSettings};

/// Everything a phase loop talks to. Borrowed for the length of a run.
pub struct PhaseContext<'a> {
    pub invoker: &'a dyn AgentInvoker,
    pub workspace: &'a dyn Workspace,
    pub review: &'a dyn ReviewService,
    pub platform: &'a dyn Platform,
    pub store: &'a CheckpointStore,
    pub policy: &'a ResolvedPolicy,
    pub overrides: &'a BTreeMap<PhaseKind, String>,
    pub ui: Option<&'a OrchestratorUI>,
}

impl PhaseContext<'_> {
    pub fn agent_for(&self, phase: PhaseKind, iteration: u32) -> String {
        self.policy.select(phase, iteration, self.overrides)
    }

    /// Persist the session.
    pub fn save(&self, session: &mut Session) -> Result<(), PhaseError> {
        self.store.save(session)?;
        Ok(())
    }

    /// Append to the journal; failures are logged only.
    pub fn journal(
        &self,
        session: &Session,
        phase: PhaseKind,
        iteration: u32,
        status: PhaseStatus,
        note: Option<&str>,
    ) {
        if let Err(e) = self
            .store
            .journal(&session.session_id)
            .record(phase, iteration, status, note)
        {
            warn!(error = %e, "Failed to append journal entry");
        }
    }

    /// Record a non-fatal problem on the session and in the error log.
    pub fn record(&self, session: &mut Session, error: StructuredError) {
        if let Err(e) = self.store.error_log(&session.session_id).append(&error) {
            warn!(error = %e, "Failed to append error log entry");
        }
        if let Some(ui) = self.ui {
            ui.show_warning(&error.message);
        }
        session.record_error(error);
    }

    pub fn step(&self, msg: &str) {
        if let Some(ui) = self.ui {
            ui.log_step(msg);
        }
    }
}
