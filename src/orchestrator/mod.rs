//! Session orchestration: runs the selected phases in order against a
//! checkpointed session and posts the closing summary.

pub mod session;
pub mod summary;

use tracing::{debug, error, info, warn};

use crate::checkpoint::{Session, SessionStatus};
use crate::classify::classify_error;
use crate::errors::{OrchestratorError, PhaseError};
use crate::phase::{PhaseKind, PhaseStatus};
use crate::phases::local::run_local;
use crate::phases::publish::run_publish;
use crate::phases::review_fix::run_review_fix;
use crate::phases::{
    ChecklistAndCounter, CompletionPredicate, LocalOutcome, LocalSettings, PhaseContext,
    PublishSettings, ReviewFixOutcome, ReviewFixSettings,
};

pub use session::{
    SessionRequest, default_feature_branch, resume_session, start_session, task_spec_hash,
};
pub use summary::{build_summary, summary_marker};

/// How a phase ended without failing.
enum PhaseResult {
    Finished(String),
    Skipped(String),
}

fn describe_local(outcome: LocalOutcome) -> String {
    match outcome {
        LocalOutcome::Completed { iteration } => {
            format!("implementation complete after {} iteration(s)", iteration)
        }
        LocalOutcome::CleanStreak { iteration } => {
            format!("clean reviews at iteration {}", iteration)
        }
        LocalOutcome::IterationCeiling { iteration } => {
            format!("stopped at iteration ceiling ({})", iteration)
        }
    }
}

fn describe_review_fix(outcome: ReviewFixOutcome) -> String {
    match outcome {
        ReviewFixOutcome::NoFeedback { cycles } => format!("no feedback ({} cycle(s))", cycles),
        ReviewFixOutcome::Idle { cycles } => format!("reviewer idle after {} cycle(s)", cycles),
        ReviewFixOutcome::AllClear { cycles } => format!("all clear after {} cycle(s)", cycles),
        ReviewFixOutcome::CycleCeiling { cycles } => format!("cycle ceiling ({})", cycles),
    }
}

/// Drives one session through its selected phases.
pub struct SessionOrchestrator<'a> {
    ctx: PhaseContext<'a>,
    local: LocalSettings,
    publish: PublishSettings,
    review_fix: ReviewFixSettings,
    completion: Box<dyn CompletionPredicate>,
    verbose: bool,
}

impl<'a> SessionOrchestrator<'a> {
    pub fn new(ctx: PhaseContext<'a>) -> Self {
        Self {
            ctx,
            local: LocalSettings::default(),
            publish: PublishSettings::default(),
            review_fix: ReviewFixSettings::default(),
            completion: Box::new(ChecklistAndCounter),
            verbose: false,
        }
    }

    pub fn with_local(mut self, settings: LocalSettings) -> Self {
        self.local = settings;
        self
    }

    pub fn with_publish(mut self, settings: PublishSettings) -> Self {
        self.publish = settings;
        self
    }

    pub fn with_review_fix(mut self, settings: ReviewFixSettings) -> Self {
        self.review_fix = settings;
        self
    }

    pub fn with_completion(mut self, completion: Box<dyn CompletionPredicate>) -> Self {
        self.completion = completion;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Run every selected phase that has not finished yet.
    ///
    /// Completed and skipped phases are passed over, so calling this again on
    /// a finished session does nothing but re-check the summary comment.
    pub async fn run(&self, session: &mut Session) -> Result<(), OrchestratorError> {
        session.executor_policy = Some(self.ctx.policy.name.clone());
        session.status = SessionStatus::InProgress;
        self.ctx.store.save(session)?;
        info!(
            session_id = %session.session_id,
            policy = %self.ctx.policy.name,
            phases = ?session.selected_phases,
            "Running session"
        );

        let phases = session.selected_phases.clone();
        for phase in phases {
            let status = session.phase_status(phase);
            if matches!(status, PhaseStatus::Completed | PhaseStatus::Skipped) {
                debug!(%phase, %status, "Phase already finished");
                if let Some(ui) = self.ctx.ui {
                    ui.phase_skipped(phase, &format!("already {}", status));
                }
                continue;
            }

            session.set_current_phase(phase)?;
            session.set_phase_status(phase, PhaseStatus::InProgress);
            self.ctx.store.save(session)?;
            self.ctx
                .journal(session, phase, 0, PhaseStatus::InProgress, Some("started"));
            if let Some(ui) = self.ctx.ui {
                ui.start_phase(phase);
            }

            match self.run_phase(phase, session).await {
                Ok(PhaseResult::Finished(note)) => {
                    info!(%phase, "{}", note);
                    session.set_phase_status(phase, PhaseStatus::Completed);
                    self.ctx.store.save(session)?;
                    self.ctx
                        .journal(session, phase, 0, PhaseStatus::Completed, Some(&note));
                    if let Some(ui) = self.ctx.ui {
                        ui.phase_complete(phase);
                    }
                }
                Ok(PhaseResult::Skipped(reason)) => {
                    info!(%phase, reason = %reason, "Phase skipped");
                    session.set_phase_status(phase, PhaseStatus::Skipped);
                    self.ctx.store.save(session)?;
                    self.ctx
                        .journal(session, phase, 0, PhaseStatus::Skipped, Some(&reason));
                    if let Some(ui) = self.ctx.ui {
                        ui.phase_skipped(phase, &reason);
                    }
                }
                Err(err) => return Err(self.fail(session, phase, err).await),
            }
        }

        session.status = SessionStatus::Completed;
        session.current_phase = None;
        self.ctx.store.save(session)?;
        info!(session_id = %session.session_id, "Session completed");
        self.post_summary(session).await;
        if let Some(ui) = self.ctx.ui {
            ui.finish(session);
        }
        Ok(())
    }

    async fn run_phase(
        &self,
        phase: PhaseKind,
        session: &mut Session,
    ) -> Result<PhaseResult, PhaseError> {
        match phase {
            PhaseKind::Local => {
                let outcome = run_local(
                    &self.ctx,
                    session,
                    &self.local,
                    self.completion.as_ref(),
                    self.verbose,
                )
                .await?;
                Ok(PhaseResult::Finished(describe_local(outcome)))
            }
            PhaseKind::Pr => match run_publish(&self.ctx, session, &self.publish).await? {
                Some(pr) => Ok(PhaseResult::Finished(format!("pull request #{}", pr.number))),
                None => Ok(PhaseResult::Skipped(
                    "no commits between base and feature branch".to_string(),
                )),
            },
            PhaseKind::ReviewFix => {
                let Some(pr) = self.pull_request(session).await? else {
                    return Ok(PhaseResult::Skipped(format!(
                        "no open pull request for {}",
                        session.feature_branch
                    )));
                };
                let outcome = run_review_fix(&self.ctx, session, pr, &self.review_fix).await?;
                Ok(PhaseResult::Finished(describe_review_fix(outcome)))
            }
        }
    }

    /// PR from the checkpoint, else an open one for the feature branch.
    async fn pull_request(&self, session: &Session) -> Result<Option<u64>, PhaseError> {
        if let Some(number) = session.pr_number() {
            return Ok(Some(number));
        }
        let found = self
            .ctx
            .platform
            .find_open_pr(&session.feature_branch)
            .await?;
        Ok(found.map(|pr| pr.number))
    }

    async fn fail(
        &self,
        session: &mut Session,
        phase: PhaseKind,
        err: PhaseError,
    ) -> OrchestratorError {
        let entry = classify_error(&err, Some(phase));
        error!(%phase, category = %entry.category, error = %err, "Phase failed");
        if let Err(e) = self.ctx.store.error_log(&session.session_id).append(&entry) {
            warn!(error = %e, "Failed to append error log entry");
        }
        session.record_error(entry);
        session.set_phase_status(phase, PhaseStatus::Failed);
        session.status = SessionStatus::Failed;
        if let Err(e) = self.ctx.store.save(session) {
            warn!(error = %e, "Failed to persist failed session");
        }
        self.ctx
            .journal(session, phase, 0, PhaseStatus::Failed, Some(&err.to_string()));
        if let Some(ui) = self.ctx.ui {
            ui.phase_failed(phase, &err.to_string());
        }
        self.post_summary(session).await;
        if let Some(ui) = self.ctx.ui {
            ui.finish(session);
        }
        OrchestratorError::PhaseFailed { phase, source: err }
    }

    /// Post the summary comment at most once per session. Never fails the run.
    async fn post_summary(&self, session: &mut Session) {
        if session.summary_posted {
            return;
        }
        let pr = match self.pull_request(session).await {
            Ok(Some(pr)) => pr,
            Ok(None) => {
                debug!("No pull request, skipping summary comment");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Could not look up pull request for summary");
                return;
            }
        };

        let marker = summary_marker(&session.session_id);
        match self.ctx.platform.has_comment_with_marker(pr, &marker).await {
            Ok(true) => debug!(pr, "Summary comment already present"),
            Ok(false) => {
                if let Err(e) = self.ctx.platform.comment(pr, &build_summary(session)).await {
                    warn!(pr, error = %e, "Failed to post summary comment");
                    return;
                }
                info!(pr, "Posted session summary");
            }
            Err(e) => {
                warn!(pr, error = %e, "Failed to check for an existing summary comment");
                return;
            }
        }

        session.summary_posted = true;
        if let Err(e) = self.ctx.store.save(session) {
            warn!(error = %e, "Failed to persist summary flag");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::testing::{FakePlatform, Harness, Step, item};
    use crate::runner::RetryPolicy;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn orchestrator<'a>(h: &'a Harness) -> SessionOrchestrator<'a> {
        SessionOrchestrator::new(h.ctx())
            .with_local(LocalSettings {
                max_iterations: 4,
                retry: RetryPolicy::none(),
                ..Default::default()
            })
            .with_review_fix(ReviewFixSettings {
                initial_delay: Duration::ZERO,
                idle_grace: Duration::ZERO,
                ..Default::default()
            })
    }

    fn summaries(h: &Harness) -> usize {
        h.platform
            .comments
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, body)| body.contains("shepherd-summary:"))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run_publishes_and_posts_summary() {
        let h = Harness::new("# Add widgets\n");
        h.invoker.push(Step::output("done\nREMAINING=0").changing());
        let mut session = h.session(&PhaseKind::ALL);

        orchestrator(&h).run(&mut session).await.unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        for phase in PhaseKind::ALL {
            assert_eq!(session.phase_status(phase), PhaseStatus::Completed);
        }
        assert_eq!(session.executor_policy.as_deref(), Some("claude"));
        assert_eq!(session.pr_number(), Some(101));
        assert!(session.summary_posted);
        let comments = h.platform.comments.lock().unwrap().clone();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].0, 101);
        assert!(comments[0].1.contains(&summary_marker("test-session")));

        let reloaded = h.store.load("test-session").unwrap().unwrap();
        assert_eq!(reloaded.status, SessionStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_of_finished_session_is_a_no_op() {
        let h = Harness::new("# Add widgets\n");
        h.invoker.push(Step::output("REMAINING=0").changing());
        let mut session = h.session(&PhaseKind::ALL);
        orchestrator(&h).run(&mut session).await.unwrap();
        let calls = h.invoker.calls().len();

        let mut reloaded = h.store.load("test-session").unwrap().unwrap();
        orchestrator(&h).run(&mut reloaded).await.unwrap();

        assert_eq!(h.invoker.calls().len(), calls);
        assert_eq!(h.platform.created.lock().unwrap().len(), 1);
        assert_eq!(summaries(&h), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_summary_not_duplicated_when_marker_exists() {
        let h = Harness::new("# PRD\n").with_platform(FakePlatform::with_open_pr(7));
        h.platform
            .comments
            .lock()
            .unwrap()
            .push((7, format!("{}\nold", summary_marker("test-session"))));
        let mut session = h.session(&[PhaseKind::ReviewFix]);

        orchestrator(&h).run(&mut session).await.unwrap();

        assert_eq!(summaries(&h), 1);
        assert!(session.summary_posted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_review_fix_without_pull_request_is_skipped() {
        let h = Harness::new("# PRD\n");
        let mut session = h.session(&[PhaseKind::ReviewFix]);

        orchestrator(&h).run(&mut session).await.unwrap();

        assert_eq!(session.phase_status(PhaseKind::ReviewFix), PhaseStatus::Skipped);
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(h.platform.feedback_calls.load(Ordering::SeqCst), 0);
        assert!(h.platform.comments.lock().unwrap().is_empty());
        assert!(!session.summary_posted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_review_fix_alone_uses_open_pull_request() {
        let h = Harness::new("# PRD\n").with_platform(FakePlatform::with_open_pr(7));
        h.platform.set_feedback(vec![item("t1", "rename this")]);
        let mut session = h.session(&[PhaseKind::ReviewFix]);

        orchestrator(&h).run(&mut session).await.unwrap();

        assert_eq!(session.phase_status(PhaseKind::ReviewFix), PhaseStatus::Completed);
        assert!(session.review_fix().unwrap().acknowledged.contains("t1"));
        assert_eq!(h.invoker.calls().len(), 1);
        let comments = h.platform.comments.lock().unwrap().clone();
        assert!(comments.iter().any(|(pr, body)| *pr == 7 && body.contains("shepherd-summary")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_to_publish_skips_pr_and_review_fix() {
        let h = Harness::new("# PRD\n");
        h.platform.no_commits.store(true, Ordering::SeqCst);
        let mut session = h.session(&[PhaseKind::Pr, PhaseKind::ReviewFix]);

        orchestrator(&h).run(&mut session).await.unwrap();

        assert_eq!(session.phase_status(PhaseKind::Pr), PhaseStatus::Skipped);
        assert_eq!(session.phase_status(PhaseKind::ReviewFix), PhaseStatus::Skipped);
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_failure_marks_session_failed() {
        let h = Harness::new("# PRD\n");
        h.invoker.push(Step::failure(1, "fatal: merge conflict in src/lib.rs"));
        let mut session = h.session(&[PhaseKind::Local, PhaseKind::Pr]);

        let err = orchestrator(&h).run(&mut session).await.unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::PhaseFailed {
                phase: PhaseKind::Local,
                ..
            }
        ));
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.phase_status(PhaseKind::Local), PhaseStatus::Failed);
        assert_eq!(session.phase_status(PhaseKind::Pr), PhaseStatus::Pending);
        let last = session.errors.last().unwrap();
        assert_eq!(last.phase, Some(PhaseKind::Local));

        let logged = h.store.error_log("test-session").entries().unwrap();
        assert_eq!(logged.len(), 1);
        let reloaded = h.store.load("test-session").unwrap().unwrap();
        assert_eq!(reloaded.status, SessionStatus::Failed);
        assert!(h.platform.created.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_session_resumes_at_failed_phase() {
        let h = Harness::new("# PRD\n");
        h.invoker.push(Step::failure(1, "boom"));
        let mut session = h.session(&[PhaseKind::Local, PhaseKind::Pr]);
        assert!(orchestrator(&h).run(&mut session).await.is_err());

        h.invoker.push(Step::output("REMAINING=0").changing());
        let mut resumed = h.store.load("test-session").unwrap().unwrap();
        orchestrator(&h).run(&mut resumed).await.unwrap();

        assert_eq!(resumed.status, SessionStatus::Completed);
        assert_eq!(resumed.phase_status(PhaseKind::Local), PhaseStatus::Completed);
        assert_eq!(resumed.pr_number(), Some(101));
    }
}
