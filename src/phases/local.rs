//! Local implement → review → fix loop.

use std::path::Path;
use tracing::{debug, info, warn};

use super::PhaseContext;
use super::prompts::{build_findings_prompt, build_implement_prompt};
use crate::checkpoint::Session;
use crate::classify::{ErrorCategory, Severity, StallDetector, StructuredError, classify_error};
use crate::errors::PhaseError;
use crate::phase::{PhaseKind, PhaseStatus};
use crate::runner::{RetryPolicy, invoke_with_retry};
use crate::signals::{AgentSignals, Checklist, SignalParser, count_checklist};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSettings {
    pub max_iterations: u32,
    /// Consecutive iterations without any repository change before failing.
    pub empty_change_limit: u32,
    /// Consecutive clean reviews before stopping optimistically.
    pub clean_review_limit: u32,
    pub retry: RetryPolicy,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            empty_change_limit: 3,
            clean_review_limit: 2,
            retry: RetryPolicy::default(),
        }
    }
}

/// What the completion predicate gets to look at after an iteration.
#[derive(Debug, Clone)]
pub struct CompletionContext<'a> {
    pub signals: &'a AgentSignals,
    /// Latest counter value seen this phase.
    pub remaining: Option<u32>,
    pub checklist: Checklist,
}

/// Decides whether the implementation is done.
pub trait CompletionPredicate: Send + Sync {
    fn is_complete(&self, ctx: &CompletionContext<'_>) -> bool;
}

/// With a checklist: every item checked and the counter, if seen, at zero.
/// Without one: counter explicitly zero or the success marker.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecklistAndCounter;

impl CompletionPredicate for ChecklistAndCounter {
    fn is_complete(&self, ctx: &CompletionContext<'_>) -> bool {
        if ctx.checklist.is_present() {
            ctx.checklist.is_complete() && ctx.remaining.is_none_or(|r| r == 0)
        } else {
            ctx.remaining == Some(0) || ctx.signals.success_marker
        }
    }
}

/// How the local phase ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalOutcome {
    Completed { iteration: u32 },
    /// Enough consecutive clean reviews.
    CleanStreak { iteration: u32 },
    IterationCeiling { iteration: u32 },
}

enum ReviewStep {
    Skipped,
    Clean,
    Findings(usize),
    Unavailable,
}

fn read_checklist(path: &Path) -> Checklist {
    match std::fs::read_to_string(path) {
        Ok(content) => count_checklist(&content),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read task spec for checklist");
            Checklist::default()
        }
    }
}

fn strictly_decreased(previous: Option<u32>, current: Option<u32>) -> bool {
    matches!((previous, current), (Some(prev), Some(cur)) if cur < prev)
}

/// Run the local loop from the iteration after the last persisted one.
pub async fn run_local(
    ctx: &PhaseContext<'_>,
    session: &mut Session,
    settings: &LocalSettings,
    completion: &dyn CompletionPredicate,
    verbose: bool,
) -> Result<LocalOutcome, PhaseError> {
    let parser = SignalParser::new(verbose);
    let mut stall = StallDetector::default();
    let task_spec = session.task_spec_path.clone();
    let base_branch = session.base_branch.clone();

    let start = session.local_mut().iteration + 1;
    if start > 1 {
        let state = session.local_mut();
        info!(
            iteration = start,
            empty_streak = state.empty_change_streak,
            clean_streak = state.no_findings_streak,
            "Resuming local phase"
        );
        let previous = state.last_fingerprint.clone();
        if let Some(previous) = previous
            && ctx.workspace.fingerprint()? != previous
        {
            // edits made while paused are not credited to the next iteration
            warn!(iteration = start, "Working tree changed since the last checkpoint");
            ctx.record(
                session,
                StructuredError::warning(
                    ErrorCategory::Validation,
                    format!(
                        "Working tree changed outside the session before iteration {}",
                        start
                    ),
                )
                .with_phase(PhaseKind::Local),
            );
        }
    }

    for iteration in start..=settings.max_iterations {
        if let Some(ui) = ctx.ui {
            ui.start_iteration(iteration, settings.max_iterations);
        }
        let before = ctx.workspace.fingerprint()?;
        let previous_remaining = session.local_mut().last_remaining;

        let agent = ctx.agent_for(PhaseKind::Local, iteration);
        let prompt = build_implement_prompt(&task_spec, &base_branch, iteration);
        ctx.step(&format!("implementing with {}", agent));
        let outcome = invoke_with_retry(ctx.invoker, &agent, &prompt, &settings.retry).await?;
        let output = outcome.combined_output();
        let mut signals = parser.parse(&output);
        if let Some(ui) = ctx.ui {
            ui.update_elapsed(outcome.duration);
            ui.show_signals(&signals);
        }
        let mut remaining = signals.remaining.or(previous_remaining);

        for signal in stall.observe(&output, signals.remaining) {
            debug!(iteration, %signal, "Stall signal");
        }

        let after_implement = ctx.workspace.fingerprint()?;
        let changed = after_implement != before;
        let progressed = strictly_decreased(previous_remaining, signals.remaining);

        let review = if !changed && !progressed {
            ReviewStep::Skipped
        } else {
            ctx.step("reviewing");
            match ctx.review.review(&base_branch).await {
                Ok(report) if report.is_clean() => ReviewStep::Clean,
                Ok(report) => {
                    let count = report.findings.len();
                    if let Some(ui) = ctx.ui {
                        ui.show_review(count);
                        ui.show_fix(count);
                    }
                    let fix_prompt = build_findings_prompt(&task_spec, &report);
                    match invoke_with_retry(ctx.invoker, &agent, &fix_prompt, &RetryPolicy::none())
                        .await
                    {
                        Err(e @ PhaseError::ReadonlySandbox { .. }) => return Err(e),
                        Ok(fix) => {
                            let fix_signals = parser.parse(&fix.combined_output());
                            if fix_signals.remaining.is_some() {
                                remaining = fix_signals.remaining;
                            }
                            signals.success_marker |= fix_signals.success_marker;
                        }
                        Err(e) => {
                            warn!(iteration, error = %e, "Fixing review findings failed");
                            let entry = classify_error(&e, Some(PhaseKind::Local))
                                .with_severity(Severity::Warning);
                            ctx.record(session, entry);
                        }
                    }
                    ReviewStep::Findings(count)
                }
                Err(e) => {
                    warn!(iteration, error = %e, "Review service unavailable");
                    ctx.record(
                        session,
                        StructuredError::warning(
                            ErrorCategory::Runner,
                            format!("Review skipped in iteration {}: {}", iteration, e),
                        )
                        .with_phase(PhaseKind::Local),
                    );
                    ReviewStep::Unavailable
                }
            }
        };

        let after = match review {
            ReviewStep::Findings(_) => ctx.workspace.fingerprint()?,
            _ => after_implement,
        };
        let any_change = after != before;

        let state = session.local_mut();
        state.iteration = iteration;
        state.last_remaining = remaining;
        state.last_fingerprint = Some(after);
        if any_change {
            state.empty_change_streak = 0;
        } else {
            state.empty_change_streak += 1;
        }
        let note = match review {
            ReviewStep::Skipped => {
                state.skipped_review_streak += 1;
                if let Some(ui) = ctx.ui {
                    ui.show_review_skipped("no change and no progress");
                }
                "review skipped".to_string()
            }
            ReviewStep::Clean => {
                state.skipped_review_streak = 0;
                state.no_findings_streak += 1;
                if let Some(ui) = ctx.ui {
                    ui.show_review(0);
                }
                "review clean".to_string()
            }
            ReviewStep::Findings(n) => {
                state.skipped_review_streak = 0;
                state.no_findings_streak = 0;
                format!("{} finding(s)", n)
            }
            ReviewStep::Unavailable => {
                state.skipped_review_streak = 0;
                "review unavailable".to_string()
            }
        };
        let empty_streak = state.empty_change_streak;
        let clean_streak = state.no_findings_streak;

        ctx.save(session)?;
        ctx.journal(
            session,
            PhaseKind::Local,
            iteration,
            PhaseStatus::InProgress,
            Some(&note),
        );
        info!(
            iteration,
            remaining = ?remaining,
            changed = any_change,
            empty_streak,
            clean_streak,
            "{}",
            note
        );

        let findings_active = matches!(review, ReviewStep::Findings(_));
        let checklist = read_checklist(&task_spec);
        if checklist.is_present() {
            debug!(iteration, unchecked = checklist.unchecked(), "Checklist progress");
        }
        let completion_ctx = CompletionContext {
            signals: &signals,
            remaining,
            checklist,
        };
        if !findings_active && completion.is_complete(&completion_ctx) {
            if let Some(ui) = ctx.ui {
                ui.iteration_done(iteration, "complete");
            }
            return Ok(LocalOutcome::Completed { iteration });
        }
        if empty_streak >= settings.empty_change_limit {
            if let Some(ui) = ctx.ui {
                ui.iteration_error(iteration, "no repository change");
            }
            return Err(PhaseError::Stalled {
                streak: empty_streak,
                iteration,
            });
        }
        if clean_streak >= settings.clean_review_limit {
            info!(iteration, clean_streak, "Stopping after consecutive clean reviews");
            if let Some(ui) = ctx.ui {
                ui.iteration_done(iteration, "clean review streak");
            }
            return Ok(LocalOutcome::CleanStreak { iteration });
        }
        if let Some(ui) = ctx.ui {
            ui.iteration_done(iteration, &note);
        }
    }

    let iteration = session.local_mut().iteration;
    let message = format!(
        "Local phase reached the iteration ceiling ({}) before completion",
        settings.max_iterations
    );
    warn!(iteration, "{}", message);
    ctx.record(
        session,
        StructuredError::warning(ErrorCategory::Validation, message).with_phase(PhaseKind::Local),
    );
    ctx.save(session)?;
    Ok(LocalOutcome::IterationCeiling { iteration })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::testing::{Harness, Step};
    use crate::review::Finding;
    use crate::tracker::Workspace;

    fn settings() -> LocalSettings {
        LocalSettings {
            max_iterations: 6,
            empty_change_limit: 3,
            clean_review_limit: 2,
            retry: RetryPolicy::none(),
        }
    }

    #[test]
    fn test_predicate_with_checklist_needs_all_checked() {
        let signals = AgentSignals::default();
        let partial = CompletionContext {
            signals: &signals,
            remaining: Some(0),
            checklist: Checklist {
                total: 2,
                checked: 0,
            },
        };
        assert!(!ChecklistAndCounter.is_complete(&partial));

        let done = CompletionContext {
            checklist: Checklist {
                total: 2,
                checked: 2,
            },
            ..partial.clone()
        };
        assert!(ChecklistAndCounter.is_complete(&done));

        let done_counter_lagging = CompletionContext {
            remaining: Some(1),
            ..done.clone()
        };
        assert!(!ChecklistAndCounter.is_complete(&done_counter_lagging));

        let done_no_counter = CompletionContext {
            remaining: None,
            ..done
        };
        assert!(ChecklistAndCounter.is_complete(&done_no_counter));
    }

    #[test]
    fn test_predicate_without_checklist() {
        let marker = AgentSignals {
            success_marker: true,
            ..Default::default()
        };
        let none = AgentSignals::default();
        fn ctx(signals: &AgentSignals, remaining: Option<u32>) -> CompletionContext<'_> {
            CompletionContext {
                signals,
                remaining,
                checklist: Checklist::default(),
            }
        }
        assert!(ChecklistAndCounter.is_complete(&ctx(&none, Some(0))));
        assert!(ChecklistAndCounter.is_complete(&ctx(&marker, None)));
        assert!(!ChecklistAndCounter.is_complete(&ctx(&none, Some(3))));
        assert!(!ChecklistAndCounter.is_complete(&ctx(&none, None)));
    }

    #[tokio::test]
    async fn test_counter_zero_with_unchecked_checklist_is_not_complete() {
        let h = Harness::new("# PRD\n- [ ] one\n- [ ] two\n");
        h.invoker.push(Step::output("REMAINING=2").changing());
        h.invoker.push(Step::output("REMAINING=0").changing());
        // then nothing changes and the loop stalls out
        let mut session = h.session(&[PhaseKind::Local]);
        let mut settings = settings();
        settings.clean_review_limit = 10;
        let err = run_local(&h.ctx(), &mut session, &settings, &ChecklistAndCounter, false)
            .await
            .unwrap_err();

        assert!(matches!(err, PhaseError::Stalled { streak: 3, iteration: 5 }));
        let local = session.local().unwrap();
        assert_eq!(local.last_remaining, Some(0));
        assert_eq!(local.iteration, 5);
    }

    #[tokio::test]
    async fn test_checklist_complete_finishes() {
        let h = Harness::new("# PRD\n- [ ] one\n");
        h.invoker
            .push(Step::output("REMAINING=0").changing().writes_spec("# PRD\n- [x] one\n"));
        let mut session = h.session(&[PhaseKind::Local]);
        let outcome = run_local(&h.ctx(), &mut session, &settings(), &ChecklistAndCounter, false)
            .await
            .unwrap();
        assert_eq!(outcome, LocalOutcome::Completed { iteration: 1 });
        assert_eq!(h.review.calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_change_streak_fails_at_threshold() {
        let h = Harness::new("no checklist here\n");
        let mut session = h.session(&[PhaseKind::Local]);
        let err = run_local(&h.ctx(), &mut session, &settings(), &ChecklistAndCounter, false)
            .await
            .unwrap_err();
        assert!(matches!(err, PhaseError::Stalled { streak: 3, iteration: 3 }));
        let local = session.local().unwrap();
        assert_eq!(local.skipped_review_streak, 3);
        assert_eq!(h.review.calls(), 0);
        assert_eq!(h.invoker.calls().len(), 3);

        // every iteration was persisted before the stop decision
        let saved = h.store.load(&session.session_id).unwrap().unwrap();
        assert_eq!(saved.local().unwrap().iteration, 3);
        assert_eq!(saved.local().unwrap().empty_change_streak, 3);
    }

    #[tokio::test]
    async fn test_counter_progress_without_change_still_reviews() {
        let h = Harness::new("no checklist\n");
        h.invoker.push(Step::output("REMAINING=3").changing());
        h.invoker.push(Step::output("REMAINING=2"));
        h.invoker.push(Step::output("REMAINING=0").changing());
        let mut session = h.session(&[PhaseKind::Local]);
        let mut settings = settings();
        settings.clean_review_limit = 10;
        let outcome = run_local(&h.ctx(), &mut session, &settings, &ChecklistAndCounter, false)
            .await
            .unwrap();
        assert_eq!(outcome, LocalOutcome::Completed { iteration: 3 });
        assert_eq!(h.review.calls(), 3);
        assert_eq!(session.local().unwrap().skipped_review_streak, 0);
    }

    #[tokio::test]
    async fn test_findings_trigger_fix_and_block_completion() {
        let h = Harness::new("no checklist\n");
        h.review.push(vec![Finding::new("null check missing")]);
        h.invoker.push(Step::output("REMAINING=0").changing());
        h.invoker.push(Step::output("fixed REMAINING=0").changing());
        h.invoker.push(Step::output("REMAINING=0").changing());
        let mut session = h.session(&[PhaseKind::Local]);
        let outcome = run_local(&h.ctx(), &mut session, &settings(), &ChecklistAndCounter, false)
            .await
            .unwrap();
        assert_eq!(outcome, LocalOutcome::Completed { iteration: 2 });
        let calls = h.invoker.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[1].1.contains("null check missing"));
    }

    #[tokio::test]
    async fn test_failed_fix_is_recorded_not_fatal() {
        let h = Harness::new("no checklist\n");
        h.review.push(vec![Finding::new("bad")]);
        h.invoker.push(Step::output("REMAINING=1").changing());
        h.invoker.push(Step::failure(1, "fix crashed"));
        h.invoker.push(Step::output("REMAINING=0").changing());
        let mut session = h.session(&[PhaseKind::Local]);
        let outcome = run_local(&h.ctx(), &mut session, &settings(), &ChecklistAndCounter, false)
            .await
            .unwrap();
        assert_eq!(outcome, LocalOutcome::Completed { iteration: 2 });
        assert_eq!(session.errors.len(), 1);
        assert_eq!(
            h.store.error_log(&session.session_id).entries().unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_clean_streak_stops_optimistically() {
        let h = Harness::new("- [ ] never ticked\n");
        for _ in 0..3 {
            h.invoker.push(Step::output("working").changing());
        }
        let mut session = h.session(&[PhaseKind::Local]);
        let outcome = run_local(&h.ctx(), &mut session, &settings(), &ChecklistAndCounter, false)
            .await
            .unwrap();
        assert_eq!(outcome, LocalOutcome::CleanStreak { iteration: 2 });
    }

    #[tokio::test]
    async fn test_resume_continues_after_last_iteration_with_streaks() {
        let h = Harness::new("no checklist\n");
        let mut session = h.session(&[PhaseKind::Local]);
        {
            let local = session.local_mut();
            local.iteration = 4;
            local.empty_change_streak = 2;
        }
        h.store.save(&mut session).unwrap();

        let err = run_local(&h.ctx(), &mut session, &settings(), &ChecklistAndCounter, false)
            .await
            .unwrap_err();
        assert!(matches!(err, PhaseError::Stalled { streak: 3, iteration: 5 }));
        assert_eq!(h.invoker.calls().len(), 1);
        // iteration 5 is not the first pass, so the terse prompt is used
        assert!(!h.invoker.calls()[0].1.contains("## Instructions"));
    }

    #[tokio::test]
    async fn test_iteration_ceiling_records_warning() {
        let h = Harness::new("no checklist\n");
        h.invoker.push(Step::output("REMAINING=5").changing());
        h.invoker.push(Step::output("REMAINING=4").changing());
        let mut session = h.session(&[PhaseKind::Local]);
        let mut settings = settings();
        settings.max_iterations = 2;
        settings.clean_review_limit = 10;
        let outcome = run_local(&h.ctx(), &mut session, &settings, &ChecklistAndCounter, false)
            .await
            .unwrap();
        assert_eq!(outcome, LocalOutcome::IterationCeiling { iteration: 2 });
        assert_eq!(session.errors.len(), 1);
        assert!(session.errors[0].message.contains("iteration ceiling"));
    }

    #[tokio::test]
    async fn test_readonly_output_on_clean_exit_aborts_phase() {
        let h = Harness::new("no checklist\n");
        h.invoker.push(Step::output(
            "failed to write src/main.rs: Read-only file system (os error 30)\nREMAINING=0",
        ));
        let mut session = h.session(&[PhaseKind::Local]);
        let err = run_local(&h.ctx(), &mut session, &settings(), &ChecklistAndCounter, false)
            .await
            .unwrap_err();
        assert!(matches!(err, PhaseError::ReadonlySandbox { .. }));
        assert_eq!(session.local().unwrap().iteration, 0);
    }

    #[tokio::test]
    async fn test_readonly_fix_aborts_phase() {
        let h = Harness::new("no checklist\n");
        h.review.push(vec![Finding::new("bad")]);
        h.invoker.push(Step::output("REMAINING=1").changing());
        h.invoker
            .push(Step::output("apply_patch: Read-only file system (os error 30)"));
        let mut session = h.session(&[PhaseKind::Local]);
        let err = run_local(&h.ctx(), &mut session, &settings(), &ChecklistAndCounter, false)
            .await
            .unwrap_err();
        assert!(matches!(err, PhaseError::ReadonlySandbox { .. }));
        assert!(session.errors.is_empty());
    }

    #[tokio::test]
    async fn test_resume_warns_when_tree_changed_while_paused() {
        let h = Harness::new("no checklist\n");
        let mut session = h.session(&[PhaseKind::Local]);
        {
            let local = session.local_mut();
            local.iteration = 2;
            local.last_fingerprint = Some(h.workspace.fingerprint().unwrap());
        }
        h.workspace.bump();
        h.invoker.push(Step::output("REMAINING=0").changing());

        let outcome = run_local(&h.ctx(), &mut session, &settings(), &ChecklistAndCounter, false)
            .await
            .unwrap();
        assert_eq!(outcome, LocalOutcome::Completed { iteration: 3 });
        assert_eq!(session.errors.len(), 1);
        assert!(session.errors[0].message.contains("before iteration 3"));
    }

    #[tokio::test]
    async fn test_resume_with_untouched_tree_records_nothing() {
        let h = Harness::new("no checklist\n");
        let mut session = h.session(&[PhaseKind::Local]);
        {
            let local = session.local_mut();
            local.iteration = 2;
            local.last_fingerprint = Some(h.workspace.fingerprint().unwrap());
        }
        h.invoker.push(Step::output("REMAINING=0").changing());

        run_local(&h.ctx(), &mut session, &settings(), &ChecklistAndCounter, false)
            .await
            .unwrap();
        assert!(session.errors.is_empty());
    }

    #[tokio::test]
    async fn test_non_retryable_exit_aborts_phase() {
        let h = Harness::new("no checklist\n");
        h.invoker.push(Step::failure(127, "claude: command not found"));
        let mut session = h.session(&[PhaseKind::Local]);
        let err = run_local(&h.ctx(), &mut session, &settings(), &ChecklistAndCounter, false)
            .await
            .unwrap_err();
        assert!(matches!(err, PhaseError::NonRetryable { exit_code: 127, .. }));
        assert_eq!(session.local().unwrap().iteration, 0);
    }
}
