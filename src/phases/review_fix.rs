//! Review/fix loop: poll the PR for unresolved automated review threads and
//! hand them to the fix agent until the reviewer goes quiet.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::PhaseContext;
use super::prompts::build_feedback_prompt;
use crate::checkpoint::Session;
use crate::classify::{ErrorCategory, StructuredError};
use crate::errors::{PhaseError, PlatformError};
use crate::phase::{PhaseKind, PhaseStatus};
use crate::platform::{FeedbackItem, Platform};
use crate::runner::{RetryPolicy, invoke_with_retry};

const ACK_REPLY: &str = "Addressed in the latest push.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewFixSettings {
    /// Wait before the first poll of a fresh phase.
    pub initial_delay: Duration,
    pub poll_interval: Duration,
    /// Quiet time after the last activity before stopping. Zero stops on the
    /// first empty poll.
    pub idle_grace: Duration,
    /// Never idle out; stop only on an all-clear newer than the head commit.
    pub infinite: bool,
    pub reviewer_authors: Vec<String>,
    pub supplementary_trigger: Option<String>,
    pub supplementary_reviewer: Option<String>,
    pub max_cycles: u32,
    /// Consecutive failed polls before giving up. A failed poll never counts
    /// as an empty one.
    pub max_poll_failures: u32,
    pub prompt_budget_chars: usize,
}

impl Default for ReviewFixSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(180),
            poll_interval: Duration::from_secs(60),
            idle_grace: Duration::from_secs(600),
            infinite: false,
            reviewer_authors: vec!["coderabbitai".to_string()],
            supplementary_trigger: None,
            supplementary_reviewer: None,
            max_cycles: 50,
            max_poll_failures: 10,
            prompt_budget_chars: 12_000,
        }
    }
}

impl ReviewFixSettings {
    fn all_clear_reviewer(&self) -> Option<&str> {
        self.supplementary_reviewer
            .as_deref()
            .or_else(|| self.reviewer_authors.first().map(String::as_str))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewFixOutcome {
    /// Nothing unresolved on the first look and no idle grace configured.
    NoFeedback { cycles: u32 },
    /// Idle grace elapsed without new feedback.
    Idle { cycles: u32 },
    /// Infinite mode saw the reviewer's all-clear.
    AllClear { cycles: u32 },
    CycleCeiling { cycles: u32 },
}

/// Unresolved items from `authors` that are not yet acknowledged.
pub async fn poll_unacknowledged(
    platform: &dyn Platform,
    pr: u64,
    authors: &[String],
    acknowledged: &BTreeSet<String>,
) -> Result<Vec<FeedbackItem>, PlatformError> {
    let items = platform.unresolved_feedback(pr, authors).await?;
    let total = items.len();
    let fresh: Vec<_> = items
        .into_iter()
        .filter(|item| !acknowledged.contains(&item.id))
        .collect();
    debug!(pr, total, new = fresh.len(), "Polled review threads");
    Ok(fresh)
}

async fn trigger(ctx: &PhaseContext<'_>, pr: u64, settings: &ReviewFixSettings) {
    let Some(ref body) = settings.supplementary_trigger else {
        return;
    };
    if let Err(e) = ctx.platform.comment(pr, body).await {
        warn!(pr, error = %e, "Failed to trigger supplementary review");
    }
}

/// Run the loop against pull request `pr`.
pub async fn run_review_fix(
    ctx: &PhaseContext<'_>,
    session: &mut Session,
    pr: u64,
    settings: &ReviewFixSettings,
) -> Result<ReviewFixOutcome, PhaseError> {
    let fresh = {
        let state = session.review_fix_mut();
        state.cycle == 0 && state.last_activity.is_none()
    };

    if fresh {
        trigger(ctx, pr, settings).await;
        if !settings.initial_delay.is_zero() {
            info!(pr, delay_secs = settings.initial_delay.as_secs(), "Waiting for first review");
            if let Some(ui) = ctx.ui {
                ui.show_waiting("waiting for the first review", settings.initial_delay);
            }
            tokio::time::sleep(settings.initial_delay).await;
        }
    }

    // idle time already spent before this process started
    let now = Utc::now();
    let last_activity: DateTime<Utc> = *session
        .review_fix_mut()
        .last_activity
        .get_or_insert(now);
    let mut idle_offset = (now - last_activity).to_std().unwrap_or(Duration::ZERO);
    let mut idle_since = Instant::now();
    ctx.save(session)?;
    let mut poll_failures = 0u32;

    loop {
        let cycles = session.review_fix_mut().cycle;
        if cycles >= settings.max_cycles {
            let message = format!("Review/fix loop reached the cycle ceiling ({})", settings.max_cycles);
            warn!(pr, cycles, "{}", message);
            ctx.record(
                session,
                StructuredError::warning(ErrorCategory::Validation, message)
                    .with_phase(PhaseKind::ReviewFix),
            );
            ctx.save(session)?;
            return Ok(ReviewFixOutcome::CycleCeiling { cycles });
        }

        ctx.step("polling review threads");
        let acknowledged = session.review_fix_mut().acknowledged.clone();
        let items = match poll_unacknowledged(
            ctx.platform,
            pr,
            &settings.reviewer_authors,
            &acknowledged,
        )
        .await
        {
            Ok(items) => {
                poll_failures = 0;
                Some(items)
            }
            Err(e) => {
                poll_failures += 1;
                warn!(pr, poll_failures, error = %e, "Polling review threads failed");
                if poll_failures >= settings.max_poll_failures {
                    return Err(PhaseError::Platform(e));
                }
                None
            }
        };

        match items {
            Some(items) if !items.is_empty() => {
                let cycle = cycles + 1;
                if let Some(ui) = ctx.ui {
                    ui.start_iteration(cycle, settings.max_cycles);
                    ui.show_fix(items.len());
                }
                let agent = ctx.agent_for(PhaseKind::ReviewFix, cycle);
                let prompt = build_feedback_prompt(pr, &items, settings.prompt_budget_chars);
                invoke_with_retry(ctx.invoker, &agent, &prompt, &RetryPolicy::default()).await?;

                trigger(ctx, pr, settings).await;
                for item in &items {
                    if let Err(e) = ctx.platform.reply(item, ACK_REPLY).await {
                        warn!(id = %item.id, error = %e, "Failed to reply to review thread");
                    }
                    if let Err(e) = ctx.platform.resolve(item).await {
                        warn!(id = %item.id, error = %e, "Failed to resolve review thread");
                    }
                }

                let state = session.review_fix_mut();
                state
                    .acknowledged
                    .extend(items.iter().map(|item| item.id.clone()));
                state.cycle = cycle;
                state.last_activity = Some(Utc::now());
                idle_offset = Duration::ZERO;
                idle_since = Instant::now();
                ctx.save(session)?;
                let note = format!("{} item(s) addressed", items.len());
                ctx.journal(session, PhaseKind::ReviewFix, cycle, PhaseStatus::InProgress, Some(&note));
                info!(pr, cycle, items = items.len(), "Review feedback addressed");
                if let Some(ui) = ctx.ui {
                    ui.iteration_done(cycle, &note);
                }
            }
            Some(_) => {
                if settings.infinite {
                    if let Some(reviewer) = settings.all_clear_reviewer() {
                        let head_time = ctx
                            .platform
                            .head_commit_time(pr)
                            .await
                            .ok()
                            .flatten()
                            .unwrap_or(DateTime::<Utc>::MIN_UTC);
                        match ctx.platform.has_all_clear_since(pr, reviewer, head_time).await {
                            Ok(true) => {
                                info!(pr, reviewer, "Reviewer posted an all-clear");
                                return Ok(ReviewFixOutcome::AllClear { cycles });
                            }
                            Ok(false) => {}
                            Err(e) => warn!(pr, error = %e, "All-clear lookup failed"),
                        }
                    }
                } else if settings.idle_grace.is_zero() {
                    info!(pr, "No unresolved feedback");
                    return Ok(ReviewFixOutcome::NoFeedback { cycles });
                } else {
                    let idle = idle_offset + idle_since.elapsed();
                    if idle >= settings.idle_grace {
                        info!(pr, idle_secs = idle.as_secs(), "Idle grace elapsed");
                        return Ok(ReviewFixOutcome::Idle { cycles });
                    }
                }
            }
            // unknown feedback state: keep polling
            None => {}
        }

        if let Some(ui) = ctx.ui {
            ui.show_waiting("waiting for review activity", settings.poll_interval);
        }
        tokio::time::sleep(settings.poll_interval).await;
    }
}
