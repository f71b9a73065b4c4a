//! Bounded retry with exponential backoff for agent invocations.

use std::time::Duration;
use tracing::{info, warn};

use super::{AgentInvoker, AgentOutcome};
use crate::errors::{PhaseError, RunnerError};
use crate::signals::extract_signals;

/// Exit codes that abort immediately instead of retrying.
pub const NON_RETRYABLE_EXIT_CODES: [(i32, &str); 4] = [
    (126, "permission denied"),
    (127, "command not found"),
    (137, "killed, likely out of memory"),
    (139, "segmentation fault"),
];

pub fn non_retryable_reason(exit_code: i32) -> Option<&'static str> {
    NON_RETRYABLE_EXIT_CODES
        .iter()
        .find(|(code, _)| *code == exit_code)
        .map(|(_, reason)| *reason)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first.
    pub max_retries: u32,
    /// Delay before the first retry; doubles each time.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Backoff before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
    }
}

/// Invoke `agent`, retrying failures per `policy`.
///
/// Non-retryable exit codes and readonly-sandbox rejections abort at once.
pub async fn invoke_with_retry(
    invoker: &dyn AgentInvoker,
    agent: &str,
    prompt: &str,
    policy: &RetryPolicy,
) -> Result<AgentOutcome, PhaseError> {
    let attempts = policy.max_retries + 1;
    let mut last_runner_error: Option<RunnerError> = None;
    let mut last_outcome: Option<AgentOutcome> = None;

    for attempt in 1..=attempts {
        if attempt > 1 {
            let delay = policy.delay_for(attempt - 1);
            warn!(
                agent,
                attempt,
                delay_secs = delay.as_secs(),
                "Agent invocation failed; backing off before retry"
            );
            tokio::time::sleep(delay).await;
        }

        match invoker.invoke(agent, prompt).await {
            Ok(outcome) => {
                // a rejected write aborts whatever the exit code says
                if let Some(phrase) = extract_signals(&outcome.combined_output()).readonly_rejection
                {
                    return Err(PhaseError::ReadonlySandbox {
                        agent: agent.to_string(),
                        phrase,
                    });
                }
                if outcome.success() {
                    if attempt > 1 {
                        info!(agent, attempt, "Agent succeeded after retry");
                    }
                    return Ok(outcome);
                }
                if let Some(code) = outcome.exit_code
                    && let Some(reason) = non_retryable_reason(code)
                {
                    return Err(PhaseError::NonRetryable {
                        agent: agent.to_string(),
                        exit_code: code,
                        reason,
                    });
                }
                warn!(
                    agent,
                    attempt,
                    exit_code = ?outcome.exit_code,
                    timed_out = outcome.timed_out,
                    "Agent invocation failed"
                );
                last_outcome = Some(outcome);
                last_runner_error = None;
            }
            Err(e) => {
                warn!(agent, attempt, error = %e, "Agent could not be run");
                last_runner_error = Some(e);
                last_outcome = None;
            }
        }
    }

    if let Some(e) = last_runner_error {
        return Err(PhaseError::Runner(e));
    }
    let outcome = last_outcome.unwrap_or_default();
    Err(PhaseError::AgentFailed {
        agent: agent.to_string(),
        exit_code: outcome.exit_code,
        timed_out: outcome.timed_out,
        attempts,
        detail: outcome.failure_detail(),
    })
}
