//! Publish step: make sure a pull request exists for the feature branch.

use tracing::info;

use super::PhaseContext;
use super::prompts::build_push_prompt;
use crate::checkpoint::Session;
use crate::errors::{PhaseError, PlatformError};
use crate::phase::{PhaseKind, PhaseStatus};
use crate::platform::{PrInfo, PrRequest};
use crate::runner::{RetryPolicy, invoke_with_retry};
use crate::sanitize::{sanitize_body, sanitize_title};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishSettings {
    /// Ask the agent to push instead of pushing directly.
    pub agent_push: bool,
    pub draft: bool,
}

/// Title from the task spec's first heading, else the branch name.
fn pr_title(spec: &str, branch: &str) -> String {
    let heading = spec
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with('#'))
        .map(|l| l.trim_start_matches('#').trim().to_string())
        .filter(|t| !t.is_empty());
    sanitize_title(&heading.unwrap_or_else(|| branch.to_string()))
}

fn pr_body(session: &Session) -> String {
    let mut body = format!(
        "Automated implementation of `{}`.\n\n",
        session
            .task_spec_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| session.task_spec_path.display().to_string())
    );
    if let Some(local) = session.local() {
        body.push_str(&format!("- Local iterations: {}\n", local.iteration));
        if let Some(remaining) = local.last_remaining {
            body.push_str(&format!("- Remaining items reported: {}\n", remaining));
        }
    }
    body.push_str(&format!("- Session: {}\n", session.session_id));
    sanitize_body(&body)
}

fn record_pr(session: &mut Session, info: &PrInfo) {
    let pr = session.pr_mut();
    pr.pr_number = Some(info.number);
    pr.pr_url = info.url.clone();
}

/// Ensure a PR exists. `Ok(None)` when the branch has no commits over base.
pub async fn run_publish(
    ctx: &PhaseContext<'_>,
    session: &mut Session,
    settings: &PublishSettings,
) -> Result<Option<PrInfo>, PhaseError> {
    let branch = session.feature_branch.clone();

    if let Some(number) = session.pr_number() {
        info!(pr = number, "Reusing pull request from checkpoint");
        return Ok(Some(PrInfo {
            number,
            url: session.pr_mut().pr_url.clone(),
        }));
    }

    ctx.step("looking for an open pull request");
    if let Some(existing) = ctx.platform.find_open_pr(&branch).await? {
        info!(pr = existing.number, branch = %branch, "Found open pull request");
        record_pr(session, &existing);
        ctx.save(session)?;
        return Ok(Some(existing));
    }

    if !session.pr_mut().pushed {
        ctx.step(&format!("pushing {}", branch));
        if settings.agent_push {
            let agent = ctx.agent_for(PhaseKind::Pr, 1);
            invoke_with_retry(
                ctx.invoker,
                &agent,
                &build_push_prompt(&branch),
                &RetryPolicy::default(),
            )
            .await?;
        } else {
            ctx.workspace.push_branch(&branch).await?;
        }
        session.pr_mut().pushed = true;
        ctx.save(session)?;
        ctx.journal(session, PhaseKind::Pr, 1, PhaseStatus::InProgress, Some("pushed"));
    }

    let spec = std::fs::read_to_string(&session.task_spec_path).unwrap_or_default();
    let request = PrRequest {
        base: session.base_branch.clone(),
        head: branch.clone(),
        title: pr_title(&spec, &branch),
        body: pr_body(session),
        draft: settings.draft,
    };

    ctx.step("opening pull request");
    match ctx.platform.create_pr(&request).await {
        Ok(created) => {
            record_pr(session, &created);
            ctx.save(session)?;
            if let Some(ui) = ctx.ui {
                ui.show_pr(created.number, created.url.as_deref());
            }
            Ok(Some(created))
        }
        Err(PlatformError::NoCommits { base, head }) => {
            info!(%base, %head, "Nothing to publish");
            ctx.journal(
                session,
                PhaseKind::Pr,
                1,
                PhaseStatus::InProgress,
                Some("no commits between base and head"),
            );
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
