//! Terminal summary comment posted once per session on the pull request.

use crate::checkpoint::{Session, SessionStatus};
use crate::phase::{PhaseKind, PhaseStatus};

/// Hidden marker that identifies this session's summary comment.
pub fn summary_marker(session_id: &str) -> String {
    format!("<!-- shepherd-summary:{} -->", session_id)
}

fn status_icon(status: PhaseStatus) -> &'static str {
    match status {
        PhaseStatus::Completed => "✅",
        PhaseStatus::Failed => "❌",
        PhaseStatus::Skipped => "⏭️",
        PhaseStatus::InProgress => "🔄",
        PhaseStatus::Pending => "⏳",
    }
}

fn phase_detail(session: &Session, phase: PhaseKind) -> String {
    match phase {
        PhaseKind::Local => session
            .local()
            .map(|l| {
                let remaining = l
                    .last_remaining
                    .map(|r| format!(", {} remaining", r))
                    .unwrap_or_default();
                format!("{} iteration(s){}", l.iteration, remaining)
            })
            .unwrap_or_default(),
        PhaseKind::Pr => session
            .pr()
            .and_then(|p| p.pr_number)
            .map(|n| format!("#{}", n))
            .unwrap_or_else(|| "no pull request".to_string()),
        PhaseKind::ReviewFix => session
            .review_fix()
            .map(|r| {
                format!(
                    "{} cycle(s), {} thread(s) addressed",
                    r.cycle,
                    r.acknowledged.len()
                )
            })
            .unwrap_or_default(),
    }
}

/// Markdown body of the summary comment, marker first.
pub fn build_summary(session: &Session) -> String {
    let outcome = match session.status {
        SessionStatus::Completed => "completed",
        SessionStatus::Failed => "failed",
        SessionStatus::InProgress => "stopped",
    };
    let mut body = format!(
        "{}\n## Shepherd session {}\n\nSession `{}` {}.\n\n| Phase | Status | Detail |\n|---|---|---|\n",
        summary_marker(&session.session_id),
        outcome,
        session.session_id,
        outcome
    );
    for phase in &session.selected_phases {
        let status = session.phase_status(*phase);
        body.push_str(&format!(
            "| {} | {} {} | {} |\n",
            phase.label(),
            status_icon(status),
            status,
            phase_detail(session, *phase)
        ));
    }
    if let Some(ref policy) = session.executor_policy {
        body.push_str(&format!("\nExecutor policy: `{}`\n", policy));
    }
    let problems: Vec<_> = session
        .errors
        .iter()
        .filter(|e| e.severity >= crate::classify::Severity::Error)
        .collect();
    if let Some(last) = problems.last() {
        body.push_str(&format!(
            "\n**Last error** ({}): {}\n",
            last.category,
            crate::util::first_line(&last.message, 300)
        ));
        if let Some(ref hint) = last.hint {
            body.push_str(&format!("Hint: {}\n", hint));
        }
    }
    body
}
