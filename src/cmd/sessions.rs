//! Session maintenance: `shepherd sessions list|show|delete|cleanup`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use super::super::SessionsCommands;
use shepherd::checkpoint::{CheckpointStore, Session};
use shepherd::config::Config;

pub fn cmd_sessions(project_dir: &Path, command: &SessionsCommands) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), false)?;
    let store = CheckpointStore::new(config.sessions_dir.clone());

    match command {
        SessionsCommands::List => {
            let sessions = store.list()?;
            print_session_table(&sessions);
        }
        SessionsCommands::Show { id } => show(&store, id)?,
        SessionsCommands::Delete { id, force } => delete(&store, &config, id, *force)?,
        SessionsCommands::Cleanup { days } => {
            let days = days.unwrap_or(config.toml.sessions.retention_days);
            let removed = store.cleanup_completed(chrono::Duration::days(i64::from(days)))?;
            for id in &removed {
                let logs = config.log_dir.join(id);
                if logs.exists() {
                    std::fs::remove_dir_all(&logs).ok();
                }
            }
            println!(
                "Removed {} completed session(s) older than {} day(s)",
                removed.len(),
                days
            );
        }
    }
    Ok(())
}

/// One line per session, newest first.
pub fn print_session_table(sessions: &[Session]) {
    println!();
    if sessions.is_empty() {
        println!("No sessions found.");
        println!();
        return;
    }
    println!(
        "{:<26} {:<12} {:<11} {:<17} Task spec",
        "Session", "Status", "Phase", "Updated"
    );
    println!(
        "{:<26} {:<12} {:<11} {:<17} ---------",
        "-".repeat(26),
        "-".repeat(12),
        "-".repeat(11),
        "-".repeat(17)
    );
    for session in sessions {
        let phase = session
            .current_phase
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| "-".to_string());
        let spec = session
            .task_spec_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        println!(
            "{:<26} {:<12} {:<11} {:<17} {}",
            session.session_id,
            session.status.to_string(),
            phase,
            session.updated_at.format("%Y-%m-%d %H:%M"),
            spec
        );
    }
    println!();
}

fn show(store: &CheckpointStore, id: &str) -> Result<()> {
    let session = store
        .load(id)?
        .with_context(|| format!("No session with id '{}'", id))?;

    for line in shepherd::ui::summary_lines(&session) {
        println!("{}", line);
    }
    println!("  {:<12} {}", "task spec", session.task_spec_path.display());
    println!("  {:<12} {}", "created", session.created_at.to_rfc3339());
    println!("  {:<12} {}", "updated", session.updated_at.to_rfc3339());

    if !session.errors.is_empty() {
        println!();
        println!("{}", style("Errors").bold());
        for entry in &session.errors {
            let phase = entry.phase.map(|p| p.as_str()).unwrap_or("-");
            println!(
                "  {} [{}/{}] {} {}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.severity,
                entry.category,
                style(phase).dim(),
                entry.message
            );
            if let Some(ref hint) = entry.hint {
                println!("      {} {}", style("hint:").cyan(), hint);
            }
        }
    }

    let journal_log = store.journal(id);
    if let Some(phase) = journal_log.last_completed_phase() {
        println!("  {:<12} {}", "last done", phase.label());
    }
    let journal = journal_log.entries().unwrap_or_default();
    if !journal.is_empty() {
        println!();
        println!("{}", style("Recent activity").bold());
        let skip = journal.len().saturating_sub(10);
        for entry in journal.iter().skip(skip) {
            println!(
                "  {} {:<11} #{:<3} {:<11} {}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.phase.as_str(),
                entry.iteration,
                entry.status.to_string(),
                entry.note.as_deref().unwrap_or("")
            );
        }
    }
    println!();
    Ok(())
}

fn delete(store: &CheckpointStore, config: &Config, id: &str, force: bool) -> Result<()> {
    use dialoguer::Confirm;

    if !force {
        let confirm = Confirm::new()
            .with_prompt(format!("Delete session {}?", id))
            .default(false)
            .interact()
            .unwrap_or(false);
        if !confirm {
            println!("Delete cancelled");
            return Ok(());
        }
    }

    if store.delete(id)? {
        let logs = config.log_dir.join(id);
        if logs.exists() {
            std::fs::remove_dir_all(&logs).ok();
        }
        println!("Deleted session {}", id);
    } else {
        println!("No session with id '{}'", id);
    }
    Ok(())
}
