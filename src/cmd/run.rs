//! `shepherd run`: resolve the session, the policy and the collaborators,
//! then hand over to the orchestrator.

use anyhow::{Context, Result, bail};
use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::super::{Cli, RunArgs};
use super::sessions::print_session_table;
use shepherd::checkpoint::{CheckpointStore, Session, SessionLock};
use shepherd::config::{CliOverrides, Config};
use shepherd::orchestrator::{
    SessionOrchestrator, SessionRequest, default_feature_branch, resume_session, start_session,
};
use shepherd::phase::{PhaseKind, parse_phase_list};
use shepherd::phases::PhaseContext;
use shepherd::platform::GhCli;
use shepherd::policy::{CliProbe, PolicyResolver};
use shepherd::review::CliReviewService;
use shepherd::runner::ProcessAgentInvoker;
use shepherd::tracker::GitTracker;
use shepherd::ui::OrchestratorUI;

/// Parse `phase=agent`.
pub fn parse_agent_for(value: &str) -> Result<(PhaseKind, String)> {
    let (phase, agent) = value
        .split_once('=')
        .with_context(|| format!("Invalid --agent-for '{}', expected PHASE=AGENT", value))?;
    let agent = agent.trim();
    if agent.is_empty() {
        bail!("Invalid --agent-for '{}': agent name is empty", value);
    }
    Ok((phase.parse()?, agent.to_string()))
}

fn cli_overrides(args: &RunArgs) -> Result<CliOverrides> {
    let agent_for = args
        .agent_for
        .iter()
        .map(|v| parse_agent_for(v))
        .collect::<Result<Vec<_>>>()?;
    Ok(CliOverrides {
        policy: args.policy.clone(),
        max_iterations: args.max_iterations,
        poll_interval_secs: args.poll_interval,
        idle_grace_minutes: args.idle_grace_minutes,
        initial_delay_secs: args.initial_delay,
        infinite: args.infinite,
        agent_for,
    })
}

fn describe(session: &Session) -> String {
    let phase = session
        .current_phase
        .map(|p| p.label().to_string())
        .unwrap_or_else(|| "not started".to_string());
    let iteration = session.local().map(|l| l.iteration).unwrap_or(0);
    format!(
        "{} ({}, {} local iteration(s), updated {})",
        session.session_id,
        phase,
        iteration,
        session.updated_at.format("%Y-%m-%d %H:%M")
    )
}

/// Pick up an existing session or start a new one, holding its lock.
fn select_session(
    store: &CheckpointStore,
    request: &SessionRequest,
    args: &RunArgs,
) -> Result<(Session, SessionLock)> {
    if let Some(ref id) = args.resume_session {
        let session = store
            .load(id)?
            .with_context(|| format!("No session with id '{}'", id))?;
        if session.repo_root != request.repo_root {
            bail!(
                "Session {} belongs to {}, not {}",
                id,
                session.repo_root.display(),
                request.repo_root.display()
            );
        }
        return Ok(resume_session(store, id)?);
    }

    if !args.force_new
        && let Some(existing) = store.find_resumable(&request.task_spec, &request.repo_root)?
    {
        let resume = if args.resume || args.yes {
            true
        } else {
            use dialoguer::Confirm;
            Confirm::new()
                .with_prompt(format!("Resume session {}?", describe(&existing)))
                .default(true)
                .interact()
                .unwrap_or(false)
        };
        if resume {
            if existing.selected_phases != request.phases {
                println!(
                    "{} Resumed session keeps its phases: {}",
                    style("note:").cyan(),
                    existing
                        .selected_phases
                        .iter()
                        .map(|p| p.as_str())
                        .collect::<Vec<_>>()
                        .join(",")
                );
            }
            return Ok(resume_session(store, &existing.session_id)?);
        }
    } else if args.resume && !args.force_new {
        println!(
            "{} No resumable session for this task spec, starting a new one",
            style("note:").cyan()
        );
    }

    Ok(start_session(store, request)?)
}

fn resolve_task_spec(args: &RunArgs) -> Result<PathBuf> {
    let Some(ref path) = args.task_spec else {
        bail!("A task spec path is required (shepherd run <TASK_SPEC>)");
    };
    path.canonicalize()
        .with_context(|| format!("Task spec not found: {}", path.display()))
}

pub async fn cmd_run(cli: &Cli, project_dir: PathBuf, args: &RunArgs) -> Result<()> {
    let project_dir = args.repo.clone().unwrap_or(project_dir);
    let config = Config::new(project_dir, cli.verbose)?.with_overrides(cli_overrides(args)?);
    config.ensure_directories()?;
    let _log_guard = shepherd::logging::init(Some(&config.log_dir), cli.verbose)?;

    for warning in config.validate() {
        println!("{} {}", style("warning:").yellow().bold(), warning);
    }

    let store = CheckpointStore::new(config.sessions_dir.clone());
    store.recover_interrupted_writes();

    if args.list_sessions {
        print_session_table(&store.list()?);
        return Ok(());
    }

    let task_spec = resolve_task_spec(args)?;
    let tracker = GitTracker::new(&config.project_dir)?;
    let repo_root = tracker
        .root()
        .canonicalize()
        .context("Failed to resolve repository root")?;

    let base_branch = args
        .base_branch
        .clone()
        .or_else(|| tracker.remote_default_branch())
        .unwrap_or_else(|| "main".to_string());
    let request = SessionRequest {
        feature_branch: args
            .branch
            .clone()
            .unwrap_or_else(|| default_feature_branch(&task_spec)),
        phases: parse_phase_list(&args.phases)?,
        task_spec,
        repo_root: repo_root.clone(),
        base_branch,
    };

    let (mut session, _lock) = select_session(&store, &request, args)?;
    println!(
        "{} Session {} ({} → {})",
        style("▶").green().bold(),
        style(&session.session_id).bold(),
        session.base_branch,
        session.feature_branch
    );

    if session
        .selected_phases
        .iter()
        .any(|p| matches!(p, PhaseKind::Local | PhaseKind::Pr))
    {
        tracker
            .ensure_branch(&session.feature_branch)
            .with_context(|| format!("Failed to switch to branch {}", session.feature_branch))?;
    }

    // a resumed session keeps its policy unless one is given explicitly
    let requested = match (&config.cli.policy, &session.executor_policy) {
        (None, Some(previous)) => previous.clone(),
        _ => config.policy_name(),
    };
    let policies = config.toml.policies();
    let agents = config.toml.agents();
    let capabilities = &config.toml.capabilities;
    let probe = CliProbe::new(
        capabilities.tolerated_exit_codes.clone(),
        Duration::from_secs(capabilities.verify_timeout_secs),
    );
    let policy = PolicyResolver::new(&policies, &agents, capabilities)
        .resolve(&requested, &probe)
        .await?;
    if policy.fell_back() {
        println!(
            "{} Policy '{}' unavailable, using '{}' ({})",
            style("warning:").yellow().bold(),
            requested,
            policy.name,
            policy.chain.join(" -> ")
        );
    }

    let overrides = config.agent_overrides()?;
    let ui = Arc::new(OrchestratorUI::new(
        session.selected_phases.len() as u64,
        cli.verbose,
    ));
    let transcripts = transcript_dir(&config.log_dir, &session.session_id)?;
    let invoker = ProcessAgentInvoker::new(agents.clone(), repo_root.clone())
        .with_log_dir(transcripts)
        .with_ui(Some(ui.clone()));
    let review = CliReviewService::new(&capabilities.review, &config.toml.review, repo_root.clone());
    let platform = GhCli::new(&repo_root).with_program(capabilities.gh.program.clone());

    let ctx = PhaseContext {
        invoker: &invoker,
        workspace: &tracker,
        review: &review,
        platform: &platform,
        store: &store,
        policy: &policy,
        overrides: &overrides,
        ui: Some(ui.as_ref()),
    };
    let orchestrator = SessionOrchestrator::new(ctx)
        .with_local(config.local_settings())
        .with_publish(config.publish_settings())
        .with_review_fix(config.review_fix_settings())
        .verbose(cli.verbose);

    if let Err(e) = orchestrator.run(&mut session).await {
        if let Some(entry) = session.errors.last()
            && let Some(ref hint) = entry.hint
        {
            eprintln!("{} {}", style("hint:").cyan().bold(), hint);
        }
        eprintln!(
            "Retry with: shepherd run {} --resume-session {}",
            session.task_spec_path.display(),
            session.session_id
        );
        return Err(e.into());
    }
    Ok(())
}

fn transcript_dir(log_dir: &Path, session_id: &str) -> Result<PathBuf> {
    let dir = log_dir.join(session_id);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    Ok(dir)
}
