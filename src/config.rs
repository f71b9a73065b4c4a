use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::phase::PhaseKind;
use crate::phases::local::LocalSettings;
use crate::phases::publish::PublishSettings;
use crate::phases::review_fix::ReviewFixSettings;
use crate::runner::RetryPolicy;
use crate::shepherd_config::ShepherdToml;

/// Poll intervals below this are clamped up.
pub const MIN_POLL_INTERVAL_SECS: u64 = 30;

/// Values given on the command line. They win over env and file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub policy: Option<String>,
    pub max_iterations: Option<u32>,
    pub poll_interval_secs: Option<u64>,
    pub idle_grace_minutes: Option<u64>,
    pub initial_delay_secs: Option<u64>,
    pub infinite: bool,
    pub agent_for: Vec<(PhaseKind, String)>,
}

/// Runtime configuration for shepherd.
///
/// Bridges `ShepherdToml` with the paths and CLI values a run needs.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub shepherd_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub log_dir: PathBuf,
    pub verbose: bool,
    pub toml: ShepherdToml,
    pub cli: CliOverrides,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let shepherd_dir = project_dir.join(".shepherd");
        let toml = ShepherdToml::load_or_default(&shepherd_dir)?;

        Ok(Self {
            sessions_dir: shepherd_dir.join("sessions"),
            log_dir: shepherd_dir.join("logs"),
            shepherd_dir,
            project_dir,
            verbose,
            toml,
            cli: CliOverrides::default(),
        })
    }

    pub fn with_overrides(mut self, cli: CliOverrides) -> Self {
        self.cli = cli;
        self
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.sessions_dir)
            .context("Failed to create sessions directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }

    /// Requested policy name (CLI → env → file → default).
    pub fn policy_name(&self) -> String {
        self.cli
            .policy
            .clone()
            .unwrap_or_else(|| self.toml.policy_name())
    }

    /// Per-phase agent overrides (CLI entries replace file entries).
    pub fn agent_overrides(&self) -> Result<BTreeMap<PhaseKind, String>> {
        let mut overrides = self.toml.phase_overrides()?;
        for (phase, agent) in &self.cli.agent_for {
            overrides.insert(*phase, agent.clone());
        }
        Ok(overrides)
    }

    pub fn local_settings(&self) -> LocalSettings {
        let local = &self.toml.local;
        LocalSettings {
            max_iterations: self.cli.max_iterations.unwrap_or(local.max_iterations),
            empty_change_limit: local.empty_change_limit,
            clean_review_limit: local.clean_review_limit,
            retry: RetryPolicy {
                max_retries: local.retry.max_retries,
                base_delay: Duration::from_secs(local.retry.base_delay_secs),
            },
        }
    }

    pub fn review_fix_settings(&self) -> ReviewFixSettings {
        let rf = &self.toml.review_fix;
        let poll = self
            .cli
            .poll_interval_secs
            .unwrap_or(rf.poll_interval_secs)
            .max(MIN_POLL_INTERVAL_SECS);
        ReviewFixSettings {
            initial_delay: Duration::from_secs(
                self.cli.initial_delay_secs.unwrap_or(rf.initial_delay_secs),
            ),
            poll_interval: Duration::from_secs(poll),
            idle_grace: Duration::from_secs(
                self.cli
                    .idle_grace_minutes
                    .unwrap_or(rf.idle_grace_minutes)
                    .saturating_mul(60),
            ),
            infinite: self.cli.infinite || rf.infinite,
            reviewer_authors: rf.reviewer_authors.clone(),
            supplementary_trigger: rf.supplementary_trigger.clone(),
            supplementary_reviewer: rf.supplementary_reviewer.clone(),
            max_cycles: rf.max_cycles,
            max_poll_failures: rf.max_poll_failures,
            prompt_budget_chars: rf.prompt_budget_chars,
        }
    }

    pub fn publish_settings(&self) -> PublishSettings {
        PublishSettings {
            agent_push: self.toml.publish.agent_push,
            draft: self.toml.publish.draft,
        }
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.toml.validate();
        if let Some(secs) = self.cli.poll_interval_secs
            && secs < MIN_POLL_INTERVAL_SECS
        {
            warnings.push(format!(
                "--poll-interval {}s is below the {}s floor and will be clamped",
                secs, MIN_POLL_INTERVAL_SECS
            ));
        }
        warnings
    }
}
