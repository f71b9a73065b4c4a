//! Agent invocation: subprocess plumbing, the invoker seam and retry.

pub mod process;
pub mod retry;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::errors::RunnerError;
use crate::shepherd_config::AgentConfig;
use crate::ui::OrchestratorUI;

pub use process::{AgentOutcome, CommandSpec, run_command};
pub use retry::{NON_RETRYABLE_EXIT_CODES, RetryPolicy, invoke_with_retry, non_retryable_reason};

/// Runs a named work agent with a prompt on stdin.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, agent: &str, prompt: &str) -> Result<AgentOutcome, RunnerError>;
}

/// Invokes agents as local subprocesses using their configured argument shape.
pub struct ProcessAgentInvoker {
    agents: BTreeMap<String, AgentConfig>,
    cwd: PathBuf,
    log_dir: Option<PathBuf>,
    ui: Option<Arc<OrchestratorUI>>,
}

impl ProcessAgentInvoker {
    pub fn new(agents: BTreeMap<String, AgentConfig>, cwd: PathBuf) -> Self {
        Self {
            agents,
            cwd,
            log_dir: None,
            ui: None,
        }
    }

    /// Write each prompt and its output under `dir`.
    pub fn with_log_dir(mut self, dir: PathBuf) -> Self {
        self.log_dir = Some(dir);
        self
    }

    pub fn with_ui(mut self, ui: Option<Arc<OrchestratorUI>>) -> Self {
        self.ui = ui;
        self
    }

    fn write_transcript(&self, agent: &str, prompt: &str, outcome: &AgentOutcome) {
        let Some(ref dir) = self.log_dir else {
            return;
        };
        let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S%.3f");
        let _ = std::fs::write(dir.join(format!("{}-{}.prompt.md", stamp, agent)), prompt);
        let _ = std::fs::write(
            dir.join(format!("{}-{}.output.log", stamp, agent)),
            outcome.combined_output(),
        );
    }
}

#[async_trait]
impl AgentInvoker for ProcessAgentInvoker {
    async fn invoke(&self, agent: &str, prompt: &str) -> Result<AgentOutcome, RunnerError> {
        let Some(config) = self.agents.get(agent) else {
            return Err(RunnerError::Spawn {
                program: agent.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no agent named '{}' is configured", agent),
                ),
            });
        };

        let spec = CommandSpec::new(&config.program, &config.args)
            .stdin(prompt)
            .cwd(&self.cwd)
            .timeout(Duration::from_secs(config.timeout_secs));

        if let Some(ref ui) = self.ui {
            ui.log_step(&format!("Running {} ({} chars prompt)", agent, prompt.len()));
        }
        info!(agent, command = %spec.display(), "Invoking agent");

        let outcome = run_command(&spec).await?;
        self.write_transcript(agent, prompt, &outcome);

        if let Some(ref ui) = self.ui {
            ui.log_step(&format!(
                "{} finished in {:.1}s (exit: {})",
                agent,
                outcome.duration.as_secs_f64(),
                outcome
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "timeout".to_string())
            ));
        }
        Ok(outcome)
    }
}
