//! Low-cost capability verification.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::runner::{CommandSpec, run_command};

/// Checks that a tool or agent binary is usable.
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    /// `Err` carries a short human-readable reason.
    async fn verify(&self, capability: &str, program: &str, args: &[String]) -> Result<(), String>;
}

/// Runs the verify command (usually `--version`) and inspects the exit code.
pub struct CliProbe {
    tolerated_exit_codes: Vec<i32>,
    timeout: Duration,
}

impl CliProbe {
    pub fn new(tolerated_exit_codes: Vec<i32>, timeout: Duration) -> Self {
        Self {
            tolerated_exit_codes,
            timeout,
        }
    }
}

#[async_trait]
impl CapabilityProbe for CliProbe {
    async fn verify(&self, capability: &str, program: &str, args: &[String]) -> Result<(), String> {
        let spec = CommandSpec::new(program, args).timeout(self.timeout);
        let outcome = run_command(&spec)
            .await
            .map_err(|e| format!("could not run {}: {}", program, e))?;

        if outcome.timed_out {
            return Err(format!("`{}` timed out", spec.display()));
        }
        match outcome.exit_code {
            Some(0) => Ok(()),
            Some(code) if self.tolerated_exit_codes.contains(&code) => {
                debug!(capability, code, "Tolerated verify exit code");
                Ok(())
            }
            Some(127) => Err(format!("{} not found", program)),
            Some(code) => Err(format!("`{}` exited with {}", spec.display(), code)),
            None => Err(format!("`{}` was killed", spec.display())),
        }
    }
}
