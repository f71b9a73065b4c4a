//! Unified configuration for shepherd.
//!
//! Reads `.shepherd/shepherd.toml`. Every section has built-in defaults, so the
//! file is optional. Values are layered file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [agents.claude]
//! program = "claude"
//! args = ["--print", "--dangerously-skip-permissions"]
//! timeout_secs = 3600
//!
//! [policies.codex-claude]
//! primary = "codex"
//! secondary = "claude"
//! requires = ["review", "gh", "git"]
//! fallback = "claude"
//!
//! [capabilities]
//! tolerated_exit_codes = [1, 2]
//!
//! [local]
//! max_iterations = 10
//! empty_change_limit = 3
//! clean_review_limit = 2
//!
//! [review_fix]
//! poll_interval_secs = 60
//! idle_grace_minutes = 10
//! reviewer_authors = ["coderabbitai"]
//!
//! [overrides]
//! review_fix = "claude"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::phase::PhaseKind;

/// How to invoke one work agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_verify_args")]
    pub verify_args: Vec<String>,
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_verify_args() -> Vec<String> {
    vec!["--version".to_string()]
}

fn default_agent_timeout_secs() -> u64 {
    3600
}

impl AgentConfig {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            verify_args: default_verify_args(),
            timeout_secs: default_agent_timeout_secs(),
        }
    }
}

/// A named executor policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Agent used for the first implementation pass (and everything, when single-agent).
    pub primary: String,
    /// Agent used for later iterations and the pr/review_fix phases in a dual-agent policy.
    #[serde(default)]
    pub secondary: Option<String>,
    /// Non-agent capabilities this policy needs (`review`, `gh`, `git`).
    #[serde(default = "default_requires")]
    pub requires: Vec<String>,
    #[serde(default)]
    pub fallback: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_requires() -> Vec<String> {
    vec!["review".to_string(), "gh".to_string(), "git".to_string()]
}

impl PolicyConfig {
    pub fn is_dual(&self) -> bool {
        self.secondary.as_ref().is_some_and(|s| s != &self.primary)
    }

    /// Agent names this policy runs, primary first.
    pub fn agents(&self) -> Vec<&str> {
        let mut agents = vec![self.primary.as_str()];
        if let Some(secondary) = self.secondary.as_deref()
            && secondary != self.primary
        {
            agents.push(secondary);
        }
        agents
    }
}

/// A non-agent tool the policies may require.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
    pub program: String,
    #[serde(default = "default_verify_args")]
    pub verify_args: Vec<String>,
}

impl ToolConfig {
    fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            verify_args: default_verify_args(),
        }
    }
}

/// Tools used for capability verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesSection {
    #[serde(default = "default_review_tool")]
    pub review: ToolConfig,
    #[serde(default = "default_gh_tool")]
    pub gh: ToolConfig,
    #[serde(default = "default_git_tool")]
    pub git: ToolConfig,
    /// Exit codes from a verify command that still mean "installed".
    #[serde(default = "default_tolerated_exit_codes")]
    pub tolerated_exit_codes: Vec<i32>,
    #[serde(default = "default_verify_timeout_secs")]
    pub verify_timeout_secs: u64,
}

fn default_review_tool() -> ToolConfig {
    ToolConfig::new("coderabbit")
}

fn default_gh_tool() -> ToolConfig {
    ToolConfig::new("gh")
}

fn default_git_tool() -> ToolConfig {
    ToolConfig::new("git")
}

fn default_tolerated_exit_codes() -> Vec<i32> {
    vec![1, 2]
}

fn default_verify_timeout_secs() -> u64 {
    15
}

impl Default for CapabilitiesSection {
    fn default() -> Self {
        Self {
            review: default_review_tool(),
            gh: default_gh_tool(),
            git: default_git_tool(),
            tolerated_exit_codes: default_tolerated_exit_codes(),
            verify_timeout_secs: default_verify_timeout_secs(),
        }
    }
}

impl CapabilitiesSection {
    pub fn tool(&self, name: &str) -> Option<&ToolConfig> {
        match name {
            "review" => Some(&self.review),
            "gh" => Some(&self.gh),
            "git" => Some(&self.git),
            _ => None,
        }
    }
}

/// Retry settings for implementation-step agent calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
}

fn default_max_retries() -> u32 {
    2
}

fn default_base_delay_secs() -> u64 {
    10
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_secs: default_base_delay_secs(),
        }
    }
}

/// `[local]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_empty_change_limit")]
    pub empty_change_limit: u32,
    #[serde(default = "default_clean_review_limit")]
    pub clean_review_limit: u32,
    #[serde(default)]
    pub retry: RetrySection,
}

fn default_max_iterations() -> u32 {
    10
}

fn default_empty_change_limit() -> u32 {
    3
}

fn default_clean_review_limit() -> u32 {
    2
}

impl Default for LocalSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            empty_change_limit: default_empty_change_limit(),
            clean_review_limit: default_clean_review_limit(),
            retry: RetrySection::default(),
        }
    }
}

/// `[review]` section: the local review service command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewSection {
    #[serde(default = "default_review_args")]
    pub args: Vec<String>,
    /// Flag used to pass the base branch; empty disables it.
    #[serde(default = "default_review_base_flag")]
    pub base_flag: String,
    #[serde(default = "default_review_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_review_args() -> Vec<String> {
    vec!["review".to_string(), "--plain".to_string()]
}

fn default_review_base_flag() -> String {
    "--base".to_string()
}

fn default_review_timeout_secs() -> u64 {
    900
}

impl Default for ReviewSection {
    fn default() -> Self {
        Self {
            args: default_review_args(),
            base_flag: default_review_base_flag(),
            timeout_secs: default_review_timeout_secs(),
        }
    }
}

/// `[review_fix]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewFixSection {
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_idle_grace_minutes")]
    pub idle_grace_minutes: u64,
    #[serde(default)]
    pub infinite: bool,
    #[serde(default = "default_reviewer_authors")]
    pub reviewer_authors: Vec<String>,
    /// Comment body posted to ask a supplementary reviewer for another pass.
    #[serde(default)]
    pub supplementary_trigger: Option<String>,
    /// Login of the supplementary reviewer whose all-clear ends infinite mode.
    #[serde(default)]
    pub supplementary_reviewer: Option<String>,
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u32,
    /// Consecutive failed polls before the phase gives up.
    #[serde(default = "default_max_poll_failures")]
    pub max_poll_failures: u32,
    #[serde(default = "default_prompt_budget_chars")]
    pub prompt_budget_chars: usize,
}

fn default_initial_delay_secs() -> u64 {
    180
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_idle_grace_minutes() -> u64 {
    10
}

fn default_reviewer_authors() -> Vec<String> {
    vec!["coderabbitai".to_string()]
}

fn default_max_cycles() -> u32 {
    50
}

fn default_max_poll_failures() -> u32 {
    10
}

fn default_prompt_budget_chars() -> usize {
    12_000
}

impl Default for ReviewFixSection {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            idle_grace_minutes: default_idle_grace_minutes(),
            infinite: false,
            reviewer_authors: default_reviewer_authors(),
            supplementary_trigger: None,
            supplementary_reviewer: None,
            max_cycles: default_max_cycles(),
            max_poll_failures: default_max_poll_failures(),
            prompt_budget_chars: default_prompt_budget_chars(),
        }
    }
}

/// `[publish]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishSection {
    /// Ask the agent to push instead of running `git push` directly.
    #[serde(default)]
    pub agent_push: bool,
    #[serde(default)]
    pub draft: bool,
}

/// `[sessions]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsSection {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 {
    14
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

/// Built-in agents. File entries with the same name replace these.
pub fn builtin_agents() -> BTreeMap<String, AgentConfig> {
    let mut agents = BTreeMap::new();
    agents.insert(
        "claude".to_string(),
        AgentConfig::new("claude", &["--print", "--dangerously-skip-permissions"]),
    );
    agents.insert(
        "codex".to_string(),
        AgentConfig::new("codex", &["exec", "--full-auto", "-"]),
    );
    agents
}

/// Built-in policies. File entries with the same name replace these.
pub fn builtin_policies() -> BTreeMap<String, PolicyConfig> {
    let mut policies = BTreeMap::new();
    policies.insert(
        "claude".to_string(),
        PolicyConfig {
            primary: "claude".to_string(),
            secondary: None,
            requires: default_requires(),
            fallback: None,
            description: Some("Claude for every phase".to_string()),
        },
    );
    policies.insert(
        "codex".to_string(),
        PolicyConfig {
            primary: "codex".to_string(),
            secondary: None,
            requires: default_requires(),
            fallback: Some("claude".to_string()),
            description: Some("Codex for every phase".to_string()),
        },
    );
    policies.insert(
        "codex-claude".to_string(),
        PolicyConfig {
            primary: "codex".to_string(),
            secondary: Some("claude".to_string()),
            requires: default_requires(),
            fallback: Some("claude".to_string()),
            description: Some("Codex drafts the first pass, Claude iterates and ships".to_string()),
        },
    );
    policies
}

pub const DEFAULT_POLICY: &str = "claude";

/// The complete shepherd.toml configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShepherdToml {
    /// Policy used when neither CLI nor environment names one
    #[serde(default)]
    pub default_policy: Option<String>,
    #[serde(default)]
    pub agents: BTreeMap<String, AgentConfig>,
    #[serde(default)]
    pub policies: BTreeMap<String, PolicyConfig>,
    #[serde(default)]
    pub capabilities: CapabilitiesSection,
    #[serde(default)]
    pub local: LocalSection,
    #[serde(default)]
    pub review: ReviewSection,
    #[serde(default)]
    pub review_fix: ReviewFixSection,
    #[serde(default)]
    pub publish: PublishSection,
    #[serde(default)]
    pub sessions: SessionsSection,
    /// Phase name → agent name
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
}

impl ShepherdToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse shepherd.toml")
    }

    /// Load `.shepherd/shepherd.toml`, or defaults when it doesn't exist.
    pub fn load_or_default(shepherd_dir: &Path) -> Result<Self> {
        let config_path = shepherd_dir.join("shepherd.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Built-in agents merged with file entries, with env command overrides applied.
    pub fn agents(&self) -> BTreeMap<String, AgentConfig> {
        let mut agents = builtin_agents();
        agents.extend(self.agents.clone());
        for (name, var) in [("claude", "SHEPHERD_CLAUDE_CMD"), ("codex", "SHEPHERD_CODEX_CMD")] {
            if let Ok(cmd) = std::env::var(var)
                && !cmd.trim().is_empty()
                && let Some(agent) = agents.get_mut(name)
            {
                agent.program = cmd.trim().to_string();
            }
        }
        agents
    }

    /// Built-in policies merged with file entries.
    pub fn policies(&self) -> BTreeMap<String, PolicyConfig> {
        let mut policies = builtin_policies();
        policies.extend(self.policies.clone());
        policies
    }

    /// Policy name (env → file → built-in default). CLI takes precedence in `Config`.
    pub fn policy_name(&self) -> String {
        std::env::var("SHEPHERD_POLICY")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .or_else(|| self.default_policy.clone())
            .unwrap_or_else(|| DEFAULT_POLICY.to_string())
    }

    /// Per-phase agent overrides with phase names parsed.
    pub fn phase_overrides(&self) -> Result<BTreeMap<PhaseKind, String>> {
        let mut out = BTreeMap::new();
        for (phase, agent) in &self.overrides {
            let kind: PhaseKind = phase
                .parse()
                .with_context(|| format!("Invalid phase '{}' in [overrides]", phase))?;
            out.insert(kind, agent.clone());
        }
        Ok(out)
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let agents = self.agents();
        let policies = self.policies();

        for (name, policy) in &policies {
            for agent in policy.agents() {
                if !agents.contains_key(agent) {
                    warnings.push(format!(
                        "Policy '{}' references unknown agent '{}'",
                        name, agent
                    ));
                }
            }
            for capability in &policy.requires {
                if self.capabilities.tool(capability).is_none() {
                    warnings.push(format!(
                        "Policy '{}' requires unknown capability '{}'",
                        name, capability
                    ));
                }
            }
            if let Some(ref fallback) = policy.fallback
                && !policies.contains_key(fallback)
            {
                warnings.push(format!(
                    "Policy '{}' falls back to unknown policy '{}'",
                    name, fallback
                ));
            }
        }

        for (phase, agent) in &self.overrides {
            if phase.parse::<PhaseKind>().is_err() {
                warnings.push(format!("Unknown phase '{}' in [overrides]", phase));
            }
            if !agents.contains_key(agent) {
                warnings.push(format!(
                    "Override for phase '{}' references unknown agent '{}'",
                    phase, agent
                ));
            }
        }

        if self.review_fix.poll_interval_secs < crate::config::MIN_POLL_INTERVAL_SECS {
            warnings.push(format!(
                "review_fix.poll_interval_secs = {} is below the {}s floor and will be clamped",
                self.review_fix.poll_interval_secs,
                crate::config::MIN_POLL_INTERVAL_SECS
            ));
        }

        if self.local.empty_change_limit == 0 || self.local.clean_review_limit == 0 {
            warnings.push("local streak limits of 0 stop the loop after one iteration".to_string());
        }

        warnings
    }
}
