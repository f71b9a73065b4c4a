//! Policy resolution with a bounded fallback chain.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use super::probe::CapabilityProbe;
use crate::errors::{CapabilityFailure, PolicyError};
use crate::phase::PhaseKind;
use crate::shepherd_config::{AgentConfig, CapabilitiesSection, PolicyConfig};

/// Fallback targets starting at `start`, in order, stopping before the first repeat.
pub fn fallback_chain(start: &str, policies: &BTreeMap<String, PolicyConfig>) -> Vec<String> {
    let mut chain = Vec::new();
    let mut seen = BTreeSet::new();
    let mut current = Some(start.to_string());
    while let Some(name) = current {
        if !seen.insert(name.clone()) {
            break;
        }
        current = policies.get(&name).and_then(|p| p.fallback.clone());
        chain.push(name);
    }
    chain
}

/// Longest acyclic fallback chain over every configured policy.
pub fn longest_acyclic_chain(policies: &BTreeMap<String, PolicyConfig>) -> usize {
    policies
        .keys()
        .map(|name| fallback_chain(name, policies).len())
        .max()
        .unwrap_or(0)
}

/// A verified policy, threaded explicitly through the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPolicy {
    pub name: String,
    pub policy: PolicyConfig,
    /// Policies attempted, in order, ending with `name`.
    pub chain: Vec<String>,
    pub max_attempts: usize,
}

impl ResolvedPolicy {
    /// Wrap a policy without verification.
    pub fn unverified(name: &str, policy: PolicyConfig) -> Self {
        Self {
            name: name.to_string(),
            policy,
            chain: vec![name.to_string()],
            max_attempts: 1,
        }
    }

    pub fn fell_back(&self) -> bool {
        self.chain.len() > 1
    }

    /// Agent for `phase` at `iteration` (1-based). An override wins.
    pub fn select(
        &self,
        phase: PhaseKind,
        iteration: u32,
        overrides: &BTreeMap<PhaseKind, String>,
    ) -> String {
        if let Some(agent) = overrides.get(&phase) {
            return agent.clone();
        }
        let primary = &self.policy.primary;
        let Some(secondary) = self.policy.secondary.as_ref().filter(|_| self.policy.is_dual())
        else {
            return primary.clone();
        };
        match phase {
            PhaseKind::Pr | PhaseKind::ReviewFix => secondary.clone(),
            PhaseKind::Local if iteration <= 1 => primary.clone(),
            PhaseKind::Local => secondary.clone(),
        }
    }
}

/// Resolves a requested policy name against configuration and a probe.
pub struct PolicyResolver<'a> {
    policies: &'a BTreeMap<String, PolicyConfig>,
    agents: &'a BTreeMap<String, AgentConfig>,
    capabilities: &'a CapabilitiesSection,
}

impl<'a> PolicyResolver<'a> {
    pub fn new(
        policies: &'a BTreeMap<String, PolicyConfig>,
        agents: &'a BTreeMap<String, AgentConfig>,
        capabilities: &'a CapabilitiesSection,
    ) -> Self {
        Self {
            policies,
            agents,
            capabilities,
        }
    }

    pub fn max_attempts(&self) -> usize {
        longest_acyclic_chain(self.policies) + 1
    }

    fn policy(&self, name: &str) -> Result<&'a PolicyConfig, PolicyError> {
        self.policies
            .get(name)
            .ok_or_else(|| PolicyError::UnknownPolicy {
                name: name.to_string(),
            })
    }

    /// Capability names a policy needs: its tools, then its agents.
    fn required(&self, name: &str, policy: &PolicyConfig) -> Result<Vec<String>, PolicyError> {
        let mut required: Vec<String> = policy.requires.clone();
        for agent in policy.agents() {
            if !self.agents.contains_key(agent) {
                return Err(PolicyError::UnknownAgent {
                    policy: name.to_string(),
                    agent: agent.to_string(),
                });
            }
            required.push(agent.to_string());
        }
        Ok(required)
    }

    async fn verify_one(&self, capability: &str, probe: &dyn CapabilityProbe) -> Result<(), String> {
        if let Some(tool) = self.capabilities.tool(capability) {
            return probe
                .verify(capability, &tool.program, &tool.verify_args)
                .await;
        }
        if let Some(agent) = self.agents.get(capability) {
            return probe
                .verify(capability, &agent.program, &agent.verify_args)
                .await;
        }
        Err("not configured".to_string())
    }

    /// Verify `requested`, following fallbacks until one verifies.
    pub async fn resolve(
        &self,
        requested: &str,
        probe: &dyn CapabilityProbe,
    ) -> Result<ResolvedPolicy, PolicyError> {
        let max_attempts = self.max_attempts();
        let mut verified: BTreeMap<String, Result<(), String>> = BTreeMap::new();
        let mut chain: Vec<String> = Vec::new();
        let mut never_verified: Vec<CapabilityFailure> = Vec::new();
        let mut current = requested.to_string();

        loop {
            chain.push(current.clone());
            if chain.len() > max_attempts {
                return Err(PolicyError::FallbackExhausted {
                    chain,
                    failures: never_verified,
                });
            }

            let policy = self.policy(&current)?;
            let required = self.required(&current, policy)?;

            let mut failures = Vec::new();
            for capability in &required {
                if !verified.contains_key(capability) {
                    let result = self.verify_one(capability, probe).await;
                    verified.insert(capability.clone(), result);
                }
                if let Some(Err(reason)) = verified.get(capability) {
                    failures.push(CapabilityFailure {
                        capability: capability.clone(),
                        reason: reason.clone(),
                    });
                }
            }

            if failures.is_empty() {
                if chain.len() > 1 {
                    info!(requested, resolved = %current, chain = %chain.join(" -> "), "Fell back to policy");
                } else {
                    info!(policy = %current, "Policy verified");
                }
                return Ok(ResolvedPolicy {
                    name: current,
                    policy: policy.clone(),
                    chain,
                    max_attempts,
                });
            }

            for failure in &failures {
                if !never_verified.contains(failure) {
                    never_verified.push(failure.clone());
                }
            }

            let usable_fallback = match policy.fallback.as_deref() {
                Some(fallback) => {
                    let fallback_policy = self.policy(fallback)?;
                    let fallback_needs = self.required(fallback, fallback_policy)?;
                    let blocked = failures
                        .iter()
                        .any(|f| fallback_needs.contains(&f.capability));
                    (!blocked).then(|| fallback.to_string())
                }
                None => None,
            };

            match usable_fallback {
                Some(fallback) => {
                    warn!(
                        policy = %current,
                        fallback = %fallback,
                        failed = %failures.iter().map(|f| f.capability.as_str()).collect::<Vec<_>>().join(", "),
                        "Policy failed verification; trying fallback"
                    );
                    current = fallback;
                }
                None => {
                    return Err(PolicyError::CapabilityUnavailable {
                        policy: current,
                        failures,
                    });
                }
            }
        }
    }
}
