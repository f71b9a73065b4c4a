//! `shepherd policies`: configured executor policies and their fallbacks.

use anyhow::Result;
use console::style;
use std::path::Path;

use shepherd::config::Config;
use shepherd::policy::fallback_chain;

pub fn cmd_policies(project_dir: &Path) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), false)?;
    let policies = config.toml.policies();
    let agents = config.toml.agents();
    let default = config.policy_name();

    println!();
    println!("{}", style("Executor policies").bold());
    println!();
    for (name, policy) in &policies {
        let marker = if *name == default { "*" } else { " " };
        let agents_desc = match policy.secondary {
            Some(ref secondary) => format!("{} then {}", policy.primary, secondary),
            None => policy.primary.clone(),
        };
        println!("{} {:<16} {}", marker, style(name).cyan(), agents_desc);
        if let Some(ref description) = policy.description {
            println!("    {}", style(description).dim());
        }
        if !policy.requires.is_empty() {
            println!("    requires: {}", policy.requires.join(", "));
        }
        let chain = fallback_chain(name, &policies);
        if chain.len() > 1 {
            println!("    fallback: {}", chain.join(" -> "));
        }
    }

    println!();
    println!("{}", style("Agents").bold());
    for (name, agent) in &agents {
        println!(
            "  {:<16} {} {}  (timeout {}s)",
            style(name).cyan(),
            agent.program,
            agent.args.join(" "),
            agent.timeout_secs
        );
    }

    let warnings = config.validate();
    if !warnings.is_empty() {
        println!();
        for warning in warnings {
            println!("{} {}", style("warning:").yellow().bold(), warning);
        }
    }
    println!();
    Ok(())
}
