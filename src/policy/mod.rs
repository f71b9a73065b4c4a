//! Executor policies: which agent runs which phase, and what to do when the
//! requested policy cannot run on this machine.

pub mod probe;
pub mod resolver;

pub use probe::{CapabilityProbe, CliProbe};
pub use resolver::{PolicyResolver, ResolvedPolicy, fallback_chain, longest_acyclic_chain};
