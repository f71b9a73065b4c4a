//! Shepherd: a resumable, checkpointed orchestrator that drives coding agents
//! from a task spec through local implementation, a pull request and the
//! automated review feedback that follows.

pub mod checkpoint;
pub mod classify;
pub mod config;
pub mod errors;
pub mod logging;
pub mod orchestrator;
pub mod phase;
pub mod phases;
pub mod platform;
pub mod policy;
pub mod review;
pub mod runner;
pub mod sanitize;
pub mod shepherd_config;
pub mod signals;
pub mod tracker;
pub mod ui;
pub mod util;
