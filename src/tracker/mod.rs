//! Working-tree access for the loops.

pub mod git;

use async_trait::async_trait;

use crate::checkpoint::RepoFingerprint;
use crate::errors::{PhaseError, PlatformError};

pub use git::GitTracker;

/// The repository the agents work in.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Working-tree status snapshot plus head commit.
    fn fingerprint(&self) -> Result<RepoFingerprint, PhaseError>;

    /// `git push -u origin <branch>`.
    async fn push_branch(&self, branch: &str) -> Result<(), PlatformError>;
}
