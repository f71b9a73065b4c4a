use anyhow::{Context, Result};
use async_trait::async_trait;
use git2::{BranchType, ObjectType, Oid, Repository, Status, StatusOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::Workspace;
use crate::checkpoint::RepoFingerprint;
use crate::errors::{PhaseError, PlatformError};
use crate::runner::{CommandSpec, run_command};

/// git2-backed view of the working repository.
///
/// Holds the path rather than a `Repository` so it can be shared across tasks;
/// each call opens the repository fresh.
pub struct GitTracker {
    root: PathBuf,
}

impl GitTracker {
    pub fn new(project_dir: &Path) -> Result<Self> {
        let repo = Repository::discover(project_dir).context("Failed to open git repository")?;
        let root = repo
            .workdir()
            .map(Path::to_path_buf)
            .context("Repository has no working directory (bare repository?)")?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn open(&self) -> Result<Repository, git2::Error> {
        Repository::open(&self.root)
    }

    /// Get the HEAD commit if it exists (returns None for unborn branches)
    fn head_commit(repo: &Repository) -> Option<git2::Commit<'_>> {
        repo.head().ok().and_then(|head| head.peel_to_commit().ok())
    }

    /// Snapshot of the working tree: one line per dirty path with its status
    /// flags and the hash of its current contents.
    pub fn snapshot(&self) -> Result<RepoFingerprint, git2::Error> {
        let repo = self.open()?;
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false)
            .renames_head_to_index(true);

        let statuses = repo.statuses(Some(&mut opts))?;
        let mut lines = Vec::with_capacity(statuses.len());
        for entry in statuses.iter() {
            let Some(path) = entry.path() else {
                continue;
            };
            let status = entry.status();
            let content = if status.contains(Status::WT_DELETED) || status.contains(Status::INDEX_DELETED) {
                "-".to_string()
            } else {
                Oid::hash_file(ObjectType::Blob, self.root.join(path))
                    .map(|oid| oid.to_string())
                    .unwrap_or_else(|_| "?".to_string())
            };
            lines.push(format!("{} {} {}", status_flags(status), path, content));
        }
        lines.sort();

        Ok(RepoFingerprint {
            status: lines.join("\n"),
            head: Self::head_commit(&repo).map(|c| c.id().to_string()),
        })
    }

    pub fn current_branch(&self) -> Option<String> {
        let repo = self.open().ok()?;
        let head = repo.head().ok()?;
        if !head.is_branch() {
            return None;
        }
        head.shorthand().map(str::to_string)
    }

    /// Default branch of `origin` (via `refs/remotes/origin/HEAD`), if known.
    pub fn remote_default_branch(&self) -> Option<String> {
        let repo = self.open().ok()?;
        let reference = repo.find_reference("refs/remotes/origin/HEAD").ok()?;
        let target = reference.symbolic_target()?;
        target
            .strip_prefix("refs/remotes/origin/")
            .map(str::to_string)
    }

    /// Switch HEAD to `branch`, creating it at the current commit if needed.
    pub fn ensure_branch(&self, branch: &str) -> Result<(), git2::Error> {
        let repo = self.open()?;
        if self.current_branch().as_deref() == Some(branch) {
            return Ok(());
        }
        let Some(head) = Self::head_commit(&repo) else {
            // unborn: point HEAD at the new name, first commit creates it
            repo.set_head(&format!("refs/heads/{}", branch))?;
            return Ok(());
        };

        let target = match repo.find_branch(branch, BranchType::Local) {
            Ok(existing) => existing.get().peel_to_commit()?,
            Err(_) => {
                info!(branch, "Creating feature branch");
                repo.branch(branch, &head, false)?.get().peel_to_commit()?
            }
        };
        if target.id() != head.id() {
            let mut checkout = git2::build::CheckoutBuilder::new();
            checkout.safe();
            repo.checkout_tree(target.as_object(), Some(&mut checkout))?;
        }
        repo.set_head(&format!("refs/heads/{}", branch))?;
        debug!(branch, "Switched HEAD");
        Ok(())
    }
}

fn status_flags(status: Status) -> String {
    let index = if status.contains(Status::INDEX_NEW) {
        'A'
    } else if status.contains(Status::INDEX_MODIFIED) {
        'M'
    } else if status.contains(Status::INDEX_DELETED) {
        'D'
    } else if status.contains(Status::INDEX_RENAMED) {
        'R'
    } else if status.contains(Status::INDEX_TYPECHANGE) {
        'T'
    } else {
        ' '
    };
    let worktree = if status.contains(Status::WT_NEW) {
        '?'
    } else if status.contains(Status::WT_MODIFIED) {
        'M'
    } else if status.contains(Status::WT_DELETED) {
        'D'
    } else if status.contains(Status::WT_RENAMED) {
        'R'
    } else if status.contains(Status::WT_TYPECHANGE) {
        'T'
    } else if status.contains(Status::CONFLICTED) {
        'U'
    } else {
        ' '
    };
    format!("{}{}", index, worktree)
}

#[async_trait]
impl Workspace for GitTracker {
    fn fingerprint(&self) -> Result<RepoFingerprint, PhaseError> {
        self.snapshot().map_err(|e| PhaseError::Git(e.message().to_string()))
    }

    async fn push_branch(&self, branch: &str) -> Result<(), PlatformError> {
        let args = vec![
            "push".to_string(),
            "-u".to_string(),
            "origin".to_string(),
            branch.to_string(),
        ];
        let spec = CommandSpec::new("git", &args)
            .cwd(&self.root)
            .timeout(Duration::from_secs(300));
        info!(branch, "Pushing branch");
        let outcome = run_command(&spec)
            .await
            .map_err(|e| PlatformError::Spawn {
                command: spec.display(),
                source: std::io::Error::other(e.to_string()),
            })?;
        if outcome.success() {
            Ok(())
        } else {
            Err(PlatformError::CommandFailed {
                command: spec.display(),
                stderr: outcome.failure_detail(),
            })
        }
    }
}
