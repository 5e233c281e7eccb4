//! Error taxonomy for a synchronization run.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while synchronizing a tracked branch.
///
/// Fatal variants abort the whole run. Everything else fails only the branch
/// iteration that hit it; the run continues with the next platform version.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The mirror or consumer checkout has uncommitted changes.
    #[error("repository at {} has uncommitted changes", path.display())]
    DirtyWorkingTree { path: PathBuf },

    /// A required credential was not provided.
    #[error("missing `{0}` environment variable")]
    MissingCredential(String),

    /// The remote branch moved since we last fetched it.
    #[error("push of {branch} was rejected: {reason}")]
    PushRejected { branch: String, reason: String },

    /// Updating the consumer repository failed after the mirror was pushed.
    #[error("propagation into consumer repository failed: {0:#}")]
    Propagation(anyhow::Error),

    /// The pull request could not be opened.
    #[error("pull request creation failed: {0:#}")]
    PullRequest(anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    /// Whether this error must abort the entire run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DirtyWorkingTree { .. } | Self::MissingCredential(_)
        )
    }
}
