use anyhow::Context;
use tracing::info;
use tracing::warn;

use crate::clients::git::CommitId;
use crate::clients::git::GitOps;
use crate::clients::git::PushMode;
use crate::clients::git::PushStatus;
use crate::error::SyncError;

// -----------------------------------------------------------------------------
// Types

/// Commits involved in a successful rebase of the fork onto upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebaseOutcome {
    /// Tip of the upstream branch the fork was rebased onto.
    pub upstream_commit: CommitId,
    /// Tip of the fork's target branch on origin. With several consecutive
    /// updates pending this differs from `fork_before_rebase`; it is the base
    /// for the full changelog.
    pub fork_commit: CommitId,
    pub fork_before_rebase: CommitId,
    pub fork_after_rebase: CommitId,
}

/// Why a rebase produced nothing new.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoChange {
    /// Upstream's tip is already contained in the fork.
    UpToDate,
    /// The rebased tree is identical to the previous day's integration branch.
    SameAsPrevious,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebaseResult {
    Absent(NoChange),
    /// The rebase conflicted and was aborted.
    Conflict,
    Success(RebaseOutcome),
}

// -----------------------------------------------------------------------------
// Rebase

/// Rebase the fork's `target_branch` onto upstream and publish the result as
/// `integration_branch` on origin.
///
/// Expects `upstream/<target_branch>`, `origin/<target_branch>` and, if it
/// exists, `origin/<previous_integration_branch>` to be fetched already.
pub async fn rebase(
    git: &impl GitOps,
    target_branch: &str,
    integration_branch: &str,
    previous_integration_branch: &str,
) -> Result<RebaseResult, SyncError> {
    info!("Trying to rebase {} onto upstream", target_branch);
    if git.is_dirty().await? {
        return Err(SyncError::DirtyWorkingTree { path: git.path() });
    }

    let fork_ref = format!("origin/{target_branch}");
    checkout_or_create_branch(git, integration_branch, &fork_ref).await?;

    let upstream_ref = format!("upstream/{target_branch}");
    let latest_upstream = git
        .resolve(&upstream_ref)
        .await?
        .with_context(|| format!("{upstream_ref} has not been fetched"))?;
    let merge_bases = git.merge_base(&upstream_ref, "HEAD").await?;
    if merge_bases.contains(&latest_upstream) {
        info!(
            "Latest commit of {} is {}, which is already part of our fork. Nothing to do.",
            target_branch, latest_upstream
        );
        return Ok(RebaseResult::Absent(NoChange::UpToDate));
    }

    info!(
        "Latest commit of {} is {}, which is not part of our fork, rebasing.",
        target_branch, latest_upstream
    );
    let fork_commit = git
        .resolve(&fork_ref)
        .await?
        .with_context(|| format!("{fork_ref} has not been fetched"))?;
    let fork_before_rebase = head(git).await?;

    if !git.rebase(&upstream_ref).await? {
        warn!(
            "Rebasing {} onto {} conflicts, aborting.",
            integration_branch, upstream_ref
        );
        git.rebase_abort().await?;
        return Ok(RebaseResult::Conflict);
    }
    let fork_after_rebase = head(git).await?;

    let previous_ref = format!("origin/{previous_integration_branch}");
    if git.resolve(&previous_ref).await?.is_some()
        && git.get_tree("HEAD").await? == git.get_tree(&previous_ref).await?
    {
        info!(
            "No changes compared to {}. Not publishing {}.",
            previous_integration_branch, integration_branch
        );
        return Ok(RebaseResult::Absent(NoChange::SameAsPrevious));
    }

    push_with_lease(git, integration_branch).await?;
    info!("Pushed {} at {}", integration_branch, fork_after_rebase);

    Ok(RebaseResult::Success(RebaseOutcome {
        upstream_commit: latest_upstream,
        fork_commit,
        fork_before_rebase,
        fork_after_rebase,
    }))
}

/// Check out `branch`, creating it at `start` if it doesn't exist locally.
///
/// An existing branch is reused so a day's attempt can be resumed.
pub async fn checkout_or_create_branch(
    git: &impl GitOps,
    branch: &str,
    start: &str,
) -> anyhow::Result<()> {
    if git.local_branch_exists(branch).await? {
        info!("Checking out existing branch {}", branch);
        git.checkout(branch).await
    } else {
        info!("Creating branch {} from {}", branch, start);
        git.create_branch(branch, start).await
    }
}

/// Push `HEAD` to `origin/<branch>`, only replacing the remote branch if it
/// is still where we last fetched it (or still absent).
pub async fn push_with_lease(git: &impl GitOps, branch: &str) -> Result<(), SyncError> {
    let expected = git.resolve(&format!("origin/{branch}")).await?;
    match git
        .push_head("origin", branch, PushMode::ForceWithLease { expected })
        .await?
    {
        PushStatus::Pushed => Ok(()),
        PushStatus::Rejected(reason) => Err(SyncError::PushRejected {
            branch: branch.to_string(),
            reason,
        }),
    }
}

async fn head(git: &impl GitOps) -> anyhow::Result<CommitId> {
    git.resolve("HEAD")
        .await?
        .context("HEAD does not point to a commit")
}
