use anyhow::Context;
use anyhow::Result;
use futures_util::future::try_join_all;
use log::debug;
use tracing::info;
use tracing::warn;

use crate::branch::IntegrationBranch;
use crate::branch::TrackedBranch;
use crate::clients::git::GitOps;
use crate::clients::github::GithubOps;
use crate::clients::github::PullRequest;
use crate::config::RepoId;
use crate::error::SyncError;
use crate::rebase::RebaseOutcome;
use crate::rebase::push_with_lease;

/// Open a PR merging `integration_branch` into `base`, or return the open PR
/// that already does.
pub async fn open_pull_request(
    gh: &impl GithubOps,
    repo: &RepoId,
    base: &str,
    integration_branch: &str,
    title: &str,
    body: &str,
) -> Result<PullRequest> {
    if let Some(existing) = gh
        .find_open_pull_request(repo, integration_branch, base)
        .await?
    {
        info!(
            "Pull request {} already open for {}",
            existing.html_url, integration_branch
        );
        return Ok(existing);
    }

    let pr = gh
        .create_pull_request(repo, base, integration_branch, title, body)
        .await?;
    info!("Created pull request {}", pr.html_url);
    Ok(pr)
}

/// Body of the consumer PR, linking to the mirror's integration branch and
/// to the fork changes it brings in.
pub fn pull_request_body(
    mirror_repo: &RepoId,
    integration_branch: &str,
    outcome: &RebaseOutcome,
) -> String {
    format!(
        "View nixpkgs update branch: [{integration_branch}](https://github.com/{mirror_repo}/tree/{integration_branch})\n\
         \n\
         Upstream: {}\n\
         Changes: https://github.com/{mirror_repo}/compare/{}...{}\n",
        outcome.upstream_commit, outcome.fork_commit, outcome.fork_after_rebase
    )
}

/// Branches touched by [`cleanup_stale`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Cleanup {
    pub deleted: Vec<(RepoId, String)>,
    /// Stale branches whose deletion failed.
    pub failed: Vec<(RepoId, String)>,
}

/// Delete every integration branch older than `merged_branch` from each of
/// `repos`. Deleting a branch also closes its PR.
///
/// Branch names that don't parse as integration branches are left alone. A
/// failed deletion is logged and the remaining branches are still processed.
pub async fn cleanup_stale(
    gh: &impl GithubOps,
    repos: &[RepoId],
    prefix: &str,
    merged_branch: &str,
) -> Result<Cleanup> {
    info!("Cleaning up integration branches older than {}", merged_branch);
    let merged = IntegrationBranch::parse_with_prefix(prefix, merged_branch)
        .with_context(|| format!("{merged_branch} is not an integration branch"))?;

    let listing_prefix = format!("{}/", merged.prefix);
    let listings = try_join_all(
        repos
            .iter()
            .map(|repo| gh.list_branches(repo, &listing_prefix)),
    )
    .await?;

    let mut cleanup = Cleanup::default();
    for (repo, branches) in repos.iter().zip(listings) {
        for branch in branches {
            let Some(parsed) = IntegrationBranch::parse_with_prefix(prefix, &branch) else {
                debug!("Ignoring {} in {}", branch, repo);
                continue;
            };
            if parsed.date >= merged.date {
                continue;
            }
            info!("Deleting stale branch {} in {}", branch, repo);
            match gh.delete_branch(repo, &branch).await {
                Ok(()) => cleanup.deleted.push((repo.clone(), branch)),
                Err(e) => {
                    warn!("Could not delete {} in {}, skipping", branch, repo);
                    debug!("Delete error: {:#}", e);
                    cleanup.failed.push((repo.clone(), branch));
                }
            }
        }
    }

    Ok(cleanup)
}

/// Land a merged integration branch on the mirror's target branch.
///
/// The target branch is reset to its fetched tip on origin, rebased onto the
/// integration branch, which already contains the fork's commits, and pushed
/// with lease. Returns `false` if the
/// rebase conflicted; it is aborted and nothing is pushed.
pub async fn merge_integration_branch(
    git: &impl GitOps,
    tracked: &TrackedBranch,
    integration_branch: &str,
) -> Result<bool, SyncError> {
    info!(
        "Rebasing {} onto merged {}",
        tracked.mirror_branch, integration_branch
    );
    if git.is_dirty().await? {
        return Err(SyncError::DirtyWorkingTree { path: git.path() });
    }

    // Start from the fetched tip so the lease below covers everything we push.
    git.reset_branch(
        &tracked.mirror_branch,
        &format!("origin/{}", tracked.mirror_branch),
    )
    .await?;

    if !git.rebase(&format!("origin/{integration_branch}")).await? {
        warn!("Rebase of {} failed, aborting.", tracked.mirror_branch);
        git.rebase_abort().await?;
        return Ok(false);
    }

    push_with_lease(git, &tracked.mirror_branch).await?;
    info!("Pushed {}", tracked.mirror_branch);
    Ok(true)
}
