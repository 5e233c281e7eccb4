use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use chrono::NaiveDateTime;
use tracing::info;

use crate::branch::TrackedBranch;
use crate::clients::git::CommitId;
use crate::clients::git::GitOps;
use crate::clients::git::PushMode;
use crate::clients::git::PushStatus;
use crate::clients::nix::BuildOps;
use crate::config::Config;
use crate::rebase::checkout_or_create_branch;

/// Pin the consumer repository to a new mirror commit on `integration_branch`
/// and push it. Returns the consumer commit.
///
/// Each call writes a new changelog fragment, but the pushed branch is simply
/// replaced, so re-running after a partial failure converges.
#[allow(clippy::too_many_arguments)]
pub async fn propagate(
    git: &impl GitOps,
    build: &impl BuildOps,
    config: &Config,
    tracked: &TrackedBranch,
    integration_branch: &str,
    previous_fork: &CommitId,
    new_fork: &CommitId,
    now: NaiveDateTime,
) -> Result<CommitId> {
    info!("Updating consumer repository {}", config.consumer_repo);
    if git.is_dirty().await? {
        bail!(
            "Consumer checkout at {} has uncommitted changes",
            git.path().display()
        );
    }

    git.fetch_branch("origin", &tracked.consumer_branch, false)
        .await
        .with_context(|| format!("Failed to fetch {}", tracked.consumer_branch))?;
    checkout_or_create_branch(
        git,
        integration_branch,
        &format!("origin/{}", tracked.consumer_branch),
    )
    .await?;

    build
        .relock_dependency(&config.dependency_input, &config.mirror_flake_ref(&new_fork.0))
        .await
        .with_context(|| format!("Failed to relock {} to {}", config.dependency_input, new_fork))?;
    let metadata_files = build
        .regenerate_metadata()
        .await
        .context("Failed to regenerate version metadata")?;

    let fragment = changelog_fragment_path(config, tracked, now);
    let fragment_abs = git.path().join(&fragment);
    if let Some(dir) = fragment_abs.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(
        &fragment_abs,
        changelog_fragment(tracked, previous_fork, new_fork),
    )
    .await
    .with_context(|| format!("Failed to write {}", fragment_abs.display()))?;

    let mut paths = vec![config.lock_file.clone()];
    paths.extend(metadata_files);
    paths.push(fragment);
    git.add(&paths).await?;

    let commit = git
        .commit(&format!("Auto update {} to {}", config.dependency_input, new_fork))
        .await?;

    match git
        .push_head("origin", integration_branch, PushMode::Force)
        .await?
    {
        PushStatus::Pushed => {}
        PushStatus::Rejected(reason) => bail!("Push of {} rejected: {}", integration_branch, reason),
    }
    info!("Pushed {} at {} to consumer repository", integration_branch, commit);

    Ok(commit)
}

/// Path of the changelog fragment, relative to the consumer checkout. The
/// timestamp keeps same-day runs for different branches apart.
pub fn changelog_fragment_path(
    config: &Config,
    tracked: &TrackedBranch,
    now: NaiveDateTime,
) -> PathBuf {
    config.changelog_dir.join(format!(
        "{}_{}-{}.md",
        now.format("%Y%m%d_%H%M%S"),
        config.branch_prefix,
        tracked.consumer_branch
    ))
}

pub fn changelog_fragment(
    tracked: &TrackedBranch,
    previous_fork: &CommitId,
    new_fork: &CommitId,
) -> String {
    format!(
        "\n### NixOS {} platform\n\n- Update nixpkgs from {} to {}\n",
        tracked.platform_version, previous_fork, new_fork
    )
}
