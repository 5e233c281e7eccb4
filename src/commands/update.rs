use std::fmt::Display;

use anyhow::Result;
use chrono::NaiveDateTime;
use colored::Colorize;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::App;
use crate::branch::IntegrationBranch;
use crate::branch::TrackedBranch;
use crate::clients::git::CommitId;
use crate::clients::git::GitOps;
use crate::clients::github::GithubOps;
use crate::clients::nix::BuildOps;
use crate::error::SyncError;
use crate::lifecycle::open_pull_request;
use crate::lifecycle::pull_request_body;
use crate::propagate::propagate;
use crate::rebase::NoChange;
use crate::rebase::RebaseResult;
use crate::rebase::rebase;
use crate::remotes::RemoteSpec;
use crate::remotes::ensure_repository;

/// What happened to one tracked branch during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchOutcome {
    NoChange(NoChange),
    Conflict,
    Updated {
        integration_branch: String,
        fork_commit: CommitId,
        consumer_commit: CommitId,
        pull_request: String,
    },
}

/// Per-branch results of an update run, in processing order.
#[derive(Debug, Default)]
pub struct RunReport {
    pub entries: Vec<(TrackedBranch, Result<BranchOutcome, SyncError>)>,
}

impl RunReport {
    pub fn failures(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, result)| result.is_err())
            .count()
    }

    pub fn write(&self, stdout: &mut impl std::io::Write) -> Result<()> {
        for (tracked, result) in &self.entries {
            let line = match result {
                Ok(outcome @ BranchOutcome::Updated { .. }) => {
                    format!("{} {} {}", "✓".green(), tracked, outcome)
                }
                Ok(outcome @ BranchOutcome::NoChange(_)) => {
                    format!("{} {} {}", "-".dimmed(), tracked, outcome)
                }
                Ok(outcome @ BranchOutcome::Conflict) => {
                    format!("{} {} {}", "✗".yellow(), tracked, outcome)
                }
                Err(e) => format!("{} {} failed: {}", "!".red(), tracked, e),
            };
            writeln!(stdout, "{}", line)?;
        }
        Ok(())
    }
}

impl Display for BranchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoChange(NoChange::UpToDate) => f.write_str("up to date with upstream"),
            Self::NoChange(NoChange::SameAsPrevious) => {
                f.write_str("no changes since the previous update")
            }
            Self::Conflict => f.write_str("rebase conflicts with upstream, needs manual update"),
            Self::Updated {
                integration_branch,
                fork_commit,
                pull_request,
                ..
            } => write!(
                f,
                "updated {} to {}: {}",
                integration_branch, fork_commit, pull_request
            ),
        }
    }
}

impl<G: GitOps, H: GithubOps, B: BuildOps> App<G, H, B> {
    /// Synchronize every platform version with upstream.
    ///
    /// Versions are processed one at a time against the shared mirror. A
    /// fatal error aborts the run; any other failure is recorded and the next
    /// version is processed.
    pub async fn cmd_update(
        &self,
        platform_versions: &[String],
        now: NaiveDateTime,
        stdout: &mut impl std::io::Write,
    ) -> Result<RunReport> {
        self.ensure_clean().await?;

        let mut report = RunReport::default();
        for version in platform_versions {
            let tracked = TrackedBranch::new(&self.config.consumer_project, version);
            info!("Updating platform {}", tracked);

            let result = match self.sync_branch(&tracked, now).await {
                Err(e) if e.is_fatal() => {
                    error!("Aborting run: {}", e);
                    return Err(e.into());
                }
                result => result,
            };
            match &result {
                Err(e) => error!("Updating platform {} failed: {}", tracked, e),
                Ok(BranchOutcome::Conflict) => warn!("Platform {}: {}", tracked, BranchOutcome::Conflict),
                Ok(outcome) => info!("Platform {}: {}", tracked, outcome),
            }
            report.entries.push((tracked, result));
        }

        report.write(stdout)?;
        Ok(report)
    }

    async fn sync_branch(
        &self,
        tracked: &TrackedBranch,
        now: NaiveDateTime,
    ) -> Result<BranchOutcome, SyncError> {
        let today = now.date();
        let integration =
            IntegrationBranch::new(&self.config.branch_prefix, &tracked.mirror_branch, today);
        let previous = integration.previous_day()?;
        let integration_branch = integration.name();

        let remotes = vec![
            RemoteSpec::new(
                "upstream",
                &self.config.upstream_url,
                vec![tracked.mirror_branch.clone()],
            ),
            RemoteSpec::new(
                "origin",
                &self.config.origin_url,
                vec![
                    tracked.mirror_branch.clone(),
                    previous.name(),
                    integration_branch.clone(),
                ],
            ),
        ];
        ensure_repository(&self.mirror, &remotes).await?;

        let outcome = match rebase(
            &self.mirror,
            &tracked.mirror_branch,
            &integration_branch,
            &previous.name(),
        )
        .await?
        {
            RebaseResult::Absent(reason) => return Ok(BranchOutcome::NoChange(reason)),
            RebaseResult::Conflict => return Ok(BranchOutcome::Conflict),
            RebaseResult::Success(outcome) => outcome,
        };
        info!("Updated nixpkgs to {}", outcome.fork_after_rebase);

        let consumer_commit = propagate(
            &self.consumer,
            &self.build,
            &self.config,
            tracked,
            &integration_branch,
            &outcome.fork_commit,
            &outcome.fork_after_rebase,
            now,
        )
        .await
        .map_err(SyncError::Propagation)?;

        let title = format!("Auto update nixpkgs {}", today.format("%Y-%m-%d"));
        let body = pull_request_body(&self.config.mirror_repo, &integration_branch, &outcome);
        let pr = open_pull_request(
            &self.gh,
            &self.config.consumer_repo,
            &tracked.consumer_branch,
            &integration_branch,
            &title,
            &body,
        )
        .await
        .map_err(SyncError::PullRequest)?;

        Ok(BranchOutcome::Updated {
            integration_branch,
            fork_commit: outcome.fork_after_rebase,
            consumer_commit,
            pull_request: pr.html_url,
        })
    }
}
