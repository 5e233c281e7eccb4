use anyhow::Result;
use anyhow::bail;
use colored::Colorize;
use tracing::info;
use tracing::warn;

use crate::App;
use crate::branch::IntegrationBranch;
use crate::branch::TrackedBranch;
use crate::clients::git::GitOps;
use crate::clients::github::GithubOps;
use crate::clients::nix::BuildOps;
use crate::lifecycle::cleanup_stale;
use crate::lifecycle::merge_integration_branch;
use crate::remotes::RemoteSpec;
use crate::remotes::ensure_repository;

impl<G: GitOps, H: GithubOps, B: BuildOps> App<G, H, B> {
    /// Finish an update whose consumer PR has been merged: land the mirror
    /// integration branch on its target branch and clean up older attempts.
    pub async fn cmd_merged(&self, pr_number: u64, stdout: &mut impl std::io::Write) -> Result<()> {
        self.ensure_mirror_clean().await?;

        let repo = &self.config.consumer_repo;
        let pr = self.gh.get_pull_request(repo, pr_number).await?;
        if !pr.merged {
            bail!("Pull request {} is not merged", pr.html_url);
        }
        if IntegrationBranch::parse_with_prefix(&self.config.branch_prefix, &pr.head).is_none() {
            bail!("{} is not an integration branch", pr.head);
        }
        let tracked = TrackedBranch::from_consumer_branch(&self.config.consumer_project, &pr.base)?;
        info!("Pull request {} merged {} into {}", pr_number, pr.head, pr.base);

        let remotes = vec![RemoteSpec::new(
            "origin",
            &self.config.origin_url,
            vec![tracked.mirror_branch.clone(), pr.head.clone()],
        )];
        ensure_repository(&self.mirror, &remotes).await?;

        if !merge_integration_branch(&self.mirror, &tracked, &pr.head).await? {
            self.gh
                .comment_on_pull_request(
                    repo,
                    pr_number,
                    &format!(
                        "Rebasing nixpkgs `{}` onto `{}` failed, needs manual update.",
                        tracked.mirror_branch, pr.head
                    ),
                )
                .await?;
            writeln!(
                stdout,
                "{} {} could not be rebased onto {}",
                "✗".yellow(),
                tracked.mirror_branch,
                pr.head
            )?;
            bail!("Rebase of {} onto {} conflicts", tracked.mirror_branch, pr.head);
        }

        if let Err(e) = self
            .gh
            .delete_branch(&self.config.mirror_repo, &pr.head)
            .await
        {
            warn!("Could not delete {} in {}: {:#}", pr.head, self.config.mirror_repo, e);
        }
        self.gh
            .comment_on_pull_request(
                repo,
                pr_number,
                &format!(
                    "Rebased nixpkgs `{}` branch successfully.",
                    tracked.mirror_branch
                ),
            )
            .await?;
        writeln!(
            stdout,
            "{} {} rebased onto {}",
            "✓".green(),
            tracked.mirror_branch,
            pr.head
        )?;

        let cleanup = cleanup_stale(
            &self.gh,
            &[self.config.consumer_repo.clone(), self.config.mirror_repo.clone()],
            &self.config.branch_prefix,
            &pr.head,
        )
        .await?;
        for (repo, branch) in &cleanup.deleted {
            writeln!(stdout, "{} deleted {} in {}", "-".dimmed(), branch, repo)?;
        }
        for (repo, branch) in &cleanup.failed {
            writeln!(stdout, "{} could not delete {} in {}", "!".red(), branch, repo)?;
        }
        if !cleanup.failed.is_empty() {
            bail!("{} stale branches could not be deleted", cleanup.failed.len());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use mockall::predicate::eq;

    use super::*;
    use crate::Config;
    use crate::clients::git::CommitId;
    use crate::clients::git::MockGitOps;
    use crate::clients::git::PushStatus;
    use crate::clients::github::MockGithubOps;
    use crate::clients::github::PullRequest;
    use crate::clients::nix::MockBuildOps;

    const HEAD: &str = "nixpkgs-auto-update/nixos-24.05/2024-11-05";

    fn merged_pr(merged: bool) -> PullRequest {
        PullRequest {
            number: 42,
            html_url: "https://github.com/flyingcircusio/fc-nixos/pull/42".to_string(),
            state: "closed".to_string(),
            merged,
            head: HEAD.to_string(),
            base: "fc-24.05-dev".to_string(),
        }
    }

    fn mirror(rebases: bool) -> MockGitOps {
        let mut git = MockGitOps::new();
        git.expect_path()
            .return_const(PathBuf::from("/tmp/nixpkgs"));
        git.expect_is_repository().returning(|| Ok(true));
        git.expect_is_dirty().returning(|| Ok(false));
        git.expect_remote_url()
            .with(eq("origin"))
            .returning(|_| Ok(Some("git@github.com:flyingcircusio/nixpkgs.git".to_string())));
        git.expect_fetch_branch()
            .with(eq("origin"), mockall::predicate::always(), eq(true))
            .times(2)
            .returning(|_, _, _| Ok(()));
        git.expect_reset_branch()
            .with(eq("nixos-24.05"), eq("origin/nixos-24.05"))
            .returning(|_, _| Ok(()));
        git.expect_rebase()
            .with(eq(format!("origin/{HEAD}")))
            .returning(move |_| Ok(rebases));
        git
    }

    /// The post-merge path never looks at the consumer checkout, which may
    /// not even be a repository.
    fn consumer() -> MockGitOps {
        let mut git = MockGitOps::new();
        git.expect_is_dirty().never();
        git
    }

    #[tokio::test]
    async fn test_merged_lands_branch_and_cleans_up() {
        let mut mirror = mirror(true);
        mirror
            .expect_resolve()
            .with(eq("origin/nixos-24.05"))
            .returning(|_| Ok(Some(CommitId("f0".to_string()))));
        mirror
            .expect_push_head()
            .times(1)
            .returning(|_, _, _| Ok(PushStatus::Pushed));

        let config = Config::default_for_tests();
        let mirror_repo = config.mirror_repo.clone();
        let mut gh = MockGithubOps::new();
        gh.expect_get_pull_request()
            .with(eq(config.consumer_repo.clone()), eq(42))
            .returning(|_, _| Ok(merged_pr(true)));
        gh.expect_delete_branch()
            .with(eq(mirror_repo.clone()), eq(HEAD))
            .times(1)
            .returning(|_, _| Ok(()));
        gh.expect_comment_on_pull_request()
            .with(
                mockall::predicate::always(),
                eq(42),
                eq("Rebased nixpkgs `nixos-24.05` branch successfully."),
            )
            .times(1)
            .returning(|_, _, _| Ok(()));
        gh.expect_list_branches().returning(|repo, _| {
            if repo.name == "fc-nixos" {
                Ok(vec![
                    "nixpkgs-auto-update/nixos-24.05/2024-11-04".to_string(),
                    HEAD.to_string(),
                ])
            } else {
                Ok(vec![HEAD.to_string()])
            }
        });
        gh.expect_delete_branch()
            .with(
                eq(config.consumer_repo.clone()),
                eq("nixpkgs-auto-update/nixos-24.05/2024-11-04"),
            )
            .times(1)
            .returning(|_, _| Ok(()));

        let app = App::new(config, mirror, consumer(), gh, MockBuildOps::new());

        let mut stdout = Vec::new();
        app.cmd_merged(42, &mut stdout).await.unwrap();
        insta::assert_snapshot!(String::from_utf8(stdout).unwrap(), @r"
        ✓ nixos-24.05 rebased onto nixpkgs-auto-update/nixos-24.05/2024-11-05
        - deleted nixpkgs-auto-update/nixos-24.05/2024-11-04 in flyingcircusio/fc-nixos
        ");
    }

    #[tokio::test]
    async fn test_failed_cleanup_is_reported_after_landing() {
        let mut mirror = mirror(true);
        mirror
            .expect_resolve()
            .returning(|_| Ok(Some(CommitId("f0".to_string()))));
        mirror
            .expect_push_head()
            .times(1)
            .returning(|_, _, _| Ok(PushStatus::Pushed));

        let mut gh = MockGithubOps::new();
        gh.expect_get_pull_request()
            .returning(|_, _| Ok(merged_pr(true)));
        gh.expect_comment_on_pull_request()
            .times(1)
            .returning(|_, _, _| Ok(()));
        gh.expect_list_branches().returning(|repo, _| {
            if repo.name == "fc-nixos" {
                Ok(vec![
                    "nixpkgs-auto-update/nixos-24.05/2024-11-03".to_string(),
                    "nixpkgs-auto-update/nixos-24.05/2024-11-04".to_string(),
                ])
            } else {
                Ok(vec![])
            }
        });
        gh.expect_delete_branch()
            .withf(|_, branch| branch == "nixpkgs-auto-update/nixos-24.05/2024-11-03")
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("HTTP 422")));
        gh.expect_delete_branch()
            .withf(|_, branch| branch != "nixpkgs-auto-update/nixos-24.05/2024-11-03")
            .times(2)
            .returning(|_, _| Ok(()));

        let app = App::new(
            Config::default_for_tests(),
            mirror,
            consumer(),
            gh,
            MockBuildOps::new(),
        );

        let mut stdout = Vec::new();
        let err = app.cmd_merged(42, &mut stdout).await.unwrap_err();
        assert_eq!(err.to_string(), "1 stale branches could not be deleted");
        insta::assert_snapshot!(String::from_utf8(stdout).unwrap(), @r"
        ✓ nixos-24.05 rebased onto nixpkgs-auto-update/nixos-24.05/2024-11-05
        - deleted nixpkgs-auto-update/nixos-24.05/2024-11-04 in flyingcircusio/fc-nixos
        ! could not delete nixpkgs-auto-update/nixos-24.05/2024-11-03 in flyingcircusio/fc-nixos
        ");
    }

    #[tokio::test]
    async fn test_merged_conflict_comments_and_fails() {
        let mut mirror = mirror(false);
        mirror.expect_rebase_abort().times(1).returning(|| Ok(()));
        mirror.expect_push_head().never();

        let mut gh = MockGithubOps::new();
        gh.expect_get_pull_request()
            .returning(|_, _| Ok(merged_pr(true)));
        gh.expect_comment_on_pull_request()
            .withf(|_, number, body| *number == 42 && body.contains("needs manual update"))
            .times(1)
            .returning(|_, _, _| Ok(()));
        gh.expect_delete_branch().never();
        gh.expect_list_branches().never();

        let app = App::new(
            Config::default_for_tests(),
            mirror,
            consumer(),
            gh,
            MockBuildOps::new(),
        );

        let mut stdout = Vec::new();
        let err = app.cmd_merged(42, &mut stdout).await.unwrap_err();
        assert!(err.to_string().contains("conflicts"));
    }

    #[tokio::test]
    async fn test_unmerged_pull_request_is_refused() {
        let mut mirror = MockGitOps::new();
        mirror.expect_is_repository().returning(|| Ok(true));
        mirror.expect_is_dirty().returning(|| Ok(false));
        mirror.expect_fetch_branch().never();

        let mut gh = MockGithubOps::new();
        gh.expect_get_pull_request()
            .returning(|_, _| Ok(merged_pr(false)));
        gh.expect_comment_on_pull_request().never();

        let app = App::new(
            Config::default_for_tests(),
            mirror,
            consumer(),
            gh,
            MockBuildOps::new(),
        );

        let mut stdout = Vec::new();
        let err = app.cmd_merged(42, &mut stdout).await.unwrap_err();
        assert!(err.to_string().contains("is not merged"));
    }
}
