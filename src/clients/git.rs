#![allow(async_fn_in_trait)]

use std::fmt::Display;
use std::path;
use std::process::Output;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
#[cfg(test)]
use mockall::automock;
use tokio::process::Command;
use tracing::instrument;

// -----------------------------------------------------------------------------
// GitOps trait

/// Operations on one local git repository.
#[cfg_attr(test, automock)]
pub trait GitOps {
    /// Directory of the working copy.
    fn path(&self) -> path::PathBuf;

    async fn is_repository(&self) -> Result<bool>;

    /// Create the directory if needed and initialize an empty repository.
    async fn init(&self) -> Result<()>;

    /// Whether tracked files have uncommitted changes.
    async fn is_dirty(&self) -> Result<bool>;

    async fn rebase_in_progress(&self) -> Result<bool>;

    /// URL of a remote, or `None` if no such remote is configured.
    async fn remote_url(&self, name: &str) -> Result<Option<String>>;
    async fn remote_add(&self, name: &str, url: &str) -> Result<()>;
    async fn remote_delete(&self, name: &str) -> Result<()>;

    /// Fetch a single branch into `refs/remotes/<remote>/<branch>`.
    async fn fetch_branch(&self, remote: &str, branch: &str, blobless: bool) -> Result<()>;

    /// Resolve a revision to a commit, or `None` if it doesn't exist.
    async fn resolve(&self, revision: &str) -> Result<Option<CommitId>>;

    /// All best common ancestors of two revisions.
    async fn merge_base(&self, a: &str, b: &str) -> Result<Vec<CommitId>>;

    async fn local_branch_exists(&self, branch: &str) -> Result<bool>;

    /// Create a local branch at `start` and check it out.
    async fn create_branch(&self, branch: &str, start: &str) -> Result<()>;
    async fn checkout(&self, branch: &str) -> Result<()>;

    /// Point a local branch at `start`, creating it if needed, and check it
    /// out. Local commits on the branch are discarded.
    async fn reset_branch(&self, branch: &str, start: &str) -> Result<()>;

    /// Rebase the current branch onto `onto`. Returns `false` if the rebase
    /// stopped on a conflict; the rebase is then still in progress.
    async fn rebase(&self, onto: &str) -> Result<bool>;
    async fn rebase_abort(&self) -> Result<()>;

    /// Tree object id of a revision.
    async fn get_tree(&self, revision: &str) -> Result<String>;

    /// Push `HEAD` to `refs/heads/<branch>` on the remote.
    async fn push_head(&self, remote: &str, branch: &str, mode: PushMode) -> Result<PushStatus>;

    async fn add(&self, paths: &[path::PathBuf]) -> Result<()>;

    /// Commit the staged changes and return the new commit.
    async fn commit(&self, message: &str) -> Result<CommitId>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitId(pub String);

impl Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a push may overwrite the remote branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushMode {
    /// Overwrite unconditionally.
    Force,
    /// Overwrite only if the remote branch is at `expected`, or absent when
    /// `expected` is `None`.
    ForceWithLease { expected: Option<CommitId> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushStatus {
    Pushed,
    /// The remote refused the update, e.g. because the lease was stale.
    Rejected(String),
}

// -----------------------------------------------------------------------------
// GitClient

/// Git client bound to one working copy, calling the git CLI.
pub struct GitClient {
    path: path::PathBuf,
}

impl GitClient {
    pub fn new(path: path::PathBuf) -> Self {
        Self { path }
    }

    async fn output(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .current_dir(&self.path)
            .args(args)
            .output()
            .await
            .context("Failed to execute git command")
    }

    /// Run git and return trimmed stdout, failing on a non-zero exit.
    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = self.output(args).await?;

        if !output.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8(output.stdout)?.trim().to_string())
    }
}

impl GitOps for GitClient {
    fn path(&self) -> path::PathBuf {
        self.path.clone()
    }

    async fn is_repository(&self) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path.join(".git")).await?)
    }

    async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.path)
            .await
            .with_context(|| format!("Failed to create {}", self.path.display()))?;
        self.run(&["init", "--quiet"]).await?;
        Ok(())
    }

    async fn is_dirty(&self) -> Result<bool> {
        let status = self
            .run(&["status", "--porcelain", "--untracked-files=no"])
            .await?;
        Ok(!status.is_empty())
    }

    async fn rebase_in_progress(&self) -> Result<bool> {
        for state_dir in ["rebase-merge", "rebase-apply"] {
            let git_path = self.run(&["rev-parse", "--git-path", state_dir]).await?;
            if tokio::fs::try_exists(self.path.join(git_path)).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn remote_url(&self, name: &str) -> Result<Option<String>> {
        let remotes = self.run(&["remote"]).await?;
        if !remotes.lines().any(|remote| remote.trim() == name) {
            return Ok(None);
        }
        Ok(Some(self.run(&["remote", "get-url", name]).await?))
    }

    async fn remote_add(&self, name: &str, url: &str) -> Result<()> {
        self.run(&["remote", "add", name, url]).await?;
        Ok(())
    }

    async fn remote_delete(&self, name: &str) -> Result<()> {
        self.run(&["remote", "remove", name]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fetch_branch(&self, remote: &str, branch: &str, blobless: bool) -> Result<()> {
        let refspec = format!("+refs/heads/{branch}:refs/remotes/{remote}/{branch}");
        let mut args = vec!["fetch", "--quiet"];
        if blobless {
            args.push("--filter=blob:none");
        }
        args.extend([remote, refspec.as_str()]);
        self.run(&args).await?;
        Ok(())
    }

    async fn resolve(&self, revision: &str) -> Result<Option<CommitId>> {
        let output = self
            .output(&["rev-parse", "--verify", "--quiet", &format!("{revision}^{{commit}}")])
            .await?;

        // Exit code 1 without output means the revision doesn't exist
        if !output.status.success() {
            return Ok(None);
        }

        Ok(Some(CommitId(
            String::from_utf8(output.stdout)?.trim().to_string(),
        )))
    }

    async fn merge_base(&self, a: &str, b: &str) -> Result<Vec<CommitId>> {
        let output = self.output(&["merge-base", "--all", a, b]).await?;

        // Exit code 1 with empty output means the histories are unrelated
        if !output.status.success() {
            if output.status.code() == Some(1) && output.stdout.is_empty() {
                return Ok(vec![]);
            }
            bail!(
                "git merge-base failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8(output.stdout)?
            .lines()
            .map(|line| CommitId(line.trim().to_string()))
            .collect())
    }

    async fn local_branch_exists(&self, branch: &str) -> Result<bool> {
        let output = self
            .output(&["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")])
            .await?;
        Ok(output.status.success())
    }

    async fn create_branch(&self, branch: &str, start: &str) -> Result<()> {
        self.run(&["checkout", "--quiet", "--no-track", "-b", branch, start])
            .await?;
        Ok(())
    }

    async fn checkout(&self, branch: &str) -> Result<()> {
        self.run(&["checkout", "--quiet", branch]).await?;
        Ok(())
    }

    async fn reset_branch(&self, branch: &str, start: &str) -> Result<()> {
        self.run(&["checkout", "--quiet", "--no-track", "-B", branch, start])
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn rebase(&self, onto: &str) -> Result<bool> {
        let output = self.output(&["rebase", onto]).await?;
        if output.status.success() {
            return Ok(true);
        }

        // A conflict stops the rebase with exit code 1 and leaves it in
        // progress; anything else is a real failure.
        if output.status.code() == Some(1) && self.rebase_in_progress().await? {
            return Ok(false);
        }

        bail!(
            "git rebase {} failed: {}",
            onto,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    async fn rebase_abort(&self) -> Result<()> {
        self.run(&["rebase", "--abort"]).await?;
        Ok(())
    }

    async fn get_tree(&self, revision: &str) -> Result<String> {
        self.run(&["rev-parse", &format!("{revision}^{{tree}}")])
            .await
    }

    #[instrument(skip(self))]
    async fn push_head(&self, remote: &str, branch: &str, mode: PushMode) -> Result<PushStatus> {
        let refspec = format!("HEAD:refs/heads/{branch}");
        let force = match &mode {
            PushMode::Force => "--force".to_string(),
            PushMode::ForceWithLease { expected } => format!(
                "--force-with-lease=refs/heads/{branch}:{}",
                expected.as_ref().map(|commit| commit.0.as_str()).unwrap_or("")
            ),
        };

        let output = self
            .output(&["push", "--porcelain", &force, remote, &refspec])
            .await?;
        if output.status.success() {
            return Ok(PushStatus::Pushed);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stdout.contains("[rejected]") || stdout.contains("stale info") || stderr.contains("[rejected]") {
            return Ok(PushStatus::Rejected(format!("{}{}", stdout, stderr).trim().to_string()));
        }

        bail!("git push {} {} failed: {}", remote, refspec, stderr.trim());
    }

    async fn add(&self, paths: &[path::PathBuf]) -> Result<()> {
        let mut args = vec!["add".to_string(), "--".to_string()];
        args.extend(paths.iter().map(|p| p.to_string_lossy().into_owned()));
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&args).await?;
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<CommitId> {
        self.run(&["commit", "--quiet", "-m", message]).await?;
        let head = self
            .resolve("HEAD")
            .await?
            .context("HEAD does not point to a commit after committing")?;
        Ok(head)
    }
}
