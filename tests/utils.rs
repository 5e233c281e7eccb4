#![allow(dead_code)]

use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::Layer as _;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Runs git in `dir` and returns its trimmed stdout.
pub async fn git(dir: &Path, args: &[&str]) -> anyhow::Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .await?;
    anyhow::ensure!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr).trim()
    );
    Ok(String::from_utf8(output.stdout)?.trim().to_string())
}

/// Creates a git repository in the given directory.
///
/// This initializes the repo and sets basic git config needed for commits.
/// The directory is created if missing.
pub async fn create_git_repo(dir: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    git(dir, &["init", "--quiet"]).await?;
    git(dir, &["config", "user.name", "Test User"]).await?;
    git(dir, &["config", "user.email", "test@example.com"]).await?;
    git(dir, &["config", "commit.gpgsign", "false"]).await?;
    Ok(())
}

/// Creates a bare repository standing in for a hosted remote.
pub async fn create_bare_repo(dir: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    git(dir, &["init", "--quiet", "--bare"]).await?;
    Ok(())
}

/// Writes `contents` to `filename` and commits it. Returns the commit id.
pub async fn commit_file(
    dir: &Path,
    message: &str,
    filename: &str,
    contents: &str,
) -> anyhow::Result<String> {
    let file_path = dir.join(filename);
    if let Some(parent) = file_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&file_path, contents).await?;
    git(dir, &["add", "--", filename]).await?;
    git(dir, &["commit", "--quiet", "-m", message]).await?;
    git(dir, &["rev-parse", "HEAD"]).await
}

/// Tip of `branch` in a (bare) repository, if it exists.
pub async fn branch_tip(repo: &Path, branch: &str) -> anyhow::Result<Option<String>> {
    let output = Command::new("git")
        .args(["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")])
        .current_dir(repo)
        .output()
        .await?;
    if !output.status.success() {
        return Ok(None);
    }
    Ok(Some(String::from_utf8(output.stdout)?.trim().to_string()))
}

/// Hosted repositories for one synchronization scenario: the upstream
/// nixpkgs, the fork (`origin`), and a scratch clone used to author commits
/// on either of them.
pub struct Forge {
    pub upstream: PathBuf,
    pub origin: PathBuf,
    seed: PathBuf,
}

impl Forge {
    /// Sets up both remotes with `branch` pointing at the same base commit.
    pub async fn new(root: &Path, branch: &str) -> anyhow::Result<Self> {
        let forge = Self {
            upstream: root.join("upstream.git"),
            origin: root.join("origin.git"),
            seed: root.join("seed"),
        };
        create_bare_repo(&forge.upstream).await?;
        create_bare_repo(&forge.origin).await?;
        create_git_repo(&forge.seed).await?;
        git(&forge.seed, &["remote", "add", "upstream", &url(&forge.upstream)]).await?;
        git(&forge.seed, &["remote", "add", "origin", &url(&forge.origin)]).await?;

        commit_file(&forge.seed, "Initial import", "lib/default.nix", "{ }\n").await?;
        let refspec = format!("HEAD:refs/heads/{branch}");
        git(&forge.seed, &["push", "--quiet", "upstream", &refspec]).await?;
        git(&forge.seed, &["push", "--quiet", "origin", &refspec]).await?;
        Ok(forge)
    }

    pub async fn commit_upstream(
        &self,
        branch: &str,
        filename: &str,
        contents: &str,
    ) -> anyhow::Result<String> {
        self.commit_to("upstream", branch, filename, contents).await
    }

    pub async fn commit_fork(
        &self,
        branch: &str,
        filename: &str,
        contents: &str,
    ) -> anyhow::Result<String> {
        self.commit_to("origin", branch, filename, contents).await
    }

    async fn commit_to(
        &self,
        remote: &str,
        branch: &str,
        filename: &str,
        contents: &str,
    ) -> anyhow::Result<String> {
        git(&self.seed, &["fetch", "--quiet", remote]).await?;
        git(
            &self.seed,
            &["checkout", "--quiet", "-B", "work", &format!("{remote}/{branch}")],
        )
        .await?;
        let commit = commit_file(
            &self.seed,
            &format!("{remote}: update {filename}"),
            filename,
            contents,
        )
        .await?;
        git(
            &self.seed,
            &["push", "--quiet", remote, &format!("HEAD:refs/heads/{branch}")],
        )
        .await?;
        Ok(commit)
    }
}

/// Remote URL of a local repository.
pub fn url(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub fn setup_logging() -> anyhow::Result<()> {
    let timer = tracing_subscriber::fmt::time::ChronoLocal::new("%H:%M:%S%.3f".into());
    let format = tracing_subscriber::fmt::format().with_timer(timer);
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;
    let subscriber = tracing_subscriber::fmt::layer()
        .event_format(format)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_test_writer()
        .with_filter(filter);
    tracing_subscriber::registry().with(subscriber).init();
    Ok(())
}

pub enum TestDir {
    Temp(tempfile::TempDir),
    Kept(std::path::PathBuf),
}

impl TestDir {
    pub fn new() -> std::io::Result<Self> {
        let temp_dir = tempfile::tempdir()?;

        if std::env::var("DEBUG_TESTS").is_ok() {
            let path = temp_dir.keep();
            eprintln!("Test directory kept at: {}", path.display());
            Ok(TestDir::Kept(path))
        } else {
            Ok(TestDir::Temp(temp_dir))
        }
    }

    pub fn path(&self) -> &std::path::Path {
        match self {
            TestDir::Temp(t) => t.path(),
            TestDir::Kept(p) => p.as_path(),
        }
    }
}
