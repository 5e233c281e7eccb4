use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use chrono::Local;
use chrono::NaiveDate;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use nixsync::App;
use nixsync::Config;
use nixsync::config::DEFAULT_BRANCH_PREFIX;
use nixsync::config::DEFAULT_CONSUMER_REPO;
use nixsync::config::DEFAULT_GITHUB_API_URL;
use nixsync::config::RepoId;
use tracing::level_filters::LevelFilter;

const DEFAULT_UPSTREAM_URL: &str = "https://github.com/NixOS/nixpkgs.git";

#[derive(Parser)]
#[command(name = "nixsync")]
#[command(about = "Keep the nixpkgs fork rebased on upstream and update fc-nixos to it", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Rebase the fork onto upstream and open update PRs for each platform version
    Update {
        #[command(flatten)]
        repos: RepoArgs,
        /// Platform versions to update, e.g. 24.05 24.11
        #[arg(long, num_args = 1.., required = true)]
        platform_versions: Vec<String>,
        /// Date used for integration branch names (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Land a merged update PR on the fork and clean up older update branches
    Merged {
        #[command(flatten)]
        repos: RepoArgs,
        /// Number of the merged consumer PR
        #[arg(long)]
        merged_pr_id: u64,
    },
}

#[derive(Args)]
pub struct RepoArgs {
    /// Working copy of the nixpkgs fork, created if missing
    #[arg(long)]
    nixpkgs_dir: PathBuf,
    /// URL the nixpkgs updates are pushed to
    #[arg(long)]
    nixpkgs_origin_url: String,
    #[arg(long, default_value = DEFAULT_UPSTREAM_URL)]
    nixpkgs_upstream_url: String,
    /// Checkout of the consumer repository
    #[arg(long, default_value = ".")]
    consumer_dir: PathBuf,
    #[arg(long, default_value = DEFAULT_CONSUMER_REPO)]
    consumer_repo: RepoId,
    /// Hosting repository of the nixpkgs fork (defaults to the one behind the origin URL)
    #[arg(long)]
    mirror_repo: Option<RepoId>,
    #[arg(long, default_value = DEFAULT_BRANCH_PREFIX)]
    branch_prefix: String,
    #[arg(long, default_value = DEFAULT_GITHUB_API_URL)]
    github_api_url: String,
}

impl RepoArgs {
    fn into_config(self, github_token: String) -> Result<Config> {
        let mirror_repo = match self.mirror_repo {
            Some(repo) => repo,
            None => RepoId::from_remote_url(&self.nixpkgs_origin_url)
                .context("Could not derive the mirror repository, pass --mirror-repo")?,
        };
        let mut config = Config::new(
            self.nixpkgs_dir,
            self.consumer_dir,
            self.nixpkgs_upstream_url,
            self.nixpkgs_origin_url,
            github_token,
        )
        .with_branch_prefix(&self.branch_prefix)
        .with_repos(self.consumer_repo, mirror_repo);
        config.github_api_url = self.github_api_url;
        Ok(config)
    }
}

fn setup_logging() -> Result<()> {
    let timer = tracing_subscriber::fmt::time::ChronoLocal::new("%Y-%m-%d %H:%M:%S".into());
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;
    tracing_subscriber::fmt()
        .with_timer(timer)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging()?;

    let cli = Cli::parse();
    let github_token = Config::github_token_from_env()?;

    match cli.command {
        Commands::Update {
            repos,
            platform_versions,
            date,
        } => {
            let mut now = Local::now().naive_local();
            if let Some(date) = date {
                now = date.and_time(now.time());
            }
            let app = App::from_config(repos.into_config(github_token)?);
            let report = app
                .cmd_update(&platform_versions, now, &mut std::io::stdout())
                .await?;
            if report.failures() > 0 {
                bail!(
                    "{} of {} platform versions failed to update",
                    report.failures(),
                    report.entries.len()
                );
            }
        }
        Commands::Merged {
            repos,
            merged_pr_id,
        } => {
            let app = App::from_config(repos.into_config(github_token)?);
            app.cmd_merged(merged_pr_id, &mut std::io::stdout()).await?
        }
    }

    Ok(())
}
