use crate::clients::git::GitClient;
use crate::clients::git::GitOps;
use crate::clients::github::GithubClient;
use crate::clients::github::GithubOps;
use crate::clients::nix::BuildOps;
use crate::clients::nix::NixClient;
use crate::config::Config;
use crate::error::SyncError;

pub struct App<G: GitOps, H: GithubOps, B: BuildOps> {
    pub config: Config,
    /// Working copy of the nixpkgs mirror.
    pub mirror: G,
    /// Checkout of the consumer repository.
    pub consumer: G,
    pub gh: H,
    pub build: B,
}

impl App<GitClient, GithubClient, NixClient> {
    /// Wire up the real git, GitHub and nix clients.
    pub fn from_config(config: Config) -> Self {
        let mirror = GitClient::new(config.mirror_dir.clone());
        let consumer = GitClient::new(config.consumer_dir.clone());
        let gh = GithubClient::new(&config.github_api_url, config.github_token.clone());
        let build = NixClient::new(
            config.consumer_dir.clone(),
            config.metadata_generators.clone(),
        );
        Self::new(config, mirror, consumer, gh, build)
    }
}

impl<G: GitOps, H: GithubOps, B: BuildOps> App<G, H, B> {
    pub fn new(config: Config, mirror: G, consumer: G, gh: H, build: B) -> Self {
        Self {
            config,
            mirror,
            consumer,
            gh,
            build,
        }
    }

    /// Fail before touching anything if either working copy is dirty.
    ///
    /// A mirror directory that isn't a repository yet counts as clean.
    pub(crate) async fn ensure_clean(&self) -> Result<(), SyncError> {
        self.ensure_mirror_clean().await?;
        if self.consumer.is_dirty().await? {
            return Err(SyncError::DirtyWorkingTree {
                path: self.consumer.path(),
            });
        }
        Ok(())
    }

    /// Like [`App::ensure_clean`], for commands that only touch the mirror.
    pub(crate) async fn ensure_mirror_clean(&self) -> Result<(), SyncError> {
        if self.mirror.is_repository().await? && self.mirror.is_dirty().await? {
            return Err(SyncError::DirtyWorkingTree {
                path: self.mirror.path(),
            });
        }
        Ok(())
    }
}
