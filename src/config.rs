use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;

use crate::error::SyncError;

/// Environment variable holding the GitHub access token.
pub const GITHUB_TOKEN_ENV: &str = "GH_TOKEN";

pub const DEFAULT_BRANCH_PREFIX: &str = "nixpkgs-auto-update";
pub const DEFAULT_CONSUMER_PROJECT: &str = "fc";
pub const DEFAULT_CONSUMER_REPO: &str = "flyingcircusio/fc-nixos";
pub const DEFAULT_MIRROR_REPO: &str = "flyingcircusio/nixpkgs";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// A GitHub repository, `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

/// A flake app that regenerates a metadata file in the consumer repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataGenerator {
    /// Flake app name, run as `nix run .#<app>`.
    pub app: String,
    /// File the app writes, relative to the consumer checkout.
    pub output: PathBuf,
}

/// Run configuration, built once at process start and never mutated.
#[derive(Debug, Clone)]
pub struct Config {
    /// Prefix of integration branch names in both repositories.
    pub branch_prefix: String,
    /// Project part of consumer branch names (`fc` in `fc-24.05-dev`).
    pub consumer_project: String,
    pub consumer_repo: RepoId,
    pub mirror_repo: RepoId,
    /// Local working copy of the nixpkgs mirror.
    pub mirror_dir: PathBuf,
    /// Local checkout of the consumer repository.
    pub consumer_dir: PathBuf,
    pub upstream_url: String,
    pub origin_url: String,
    /// Flake input pinned to the mirror.
    pub dependency_input: String,
    pub lock_file: PathBuf,
    pub metadata_generators: Vec<MetadataGenerator>,
    pub changelog_dir: PathBuf,
    pub github_api_url: String,
    pub github_token: String,
}

// -----------------------------------------------------------------------------
// RepoId impl

impl RepoId {
    pub fn new(owner: &str, name: &str) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
        }
    }

    /// Derive the repository from a GitHub remote URL.
    ///
    /// Accepts `git@github.com:owner/repo.git` and
    /// `https://github.com/owner/repo(.git)`.
    pub fn from_remote_url(url: &str) -> Result<Self> {
        let parts = if let Some(rest) = url.strip_prefix("git@github.com:") {
            rest
        } else if let Some(rest) = url.strip_prefix("https://github.com/") {
            rest
        } else {
            bail!("Remote URL is not a GitHub URL: {}", url);
        };

        let parts = parts.trim_end_matches('/');
        let parts = parts.strip_suffix(".git").unwrap_or(parts);
        parts.parse()
    }
}

impl FromStr for RepoId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut split = s.split('/');
        let owner = split
            .next()
            .filter(|owner| !owner.is_empty())
            .context("Could not parse owner from repository")?;
        let name = split
            .next()
            .filter(|name| !name.is_empty())
            .context("Could not parse name from repository")?;
        if split.next().is_some() {
            bail!("Repository must be given as owner/name: {}", s);
        }
        Ok(Self::new(owner, name))
    }
}

impl Display for RepoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

// -----------------------------------------------------------------------------
// Config impl

impl Config {
    /// Create a config with the fc-nixos defaults for everything but the
    /// locations and the token.
    pub fn new(
        mirror_dir: PathBuf,
        consumer_dir: PathBuf,
        upstream_url: String,
        origin_url: String,
        github_token: String,
    ) -> Self {
        Self {
            branch_prefix: DEFAULT_BRANCH_PREFIX.to_string(),
            consumer_project: DEFAULT_CONSUMER_PROJECT.to_string(),
            consumer_repo: RepoId::new("flyingcircusio", "fc-nixos"),
            mirror_repo: RepoId::new("flyingcircusio", "nixpkgs"),
            mirror_dir,
            consumer_dir,
            upstream_url,
            origin_url,
            dependency_input: "nixpkgs".to_string(),
            lock_file: PathBuf::from("flake.lock"),
            metadata_generators: vec![
                MetadataGenerator {
                    app: "buildVersionsJson".to_string(),
                    output: PathBuf::from("release/versions.json"),
                },
                MetadataGenerator {
                    app: "buildPackageVersionsJson".to_string(),
                    output: PathBuf::from("release/package-versions.json"),
                },
            ],
            changelog_dir: PathBuf::from("changelog.d"),
            github_api_url: DEFAULT_GITHUB_API_URL.to_string(),
            github_token,
        }
    }

    pub fn with_branch_prefix(mut self, branch_prefix: &str) -> Self {
        self.branch_prefix = branch_prefix.trim_end_matches('/').to_string();
        self
    }

    pub fn with_repos(mut self, consumer_repo: RepoId, mirror_repo: RepoId) -> Self {
        self.consumer_repo = consumer_repo;
        self.mirror_repo = mirror_repo;
        self
    }

    /// Read the GitHub token from the environment.
    pub fn github_token_from_env() -> Result<String, SyncError> {
        match std::env::var(GITHUB_TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            _ => Err(SyncError::MissingCredential(GITHUB_TOKEN_ENV.to_string())),
        }
    }

    /// Flake reference pinning the dependency to a mirror commit.
    pub fn mirror_flake_ref(&self, commit: &str) -> String {
        format!("github:{}/{}", self.mirror_repo, commit)
    }

    /// Default config for tests
    pub fn default_for_tests() -> Self {
        Self::new(
            PathBuf::from("/tmp/nixpkgs"),
            PathBuf::from("/tmp/fc-nixos"),
            "https://github.com/NixOS/nixpkgs.git".to_string(),
            "git@github.com:flyingcircusio/nixpkgs.git".to_string(),
            "test-token".to_string(),
        )
    }
}
