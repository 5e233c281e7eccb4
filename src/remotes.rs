use anyhow::Result;
use log::debug;
use tracing::info;
use tracing::warn;

use crate::clients::git::GitOps;

/// A named remote with the branches that must be fetched from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSpec {
    pub name: String,
    pub url: String,
    pub branches: Vec<String>,
}

impl RemoteSpec {
    pub fn new(name: &str, url: &str, branches: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            branches,
        }
    }
}

/// Make sure the mirror repository exists, its remotes point at the
/// configured URLs, and the requested branches are fetched.
///
/// The repository is initialized empty rather than cloned, so a fresh and a
/// previously used directory go through the same steps. Fetching is
/// best-effort per branch: a branch missing on the remote (such as
/// yesterday's integration branch on the first run) is logged and skipped.
pub async fn ensure_repository(git: &impl GitOps, specs: &[RemoteSpec]) -> Result<()> {
    if !git.is_repository().await? {
        info!("Initializing repository in {}", git.path().display());
        git.init().await?;
    }

    for spec in specs {
        match git.remote_url(&spec.name).await? {
            Some(url) if url == spec.url => {}
            Some(url) => {
                info!(
                    "Remote `{}` points to {}, recreating it for {}",
                    spec.name, url, spec.url
                );
                git.remote_delete(&spec.name).await?;
                git.remote_add(&spec.name, &spec.url).await?;
            }
            None => {
                info!("Adding remote `{}` at {}", spec.name, spec.url);
                git.remote_add(&spec.name, &spec.url).await?;
            }
        }

        for branch in &spec.branches {
            info!("Fetching `{}` from remote `{}`", branch, spec.name);
            if let Err(e) = git.fetch_branch(&spec.name, branch, true).await {
                warn!("Could not fetch `{}` from `{}`, skipping", branch, spec.name);
                debug!("Fetch error: {:#}", e);
            }
        }
    }

    Ok(())
}
