#![allow(async_fn_in_trait)]

use std::path;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
#[cfg(test)]
use mockall::automock;
use tokio::process::Command;
use tracing::instrument;

use crate::config::MetadataGenerator;

// -----------------------------------------------------------------------------
// BuildOps trait

/// Build tooling run inside the consumer checkout.
#[cfg_attr(test, automock)]
pub trait BuildOps {
    /// Re-pin a flake input to `new_ref`, rewriting the lock file.
    async fn relock_dependency(&self, input: &str, new_ref: &str) -> Result<()>;

    /// Regenerate the derived version metadata and return the files written,
    /// relative to the checkout.
    async fn regenerate_metadata(&self) -> Result<Vec<path::PathBuf>>;
}

// -----------------------------------------------------------------------------
// NixClient

/// Build client calling the nix CLI.
pub struct NixClient {
    path: path::PathBuf,
    generators: Vec<MetadataGenerator>,
}

impl NixClient {
    pub fn new(path: path::PathBuf, generators: Vec<MetadataGenerator>) -> Self {
        Self { path, generators }
    }

    async fn run(&self, args: &[&str]) -> Result<()> {
        let output = Command::new("nix")
            .current_dir(&self.path)
            .args(args)
            .output()
            .await
            .context("Failed to execute nix command")?;

        if !output.status.success() {
            bail!(
                "nix {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(())
    }
}

impl BuildOps for NixClient {
    #[instrument(skip(self))]
    async fn relock_dependency(&self, input: &str, new_ref: &str) -> Result<()> {
        self.run(&["flake", "lock", "--override-input", input, new_ref])
            .await
    }

    #[instrument(skip(self))]
    async fn regenerate_metadata(&self) -> Result<Vec<path::PathBuf>> {
        let mut written = Vec::with_capacity(self.generators.len());
        for generator in &self.generators {
            self.run(&["run", &format!(".#{}", generator.app)]).await?;
            written.push(generator.output.clone());
        }
        Ok(written)
    }
}
