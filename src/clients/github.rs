#![allow(async_fn_in_trait)]

use anyhow::Result;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;
use tracing::instrument;

use super::github_curl::GithubCurlClient;
use crate::config::RepoId;

// -----------------------------------------------------------------------------
// GithubOps trait

/// Operations against the code-hosting API.
#[cfg_attr(test, automock)]
pub trait GithubOps {
    async fn get_pull_request(&self, repo: &RepoId, number: u64) -> Result<PullRequest>;

    /// Find an open PR merging `head` into `base`.
    async fn find_open_pull_request(
        &self,
        repo: &RepoId,
        head: &str,
        base: &str,
    ) -> Result<Option<PullRequest>>;

    async fn create_pull_request(
        &self,
        repo: &RepoId,
        base: &str,
        head: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest>;

    async fn comment_on_pull_request(&self, repo: &RepoId, number: u64, body: &str) -> Result<()>;

    /// Names of all branches starting with `prefix`.
    async fn list_branches(&self, repo: &RepoId, prefix: &str) -> Result<Vec<String>>;

    /// Delete a branch. GitHub closes any PR still open against it.
    async fn delete_branch(&self, repo: &RepoId, branch: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub html_url: String,
    pub state: String,
    pub merged: bool,
    /// Branch being merged.
    pub head: String,
    /// Branch merged into.
    pub base: String,
}

// -----------------------------------------------------------------------------
// Wire types

#[derive(Debug, Deserialize)]
struct GitRef {
    #[serde(rename = "ref")]
    ref_name: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestRef {
    #[serde(rename = "ref")]
    ref_name: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestResponse {
    number: u64,
    html_url: String,
    state: String,
    #[serde(default)]
    merged: bool,
    #[serde(default)]
    merged_at: Option<String>,
    head: PullRequestRef,
    base: PullRequestRef,
}

#[derive(Debug, Serialize)]
struct CreatePullRequest<'a> {
    title: &'a str,
    body: &'a str,
    head: &'a str,
    base: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateComment<'a> {
    body: &'a str,
}

impl From<PullRequestResponse> for PullRequest {
    fn from(pr: PullRequestResponse) -> Self {
        Self {
            number: pr.number,
            html_url: pr.html_url,
            state: pr.state,
            // The list endpoint omits `merged`, `merged_at` is always present
            merged: pr.merged || pr.merged_at.is_some(),
            head: pr.head.ref_name,
            base: pr.base.ref_name,
        }
    }
}

// -----------------------------------------------------------------------------
// GithubClient

/// Client to interact with GitHub API.
pub struct GithubClient {
    api_url: String,
    http_client: GithubCurlClient,
}

impl GithubClient {
    pub fn new(api_url: &str, token: String) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            http_client: GithubCurlClient::new(token),
        }
    }

    fn repo_url(&self, repo: &RepoId) -> String {
        format!("{}/repos/{}/{}", self.api_url, repo.owner, repo.name)
    }
}

impl GithubOps for GithubClient {
    #[instrument(skip(self))]
    async fn get_pull_request(&self, repo: &RepoId, number: u64) -> Result<PullRequest> {
        let url = format!("{}/pulls/{}", self.repo_url(repo), number);
        let response = self.http_client.get(&url).await?;
        let pr: PullRequestResponse = serde_json::from_str(&response)?;
        Ok(pr.into())
    }

    #[instrument(skip(self))]
    async fn find_open_pull_request(
        &self,
        repo: &RepoId,
        head: &str,
        base: &str,
    ) -> Result<Option<PullRequest>> {
        let url = format!(
            "{}/pulls?head={}:{}&base={}&state=open",
            self.repo_url(repo),
            repo.owner,
            head,
            base
        );
        let response = self.http_client.get(&url).await?;
        let prs: Vec<PullRequestResponse> = serde_json::from_str(&response)?;
        Ok(prs.into_iter().next().map(PullRequest::from))
    }

    #[instrument(skip(self, title, body))]
    async fn create_pull_request(
        &self,
        repo: &RepoId,
        base: &str,
        head: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest> {
        let url = format!("{}/pulls", self.repo_url(repo));
        let request_body = CreatePullRequest {
            title,
            body,
            head,
            base,
        };

        let json_data = serde_json::to_string(&request_body)?;
        let response = self.http_client.post(&url, &json_data).await?;
        let pr: PullRequestResponse = serde_json::from_str(&response)?;
        Ok(pr.into())
    }

    #[instrument(skip(self, body))]
    async fn comment_on_pull_request(&self, repo: &RepoId, number: u64, body: &str) -> Result<()> {
        // PR comments live on the issue of the same number
        let url = format!("{}/issues/{}/comments", self.repo_url(repo), number);
        let json_data = serde_json::to_string(&CreateComment { body })?;
        self.http_client.post(&url, &json_data).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_branches(&self, repo: &RepoId, prefix: &str) -> Result<Vec<String>> {
        let url = format!("{}/git/matching-refs/heads/{}", self.repo_url(repo), prefix);
        let response = self.http_client.get(&url).await?;
        let refs: Vec<GitRef> = serde_json::from_str(&response)?;

        let branches = refs
            .into_iter()
            .map(|r| {
                r.ref_name
                    .strip_prefix("refs/heads/")
                    .unwrap_or(&r.ref_name)
                    .to_string()
            })
            .collect();

        Ok(branches)
    }

    #[instrument(skip(self))]
    async fn delete_branch(&self, repo: &RepoId, branch: &str) -> Result<()> {
        let url = format!("{}/git/refs/heads/{}", self.repo_url(repo), branch);
        self.http_client.delete(&url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_request_from_response() {
        let response = r#"{
            "number": 42,
            "html_url": "https://github.com/flyingcircusio/fc-nixos/pull/42",
            "state": "closed",
            "merged_at": "2024-11-05T10:00:00Z",
            "head": {"ref": "nixpkgs-auto-update/nixos-24.05/2024-11-05"},
            "base": {"ref": "fc-24.05-dev"}
        }"#;
        let pr: PullRequest = serde_json::from_str::<PullRequestResponse>(response)
            .unwrap()
            .into();
        assert_eq!(pr.number, 42);
        assert!(pr.merged);
        assert_eq!(pr.head, "nixpkgs-auto-update/nixos-24.05/2024-11-05");
        assert_eq!(pr.base, "fc-24.05-dev");
    }

    #[test]
    fn test_open_pull_request_is_not_merged() {
        let response = r#"{
            "number": 7,
            "html_url": "https://github.com/flyingcircusio/fc-nixos/pull/7",
            "state": "open",
            "merged": false,
            "merged_at": null,
            "head": {"ref": "feature"},
            "base": {"ref": "fc-24.05-dev"}
        }"#;
        let pr: PullRequest = serde_json::from_str::<PullRequestResponse>(response)
            .unwrap()
            .into();
        assert!(!pr.merged);
    }

    #[test]
    fn test_repo_url() {
        let client = GithubClient::new("https://api.github.com/", "token".to_string());
        assert_eq!(
            client.repo_url(&RepoId::new("flyingcircusio", "nixpkgs")),
            "https://api.github.com/repos/flyingcircusio/nixpkgs"
        );
    }
}
