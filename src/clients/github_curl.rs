use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use serde::Deserialize;
use tokio::process::Command;

const USER_AGENT: &str = "User-Agent: nixsync";
const ACCEPT_JSON: &str = "Accept: application/vnd.github+json";

/// HTTP client using curl for making GitHub API requests
pub struct GithubCurlClient {
    token: String,
}

#[derive(Debug, Deserialize)]
struct GitHubError {
    message: String,
}

impl GithubCurlClient {
    pub fn new(token: String) -> Self {
        Self { token }
    }

    pub async fn get(&self, url: &str) -> Result<String> {
        self.request("GET", url, None).await
    }

    pub async fn post(&self, url: &str, json_data: &str) -> Result<String> {
        self.request("POST", url, Some(json_data)).await
    }

    pub async fn delete(&self, url: &str) -> Result<()> {
        self.request("DELETE", url, None).await?;
        Ok(())
    }

    async fn request(&self, method: &str, url: &str, json_data: Option<&str>) -> Result<String> {
        let authorization = format!("Authorization: Bearer {}", self.token);
        let mut args = vec![
            "-s",
            "-w",
            "\n%{http_code}",
            "-X",
            method,
            "-H",
            &authorization,
            "-H",
            ACCEPT_JSON,
            "-H",
            "X-GitHub-Api-Version: 2022-11-28",
            "-H",
            USER_AGENT,
        ];
        if let Some(json_data) = json_data {
            args.extend(["-H", "Content-Type: application/json", "-d", json_data]);
        }
        args.push(url);

        let output = Command::new("curl")
            .args(&args)
            .output()
            .await
            .context("Failed to execute curl command")?;

        if !output.status.success() {
            bail!(
                "curl {} {} failed: {}",
                method,
                url,
                String::from_utf8_lossy(&output.stderr)
            );
        }

        parse_response(output.stdout)
    }
}

/// Split the body from the status code curl appends and fail on HTTP errors.
fn parse_response(stdout: Vec<u8>) -> Result<String> {
    let output_str = String::from_utf8(stdout)?;
    let (response, status_code) = match output_str.rsplit_once('\n') {
        Some((body, code)) => (body.to_string(), code.trim().parse::<u16>().unwrap_or(0)),
        None => (String::new(), output_str.trim().parse::<u16>().unwrap_or(0)),
    };

    if status_code == 0 {
        bail!("GitHub API returned no status code");
    }

    if status_code >= 400 {
        if let Ok(error) = serde_json::from_str::<GitHubError>(&response) {
            bail!("GitHub API error ({}): {}", status_code, error.message);
        }
        bail!(
            "GitHub API request failed with status {}: {}",
            status_code,
            response
        );
    }

    Ok(response)
}
