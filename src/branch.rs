use std::fmt::Display;
use std::sync::LazyLock;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use chrono::Days;
use chrono::NaiveDate;
use regex::Regex;

// -----------------------------------------------------------------------------
// Types

/// A platform version whose nixpkgs and consumer branches are kept in sync.
///
/// Branch names are always derived from the version, never chosen freely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedBranch {
    pub platform_version: String,
    /// Branch in the nixpkgs mirror, e.g. `nixos-24.05`.
    pub mirror_branch: String,
    /// Branch in the consumer repository, e.g. `fc-24.05-dev`.
    pub consumer_branch: String,
}

/// A date-scoped branch holding one day's synchronization attempt, named
/// `<prefix>/<target>/<YYYY-MM-DD>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationBranch {
    pub prefix: String,
    pub target: String,
    pub date: NaiveDate,
}

static INTEGRATION_BRANCH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<prefix>.+)/(?P<target>[^/]+)/(?P<date>\d{4}-\d{2}-\d{2})$")
        .expect("integration branch pattern is valid")
});

// -----------------------------------------------------------------------------
// TrackedBranch impl

impl TrackedBranch {
    pub fn new(project: &str, platform_version: &str) -> Self {
        Self {
            platform_version: platform_version.to_string(),
            mirror_branch: format!("nixos-{platform_version}"),
            consumer_branch: format!("{project}-{platform_version}-dev"),
        }
    }

    /// Recover the tracked branch from a consumer branch like `fc-24.05-dev`.
    pub fn from_consumer_branch(project: &str, consumer_branch: &str) -> Result<Self> {
        let version = consumer_branch
            .strip_prefix(&format!("{project}-"))
            .and_then(|rest| rest.strip_suffix("-dev"))
            .filter(|version| !version.is_empty())
            .with_context(|| {
                format!("{consumer_branch} is not a `{project}-<version>-dev` branch")
            })?;
        Ok(Self::new(project, version))
    }
}

impl Display for TrackedBranch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.platform_version)
    }
}

// -----------------------------------------------------------------------------
// IntegrationBranch impl

impl IntegrationBranch {
    pub fn new(prefix: &str, target: &str, date: NaiveDate) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            target: target.to_string(),
            date,
        }
    }

    /// Parse a branch name. Returns `None` for names that don't follow the
    /// integration branch scheme.
    pub fn parse(name: &str) -> Option<Self> {
        let captures = INTEGRATION_BRANCH_RE.captures(name)?;
        let date = NaiveDate::parse_from_str(&captures["date"], "%Y-%m-%d").ok()?;
        Some(Self {
            prefix: captures["prefix"].to_string(),
            target: captures["target"].to_string(),
            date,
        })
    }

    /// Like [`IntegrationBranch::parse`], but also requires the given prefix.
    pub fn parse_with_prefix(prefix: &str, name: &str) -> Option<Self> {
        Self::parse(name).filter(|branch| branch.prefix == prefix.trim_end_matches('/'))
    }

    /// The branch the same target would have used the day before.
    pub fn previous_day(&self) -> Result<Self> {
        let Some(date) = self.date.checked_sub_days(Days::new(1)) else {
            bail!("No day before {}", self.date);
        };
        Ok(Self {
            date,
            ..self.clone()
        })
    }

    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl Display for IntegrationBranch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.prefix, self.target, self.date.format("%Y-%m-%d"))
    }
}
