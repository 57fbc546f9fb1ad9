//! Units fetched from a hosted Git repository without cloning.
//!
//! Each listing and unit read is one HTTP GET against the forge's
//! raw-content endpoint for a fixed branch:
//!
//! | Forge | Raw base |
//! |-------|----------|
//! | GitHub | `https://raw.githubusercontent.com/<owner>/<repo>/<branch>` (`raw.<host>` for other hosts) |
//! | GitLab | `<scheme>://<host>/<owner>/<repo>/-/raw/<branch>` |
//! | Gitea / Forgejo | `<scheme>://<host>/<owner>/<repo>/raw/branch/<branch>` |

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use unitvisor_core::listing::{join_path, parse_listing, INDEX_FILE};
use unitvisor_core::{SourceError, SourceProvider};

/// Raw-content URL convention of a Git forge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForgeKind {
    GitHub,
    GitLab,
    /// Gitea and Forgejo share one scheme.
    Gitea,
}

impl ForgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::GitLab => "gitlab",
            Self::Gitea => "gitea",
        }
    }
}

impl fmt::Display for ForgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ForgeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "github" => Ok(Self::GitHub),
            "gitlab" => Ok(Self::GitLab),
            "gitea" | "forgejo" => Ok(Self::Gitea),
            other => Err(format!(
                "Unknown forge '{other}'. Must be one of: github, gitlab, gitea, forgejo"
            )),
        }
    }
}

/// Guess the forge from the repository host.
///
/// Unrecognised hosts fall back to GitLab, whose scheme most self-hosted
/// forges accept.
pub fn detect_forge(repo_url: &str) -> ForgeKind {
    let host = Url::parse(normalize_repo_url(repo_url))
        .ok()
        .and_then(|url| url.host_str().map(str::to_ascii_lowercase));

    match host.as_deref() {
        Some("github.com") => ForgeKind::GitHub,
        Some("gitlab.com") => ForgeKind::GitLab,
        Some("codeberg.org") => ForgeKind::Gitea,
        Some(host) if host.contains("gitea") || host.contains("forgejo") => ForgeKind::Gitea,
        _ => ForgeKind::GitLab,
    }
}

/// Raw-content base URL for `branch` of `repo_url`, without trailing `/`.
pub fn raw_base_url(repo_url: &str, branch: &str, forge: ForgeKind) -> Result<String, SourceError> {
    let url = Url::parse(normalize_repo_url(repo_url))
        .map_err(|e| SourceError::unavailable(format!("invalid repository URL '{repo_url}': {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| SourceError::unavailable(format!("repository URL '{repo_url}' has no host")))?;
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let scheme = url.scheme();
    let path = url.path().trim_end_matches('/');

    Ok(match forge {
        ForgeKind::GitHub if host.eq_ignore_ascii_case("github.com") => {
            format!("https://raw.githubusercontent.com{path}/{branch}")
        }
        ForgeKind::GitHub => format!("{scheme}://raw.{authority}{path}/{branch}"),
        ForgeKind::GitLab => format!("{scheme}://{authority}{path}/-/raw/{branch}"),
        ForgeKind::Gitea => format!("{scheme}://{authority}{path}/raw/branch/{branch}"),
    })
}

fn normalize_repo_url(repo_url: &str) -> &str {
    let trimmed = repo_url.trim().trim_end_matches('/');
    trimmed.strip_suffix(".git").unwrap_or(trimmed)
}

/// Pull-only source over a forge's raw-content endpoint.
pub struct RemoteRepositorySource {
    client: reqwest::Client,
    raw_base: String,
    directory: String,
    token: Option<String>,
}

impl RemoteRepositorySource {
    /// Build a source for `directory` on `branch` of `repo_url`.
    ///
    /// `forge` overrides [`detect_forge`]. An empty token means
    /// unauthenticated requests.
    pub fn new(
        repo_url: &str,
        directory: impl Into<String>,
        branch: &str,
        token: Option<String>,
        forge: Option<ForgeKind>,
    ) -> Result<Self, SourceError> {
        Self::with_client(reqwest::Client::new(), repo_url, directory, branch, token, forge)
    }

    /// Same as [`new`](Self::new), reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        repo_url: &str,
        directory: impl Into<String>,
        branch: &str,
        token: Option<String>,
        forge: Option<ForgeKind>,
    ) -> Result<Self, SourceError> {
        let forge = forge.unwrap_or_else(|| detect_forge(repo_url));
        let raw_base = raw_base_url(repo_url, branch, forge)?;
        let directory = directory.into();
        let token = token.filter(|t| !t.trim().is_empty());

        tracing::info!(
            raw_base = %raw_base,
            directory = %directory,
            forge = %forge,
            auth = if token.is_some() { "token" } else { "none" },
            "Remote repository source initialised",
        );
        Ok(Self {
            client,
            raw_base,
            directory,
            token,
        })
    }

    pub fn raw_base(&self) -> &str {
        &self.raw_base
    }

    // ---- private helpers ----

    async fn fetch(&self, relative: &str) -> Result<String, SourceError> {
        let url = format!("{}/{}", self.raw_base, join_path(&self.directory, relative));
        tracing::debug!(url = %url, "GET");

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| SourceError::unavailable(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Http {
                status: status.as_u16(),
                url,
            });
        }
        response
            .text()
            .await
            .map_err(|e| SourceError::unavailable(format!("failed to read body of {url}: {e}")))
    }
}

#[async_trait]
impl SourceProvider for RemoteRepositorySource {
    fn kind(&self) -> &'static str {
        "git"
    }

    async fn list_unit_names(&self) -> Result<Vec<String>, SourceError> {
        Ok(parse_listing(&self.fetch(INDEX_FILE).await?))
    }

    async fn read_unit(&self, name: &str) -> Result<String, SourceError> {
        self.fetch(name).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
