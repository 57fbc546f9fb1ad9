//! Closed set of source configurations and the factory that turns one into
//! a live [`SourceProvider`].

use std::fmt;

use serde::{Deserialize, Serialize};
use unitvisor_core::{SourceError, SourceProvider};

use crate::bundle::EmbeddedBundleSource;
use crate::directory::WatchedDirectorySource;
use crate::git::{ForgeKind, RemoteRepositorySource};
use crate::object_store::{ObjectStoreSource, S3ClientOptions};

fn default_true() -> bool {
    true
}

fn default_branch() -> String {
    "main".to_string()
}

/// Where units come from. Each variant fully describes one backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Files compiled into the binary.
    EmbeddedBundle { directory: String },

    /// A local directory, optionally watched for changes.
    WatchedDirectory {
        directory: String,
        #[serde(default = "default_true")]
        watch: bool,
    },

    /// Raw-content fetches from a hosted Git repository.
    RemoteRepository {
        repo_url: String,
        directory: String,
        #[serde(default = "default_branch")]
        branch: String,
        #[serde(default)]
        token: Option<String>,
        /// Detected from the repository host when absent.
        #[serde(default)]
        forge: Option<ForgeKind>,
    },

    /// An S3-compatible bucket.
    ObjectStore {
        bucket: String,
        #[serde(default)]
        prefix: String,
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        endpoint_url: Option<String>,
        #[serde(default)]
        access_key_id: Option<String>,
        #[serde(default)]
        secret_key: Option<String>,
    },
}

impl SourceConfig {
    /// Backend label matching [`SourceProvider::kind`].
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmbeddedBundle { .. } => "bundle",
            Self::WatchedDirectory { .. } => "directory",
            Self::RemoteRepository { .. } => "git",
            Self::ObjectStore { .. } => "s3",
        }
    }
}

fn redacted(value: &Option<String>) -> Option<&'static str> {
    value.as_ref().map(|_| "<redacted>")
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmbeddedBundle { directory } => f
                .debug_struct("EmbeddedBundle")
                .field("directory", directory)
                .finish(),
            Self::WatchedDirectory { directory, watch } => f
                .debug_struct("WatchedDirectory")
                .field("directory", directory)
                .field("watch", watch)
                .finish(),
            Self::RemoteRepository {
                repo_url,
                directory,
                branch,
                token,
                forge,
            } => f
                .debug_struct("RemoteRepository")
                .field("repo_url", repo_url)
                .field("directory", directory)
                .field("branch", branch)
                .field("token", &redacted(token))
                .field("forge", forge)
                .finish(),
            Self::ObjectStore {
                bucket,
                prefix,
                region,
                endpoint_url,
                access_key_id,
                secret_key,
            } => f
                .debug_struct("ObjectStore")
                .field("bucket", bucket)
                .field("prefix", prefix)
                .field("region", region)
                .field("endpoint_url", endpoint_url)
                .field("access_key_id", access_key_id)
                .field("secret_key", &redacted(secret_key))
                .finish(),
        }
    }
}

/// Construct the backend described by `config`.
pub async fn build(config: &SourceConfig) -> Result<Box<dyn SourceProvider>, SourceError> {
    tracing::debug!(config = ?config, "Building source");
    let source: Box<dyn SourceProvider> = match config {
        SourceConfig::EmbeddedBundle { directory } => {
            Box::new(EmbeddedBundleSource::new(directory.clone()))
        }
        SourceConfig::WatchedDirectory { directory, watch } => {
            Box::new(WatchedDirectorySource::new(directory, *watch))
        }
        SourceConfig::RemoteRepository {
            repo_url,
            directory,
            branch,
            token,
            forge,
        } => Box::new(RemoteRepositorySource::new(
            repo_url,
            directory.clone(),
            branch,
            token.clone(),
            *forge,
        )?),
        SourceConfig::ObjectStore {
            bucket,
            prefix,
            region,
            endpoint_url,
            access_key_id,
            secret_key,
        } => {
            let options = S3ClientOptions {
                region: region.clone(),
                endpoint_url: endpoint_url.clone(),
                access_key_id: access_key_id.clone(),
                secret_key: secret_key.clone(),
            };
            Box::new(ObjectStoreSource::connect(bucket.clone(), prefix, &options).await)
        }
    };
    Ok(source)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn deserializes_tagged_variants_with_defaults() {
        let config: SourceConfig =
            serde_json::from_value(json!({"kind": "watched_directory", "directory": "/srv/units"}))
                .unwrap();
        assert_eq!(
            config,
            SourceConfig::WatchedDirectory {
                directory: "/srv/units".into(),
                watch: true,
            }
        );

        let config: SourceConfig = serde_json::from_value(json!({
            "kind": "remote_repository",
            "repo_url": "https://codeberg.org/user/repo",
            "directory": "python",
            "forge": "gitea",
        }))
        .unwrap();
        assert_matches!(
            config,
            SourceConfig::RemoteRepository { ref branch, forge: Some(ForgeKind::Gitea), token: None, .. }
                if branch == "main"
        );
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let result = serde_json::from_value::<SourceConfig>(json!({"kind": "ftp", "directory": "x"}));
        assert!(result.is_err());
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = SourceConfig::ObjectStore {
            bucket: "units".into(),
            prefix: "python".into(),
            region: Some("eu-west-1".into()),
            endpoint_url: None,
            access_key_id: Some("AKIDEXAMPLE".into()),
            secret_key: Some("wJalrXUtnFEMI".into()),
        };
        let text = format!("{config:?}");
        assert!(text.contains("AKIDEXAMPLE"));
        assert!(!text.contains("wJalrXUtnFEMI"));
        assert!(text.contains("<redacted>"));

        let config = SourceConfig::RemoteRepository {
            repo_url: "https://github.com/o/r".into(),
            directory: "python".into(),
            branch: "main".into(),
            token: Some("ghp_secret".into()),
            forge: None,
        };
        assert!(!format!("{config:?}").contains("ghp_secret"));
    }

    #[tokio::test]
    async fn builds_matching_backend() {
        let source = build(&SourceConfig::EmbeddedBundle {
            directory: "python".into(),
        })
        .await
        .unwrap();
        assert_eq!(source.kind(), "bundle");

        let source = build(&SourceConfig::RemoteRepository {
            repo_url: "https://github.com/owner/repo".into(),
            directory: "python".into(),
            branch: "main".into(),
            token: None,
            forge: None,
        })
        .await
        .unwrap();
        assert_eq!(source.kind(), "git");
    }

    #[tokio::test]
    async fn invalid_repository_url_fails_to_build() {
        let result = build(&SourceConfig::RemoteRepository {
            repo_url: "::".into(),
            directory: "python".into(),
            branch: "main".into(),
            token: None,
            forge: Some(ForgeKind::GitHub),
        })
        .await;
        assert!(result.is_err());
    }
}
