use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use unitvisor_core::SchedulerConfig;
use unitvisor_sources::{ForgeKind, SourceConfig};

/// Errors raised while reading [`WorkerConfig`] from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub source: SourceConfig,
    pub scheduler: SchedulerConfig,
    /// Member invoked in every unit for each record.
    pub dispatch_member: String,
    /// Directory compiled units are written to.
    pub artifact_dir: PathBuf,
    /// Wall-clock limit per unit invocation.
    pub script_timeout: Duration,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                | Default                      |
    /// |------------------------|------------------------------|
    /// | `SOURCE_KIND`          | `bundle` (`directory`, `git`, `s3`) |
    /// | `SOURCE_DIRECTORY`     | `python`                     |
    /// | `SOURCE_WATCH`         | `true`                       |
    /// | `GIT_REPO_URL`         | required for `git`           |
    /// | `GIT_BRANCH`           | `main`                       |
    /// | `GIT_TOKEN`            | unset (anonymous)            |
    /// | `GIT_FORGE`            | detected from host           |
    /// | `S3_BUCKET`            | required for `s3`            |
    /// | `S3_PREFIX`            | empty (bucket root)          |
    /// | `S3_REGION`, `S3_ENDPOINT_URL`, `S3_ACCESS_KEY_ID`, `S3_SECRET_KEY` | unset |
    /// | `RELOAD_INTERVAL_SECS` | `300`                        |
    /// | `RELOAD_GRACE_SECS`    | `0` (never fatal)            |
    /// | `DISPATCH_MEMBER`      | `process`                    |
    /// | `ARTIFACT_DIR`         | `<tmp>/unitvisor-artifacts`  |
    /// | `SCRIPT_TIMEOUT_SECS`  | `30`                         |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable lookup.
    ///
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let directory = or("SOURCE_DIRECTORY", "python");
        let kind = or("SOURCE_KIND", "bundle");
        let source = match kind.trim().to_ascii_lowercase().as_str() {
            "bundle" => SourceConfig::EmbeddedBundle { directory },
            "directory" => SourceConfig::WatchedDirectory {
                directory,
                watch: parse_or(get("SOURCE_WATCH"), "SOURCE_WATCH", true, parse_bool)?,
            },
            "git" => SourceConfig::RemoteRepository {
                repo_url: get("GIT_REPO_URL").ok_or(ConfigError::Missing("GIT_REPO_URL"))?,
                directory,
                branch: or("GIT_BRANCH", "main"),
                token: get("GIT_TOKEN"),
                forge: get("GIT_FORGE")
                    .map(|value| {
                        ForgeKind::from_str(&value).map_err(|_| ConfigError::Invalid {
                            key: "GIT_FORGE",
                            value,
                        })
                    })
                    .transpose()?,
            },
            "s3" => SourceConfig::ObjectStore {
                bucket: get("S3_BUCKET").ok_or(ConfigError::Missing("S3_BUCKET"))?,
                prefix: get("S3_PREFIX").unwrap_or_default(),
                region: get("S3_REGION"),
                endpoint_url: get("S3_ENDPOINT_URL"),
                access_key_id: get("S3_ACCESS_KEY_ID"),
                secret_key: get("S3_SECRET_KEY"),
            },
            _ => {
                return Err(ConfigError::Invalid {
                    key: "SOURCE_KIND",
                    value: kind,
                })
            }
        };

        let interval = parse_or(get("RELOAD_INTERVAL_SECS"), "RELOAD_INTERVAL_SECS", 300, parse_u64)?;
        let grace = parse_or(get("RELOAD_GRACE_SECS"), "RELOAD_GRACE_SECS", 0, parse_u64)?;
        let timeout = parse_or(get("SCRIPT_TIMEOUT_SECS"), "SCRIPT_TIMEOUT_SECS", 30, parse_u64)?;

        Ok(Self {
            source,
            scheduler: SchedulerConfig::new(Duration::from_secs(interval))
                .with_grace_period(Duration::from_secs(grace)),
            dispatch_member: or("DISPATCH_MEMBER", "process"),
            artifact_dir: get("ARTIFACT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("unitvisor-artifacts")),
            script_timeout: Duration::from_secs(timeout),
        })
    }
}

fn parse_or<T>(
    value: Option<String>,
    key: &'static str,
    default: T,
    parse: fn(&str) -> Option<T>,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => parse(value.trim()).ok_or(ConfigError::Invalid { key, value }),
    }
}

fn parse_u64(value: &str) -> Option<u64> {
    value.parse().ok()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
