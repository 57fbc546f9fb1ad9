//! Units fetched from an S3-compatible object store.
//!
//! Keys are `<prefix>/index` and `<prefix>/<name>`; an empty prefix means
//! the bucket root. Works with AWS S3 and with MinIO-style endpoints.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::error::DisplayErrorContext;
use chrono::{DateTime, Utc};
use unitvisor_core::listing::{join_path, parse_listing, INDEX_FILE};
use unitvisor_core::{SourceError, SourceProvider};

/// How to reach the object store.
///
/// Unset fields fall back to the default AWS configuration chain
/// (environment, profile, instance metadata).
#[derive(Default, Clone)]
pub struct S3ClientOptions {
    pub region: Option<String>,
    /// Custom endpoint; switches the client to path-style addressing.
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_key: Option<String>,
}

impl S3ClientOptions {
    /// Build an S3 client from these options.
    pub async fn build_client(&self) -> aws_sdk_s3::Client {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &self.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let (Some(key_id), Some(secret)) = (&self.access_key_id, &self.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                key_id.clone(),
                secret.clone(),
                None,
                None,
                "unitvisor-static",
            ));
        }
        let shared = loader.load().await;

        let mut config = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &self.endpoint_url {
            config = config.endpoint_url(endpoint).force_path_style(true);
        }
        aws_sdk_s3::Client::from_conf(config.build())
    }
}

/// Strip trailing `/` separators from a key prefix.
pub fn normalize_prefix(prefix: &str) -> String {
    prefix.trim().trim_end_matches('/').to_string()
}

/// Object key of `name` under a normalised `prefix`.
pub fn object_key(prefix: &str, name: &str) -> String {
    join_path(prefix, name)
}

/// Pull-only source reading objects with `GetObject`.
pub struct ObjectStoreSource {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
    newest: Mutex<Option<DateTime<Utc>>>,
}

impl ObjectStoreSource {
    /// Connect using `options` and serve units from `bucket` / `prefix`.
    pub async fn connect(bucket: impl Into<String>, prefix: &str, options: &S3ClientOptions) -> Self {
        Self::with_client(options.build_client().await, bucket, prefix)
    }

    pub fn with_client(client: aws_sdk_s3::Client, bucket: impl Into<String>, prefix: &str) -> Self {
        let bucket = bucket.into();
        let prefix = normalize_prefix(prefix);
        tracing::info!(
            bucket = %bucket,
            prefix = if prefix.is_empty() { "(root)" } else { prefix.as_str() },
            "Object store source initialised",
        );
        Self {
            client,
            bucket,
            prefix,
            newest: Mutex::new(None),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    // ---- private helpers ----

    async fn get_object(&self, name: &str) -> Result<String, SourceError> {
        let key = object_key(&self.prefix, name);
        let location = format!("s3://{}/{}", self.bucket, key);
        tracing::debug!(location = %location, "GetObject");

        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| match e.raw_response().map(|r| r.status().as_u16()) {
                Some(status) => SourceError::Http {
                    status,
                    url: location.clone(),
                },
                None => SourceError::unavailable(format!(
                    "failed to fetch {location}: {}",
                    DisplayErrorContext(&e)
                )),
            })?;

        if let Some(modified) = output
            .last_modified()
            .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
        {
            let mut newest = lock(&self.newest);
            if newest.map_or(true, |current| modified > current) {
                *newest = Some(modified);
            }
        }

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| SourceError::unavailable(format!("failed to read {location}: {e}")))?
            .into_bytes();
        String::from_utf8(bytes.to_vec())
            .map_err(|e| SourceError::unavailable(format!("{location} is not valid UTF-8: {e}")))
    }
}

#[async_trait]
impl SourceProvider for ObjectStoreSource {
    fn kind(&self) -> &'static str {
        "s3"
    }

    async fn list_unit_names(&self) -> Result<Vec<String>, SourceError> {
        *lock(&self.newest) = None;
        Ok(parse_listing(&self.get_object(INDEX_FILE).await?))
    }

    async fn read_unit(&self, name: &str) -> Result<String, SourceError> {
        self.get_object(name).await
    }

    async fn data_age(&self) -> Option<DateTime<Utc>> {
        *lock(&self.newest)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
