//! Pluggable unit sources.
//!
//! A [`SourceProvider`] supplies the ordered list of unit names and the text
//! of each unit. Pull-only backends implement just the two required methods;
//! backends that can detect changes themselves also accept a
//! [`ChangeListener`] and invoke it once per burst of changes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SourceError;

/// Callback invoked by push-capable sources when their content changed.
pub type ChangeListener = Arc<dyn Fn() + Send + Sync>;

/// Supplier of unit names and unit text.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Short backend label used in logs (e.g. `"directory"`).
    fn kind(&self) -> &'static str;

    /// Ordered unit names as currently listed by the source.
    async fn list_unit_names(&self) -> Result<Vec<String>, SourceError>;

    /// Text of the named unit.
    async fn read_unit(&self, name: &str) -> Result<String, SourceError>;

    /// Freshness of the data returned by the most recent listing and reads.
    ///
    /// `None` when the backend cannot tell.
    async fn data_age(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Register a callback for push-style change notification.
    ///
    /// Pull-only backends ignore it.
    fn register_change_listener(&self, _listener: ChangeListener) {}

    /// Stop background activity and free backend resources.
    fn release(&self) {}
}
