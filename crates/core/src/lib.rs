//! Hot-reloadable unit host.
//!
//! This crate provides the reload machinery shared by every unit source and
//! execution engine:
//!
//! - [`SourceProvider`]: pluggable supplier of unit names and text.
//! - [`ExecutionEngine`] / [`ArtifactCache`]: the minimal contract a runtime
//!   implements, plus the shared compiled-artifact cache.
//! - [`Host`]: live unit set, generation counter and reconciliation.
//! - [`ReloadScheduler`]: periodic reconciliation with grace-period
//!   escalation to a latched [`FatalError`].
//! - [`Dispatcher`]: generation-stamped binding cache for record dispatch.

pub mod dispatch;
pub mod engine;
pub mod error;
pub mod hashing;
pub mod host;
pub mod listing;
pub mod reload;
pub mod scheduler;
pub mod source;

pub use dispatch::{Dispatcher, UnitOutput};
pub use engine::{ArtifactCache, CacheStats, ExecutionEngine};
pub use error::{EngineError, FatalError, HostError, SourceError};
pub use host::Host;
pub use reload::{ReloadResult, SchedulerConfig};
pub use scheduler::{ReloadScheduler, ReloadStatus};
pub use source::{ChangeListener, SourceProvider};
