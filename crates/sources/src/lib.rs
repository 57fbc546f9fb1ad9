//! Source backends for the unit host.
//!
//! | Backend | Type | Change push |
//! |---------|------|-------------|
//! | embedded bundle | [`EmbeddedBundleSource`] | no |
//! | local directory | [`WatchedDirectorySource`] | yes, when watching |
//! | Git forge raw content | [`RemoteRepositorySource`] | no |
//! | S3-compatible bucket | [`ObjectStoreSource`] | no |
//!
//! [`build`] turns a [`SourceConfig`] into a boxed provider.

pub mod bundle;
pub mod config;
pub mod directory;
pub mod git;
pub mod object_store;

pub use bundle::{EmbeddedBundleSource, EmbeddedFile, DEFAULT_BUNDLE};
pub use config::{build, SourceConfig};
pub use directory::WatchedDirectorySource;
pub use git::{detect_forge, raw_base_url, ForgeKind, RemoteRepositorySource};
pub use object_store::{ObjectStoreSource, S3ClientOptions};
