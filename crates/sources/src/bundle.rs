//! Read-only units compiled into the binary.

use async_trait::async_trait;
use unitvisor_core::listing::{join_path, parse_listing, INDEX_FILE};
use unitvisor_core::{SourceError, SourceProvider};

/// One file of an embedded bundle, addressed by its bundle-relative path.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedFile {
    pub path: &'static str,
    pub contents: &'static str,
}

/// Units shipped with the crate under `bundle/`.
pub static DEFAULT_BUNDLE: &[EmbeddedFile] = &[
    EmbeddedFile {
        path: "python/index",
        contents: include_str!("../bundle/python/index"),
    },
    EmbeddedFile {
        path: "python/sales.py",
        contents: include_str!("../bundle/python/sales.py"),
    },
];

/// Serves units from a static set of embedded files.
///
/// Content never changes at runtime, so change listeners are ignored.
pub struct EmbeddedBundleSource {
    directory: String,
    files: &'static [EmbeddedFile],
}

impl EmbeddedBundleSource {
    /// Source over [`DEFAULT_BUNDLE`] rooted at `directory`.
    pub fn new(directory: impl Into<String>) -> Self {
        Self::with_files(directory, DEFAULT_BUNDLE)
    }

    pub fn with_files(directory: impl Into<String>, files: &'static [EmbeddedFile]) -> Self {
        let directory = directory.into();
        tracing::info!(directory = %directory, files = files.len(), "Embedded bundle source initialised");
        Self { directory, files }
    }

    fn lookup(&self, name: &str) -> Option<&'static str> {
        let path = join_path(&self.directory, name);
        self.files
            .iter()
            .find(|file| file.path == path)
            .map(|file| file.contents)
    }
}

#[async_trait]
impl SourceProvider for EmbeddedBundleSource {
    fn kind(&self) -> &'static str {
        "bundle"
    }

    async fn list_unit_names(&self) -> Result<Vec<String>, SourceError> {
        let index = self.lookup(INDEX_FILE).ok_or_else(|| {
            SourceError::unavailable(format!(
                "embedded bundle has no {}",
                join_path(&self.directory, INDEX_FILE)
            ))
        })?;
        Ok(parse_listing(index))
    }

    async fn read_unit(&self, name: &str) -> Result<String, SourceError> {
        self.lookup(name)
            .map(str::to_string)
            .ok_or_else(|| SourceError::UnitNotFound(join_path(&self.directory, name)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
