//! Execution engine contract and the shared compiled-artifact cache.
//!
//! The host never talks to a concrete runtime. It compiles unit text into an
//! engine artifact (cached by unit hash in an [`ArtifactCache`]), creates one
//! isolated context per unit from that artifact, looks up named members in a
//! context, and releases contexts it no longer needs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::EngineError;

/// Runtime that compiles, binds and runs units.
#[async_trait]
pub trait ExecutionEngine: Send + Sync + 'static {
    /// Compiled form of a unit's text, shareable between contexts.
    type Artifact: Send + Sync + 'static;
    /// Isolated runtime state owned by exactly one unit.
    type Context: Send + Sync + 'static;
    /// Handle to a named member of a context.
    type Callable: Clone + Send + Sync + 'static;

    /// Compile `text` for the unit called `name`.
    fn compile(&self, name: &str, text: &str) -> Result<Self::Artifact, EngineError>;

    /// Create a fresh context for `name` from a compiled artifact.
    fn instantiate(
        &self,
        name: &str,
        artifact: Arc<Self::Artifact>,
    ) -> Result<Self::Context, EngineError>;

    /// Look up `member` in `context`.
    ///
    /// Fails with [`EngineError::MemberNotFound`] when the unit does not
    /// export it.
    fn lookup(&self, context: &Self::Context, member: &str) -> Result<Self::Callable, EngineError>;

    /// Invoke a callable with one JSON record.
    async fn invoke(&self, callable: &Self::Callable, input: Value) -> Result<Value, EngineError>;

    /// Release a context. Callables obtained from it must not be used again.
    fn release(&self, context: Self::Context);
}

/// Hit/miss counters of an [`ArtifactCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Compiled artifacts keyed by unit hash.
///
/// Constructed explicitly and handed to every [`Host`](crate::host::Host)
/// that should share it. Entries are never evicted: the cache lives as long
/// as the last owner holding its `Arc`.
pub struct ArtifactCache<A> {
    entries: Mutex<HashMap<String, Arc<A>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<A> ArtifactCache<A> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Return the artifact cached under `key`, compiling and inserting it on
    /// a miss. A failed compile leaves the cache untouched.
    pub fn get_or_compile<F>(&self, key: &str, compile: F) -> Result<Arc<A>, EngineError>
    where
        F: FnOnce() -> Result<A, EngineError>,
    {
        if let Some(artifact) = self.lock().get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(artifact));
        }

        // Compile outside the lock; reconciliations are serialised by the
        // host so a duplicate compile of the same key cannot happen there.
        let artifact = Arc::new(compile()?);
        self.misses.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.lock();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::clone(&artifact));
        Ok(Arc::clone(entry))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.lock().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<A>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<A> Default for ArtifactCache<A> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
