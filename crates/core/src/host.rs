//! Execution host: the live unit set and its reconciliation against a source.
//!
//! [`Host`] keeps one execution context per unit, keyed by unit name and
//! ordered like the source's most recent listing. [`Host::reconcile`] brings
//! that set in line with the source:
//!
//! 1. list the current names, read and hash every unit;
//! 2. drop units no longer listed;
//! 3. create a fresh context for each new unit, or unit whose hash changed;
//! 4. if anything happened, swap the next set in, in listing order, advance
//!    the generation, then release the contexts that did not carry over.
//!
//! Steps 2 and 3 build the next set beside the live one. Readers take a
//! short read lock on the unit map and only ever see the set before or after
//! a swap; they never wait for a fetch or compile.
//! Reconciliations are serialised by an internal mutex.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use indexmap::IndexMap;
use tokio::sync::{Mutex, RwLock};

use crate::engine::{ArtifactCache, ExecutionEngine};
use crate::error::{EngineError, HostError, SourceError};
use crate::hashing::unit_hash;
use crate::reload::ReloadResult;
use crate::source::{ChangeListener, SourceProvider};

/// A unit currently bound in the host.
struct LoadedUnit<C> {
    context: C,
    hash: String,
}

/// A unit as read from the source during one reconciliation.
struct FetchedUnit {
    name: String,
    text: String,
    hash: String,
}

/// Where a listed unit's context comes from in the next published set.
enum Staged<C> {
    /// Carried over from the live set.
    Keep(String),
    /// Freshly instantiated during this reconciliation.
    Fresh(String, LoadedUnit<C>),
}

/// Outcome of staging one reconciliation.
struct Plan<C> {
    staged: Vec<Staged<C>>,
    /// The next set differs from the live one.
    changed: bool,
    failure: Option<EngineError>,
}

/// Hosts one execution context per unit supplied by a [`SourceProvider`].
///
/// Created with [`Host::new`], which returns an `Arc` so the source's change
/// listener and any number of dispatchers can share it.
pub struct Host<E: ExecutionEngine> {
    source: Box<dyn SourceProvider>,
    engine: Arc<E>,
    artifacts: Arc<ArtifactCache<E::Artifact>>,
    reconcile_lock: Mutex<()>,
    units: RwLock<IndexMap<String, LoadedUnit<E::Context>>>,
    generation: AtomicU64,
    released: AtomicBool,
}

impl<E: ExecutionEngine> Host<E> {
    /// Create an empty host and subscribe to the source's change notifications.
    ///
    /// No unit is loaded until the first [`reconcile`](Self::reconcile). A
    /// change notification spawns a reconciliation on the current Tokio
    /// runtime.
    pub fn new(
        source: Box<dyn SourceProvider>,
        engine: Arc<E>,
        artifacts: Arc<ArtifactCache<E::Artifact>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let listener: ChangeListener = Arc::new(move || {
                if let Some(host) = weak.upgrade() {
                    Self::on_source_changed(host);
                }
            });
            source.register_change_listener(listener);
            tracing::debug!(source = source.kind(), "Host initialised");

            Self {
                source,
                engine,
                artifacts,
                reconcile_lock: Mutex::new(()),
                units: RwLock::new(IndexMap::new()),
                generation: AtomicU64::new(0),
                released: AtomicBool::new(false),
            }
        })
    }

    /// Current generation. Advances by one per reconciliation that changed
    /// the unit set.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    pub fn artifacts(&self) -> &Arc<ArtifactCache<E::Artifact>> {
        &self.artifacts
    }

    pub fn source_kind(&self) -> &'static str {
        self.source.kind()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Bring the live unit set in line with the source.
    ///
    /// Source failures are returned as-is; there is no internal retry.
    /// Concurrent callers queue behind the running reconciliation and then
    /// query the source themselves.
    pub async fn reconcile(&self) -> Result<ReloadResult, HostError> {
        let _guard = self.reconcile_lock.lock().await;
        if self.is_released() {
            return Err(HostError::Released);
        }

        let fetched = self.fetch_current().await?;
        tracing::debug!(
            source = self.source.kind(),
            units = fetched.len(),
            "Reconciliation started",
        );

        let live = self.live_hashes().await;
        let Plan {
            staged,
            changed,
            failure,
        } = self.stage(&fetched, &live);

        let generation = if changed {
            let (generation, retired) = self.publish(staged).await;
            for (_, unit) in retired {
                self.engine.release(unit.context);
            }
            generation
        } else {
            self.generation()
        };

        if let Some(err) = failure {
            tracing::error!(generation, error = %err, "Reconciliation failed");
            return Err(err.into());
        }

        if changed {
            tracing::info!(
                generation,
                units = fetched.len(),
                "Reconciliation complete: unit set changed",
            );
        } else {
            tracing::debug!(generation, "Reconciliation complete: no changes detected");
        }

        Ok(ReloadResult {
            changed,
            occurred_at: Utc::now(),
            data_age: self.source.data_age().await,
            generation,
        })
    }

    /// Names of the loaded units, in listing order.
    pub async fn list_unit_names(&self) -> Vec<String> {
        self.units.read().await.keys().cloned().collect()
    }

    /// Content hash of a loaded unit.
    pub async fn unit_hash(&self, unit: &str) -> Option<String> {
        self.units.read().await.get(unit).map(|u| u.hash.clone())
    }

    /// Look up `member` in the context of `unit`.
    pub async fn get_binding(&self, unit: &str, member: &str) -> Result<E::Callable, HostError> {
        let units = self.units.read().await;
        let loaded = units
            .get(unit)
            .ok_or_else(|| HostError::UnitNotLoaded(unit.to_string()))?;
        Ok(self.engine.lookup(&loaded.context, member)?)
    }

    /// Look up `member` in every loaded unit, in listing order.
    ///
    /// Fails with [`HostError::MemberNotFound`] if any unit lacks the member.
    pub async fn all_bindings(&self, member: &str) -> Result<Vec<(String, E::Callable)>, HostError> {
        let units = self.units.read().await;
        units
            .iter()
            .map(|(name, loaded)| {
                let callable = self.engine.lookup(&loaded.context, member)?;
                Ok((name.clone(), callable))
            })
            .collect()
    }

    /// Release every unit context, then the source.
    ///
    /// Waits for an in-flight reconciliation. Later reconciliations fail
    /// with [`HostError::Released`]. Calling this twice is a no-op.
    pub async fn release(&self) {
        let _guard = self.reconcile_lock.lock().await;
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }

        let units = std::mem::take(&mut *self.units.write().await);
        tracing::debug!(units = units.len(), "Releasing host");
        for (_, unit) in units {
            self.engine.release(unit.context);
        }
        self.source.release();
    }

    // ---- private helpers ----

    /// Step 1: list and read every unit, hashing name and text.
    async fn fetch_current(&self) -> Result<Vec<FetchedUnit>, SourceError> {
        let names = self.source.list_unit_names().await?;

        let mut seen = HashSet::with_capacity(names.len());
        let mut fetched = Vec::with_capacity(names.len());
        for name in names {
            if !seen.insert(name.clone()) {
                tracing::warn!(unit = %name, "Duplicate unit in listing; keeping first entry");
                continue;
            }
            let text = self.source.read_unit(&name).await?;
            let hash = unit_hash(&name, &text);
            fetched.push(FetchedUnit { name, text, hash });
        }
        Ok(fetched)
    }

    /// Hash of every live unit, keyed by name.
    async fn live_hashes(&self) -> HashMap<String, String> {
        self.units
            .read()
            .await
            .iter()
            .map(|(name, unit)| (name.clone(), unit.hash.clone()))
            .collect()
    }

    /// Steps 2 and 3, off to the side: decide which live contexts carry
    /// over and load every new or changed unit. The live map is not touched.
    ///
    /// The first compile failure stops loading. The failing unit is left out
    /// of the next set; later units keep their live context if they have one.
    fn stage(&self, fetched: &[FetchedUnit], live: &HashMap<String, String>) -> Plan<E::Context> {
        let current: HashSet<&str> = fetched.iter().map(|u| u.name.as_str()).collect();
        let removed: Vec<&str> = live
            .keys()
            .map(String::as_str)
            .filter(|name| !current.contains(name))
            .collect();
        if !removed.is_empty() {
            tracing::info!(count = removed.len(), units = ?removed, "Removing units");
        }

        let mut plan = Plan {
            staged: Vec::with_capacity(fetched.len()),
            changed: !removed.is_empty(),
            failure: None,
        };

        for unit in fetched {
            let previous = live.get(&unit.name).map(String::as_str);
            if plan.failure.is_some() || previous == Some(unit.hash.as_str()) {
                if previous.is_some() {
                    plan.staged.push(Staged::Keep(unit.name.clone()));
                }
                continue;
            }

            if previous.is_some() {
                tracing::info!(unit = %unit.name, "Reloading changed unit");
            } else {
                tracing::info!(unit = %unit.name, "Loading new unit");
            }

            match self.load(unit) {
                Ok(context) => {
                    plan.staged.push(Staged::Fresh(
                        unit.name.clone(),
                        LoadedUnit {
                            context,
                            hash: unit.hash.clone(),
                        },
                    ));
                    plan.changed = true;
                }
                Err(err) => {
                    // A live unit that failed to reload is dropped from the set.
                    plan.changed |= previous.is_some();
                    plan.failure = Some(err);
                }
            }
        }

        plan
    }

    /// Compile (through the shared cache) and instantiate one unit.
    fn load(&self, unit: &FetchedUnit) -> Result<E::Context, EngineError> {
        let artifact = self
            .artifacts
            .get_or_compile(&unit.hash, || self.engine.compile(&unit.name, &unit.text))?;
        self.engine.instantiate(&unit.name, artifact)
    }

    /// Step 4: swap the staged set in, in listing order, and advance the
    /// generation under one write lock. Returns the contexts that did not
    /// carry over; the caller releases them after the swap.
    async fn publish(
        &self,
        staged: Vec<Staged<E::Context>>,
    ) -> (u64, Vec<(String, LoadedUnit<E::Context>)>) {
        let mut units = self.units.write().await;
        let mut previous = std::mem::take(&mut *units);

        let mut next = IndexMap::with_capacity(staged.len());
        for entry in staged {
            match entry {
                Staged::Keep(name) => {
                    if let Some(unit) = previous.swap_remove(&name) {
                        next.insert(name, unit);
                    }
                }
                Staged::Fresh(name, unit) => {
                    next.insert(name, unit);
                }
            }
        }

        *units = next;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        (generation, previous.into_iter().collect())
    }

    fn on_source_changed(host: Arc<Self>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("Source change detected outside a Tokio runtime; ignoring");
            return;
        };
        runtime.spawn(async move {
            tracing::info!(source = host.source_kind(), "Source change detected; reconciling");
            if let Err(e) = host.reconcile().await {
                tracing::error!(error = %e, "Push-triggered reconciliation failed");
            }
        });
    }
}

impl<E: ExecutionEngine> Drop for Host<E> {
    fn drop(&mut self) {
        if *self.released.get_mut() {
            return;
        }
        for (_, unit) in self.units.get_mut().drain(..) {
            self.engine.release(unit.context);
        }
        self.source.release();
    }
}
