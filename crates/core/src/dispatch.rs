//! Generation-stamped binding cache for record dispatch.
//!
//! A [`Dispatcher`] resolves one member name across every loaded unit and
//! invokes the resulting callables for each incoming record. Bindings are
//! re-read from the host only when its generation moved since the last
//! refresh.

use std::sync::Arc;

use serde_json::Value;

use crate::engine::ExecutionEngine;
use crate::error::{EngineError, HostError};
use crate::host::Host;

/// Result of invoking one unit on one record.
#[derive(Debug)]
pub struct UnitOutput {
    pub unit: String,
    pub result: Result<Value, EngineError>,
}

struct BindingCache<C> {
    generation: u64,
    bindings: Vec<(String, C)>,
}

/// Invokes `member` of every loaded unit, in listing order.
pub struct Dispatcher<E: ExecutionEngine> {
    host: Arc<Host<E>>,
    member: String,
    cache: Option<BindingCache<E::Callable>>,
    refreshes: u64,
}

impl<E: ExecutionEngine> Dispatcher<E> {
    pub fn new(host: Arc<Host<E>>, member: impl Into<String>) -> Self {
        Self {
            host,
            member: member.into(),
            cache: None,
            refreshes: 0,
        }
    }

    pub fn member(&self) -> &str {
        &self.member
    }

    /// Number of times bindings were (re)loaded from the host.
    pub fn refreshes(&self) -> u64 {
        self.refreshes
    }

    /// Current bindings, refreshed if the host generation changed.
    pub async fn bindings(&mut self) -> Result<&[(String, E::Callable)], HostError> {
        let generation = self.host.generation();
        let stale = self
            .cache
            .as_ref()
            .map_or(true, |cache| cache.generation != generation);

        if stale {
            // Generation is read before the bindings: a reconciliation that
            // lands in between is picked up again on the next call.
            let bindings = self.host.all_bindings(&self.member).await?;
            tracing::debug!(
                generation,
                member = %self.member,
                units = bindings.len(),
                "Refreshed dispatch bindings",
            );
            self.refreshes += 1;
            self.cache = Some(BindingCache {
                generation,
                bindings,
            });
        }

        Ok(self
            .cache
            .as_ref()
            .map(|cache| cache.bindings.as_slice())
            .unwrap_or_default())
    }

    /// Invoke every bound unit with `record`.
    ///
    /// Binding failures (e.g. a unit without the member) abort the dispatch;
    /// execution failures are reported per unit.
    pub async fn dispatch(&mut self, record: &Value) -> Result<Vec<UnitOutput>, HostError> {
        let host = Arc::clone(&self.host);
        let bindings = self.bindings().await?;

        let mut outputs = Vec::with_capacity(bindings.len());
        for (unit, callable) in bindings {
            let result = host.engine().invoke(callable, record.clone()).await;
            outputs.push(UnitOutput {
                unit: unit.clone(),
                result,
            });
        }
        Ok(outputs)
    }
}
