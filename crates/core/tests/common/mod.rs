//! Shared fixtures for host, scheduler and dispatcher integration tests.
//!
//! - [`SwitchableSource`]: in-memory source whose listing, content and
//!   failure mode can be changed while a host owns it.
//! - [`RecordingEngine`]: engine that counts compile / instantiate / release
//!   calls and echoes records back.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use unitvisor_core::{
    ArtifactCache, ChangeListener, EngineError, ExecutionEngine, Host, SourceError, SourceProvider,
};

// ---------------------------------------------------------------------------
// SwitchableSource
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SourceState {
    listing: Vec<String>,
    files: HashMap<String, String>,
    failing: bool,
    data_age: Option<DateTime<Utc>>,
    listener: Option<ChangeListener>,
    released: bool,
}

/// In-memory source shared between a test and the host that owns a clone.
#[derive(Clone, Default)]
pub struct SwitchableSource {
    state: Arc<Mutex<SourceState>>,
    list_calls: Arc<AtomicUsize>,
}

impl SwitchableSource {
    /// Source listing `units` in order, with the given texts.
    pub fn with_units(units: &[(&str, &str)]) -> Self {
        let source = Self::default();
        {
            let mut state = source.state.lock().unwrap();
            for (name, text) in units {
                state.listing.push(name.to_string());
                state.files.insert(name.to_string(), text.to_string());
            }
        }
        source
    }

    pub fn boxed(&self) -> Box<dyn SourceProvider> {
        Box::new(self.clone())
    }

    pub fn set_text(&self, name: &str, text: &str) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(name.to_string(), text.to_string());
    }

    /// Add `name` to the end of the listing with `text`.
    pub fn add(&self, name: &str, text: &str) {
        let mut state = self.state.lock().unwrap();
        state.listing.push(name.to_string());
        state.files.insert(name.to_string(), text.to_string());
    }

    /// Drop `name` from the listing (its text stays readable).
    pub fn unlist(&self, name: &str) {
        self.state.lock().unwrap().listing.retain(|n| n != name);
    }

    pub fn set_listing(&self, names: &[&str]) {
        self.state.lock().unwrap().listing = names.iter().map(|n| n.to_string()).collect();
    }

    /// Make every subsequent listing fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().failing = failing;
    }

    pub fn set_data_age(&self, age: DateTime<Utc>) {
        self.state.lock().unwrap().data_age = Some(age);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn has_listener(&self) -> bool {
        self.state.lock().unwrap().listener.is_some()
    }

    /// Invoke the registered change listener, as a watcher would.
    pub fn fire_change(&self) {
        let listener = self.state.lock().unwrap().listener.clone();
        if let Some(listener) = listener {
            listener();
        }
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().unwrap().released
    }
}

#[async_trait]
impl SourceProvider for SwitchableSource {
    fn kind(&self) -> &'static str {
        "switchable"
    }

    async fn list_unit_names(&self) -> Result<Vec<String>, SourceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if state.failing {
            return Err(SourceError::unavailable("switchable source is failing"));
        }
        Ok(state.listing.clone())
    }

    async fn read_unit(&self, name: &str) -> Result<String, SourceError> {
        let state = self.state.lock().unwrap();
        if state.failing {
            return Err(SourceError::unavailable("switchable source is failing"));
        }
        state
            .files
            .get(name)
            .cloned()
            .ok_or_else(|| SourceError::UnitNotFound(name.to_string()))
    }

    async fn data_age(&self) -> Option<DateTime<Utc>> {
        self.state.lock().unwrap().data_age
    }

    fn register_change_listener(&self, listener: ChangeListener) {
        let mut state = self.state.lock().unwrap();
        if state.listener.is_none() {
            state.listener = Some(listener);
        }
    }

    fn release(&self) {
        self.state.lock().unwrap().released = true;
    }
}

// ---------------------------------------------------------------------------
// RecordingEngine
// ---------------------------------------------------------------------------

/// Text containing this marker fails to compile.
pub const BROKEN: &str = "syntax error";

#[derive(Debug)]
pub struct RecordingContext {
    pub id: u64,
    pub unit: String,
    pub text: Arc<String>,
    released: Arc<AtomicBool>,
}

#[derive(Debug, Clone)]
pub struct RecordingCallable {
    pub unit: String,
    pub member: String,
    pub context_id: u64,
    released: Arc<AtomicBool>,
}

struct CompileGate {
    text: String,
    entered: tokio::sync::oneshot::Sender<()>,
    resume: std::sync::mpsc::Receiver<()>,
}

/// Handle returned by [`RecordingEngine::hold_compile`].
pub struct HeldCompile {
    entered: tokio::sync::oneshot::Receiver<()>,
    resume: std::sync::mpsc::Sender<()>,
}

impl HeldCompile {
    /// Resolves once the held compile has started and is blocked.
    pub async fn entered(&mut self) {
        let _ = (&mut self.entered).await;
    }

    /// Let the held compile finish.
    pub fn resume(&self) {
        let _ = self.resume.send(());
    }
}

/// Engine whose units export `process` plus every `export <name>` line.
#[derive(Default)]
pub struct RecordingEngine {
    gate: Mutex<Option<CompileGate>>,
    next_id: AtomicU64,
    compiles: AtomicUsize,
    instantiations: AtomicUsize,
    releases: AtomicUsize,
    compiled: Mutex<Vec<String>>,
    live: Mutex<HashSet<u64>>,
}

impl RecordingEngine {
    pub fn compiles(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    pub fn instantiations(&self) -> usize {
        self.instantiations.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Unit names passed to `compile`, in call order.
    pub fn compiled(&self) -> Vec<String> {
        self.compiled.lock().unwrap().clone()
    }

    pub fn live_contexts(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    /// Block the next compile of exactly `text` on its calling thread until
    /// [`HeldCompile::resume`].
    pub fn hold_compile(&self, text: &str) -> HeldCompile {
        let (entered_tx, entered_rx) = tokio::sync::oneshot::channel();
        let (resume_tx, resume_rx) = std::sync::mpsc::channel();
        *self.gate.lock().unwrap() = Some(CompileGate {
            text: text.to_string(),
            entered: entered_tx,
            resume: resume_rx,
        });
        HeldCompile {
            entered: entered_rx,
            resume: resume_tx,
        }
    }
}

#[async_trait]
impl ExecutionEngine for RecordingEngine {
    type Artifact = String;
    type Context = RecordingContext;
    type Callable = RecordingCallable;

    fn compile(&self, name: &str, text: &str) -> Result<String, EngineError> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        self.compiled.lock().unwrap().push(name.to_string());
        let gate = {
            let mut gate = self.gate.lock().unwrap();
            if gate.as_ref().is_some_and(|g| g.text == text) {
                gate.take()
            } else {
                None
            }
        };
        if let Some(gate) = gate {
            let _ = gate.entered.send(());
            let _ = gate.resume.recv();
        }
        if text.contains(BROKEN) {
            return Err(EngineError::Compile {
                unit: name.to_string(),
                message: BROKEN.to_string(),
            });
        }
        Ok(text.to_string())
    }

    fn instantiate(&self, name: &str, artifact: Arc<String>) -> Result<RecordingContext, EngineError> {
        self.instantiations.fetch_add(1, Ordering::SeqCst);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.live.lock().unwrap().insert(id);
        Ok(RecordingContext {
            id,
            unit: name.to_string(),
            text: artifact,
            released: Arc::new(AtomicBool::new(false)),
        })
    }

    fn lookup(
        &self,
        context: &RecordingContext,
        member: &str,
    ) -> Result<RecordingCallable, EngineError> {
        let exported = member == "process"
            || context
                .text
                .lines()
                .any(|line| line.trim() == format!("export {member}"));
        if !exported {
            return Err(EngineError::MemberNotFound {
                unit: context.unit.clone(),
                member: member.to_string(),
            });
        }
        Ok(RecordingCallable {
            unit: context.unit.clone(),
            member: member.to_string(),
            context_id: context.id,
            released: Arc::clone(&context.released),
        })
    }

    async fn invoke(&self, callable: &RecordingCallable, input: Value) -> Result<Value, EngineError> {
        if callable.released.load(Ordering::SeqCst) {
            return Err(EngineError::Execution {
                unit: callable.unit.clone(),
                message: "context released".to_string(),
            });
        }
        if input.get("fail").and_then(Value::as_str) == Some(callable.unit.as_str()) {
            return Err(EngineError::Execution {
                unit: callable.unit.clone(),
                message: "requested failure".to_string(),
            });
        }
        Ok(json!({
            "unit": callable.unit,
            "member": callable.member,
            "context": callable.context_id,
            "input": input,
        }))
    }

    fn release(&self, context: RecordingContext) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        context.released.store(true, Ordering::SeqCst);
        self.live.lock().unwrap().remove(&context.id);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn new_host(source: &SwitchableSource) -> (Arc<Host<RecordingEngine>>, Arc<RecordingEngine>) {
    let engine = Arc::new(RecordingEngine::default());
    let host = Host::new(
        source.boxed(),
        Arc::clone(&engine),
        Arc::new(ArtifactCache::new()),
    );
    (host, engine)
}

/// Poll `check` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
