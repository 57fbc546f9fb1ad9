//! Execution engine running each unit as a script in a child process.
//!
//! A unit is a bash (`.sh`) or Python (`.py`) script. Exported members are
//! declared in header comments:
//!
//! ```text
//! # export: process, summarize
//! ```
//!
//! Compiling a unit writes it into the artifact directory under its content
//! hash. Invoking member `m` runs `<interpreter> <script> m` with the record
//! as JSON on stdin and parses stdout as JSON (empty stdout is `null`).

pub mod subprocess;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tokio::runtime::RuntimeFlavor;
use unitvisor_core::hashing::unit_hash;
use unitvisor_core::{EngineError, ExecutionEngine};

use self::subprocess::ScriptError;

/// Header prefix declaring exported members.
const EXPORT_HEADER: &str = "# export:";

/// Interpreter for a unit, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runtime {
    Shell,
    Python,
}

impl Runtime {
    pub fn from_unit_name(name: &str) -> Option<Self> {
        match Path::new(name).extension().and_then(|ext| ext.to_str()) {
            Some("sh") => Some(Self::Shell),
            Some("py") => Some(Self::Python),
            _ => None,
        }
    }

    pub fn program(&self) -> &'static str {
        match self {
            Self::Shell => "bash",
            Self::Python => "python3",
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            Self::Shell => "sh",
            Self::Python => "py",
        }
    }
}

/// Members declared by `# export:` header lines, in declaration order.
pub fn parse_exports(text: &str) -> Vec<String> {
    let mut exports = Vec::new();
    for line in text.lines() {
        let Some(list) = line.trim().strip_prefix(EXPORT_HEADER) else {
            continue;
        };
        for member in list.split(',').map(str::trim).filter(|m| !m.is_empty()) {
            if !exports.iter().any(|e| e == member) {
                exports.push(member.to_string());
            }
        }
    }
    exports
}

fn is_valid_member(member: &str) -> bool {
    let mut chars = member.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A unit materialised on disk.
#[derive(Debug)]
pub struct ScriptArtifact {
    pub path: PathBuf,
    pub runtime: Runtime,
    pub exports: Vec<String>,
}

/// One unit's live binding to its artifact.
#[derive(Debug)]
pub struct ProcessContext {
    unit: String,
    artifact: Arc<ScriptArtifact>,
    released: Arc<AtomicBool>,
}

impl ProcessContext {
    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn artifact(&self) -> &ScriptArtifact {
        &self.artifact
    }
}

/// A resolved member of one context.
#[derive(Debug, Clone)]
pub struct ProcessCallable {
    unit: String,
    member: String,
    artifact: Arc<ScriptArtifact>,
    released: Arc<AtomicBool>,
}

impl ProcessCallable {
    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn member(&self) -> &str {
        &self.member
    }
}

/// Runs units as bash / Python child processes.
pub struct ProcessEngine {
    artifact_dir: PathBuf,
    timeout: Duration,
}

impl ProcessEngine {
    /// `artifact_dir` is created on first compile.
    pub fn new(artifact_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            artifact_dir: artifact_dir.into(),
            timeout,
        }
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Write the script under its content hash, once.
    ///
    /// `compile` is synchronous and runs inside the host's reconciliation,
    /// so the file I/O is moved off the async worker when the runtime allows.
    fn materialise(&self, name: &str, text: &str, runtime: Runtime) -> std::io::Result<PathBuf> {
        let path = self
            .artifact_dir
            .join(format!("{}.{}", unit_hash(name, text), runtime.extension()));
        blocking_io(|| -> std::io::Result<PathBuf> {
            std::fs::create_dir_all(&self.artifact_dir)?;
            if !path.exists() {
                std::fs::write(&path, text)?;
            }
            Ok(path)
        })
    }
}

/// Run blocking file I/O. On a multi-thread runtime this uses
/// [`tokio::task::block_in_place`]; elsewhere `f` runs inline.
fn blocking_io<T>(f: impl FnOnce() -> T) -> T {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

#[async_trait]
impl ExecutionEngine for ProcessEngine {
    type Artifact = ScriptArtifact;
    type Context = ProcessContext;
    type Callable = ProcessCallable;

    fn compile(&self, name: &str, text: &str) -> Result<ScriptArtifact, EngineError> {
        let compile_error = |message: String| EngineError::Compile {
            unit: name.to_string(),
            message,
        };

        let runtime = Runtime::from_unit_name(name)
            .ok_or_else(|| compile_error("unsupported unit type (expected .sh or .py)".into()))?;
        let exports = parse_exports(text);
        if exports.is_empty() {
            return Err(compile_error(format!("no '{EXPORT_HEADER}' header")));
        }
        if let Some(bad) = exports.iter().find(|m| !is_valid_member(m)) {
            return Err(compile_error(format!("invalid member name '{bad}'")));
        }

        let path = self
            .materialise(name, text, runtime)
            .map_err(|e| compile_error(format!("failed to write artifact: {e}")))?;
        tracing::debug!(unit = %name, path = %path.display(), exports = ?exports, "Compiled unit");

        Ok(ScriptArtifact {
            path,
            runtime,
            exports,
        })
    }

    fn instantiate(&self, name: &str, artifact: Arc<ScriptArtifact>) -> Result<ProcessContext, EngineError> {
        Ok(ProcessContext {
            unit: name.to_string(),
            artifact,
            released: Arc::new(AtomicBool::new(false)),
        })
    }

    fn lookup(&self, context: &ProcessContext, member: &str) -> Result<ProcessCallable, EngineError> {
        if !context.artifact.exports.iter().any(|e| e == member) {
            return Err(EngineError::MemberNotFound {
                unit: context.unit.clone(),
                member: member.to_string(),
            });
        }
        Ok(ProcessCallable {
            unit: context.unit.clone(),
            member: member.to_string(),
            artifact: Arc::clone(&context.artifact),
            released: Arc::clone(&context.released),
        })
    }

    async fn invoke(&self, callable: &ProcessCallable, input: Value) -> Result<Value, EngineError> {
        let execution_error = |message: String| EngineError::Execution {
            unit: callable.unit.clone(),
            message,
        };
        if callable.released.load(Ordering::Acquire) {
            return Err(execution_error("context released".into()));
        }

        let artifact = &callable.artifact;
        let mut cmd = Command::new(artifact.runtime.program());
        cmd.arg(&artifact.path).arg(&callable.member);

        let output = subprocess::run_command(&mut cmd, &input, self.timeout)
            .await
            .map_err(|e: ScriptError| execution_error(e.to_string()))?;
        tracing::debug!(
            unit = %callable.unit,
            member = %callable.member,
            exit_code = output.exit_code,
            duration_ms = output.duration_ms,
            "Invoked unit",
        );

        if output.exit_code != 0 {
            return Err(execution_error(format!(
                "exit code {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }
        let stdout = output.stdout.trim();
        if stdout.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(stdout).map_err(|e| execution_error(format!("invalid JSON output: {e}")))
    }

    fn release(&self, context: ProcessContext) {
        context.released.store(true, Ordering::Release);
        tracing::debug!(unit = %context.unit, "Released unit context");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
