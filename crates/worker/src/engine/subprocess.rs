//! Child-process plumbing for the script engine.
//!
//! [`run_command`] spawns a prepared [`tokio::process::Command`], pipes a
//! JSON record to its stdin, captures stdout/stderr and enforces a timeout.

use std::process::Stdio;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Maximum stdout or stderr size captured per stream (10 MiB).
///
/// Output beyond this limit is truncated.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Captured result of one script run.
#[derive(Debug, Clone)]
pub struct ScriptOutput {
    pub stdout: String,
    pub stderr: String,
    /// Process exit code (`-1` if killed by signal).
    pub exit_code: i32,
    pub duration_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Failed to spawn interpreter: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Script timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Spawn `cmd`, write `input` as JSON to its stdin and wait at most
/// `timeout` for it to exit and close its output.
///
/// The timeout covers feeding stdin as well. The caller sets the program
/// and arguments. On timeout the child is killed.
pub async fn run_command(
    cmd: &mut Command,
    input: &Value,
    timeout: Duration,
) -> Result<ScriptOutput, ScriptError> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(ScriptError::Spawn)?;

    // Drain both pipes and feed stdin concurrently so neither side can
    // block the other on a full pipe.
    let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
    let stderr_task = tokio::spawn(read_stream(child.stderr.take()));
    let stdin_task = child.stdin.take().map(|mut stdin| {
        let payload = serde_json::to_vec(input).unwrap_or_default();
        tokio::spawn(async move {
            // The script may exit without reading stdin.
            let _ = stdin.write_all(&payload).await;
        })
    });

    let run = async {
        let status = child.wait().await?;
        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        Ok::<_, std::io::Error>((status, stdout, stderr))
    };

    let outcome = tokio::time::timeout(timeout, run).await;
    if let Some(task) = stdin_task {
        task.abort();
    }

    match outcome {
        Ok(Ok((status, stdout_bytes, stderr_bytes))) => Ok(ScriptOutput {
            stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
            stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
            exit_code: status.code().unwrap_or(-1),
            duration_ms: start.elapsed().as_millis() as u64,
        }),
        Ok(Err(e)) => Err(ScriptError::Io(e)),
        // `child` is dropped on return, which kills it.
        Err(_elapsed) => Err(ScriptError::Timeout {
            elapsed_ms: start.elapsed().as_millis() as u64,
        }),
    }
}

/// Read a whole stream, capped at [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
    }
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
