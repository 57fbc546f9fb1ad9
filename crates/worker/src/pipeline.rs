//! JSON-lines record pipeline.
//!
//! Each input line is one JSON record. Before every record the scheduler's
//! fatal latch is checked; the record is then dispatched to every loaded
//! unit and each non-null result is written as
//! `{"unit": "<name>", "output": <value>}` on its own line.

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use unitvisor_core::{Dispatcher, ExecutionEngine, FatalError, ReloadScheduler};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fatal(#[from] FatalError),

    #[error("Pipeline I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Counters reported when the input is exhausted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Records dispatched.
    pub records: u64,
    /// Lines dropped because they were not valid JSON.
    pub malformed: u64,
    /// Output lines written.
    pub outputs: u64,
    /// Unit invocations or dispatches that failed.
    pub failures: u64,
}

/// Feed every line of `input` through `dispatcher`, writing results to
/// `output`, until end of input or until the scheduler reports a fatal error.
pub async fn run<E, R, W>(
    scheduler: &ReloadScheduler<E>,
    dispatcher: &mut Dispatcher<E>,
    input: R,
    output: &mut W,
) -> Result<PipelineStats, PipelineError>
where
    E: ExecutionEngine,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut stats = PipelineStats::default();
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: Value = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed record");
                stats.malformed += 1;
                continue;
            }
        };

        scheduler.check_fatal()?;
        stats.records += 1;

        let outputs = match dispatcher.dispatch(&record).await {
            Ok(outputs) => outputs,
            Err(e) => {
                tracing::error!(error = %e, member = %dispatcher.member(), "Dispatch failed; skipping record");
                stats.failures += 1;
                continue;
            }
        };

        for unit_output in outputs {
            match unit_output.result {
                Ok(Value::Null) => {}
                Ok(value) => {
                    let mut line = serde_json::to_vec(&json!({
                        "unit": unit_output.unit,
                        "output": value,
                    }))
                    .map_err(std::io::Error::from)?;
                    line.push(b'\n');
                    output.write_all(&line).await?;
                    stats.outputs += 1;
                }
                Err(e) => {
                    tracing::error!(unit = %unit_output.unit, error = %e, "Unit failed on record");
                    stats.failures += 1;
                }
            }
        }
    }

    output.flush().await?;
    tracing::info!(
        records = stats.records,
        outputs = stats.outputs,
        malformed = stats.malformed,
        failures = stats.failures,
        "Input exhausted",
    );
    Ok(stats)
}
