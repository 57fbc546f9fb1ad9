//! Shared fixtures for worker integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use unitvisor_core::{ArtifactCache, Host, SourceProvider};
use unitvisor_sources::WatchedDirectorySource;
use unitvisor_worker::ProcessEngine;

/// Wraps the record as `{"record": ...}`.
pub const TAG_UNIT: &str = r#"# export: process
input=$(cat)
echo "{\"record\": $input}"
"#;

/// Doubles `value`; prints nothing for records without one.
pub const DOUBLE_UNIT: &str = r#"# export: process
input=$(cat)
value=$(printf '%s' "$input" | sed -n 's/.*"value":\([0-9][0-9]*\).*/\1/p')
if [ -n "$value" ]; then echo "{\"doubled\": $((value * 2))}"; fi
"#;

/// Always fails.
pub const FAILING_UNIT: &str = "# export: process\necho 'boom' >&2\nexit 1\n";

/// Write `index` plus unit files into `dir`.
pub fn write_units(dir: &Path, units: &[(&str, &str)]) {
    let index: Vec<&str> = units.iter().map(|(name, _)| *name).collect();
    std::fs::write(dir.join("index"), index.join("\n")).unwrap();
    for (name, text) in units {
        std::fs::write(dir.join(name), text).unwrap();
    }
}

/// Host over an unwatched directory source, with artifacts in `artifacts`.
pub fn directory_host(units: &Path, artifacts: &Path) -> Arc<Host<ProcessEngine>> {
    let source: Box<dyn SourceProvider> = Box::new(WatchedDirectorySource::new(units, false));
    let engine = Arc::new(ProcessEngine::new(artifacts, Duration::from_secs(10)));
    Host::new(source, engine, Arc::new(ArtifactCache::new()))
}

/// Output lines parsed as JSON.
pub fn parse_lines(output: &[u8]) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(output)
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

pub fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}
