//! Shared fixtures for source backend integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

/// Write an `index` listing `units` plus one file per `(name, text)` pair.
pub fn write_units(dir: &Path, units: &[(&str, &str)]) {
    let index: Vec<&str> = units.iter().map(|(name, _)| *name).collect();
    std::fs::write(dir.join("index"), index.join("\n")).unwrap();
    for (name, text) in units {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, text).unwrap();
    }
}

/// Poll `check` every 20ms until it holds or `timeout` elapses.
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
