//! Worker process: hosts units from a configured source, keeps them fresh
//! with a [`ReloadScheduler`](unitvisor_core::ReloadScheduler) and streams
//! JSON records through them.

pub mod config;
pub mod engine;
pub mod pipeline;

pub use config::{ConfigError, WorkerConfig};
pub use engine::{ProcessEngine, Runtime};
pub use pipeline::{PipelineError, PipelineStats};
