use std::time::Duration;

/// Failures raised by a [`SourceProvider`](crate::source::SourceProvider).
///
/// Every variant except [`SourceError::UnitNotFound`] means the source as a
/// whole could not be reached; see [`SourceError::is_unavailable`].
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Unit not found: {0}")]
    UnitNotFound(String),

    #[error("Source unavailable: {detail}")]
    Unavailable { detail: String },

    #[error("HTTP {status} fetching {url}")]
    Http { status: u16, url: String },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl SourceError {
    /// Shorthand for [`SourceError::Unavailable`].
    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::Unavailable {
            detail: detail.into(),
        }
    }

    /// `true` when the failure concerns the whole source (network, filesystem,
    /// HTTP status) rather than one missing unit.
    pub fn is_unavailable(&self) -> bool {
        !matches!(self, Self::UnitNotFound(_))
    }

    /// HTTP status code carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Failures raised by an [`ExecutionEngine`](crate::engine::ExecutionEngine).
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("Failed to compile unit '{unit}': {message}")]
    Compile { unit: String, message: String },

    #[error("Unit '{unit}' does not export '{member}'")]
    MemberNotFound { unit: String, member: String },

    #[error("Execution of unit '{unit}' failed: {message}")]
    Execution { unit: String, message: String },
}

/// Errors surfaced by the [`Host`](crate::host::Host).
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Failed to compile unit '{unit}': {message}")]
    Compile { unit: String, message: String },

    #[error("Unit '{unit}' does not export '{member}'")]
    MemberNotFound { unit: String, member: String },

    #[error("Unit not loaded: {0}")]
    UnitNotLoaded(String),

    #[error("Execution of unit '{unit}' failed: {message}")]
    Execution { unit: String, message: String },

    #[error("Host has been released")]
    Released,
}

impl From<EngineError> for HostError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Compile { unit, message } => Self::Compile { unit, message },
            EngineError::MemberNotFound { unit, member } => Self::MemberNotFound { unit, member },
            EngineError::Execution { unit, message } => Self::Execution { unit, message },
        }
    }
}

/// Latched by the [`ReloadScheduler`](crate::scheduler::ReloadScheduler) once
/// reconciliation has failed continuously for longer than the grace period.
#[derive(Debug, Clone, thiserror::Error)]
#[error(
    "Unit reload grace period exceeded: errors for {streak:?} (grace: {grace:?}). Last error: {last_error}"
)]
pub struct FatalError {
    /// Duration of the failure streak when the grace period was exceeded.
    pub streak: Duration,
    /// Configured grace period.
    pub grace: Duration,
    /// Display text of the error that tipped the streak over.
    pub last_error: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
