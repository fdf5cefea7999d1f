//! Error types for `EngineCore`.
//!
//! Errors are split by the party that produces them:
//!
//! - **`PipelineError`**: returned by the external install/build pipeline
//! - **`FailureCause`**: what a failed initialization attempt records in shared state
//! - **`RuntimeError`**: what consumers see at the `create_handle`/`initialize` boundary
//! - **`ConfigError`**: invalid pipeline configuration
//!
//! Pipeline failures are never returned to non-claiming callers directly. The
//! claimer publishes them as a `FailureCause` and every later `create_handle`
//! surfaces them wrapped in `RuntimeError::General`.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use enginecore::errors::RuntimeError;
//!
//! match coordinator.create_handle().await {
//!     Ok(handle) => open_window(handle),
//!     Err(e) if e.requires_restart() => prompt_restart(),
//!     Err(RuntimeError::NotInitialized) => show_splash(),
//!     Err(e) => return Err(e.into()),
//! }
//! ```

use std::sync::Arc;
use thiserror::Error;

/// Errors returned by the install/build pipeline.
///
/// The pipeline is an external collaborator; these variants only give it a
/// common vocabulary so that failures can be recorded and displayed.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Downloading the engine distribution failed.
    #[error("Download failed: {0}")]
    Download(String),

    /// Unpacking or validating the downloaded archive failed.
    #[error("Extraction failed: {0}")]
    Extraction(String),

    /// Constructing the native runtime from installed files failed.
    #[error("Build failed: {0}")]
    Build(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other pipeline failure.
    #[error("Pipeline error: {0}")]
    Other(String),
}

/// The cause recorded by a failed initialization attempt.
///
/// Cheap to clone; every `create_handle` caller observing a failed state gets
/// its own copy.
#[derive(Debug, Clone, Error)]
pub enum FailureCause {
    /// The install step failed.
    #[error("install step failed: {0}")]
    Install(Arc<PipelineError>),

    /// The build step failed.
    #[error("build step failed: {0}")]
    Build(Arc<PipelineError>),

    /// The install failure cannot be recovered without restarting the process.
    #[error("application restart required")]
    ApplicationRestartRequired,

    /// The attempt failed without a recorded cause.
    #[error("unknown failure")]
    Unknown,
}

impl FailureCause {
    /// Wraps an install step error.
    pub fn install(error: PipelineError) -> Self {
        Self::Install(Arc::new(error))
    }

    /// Wraps a build step error.
    pub fn build(error: PipelineError) -> Self {
        Self::Build(Arc::new(error))
    }

    /// Returns true when the process, not just this subsystem, must restart.
    pub const fn requires_restart(&self) -> bool {
        matches!(self, Self::ApplicationRestartRequired)
    }
}

/// Errors surfaced to consumers of the lifecycle coordinator.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// The runtime has been disposed; it can never be initialized again.
    #[error("Engine runtime has been disposed")]
    Disposed,

    /// A handle was requested before any call to `initialize`.
    #[error("Engine runtime has not been initialized")]
    NotInitialized,

    /// The last initialization attempt failed.
    #[error("Engine runtime initialization failed: {0}")]
    General(FailureCause),
}

impl RuntimeError {
    /// Returns true when the wrapped failure requires an application restart.
    pub const fn requires_restart(&self) -> bool {
        match self {
            Self::General(cause) => cause.requires_restart(),
            Self::Disposed | Self::NotInitialized => false,
        }
    }

    /// Returns the recorded failure cause, if any.
    pub const fn cause(&self) -> Option<&FailureCause> {
        match self {
            Self::General(cause) => Some(cause),
            Self::Disposed | Self::NotInitialized => None,
        }
    }
}

impl From<FailureCause> for RuntimeError {
    fn from(cause: FailureCause) -> Self {
        Self::General(cause)
    }
}

/// Errors raised while validating a pipeline configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// The install directory was empty.
    #[error("Install directory must not be empty")]
    EmptyInstallDir,

    /// The marker file name was rejected.
    #[error("Invalid marker file name: {0}")]
    InvalidMarkerFileName(String),
}

/// Type alias for consumer-facing results.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Type alias for pipeline step results.
pub type PipelineResult<T> = Result<T, PipelineError>;
