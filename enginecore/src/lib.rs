//! `EngineCore` - one-time, concurrency-safe initialization of a shared
//! browser-engine runtime.
//!
//! The runtime must be downloaded, installed and built before anything can
//! use it, and any number of independent callers may ask for it at any time.
//! [`LifecycleCoordinator`] makes sure the expensive pipeline runs at most
//! once per attempt, lets callers wait for it, hands out handles once it is
//! ready, and tears it down exactly once.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use enginecore::{LifecycleCoordinator, PipelineConfig};
//!
//! let coordinator = Arc::new(LifecycleCoordinator::new(MyPipeline::default()));
//! let config = PipelineConfig::builder("/opt/engine").build()?;
//!
//! coordinator
//!     .initialize(&config, |cause| eprintln!("init failed: {cause}"), || prompt_restart())
//!     .await?;
//!
//! let browser = coordinator.create_handle().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod blocking;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod marker;
pub mod pipeline;
pub mod state;
pub mod state_cell;

pub use blocking::BlockingCoordinator;
pub use config::{MarkerFileName, PipelineConfig, PipelineConfigBuilder, DEFAULT_MARKER_FILE};
pub use coordinator::{DisposeOutcome, EngineHandle, InitOutcome, LifecycleCoordinator};
pub use errors::{
    ConfigError, FailureCause, PipelineError, PipelineResult, RuntimeError, RuntimeResult,
};
pub use pipeline::{InstallPipeline, NativeResource};
pub use state::{AttemptId, LifecycleState, Phase};
pub use state_cell::{PhaseWatcher, StateCell};
