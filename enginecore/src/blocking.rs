//! Blocking façade over [`LifecycleCoordinator`].
//!
//! Each method drives the corresponding async operation to completion on a
//! dedicated tokio runtime. No lifecycle logic lives here.
//!
//! Do not call these methods from inside an async context; `block_on`
//! panics when nested in a running runtime.

use std::io;
use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};

use crate::config::PipelineConfig;
use crate::coordinator::{DisposeOutcome, EngineHandle, InitOutcome, LifecycleCoordinator};
use crate::errors::{FailureCause, RuntimeError, RuntimeResult};
use crate::pipeline::InstallPipeline;

const WORKER_THREADS: usize = 2;

/// Synchronous call-through wrappers for the lifecycle operations.
pub struct BlockingCoordinator<P: InstallPipeline> {
    inner: Arc<LifecycleCoordinator<P>>,
    runtime: Runtime,
}

impl<P: InstallPipeline> BlockingCoordinator<P> {
    /// Wraps `inner`, starting a dedicated runtime for it.
    pub fn new(inner: Arc<LifecycleCoordinator<P>>) -> io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(WORKER_THREADS)
            .thread_name("enginecore-blocking")
            .enable_all()
            .build()?;
        Ok(Self { inner, runtime })
    }

    /// The wrapped async coordinator.
    pub const fn coordinator(&self) -> &Arc<LifecycleCoordinator<P>> {
        &self.inner
    }

    /// Blocking [`LifecycleCoordinator::initialize`].
    pub fn initialize<E, F>(
        &self,
        config: &PipelineConfig,
        on_error: E,
        on_restart_required: F,
    ) -> RuntimeResult<InitOutcome>
    where
        E: FnOnce(FailureCause) + Send,
        F: FnOnce() + Send,
    {
        self.runtime
            .block_on(self.inner.initialize(config, on_error, on_restart_required))
    }

    /// Blocking [`LifecycleCoordinator::create_handle`].
    pub fn create_handle(&self) -> RuntimeResult<EngineHandle<P>> {
        self.runtime.block_on(self.inner.create_handle())
    }

    /// Blocking [`LifecycleCoordinator::create_handle_or_none`].
    pub fn create_handle_or_none<E>(&self, on_error: E) -> Option<EngineHandle<P>>
    where
        E: FnOnce(RuntimeError) + Send,
    {
        self.runtime
            .block_on(self.inner.create_handle_or_none(on_error))
    }

    /// Blocking [`LifecycleCoordinator::dispose`].
    pub fn dispose(&self) -> DisposeOutcome {
        self.runtime.block_on(self.inner.dispose())
    }
}
