//! Boundary with the external install/build pipeline and the native runtime.
//!
//! The coordinator never downloads, extracts or builds anything itself. It
//! drives an [`InstallPipeline`] and owns the [`NativeResource`] the
//! pipeline produces.

use std::path::Path;

use async_trait::async_trait;

use crate::config::PipelineConfig;
use crate::errors::PipelineResult;
use crate::marker;

/// The native engine runtime produced by a successful build.
///
/// Owned by the coordinator while the runtime is `Ready`, then moved into
/// the disposal routine, which calls [`release`](Self::release) exactly once.
#[async_trait]
pub trait NativeResource: Send + Sync + 'static {
    /// A client/session object created from the runtime.
    type Handle: Send + 'static;

    /// Allocates a new client context. May be called any number of times.
    ///
    /// Runs while the lifecycle state is locked for reading, so it must not
    /// block for long or call back into the coordinator.
    fn create_handle(&self) -> Self::Handle;

    /// Tears the runtime down.
    async fn release(self);
}

/// The download/install/build sequence that produces the native runtime.
///
/// The coordinator does not retry or time out any of these calls.
#[async_trait]
pub trait InstallPipeline: Send + Sync + 'static {
    /// The runtime type this pipeline builds.
    type Resource: NativeResource;

    /// Returns true if a previous install left its marker artifact at `marker`.
    async fn check_already_installed(&self, marker: &Path) -> bool {
        marker::marker_exists(marker).await
    }

    /// Downloads and installs the engine distribution.
    ///
    /// Implementations write the marker artifact on success.
    async fn install(&self, config: &PipelineConfig) -> PipelineResult<()>;

    /// Builds the native runtime from installed files.
    async fn build(&self, config: &PipelineConfig) -> PipelineResult<Self::Resource>;
}
