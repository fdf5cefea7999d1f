//! The lifecycle coordinator for the shared engine runtime.
//!
//! The coordinator drives a [`StateCell`] through its transitions and runs
//! the install/build pipeline at most once per claimed attempt:
//!
//! - **initialize**: the first caller to move `Idle`/`Failed` to `InProgress`
//!   becomes the claimer and runs the pipeline; everyone else returns at once
//! - **`create_handle`**: suspends while an attempt is running, then answers
//!   from the state that attempt left behind
//! - **dispose**: moves `Ready` to `Disposed` and releases the runtime once
//!
//! Pipeline failures are published into shared state and reported through
//! the claimer's callbacks only. Non-claimers see them on their next
//! `create_handle`.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::config::PipelineConfig;
use crate::errors::{FailureCause, RuntimeError, RuntimeResult};
use crate::pipeline::{InstallPipeline, NativeResource};
use crate::state::{AttemptId, LifecycleState, Phase};
use crate::state_cell::{PhaseWatcher, StateCell};

/// The handle type produced by pipeline `P`'s runtime.
pub type EngineHandle<P> = <<P as InstallPipeline>::Resource as NativeResource>::Handle;

/// What an `initialize` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// This call claimed the attempt and ran the pipeline.
    Claimed {
        /// The attempt this call ran.
        attempt: AttemptId,
        /// The phase this attempt ended in.
        phase: Phase,
    },
    /// Another caller's attempt was already running.
    AlreadyInProgress,
    /// The runtime was already ready.
    AlreadyReady,
}

impl InitOutcome {
    /// Whether this call ran the pipeline.
    pub const fn is_claimer(&self) -> bool {
        matches!(self, Self::Claimed { .. })
    }
}

/// What a `dispose` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposeOutcome {
    /// This call moved the runtime to `Disposed` and released it.
    Released,
    /// There was nothing to release.
    NoOp,
}

/// Coordinates one-time initialization, handle creation and disposal of the
/// shared engine runtime.
///
/// All operations are safe to call concurrently and in any order. Share the
/// coordinator behind an `Arc`.
pub struct LifecycleCoordinator<P: InstallPipeline> {
    pipeline: P,
    state: Arc<StateCell<P::Resource>>,
}

impl<P: InstallPipeline> LifecycleCoordinator<P> {
    /// Creates a coordinator with a fresh `Idle` state cell.
    pub fn new(pipeline: P) -> Self {
        Self::with_state(pipeline, Arc::new(StateCell::new()))
    }

    /// Creates a coordinator over an existing state cell.
    pub const fn with_state(pipeline: P, state: Arc<StateCell<P::Resource>>) -> Self {
        Self { pipeline, state }
    }

    /// The pipeline this coordinator drives.
    pub const fn pipeline(&self) -> &P {
        &self.pipeline
    }

    /// The state cell this coordinator mutates.
    pub const fn state_cell(&self) -> &Arc<StateCell<P::Resource>> {
        &self.state
    }

    /// Current phase, without blocking.
    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Returns a watcher over subsequent phase changes.
    pub fn subscribe(&self) -> PhaseWatcher<P::Resource> {
        self.state.subscribe()
    }

    /// Starts initialization unless an attempt is running or has succeeded.
    ///
    /// Only the claimer runs the pipeline, and only the claimer's
    /// `on_error` and `on_restart_required` are ever invoked. Pipeline
    /// failures are reported through those callbacks, not the return value.
    ///
    /// The attempt counts as running until this call returns, so callers
    /// arriving after a failure was published but before the claimer's
    /// callbacks ran get `AlreadyInProgress`.
    #[instrument(skip_all, fields(install_dir = %config.install_dir().display()))]
    pub async fn initialize<E, F>(
        &self,
        config: &PipelineConfig,
        on_error: E,
        on_restart_required: F,
    ) -> RuntimeResult<InitOutcome>
    where
        E: FnOnce(FailureCause) + Send,
        F: FnOnce() + Send,
    {
        let attempt = match self.state.claim() {
            Ok(attempt) => attempt,
            Err(Phase::Disposed) => return Err(RuntimeError::Disposed),
            Err(Phase::Ready) => {
                debug!("Engine runtime already ready");
                return Ok(InitOutcome::AlreadyReady);
            }
            Err(phase) => {
                debug!(%phase, "Engine runtime initialization already claimed");
                return Ok(InitOutcome::AlreadyInProgress);
            }
        };

        info!(%attempt, "Claimed engine runtime initialization");
        let _guard = AttemptGuard {
            state: self.state.as_ref(),
            attempt,
        };
        let phase = self
            .run_pipeline(attempt, config, on_error, on_restart_required)
            .await;
        Ok(InitOutcome::Claimed { attempt, phase })
    }

    async fn run_pipeline<E, F>(
        &self,
        attempt: AttemptId,
        config: &PipelineConfig,
        on_error: E,
        on_restart_required: F,
    ) -> Phase
    where
        E: FnOnce(FailureCause) + Send,
        F: FnOnce() + Send,
    {
        let marker = config.marker_path();
        if self.pipeline.check_already_installed(&marker).await {
            debug!(
                %attempt,
                marker = %marker.display(),
                "Install marker present, skipping install"
            );
            return match self.pipeline.build(config).await {
                Ok(resource) => self.publish_ready(attempt, resource).await,
                Err(e) => {
                    let cause = FailureCause::build(e);
                    self.publish_failure(attempt, cause.clone());
                    on_error(cause);
                    Phase::Failed
                }
            };
        }

        match self.pipeline.install(config).await {
            Ok(()) => match self.pipeline.build(config).await {
                Ok(resource) => self.publish_ready(attempt, resource).await,
                Err(e) => {
                    let cause = FailureCause::build(e);
                    self.publish_failure(attempt, cause.clone());
                    on_error(cause);
                    self.require_restart(attempt, on_restart_required);
                    Phase::Failed
                }
            },
            Err(e) => {
                let cause = FailureCause::install(e);
                self.publish_failure(attempt, cause.clone());
                on_error(cause);

                // Best effort: some platforms leave a usable install behind
                // even when the install step reports failure. The outcome is
                // still restart-required.
                match self.pipeline.build(config).await {
                    Ok(resource) => {
                        debug!(%attempt, "Releasing runtime built after failed install");
                        resource.release().await;
                    }
                    Err(e) => warn!(%attempt, error = %e, "Build after failed install also failed"),
                }
                self.require_restart(attempt, on_restart_required);
                Phase::Failed
            }
        }
    }

    async fn publish_ready(&self, attempt: AttemptId, resource: P::Resource) -> Phase {
        match self
            .state
            .compare_and_set(attempt, Phase::InProgress, LifecycleState::Ready(resource))
        {
            Ok(()) => {
                info!(%attempt, "Engine runtime ready");
                Phase::Ready
            }
            Err(rejected) => {
                warn!(%attempt, "Discarding runtime from superseded attempt");
                if let Some(resource) = rejected.into_resource() {
                    resource.release().await;
                }
                self.state.phase()
            }
        }
    }

    fn publish_failure(&self, attempt: AttemptId, cause: FailureCause) {
        warn!(%attempt, %cause, "Engine runtime initialization failed");
        if self
            .state
            .compare_and_set(attempt, Phase::InProgress, LifecycleState::Failed(cause))
            .is_err()
        {
            warn!(%attempt, "Discarding failure from superseded attempt");
        }
    }

    fn require_restart<F: FnOnce()>(&self, attempt: AttemptId, on_restart_required: F) {
        if self
            .state
            .compare_and_set(
                attempt,
                Phase::Failed,
                LifecycleState::Failed(FailureCause::ApplicationRestartRequired),
            )
            .is_err()
        {
            warn!(%attempt, "A newer attempt superseded this one; restart-required not recorded");
        }
        error!(%attempt, "Engine runtime requires an application restart");
        on_restart_required();
    }

    /// Creates a new handle from the ready runtime.
    ///
    /// Suspends while an attempt is in progress and answers from the state
    /// that attempt leaves behind. There is no timeout.
    #[instrument(skip(self))]
    pub async fn create_handle(&self) -> RuntimeResult<EngineHandle<P>> {
        loop {
            let evaluated = self.state.read(|state| match state {
                LifecycleState::Idle => Some(Err(RuntimeError::NotInitialized)),
                LifecycleState::Disposed => Some(Err(RuntimeError::Disposed)),
                LifecycleState::Failed(cause) => Some(Err(RuntimeError::General(cause.clone()))),
                LifecycleState::Ready(resource) => Some(Ok(resource.create_handle())),
                LifecycleState::InProgress => None,
            });

            match evaluated {
                Some(result) => return result,
                None => {
                    debug!("Waiting for engine runtime initialization");
                    self.state.wait_while(Phase::InProgress).await;
                }
            }
        }
    }

    /// Like [`create_handle`](Self::create_handle), but reports errors to
    /// `on_error` and returns `None` instead.
    pub async fn create_handle_or_none<E>(&self, on_error: E) -> Option<EngineHandle<P>>
    where
        E: FnOnce(RuntimeError) + Send,
    {
        match self.create_handle().await {
            Ok(handle) => Some(handle),
            Err(e) => {
                on_error(e);
                None
            }
        }
    }

    /// Disposes the runtime if it is ready.
    ///
    /// Waits out a running attempt first. After a successful dispose every
    /// `initialize` and `create_handle` fails with `RuntimeError::Disposed`.
    #[instrument(skip(self))]
    pub async fn dispose(&self) -> DisposeOutcome {
        loop {
            match self.state.phase() {
                Phase::InProgress => {
                    debug!("Waiting for engine runtime initialization before dispose");
                    self.state.wait_while(Phase::InProgress).await;
                }
                Phase::Ready => {
                    // Losing the race to another dispose falls through to
                    // the `Disposed` arm on the next pass.
                    if let Some(resource) = self.state.take_ready() {
                        info!("Releasing engine runtime");
                        resource.release().await;
                        return DisposeOutcome::Released;
                    }
                }
                phase => {
                    debug!(%phase, "Nothing to dispose");
                    return DisposeOutcome::NoOp;
                }
            }
        }
    }
}

/// Ends the claimed attempt when the claimer is done with it, including
/// when its `initialize` future is dropped.
struct AttemptGuard<'a, R> {
    state: &'a StateCell<R>,
    attempt: AttemptId,
}

impl<R> Drop for AttemptGuard<'_, R> {
    fn drop(&mut self) {
        self.state.finish(self.attempt);
        debug!(attempt = %self.attempt, "Engine runtime initialization attempt finished");
    }
}

impl<P: InstallPipeline> fmt::Debug for LifecycleCoordinator<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleCoordinator")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
