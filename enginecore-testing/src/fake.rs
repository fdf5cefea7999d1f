//! A scriptable in-memory pipeline and runtime.
//!
//! `FakePipeline` records every call, fails steps on demand, and can hold a
//! step open behind a [`Gate`] so that tests can observe the coordinator
//! while an attempt is `InProgress`.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use enginecore::{
    marker, InstallPipeline, NativeResource, PipelineConfig, PipelineError, PipelineResult,
};
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};

/// Holds a pipeline step until opened.
///
/// Opening is permanent: every current and future waiter passes.
#[derive(Debug)]
pub struct Gate {
    // A closed semaphore fails every acquire immediately, which is exactly
    // the "open forever" behavior.
    permits: Semaphore,
    arrived: AtomicUsize,
    arrival: Notify,
}

impl Gate {
    /// Creates a closed gate, shared between the test and the pipeline.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            permits: Semaphore::new(0),
            arrived: AtomicUsize::new(0),
            arrival: Notify::new(),
        })
    }

    /// Lets every waiter through.
    pub fn open(&self) {
        self.permits.close();
    }

    /// Whether [`open`](Self::open) has been called.
    pub fn is_open(&self) -> bool {
        self.permits.is_closed()
    }

    /// Number of steps that have reached the gate.
    pub fn arrived(&self) -> usize {
        self.arrived.load(Ordering::SeqCst)
    }

    /// Waits until at least `count` steps have reached the gate.
    pub async fn wait_for_arrivals(&self, count: usize) {
        loop {
            let notified = self.arrival.notified();
            if self.arrived() >= count {
                return;
            }
            notified.await;
        }
    }

    async fn pass(&self) {
        let _ = self.arrived.fetch_add(1, Ordering::SeqCst);
        self.arrival.notify_waiters();
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }
}

/// Shared call counters for a [`FakePipeline`] and the runtimes it builds.
#[derive(Debug, Default)]
pub struct PipelineStats {
    install_checks: AtomicUsize,
    installs: AtomicUsize,
    builds: AtomicUsize,
    resources_built: AtomicUsize,
    handles_created: AtomicUsize,
    releases: AtomicUsize,
}

impl PipelineStats {
    /// Calls to `check_already_installed`.
    pub fn install_checks(&self) -> usize {
        self.install_checks.load(Ordering::SeqCst)
    }

    /// Install steps that got past their gate.
    pub fn installs(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    /// Build steps that got past their gate.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Runtimes successfully built.
    pub fn resources_built(&self) -> usize {
        self.resources_built.load(Ordering::SeqCst)
    }

    /// Handles created across all runtimes.
    pub fn handles_created(&self) -> usize {
        self.handles_created.load(Ordering::SeqCst)
    }

    /// Runtimes released.
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Number of check-install calls, i.e. attempts that ran the pipeline.
    pub fn pipeline_runs(&self) -> usize {
        self.install_checks()
    }
}

/// Outcome of one scripted pipeline step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step succeeds.
    Succeed,
    /// The step fails with this message.
    Fail(String),
}

/// An install/build pipeline driven entirely from the test.
#[derive(Debug)]
pub struct FakePipeline {
    stats: Arc<PipelineStats>,
    installed: AtomicBool,
    marker_on_disk: bool,
    install_script: Mutex<VecDeque<StepOutcome>>,
    build_script: Mutex<VecDeque<StepOutcome>>,
    install_gate: Option<Arc<Gate>>,
    build_gate: Option<Arc<Gate>>,
}

impl Default for FakePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePipeline {
    /// A pipeline whose steps all succeed and whose marker lives in memory.
    pub fn new() -> Self {
        Self {
            stats: Arc::new(PipelineStats::default()),
            installed: AtomicBool::new(false),
            marker_on_disk: false,
            install_script: Mutex::new(VecDeque::new()),
            build_script: Mutex::new(VecDeque::new()),
            install_gate: None,
            build_gate: None,
        }
    }

    /// Starts with the in-memory marker already present.
    #[must_use]
    pub fn already_installed(self) -> Self {
        self.installed.store(true, Ordering::SeqCst);
        self
    }

    /// Uses the real marker file at `PipelineConfig::marker_path`.
    #[must_use]
    pub fn with_marker_on_disk(mut self) -> Self {
        self.marker_on_disk = true;
        self
    }

    /// Makes the next unscripted install fail with `message`.
    #[must_use]
    pub fn fail_install(self, message: impl Into<String>) -> Self {
        self.install_script
            .lock()
            .push_back(StepOutcome::Fail(message.into()));
        self
    }

    /// Makes the next unscripted build fail with `message`.
    #[must_use]
    pub fn fail_build(self, message: impl Into<String>) -> Self {
        self.build_script
            .lock()
            .push_back(StepOutcome::Fail(message.into()));
        self
    }

    /// Appends outcomes for upcoming install calls.
    #[must_use]
    pub fn script_installs(self, outcomes: impl IntoIterator<Item = StepOutcome>) -> Self {
        self.install_script.lock().extend(outcomes);
        self
    }

    /// Appends outcomes for upcoming build calls.
    #[must_use]
    pub fn script_builds(self, outcomes: impl IntoIterator<Item = StepOutcome>) -> Self {
        self.build_script.lock().extend(outcomes);
        self
    }

    /// Holds every install call at `gate`.
    #[must_use]
    pub fn with_install_gate(mut self, gate: Arc<Gate>) -> Self {
        self.install_gate = Some(gate);
        self
    }

    /// Holds every build call at `gate`.
    #[must_use]
    pub fn with_build_gate(mut self, gate: Arc<Gate>) -> Self {
        self.build_gate = Some(gate);
        self
    }

    /// Counters shared with every runtime this pipeline builds.
    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    fn next_outcome(script: &Mutex<VecDeque<StepOutcome>>) -> StepOutcome {
        script.lock().pop_front().unwrap_or(StepOutcome::Succeed)
    }
}

#[async_trait]
impl InstallPipeline for FakePipeline {
    type Resource = FakeResource;

    async fn check_already_installed(&self, marker_path: &Path) -> bool {
        let _ = self.stats.install_checks.fetch_add(1, Ordering::SeqCst);
        if self.marker_on_disk {
            marker::marker_exists(marker_path).await
        } else {
            self.installed.load(Ordering::SeqCst)
        }
    }

    async fn install(&self, config: &PipelineConfig) -> PipelineResult<()> {
        if let Some(gate) = &self.install_gate {
            gate.pass().await;
        }
        let _ = self.stats.installs.fetch_add(1, Ordering::SeqCst);

        match Self::next_outcome(&self.install_script) {
            StepOutcome::Succeed => {
                if self.marker_on_disk {
                    marker::write_marker(&config.marker_path()).await?;
                }
                self.installed.store(true, Ordering::SeqCst);
                Ok(())
            }
            StepOutcome::Fail(message) => Err(PipelineError::Download(message)),
        }
    }

    async fn build(&self, _config: &PipelineConfig) -> PipelineResult<FakeResource> {
        if let Some(gate) = &self.build_gate {
            gate.pass().await;
        }
        let _ = self.stats.builds.fetch_add(1, Ordering::SeqCst);

        match Self::next_outcome(&self.build_script) {
            StepOutcome::Succeed => {
                let id = self.stats.resources_built.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(FakeResource {
                    id,
                    stats: Arc::clone(&self.stats),
                })
            }
            StepOutcome::Fail(message) => Err(PipelineError::Build(message)),
        }
    }
}

/// A runtime built by [`FakePipeline`].
#[derive(Debug)]
pub struct FakeResource {
    id: usize,
    stats: Arc<PipelineStats>,
}

impl FakeResource {
    /// Build order of this runtime, starting at 1.
    pub const fn id(&self) -> usize {
        self.id
    }
}

#[async_trait]
impl NativeResource for FakeResource {
    type Handle = FakeHandle;

    fn create_handle(&self) -> FakeHandle {
        let serial = self.stats.handles_created.fetch_add(1, Ordering::SeqCst) + 1;
        FakeHandle {
            resource_id: self.id,
            serial,
        }
    }

    async fn release(self) {
        let _ = self.stats.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// A client handle created from a [`FakeResource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeHandle {
    /// Id of the runtime that created this handle.
    pub resource_id: usize,
    /// Creation order across all runtimes of the pipeline, starting at 1.
    pub serial: usize,
}
