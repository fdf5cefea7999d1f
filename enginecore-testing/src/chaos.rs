use std::path::Path;

use async_trait::async_trait;
use enginecore::{InstallPipeline, PipelineConfig, PipelineError, PipelineResult};
use nutype::nutype;
use parking_lot::Mutex;
use rand::{random, rngs::StdRng, Rng, SeedableRng};

/// Probability value for chaos engineering injection rates.
///
/// Probability represents a value in the range [0.0, 1.0] where 0.0 means
/// never inject failures and 1.0 means always inject failures.
///
/// # Examples
///
/// ```ignore
/// use enginecore_testing::chaos::Probability;
///
/// let never = Probability::try_new(0.0).unwrap();
/// let always = Probability::try_new(1.0).unwrap();
///
/// // Values outside [0.0, 1.0] are rejected
/// assert!(Probability::try_new(1.5).is_err());
/// ```
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Display, Into)
)]
pub struct Probability(f32);

/// Failure injection rates for a [`ChaosPipeline`].
#[derive(Debug, Clone)]
pub struct ChaosConfig {
    deterministic_seed: Option<u64>,
    install_failure_probability: Probability,
    build_failure_probability: Probability,
}

impl ChaosConfig {
    /// No injected failures, with a fixed seed of 0.
    pub fn deterministic() -> Self {
        Self::seeded(0)
    }

    /// No injected failures, with a fixed `seed`.
    pub fn seeded(seed: u64) -> Self {
        Self {
            deterministic_seed: Some(seed),
            ..Self::default()
        }
    }

    /// Sets the install failure rate, clamped into [0.0, 1.0].
    pub fn with_install_failure_probability(mut self, probability: f32) -> Self {
        self.install_failure_probability = clamped(probability);
        self
    }

    /// Sets the build failure rate, clamped into [0.0, 1.0].
    pub fn with_build_failure_probability(mut self, probability: f32) -> Self {
        self.build_failure_probability = clamped(probability);
        self
    }
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            deterministic_seed: None,
            install_failure_probability: clamped(0.0),
            build_failure_probability: clamped(0.0),
        }
    }
}

fn clamped(probability: f32) -> Probability {
    Probability::try_new(probability.clamp(0.0, 1.0)).expect("clamped value is always valid")
}

/// Wraps any pipeline in a [`ChaosPipeline`].
pub trait ChaosPipelineExt: Sized {
    /// Wraps `self` with the given failure rates.
    fn with_chaos(self, config: ChaosConfig) -> ChaosPipeline<Self>;
}

/// Wraps a pipeline and fails its install/build steps at random.
///
/// Injected failures happen before the inner step runs, so the inner
/// pipeline never sees a call that chaos rejected.
pub struct ChaosPipeline<P> {
    pipeline: P,
    config: ChaosConfig,
    rng: Mutex<StdRng>,
}

impl<P> ChaosPipeline<P> {
    /// Wraps `pipeline`; an unseeded config draws a random seed.
    pub fn new(pipeline: P, config: ChaosConfig) -> Self {
        let rng = match config.deterministic_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::seed_from_u64(random()),
        };

        Self {
            pipeline,
            config,
            rng: Mutex::new(rng),
        }
    }

    /// The wrapped pipeline.
    pub const fn inner(&self) -> &P {
        &self.pipeline
    }

    fn should_inject(&self, probability: Probability) -> bool {
        let prob_f32: f32 = probability.into();

        if prob_f32 <= 0.0 {
            return false;
        }

        if prob_f32 >= 1.0 {
            return true;
        }

        self.rng.lock().random_bool(f64::from(prob_f32))
    }
}

#[async_trait]
impl<P> InstallPipeline for ChaosPipeline<P>
where
    P: InstallPipeline,
{
    type Resource = P::Resource;

    async fn check_already_installed(&self, marker: &Path) -> bool {
        self.pipeline.check_already_installed(marker).await
    }

    async fn install(&self, config: &PipelineConfig) -> PipelineResult<()> {
        if self.should_inject(self.config.install_failure_probability) {
            return Err(PipelineError::Other("chaos: injected install failure".to_string()));
        }
        self.pipeline.install(config).await
    }

    async fn build(&self, config: &PipelineConfig) -> PipelineResult<Self::Resource> {
        if self.should_inject(self.config.build_failure_probability) {
            return Err(PipelineError::Other("chaos: injected build failure".to_string()));
        }
        self.pipeline.build(config).await
    }
}

impl<P> ChaosPipelineExt for P
where
    P: InstallPipeline,
{
    fn with_chaos(self, config: ChaosConfig) -> ChaosPipeline<Self> {
        ChaosPipeline::new(self, config)
    }
}
