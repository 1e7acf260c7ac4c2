//! Annealing run configuration.

use std::time::Duration;

use crate::error::{AnnealError, Result};

/// Parameters of one `solve` call.
///
/// # Examples
///
/// ```
/// use u_anneal::sa::AnnealConfig;
///
/// let config = AnnealConfig::default()
///     .with_max_iterations(10_000)
///     .with_initial_temperature(100.0)
///     .with_exchange_period(250)
///     .with_time_limit_ms(5_000)
///     .with_seed(42);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.effective_exchange_period(), 250);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AnnealConfig {
    /// Number of iterations. 0 returns the initial candidate.
    pub max_iterations: usize,

    /// Starting temperature. Must be positive.
    pub initial_temperature: f64,

    /// Iterations between exchanges.
    ///
    /// `None` means `max_iterations`, which never fires: the loop ends
    /// before the final index is reached.
    pub exchange_period: Option<usize>,

    /// Optional wall-clock limit in milliseconds.
    ///
    /// Checked at iteration boundaries. Every worker then takes part in one
    /// stop vote and one barrier before returning.
    pub time_limit_ms: Option<u64>,

    /// Run seed. Worker streams are derived from it by rank.
    ///
    /// `None` draws a fresh seed, reported in the outcome.
    pub seed: Option<u64>,

    /// Best cost is sampled into the history every this many iterations.
    pub history_interval: usize,

    /// Cost candidates received in an exchange in parallel using rayon.
    pub parallel_evaluation: bool,
}

impl Default for AnnealConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            initial_temperature: 100.0,
            exchange_period: None,
            time_limit_ms: None,
            seed: None,
            history_interval: 100,
            parallel_evaluation: false,
        }
    }
}

impl AnnealConfig {
    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_initial_temperature(mut self, t: f64) -> Self {
        self.initial_temperature = t;
        self
    }

    pub fn with_exchange_period(mut self, period: usize) -> Self {
        self.exchange_period = Some(period);
        self
    }

    pub fn with_time_limit_ms(mut self, ms: u64) -> Self {
        self.time_limit_ms = Some(ms);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_history_interval(mut self, n: usize) -> Self {
        self.history_interval = n;
        self
    }

    pub fn with_parallel_evaluation(mut self, parallel: bool) -> Self {
        self.parallel_evaluation = parallel;
        self
    }

    /// Exchange period with the default applied.
    pub fn effective_exchange_period(&self) -> usize {
        self.exchange_period.unwrap_or(self.max_iterations)
    }

    /// Time limit as a [`Duration`].
    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_ms.map(Duration::from_millis)
    }

    /// True when iteration `i` ends with an exchange.
    pub fn is_exchange_point(&self, i: usize) -> bool {
        let period = self.effective_exchange_period();
        i != 0 && period != 0 && i % period == 0
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if !(self.initial_temperature > 0.0 && self.initial_temperature.is_finite()) {
            return Err(AnnealError::Config(format!(
                "initial_temperature must be positive and finite, got {}",
                self.initial_temperature
            )));
        }
        if self.exchange_period == Some(0) {
            return Err(AnnealError::Config("exchange_period must be positive".into()));
        }
        if self.history_interval == 0 {
            return Err(AnnealError::Config("history_interval must be positive".into()));
        }
        Ok(())
    }
}
