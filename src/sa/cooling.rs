//! Cooling schedules.

use crate::error::{AnnealError, Result};

/// Default `lambda` of the logarithmic schedule.
pub const DEFAULT_LAMBDA: f64 = 1.0;

/// Maps the current temperature to the next one.
///
/// Called once per iteration. Implementations must be total on positive
/// reals and are expected (not required) to be non-increasing. The solver
/// divides by the temperature, so the caller picks parameters that keep it
/// positive over the whole iteration budget.
pub trait CoolingSchedule {
    /// Returns the temperature for the next iteration.
    fn next(&self, temperature: f64) -> f64;

    /// Checks the schedule parameters before a run.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Built-in cooling schedules.
///
/// # Examples
///
/// ```
/// use u_anneal::sa::{Cooling, CoolingSchedule};
///
/// let cooling = Cooling::Geometric { rate: 0.9 };
/// assert_eq!(cooling.next(100.0), 90.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum Cooling {
    /// Linear cooling: `T' = T - rate`.
    ///
    /// Not clamped. With `rate * iterations >= T_0` the temperature reaches
    /// zero or below.
    Linear {
        /// Fixed decrement per iteration.
        rate: f64,
    },

    /// Geometric cooling: `T' = T * rate`.
    ///
    /// Decreases monotonically for `rate` in (0, 1).
    Geometric {
        /// Multiplicative factor per iteration.
        rate: f64,
    },

    /// Logarithmic cooling: `T' = T / (1 + lambda * rate)`.
    Logarithmic {
        /// Cooling rate.
        rate: f64,
        /// Scale constant, [`DEFAULT_LAMBDA`] unless overridden.
        lambda: f64,
    },
}

impl Default for Cooling {
    fn default() -> Self {
        Cooling::Geometric { rate: 0.996 }
    }
}

impl Cooling {
    /// Logarithmic schedule with the default `lambda`.
    pub fn logarithmic(rate: f64) -> Self {
        Cooling::Logarithmic {
            rate,
            lambda: DEFAULT_LAMBDA,
        }
    }

    /// Logarithmic schedule with an explicit `lambda`.
    pub fn logarithmic_with_lambda(rate: f64, lambda: f64) -> Self {
        Cooling::Logarithmic { rate, lambda }
    }
}

impl CoolingSchedule for Cooling {
    fn next(&self, temperature: f64) -> f64 {
        match *self {
            Cooling::Linear { rate } => temperature - rate,
            Cooling::Geometric { rate } => temperature * rate,
            Cooling::Logarithmic { rate, lambda } => temperature / (1.0 + lambda * rate),
        }
    }

    fn validate(&self) -> Result<()> {
        match *self {
            Cooling::Linear { rate } => {
                if !rate.is_finite() || rate < 0.0 {
                    return Err(AnnealError::Config(format!(
                        "linear rate must be finite and non-negative, got {rate}"
                    )));
                }
            }
            Cooling::Geometric { rate } => {
                if rate <= 0.0 || rate >= 1.0 {
                    return Err(AnnealError::Config(format!(
                        "geometric rate must be in (0, 1), got {rate}"
                    )));
                }
            }
            Cooling::Logarithmic { rate, lambda } => {
                if !(rate > 0.0 && rate.is_finite()) {
                    return Err(AnnealError::Config(format!(
                        "logarithmic rate must be positive, got {rate}"
                    )));
                }
                if !(lambda > 0.0 && lambda.is_finite()) {
                    return Err(AnnealError::Config(format!(
                        "logarithmic lambda must be positive, got {lambda}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// User-supplied schedule from a closure.
///
/// ```
/// use u_anneal::sa::{CoolingSchedule, CustomCooling};
///
/// let halving = CustomCooling::new(|t| t / 2.0);
/// assert_eq!(halving.next(8.0), 4.0);
/// ```
pub struct CustomCooling<F> {
    f: F,
}

impl<F> CustomCooling<F>
where
    F: Fn(f64) -> f64,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> std::fmt::Debug for CustomCooling<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomCooling").finish_non_exhaustive()
    }
}

impl<F> CoolingSchedule for CustomCooling<F>
where
    F: Fn(f64) -> f64,
{
    fn next(&self, temperature: f64) -> f64 {
        (self.f)(temperature)
    }
}

impl<S: CoolingSchedule + ?Sized> CoolingSchedule for Box<S> {
    fn next(&self, temperature: f64) -> f64 {
        (**self).next(temperature)
    }

    fn validate(&self) -> Result<()> {
        (**self).validate()
    }
}
