//! Simulated Annealing (SA).
//!
//! A single-solution trajectory metaheuristic inspired by the physical
//! annealing process. Accepts worsening moves with a probability that
//! decreases with the temperature, allowing the search to escape local
//! optima. Several workers may run the same loop and periodically trade
//! their best candidates (see [`crate::exchange`]).
//!
//! # References
//!
//! - Kirkpatrick, Gelatt & Vecchi (1983), "Optimization by Simulated Annealing"
//! - Metropolis et al. (1953), "Equation of State Calculations by Fast Computing Machines"

mod config;
mod cooling;
mod runner;
mod types;

pub use config::AnnealConfig;
pub use cooling::{Cooling, CoolingSchedule, CustomCooling, DEFAULT_LAMBDA};
pub use runner::{AnnealOutcome, Annealer, SolverState};
pub use types::{AnnealProblem, FnProblem};
