//! Distributed simulated annealing.
//!
//! Several workers run independent annealing loops over the same problem
//! and periodically exchange their best candidates to speed up convergence.
//! Workers never share memory; they cooperate only through blocking
//! collective operations.
//!
//! - [`rng`]: per-worker random variate source.
//! - [`sa`]: cooling schedules, the problem adapter contract, and the
//!   annealing control loop.
//! - [`exchange`]: collective primitives, exchange protocols, and an
//!   in-process worker group.
//!
//! # Architecture
//!
//! The crate holds no problem-specific concepts. Cost functions, neighbor
//! moves and instance data belong to adapters implementing
//! [`sa::AnnealProblem`]; transports beyond the in-process one implement
//! [`exchange::Communicator`].

pub mod error;
pub mod exchange;
pub mod rng;
pub mod sa;

pub use error::{AnnealError, CommError, Result};
