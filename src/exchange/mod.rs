//! Cooperation between annealing workers.
//!
//! Workers share no memory. They meet only in blocking collectives issued
//! by an [`Exchange`]: every `exchange_period` iterations each worker offers
//! its best candidate and adopts a cheaper one from the group.
//!
//! - [`Communicator`]: the four collectives the protocols need
//!   (all-gather, min-reduction, broadcast, barrier). [`LocalComm`]
//!   implements them for threads in one process.
//! - [`AllGather`] / [`MinCostBroadcast`]: the two exchange protocols.
//! - [`Swarm`]: runs a group of workers on scoped threads.

mod comm;
mod protocol;
mod swarm;

pub use comm::{local_group, Communicator, LocalComm};
pub use protocol::{AllGather, Exchange, ExchangeFn, ExchangeStrategy, MinCostBroadcast, Solo};
pub use swarm::{run_group, Swarm, SwarmLink, SwarmOutcome};
