//! Exchange protocols.
//!
//! An [`Exchange`] is the only component allowed to issue collective calls
//! during a solve: the periodic candidate exchange, the stop vote and the
//! termination barrier. Keeping them in one place keeps the number and
//! order of collectives identical on every worker.

use std::fmt;

use super::comm::Communicator;
use crate::error::CommError;

/// How workers share their best candidates.
///
/// Pick one per deployment and use it on every worker; the variants issue
/// different collectives and cannot be mixed inside one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ExchangeStrategy {
    /// Every worker receives every best candidate and costs them locally.
    #[default]
    AllGather,
    /// Workers agree on the minimum cost and only the holder broadcasts its
    /// candidate. Cheaper when candidates are large or workers many.
    MinCostBroadcast,
}

/// Link between one worker's solver and its peers.
pub trait Exchange<C> {
    /// Rank of this worker.
    fn rank(&self) -> usize {
        0
    }

    /// Number of workers in the group.
    fn workers(&self) -> usize {
        1
    }

    /// Contributes this worker's best candidate and returns candidates
    /// offered by the group. The solver costs them and adopts the best.
    fn exchange(&mut self, best: &C, best_cost: f64) -> Result<Vec<C>, CommError>;

    /// Collective stop vote. Returns true if any worker wants to stop.
    fn agree_to_stop(&mut self, local_stop: bool) -> Result<bool, CommError> {
        Ok(local_stop)
    }

    /// Synchronizes all workers before they return.
    fn barrier(&mut self) -> Result<(), CommError> {
        Ok(())
    }
}

impl<C, X: Exchange<C> + ?Sized> Exchange<C> for &mut X {
    fn rank(&self) -> usize {
        (**self).rank()
    }

    fn workers(&self) -> usize {
        (**self).workers()
    }

    fn exchange(&mut self, best: &C, best_cost: f64) -> Result<Vec<C>, CommError> {
        (**self).exchange(best, best_cost)
    }

    fn agree_to_stop(&mut self, local_stop: bool) -> Result<bool, CommError> {
        (**self).agree_to_stop(local_stop)
    }

    fn barrier(&mut self) -> Result<(), CommError> {
        (**self).barrier()
    }
}

/// A lone worker. Exchanges return nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Solo;

impl<C> Exchange<C> for Solo {
    fn exchange(&mut self, _best: &C, _best_cost: f64) -> Result<Vec<C>, CommError> {
        Ok(Vec::new())
    }
}

/// Encodes a local stop flag for a min-reduction: any 0.0 stops everyone.
fn stop_vote<C, M: Communicator<C>>(comm: &mut M, local_stop: bool) -> Result<bool, CommError> {
    let ballot = if local_stop { 0.0 } else { 1.0 };
    Ok(comm.all_reduce_min(ballot)? == 0.0)
}

/// All-gather exchange: every worker receives all best candidates.
#[derive(Debug)]
pub struct AllGather<M> {
    comm: M,
}

impl<M> AllGather<M> {
    pub fn new(comm: M) -> Self {
        Self { comm }
    }

    pub fn into_inner(self) -> M {
        self.comm
    }
}

impl<C: Clone, M: Communicator<C>> Exchange<C> for AllGather<M> {
    fn rank(&self) -> usize {
        self.comm.rank()
    }

    fn workers(&self) -> usize {
        self.comm.size()
    }

    fn exchange(&mut self, best: &C, _best_cost: f64) -> Result<Vec<C>, CommError> {
        self.comm.all_gather(best.clone())
    }

    fn agree_to_stop(&mut self, local_stop: bool) -> Result<bool, CommError> {
        stop_vote::<C, M>(&mut self.comm, local_stop)
    }

    fn barrier(&mut self) -> Result<(), CommError> {
        self.comm.barrier()
    }
}

/// Min-reduction exchange: only the global winner's candidate travels.
///
/// Two reductions pick the winner (lowest cost, then lowest rank among the
/// holders of that cost) and one broadcast ships its candidate.
#[derive(Debug)]
pub struct MinCostBroadcast<M> {
    comm: M,
}

impl<M> MinCostBroadcast<M> {
    pub fn new(comm: M) -> Self {
        Self { comm }
    }

    pub fn into_inner(self) -> M {
        self.comm
    }
}

impl<C: Clone, M: Communicator<C>> Exchange<C> for MinCostBroadcast<M> {
    fn rank(&self) -> usize {
        self.comm.rank()
    }

    fn workers(&self) -> usize {
        self.comm.size()
    }

    fn exchange(&mut self, best: &C, best_cost: f64) -> Result<Vec<C>, CommError> {
        let rank = self.comm.rank();
        let global_min = self.comm.all_reduce_min(best_cost)?;
        let claim = if best_cost == global_min {
            rank as f64
        } else {
            f64::INFINITY
        };
        let root = self.comm.all_reduce_min(claim)?;
        if !root.is_finite() {
            // No worker holds a comparable cost (all NaN): nothing to adopt.
            return Ok(Vec::new());
        }
        let root = root as usize;
        let offer = (rank == root).then(|| best.clone());
        let winner = self.comm.broadcast(offer, root)?;
        Ok(vec![winner])
    }

    fn agree_to_stop(&mut self, local_stop: bool) -> Result<bool, CommError> {
        stop_vote::<C, M>(&mut self.comm, local_stop)
    }

    fn barrier(&mut self) -> Result<(), CommError> {
        self.comm.barrier()
    }
}

/// Exchange from a callback: `exchange(candidate) -> candidates`.
///
/// Useful when the transport lives outside this crate. Stop votes and
/// barriers are local no-ops, so time limits are only safe when the
/// callback's transport tolerates workers stopping independently.
pub struct ExchangeFn<F> {
    f: F,
}

impl<F> ExchangeFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for ExchangeFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeFn").finish_non_exhaustive()
    }
}

impl<C, F> Exchange<C> for ExchangeFn<F>
where
    F: FnMut(&C) -> Result<Vec<C>, CommError>,
{
    fn exchange(&mut self, best: &C, _best_cost: f64) -> Result<Vec<C>, CommError> {
        (self.f)(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::comm::local_group;
    use std::thread;

    #[test]
    fn test_solo_returns_nothing() {
        let mut solo = Solo;
        let got: Vec<u8> = solo.exchange(&3, 3.0).unwrap();
        assert!(got.is_empty());
        assert!(Exchange::<u8>::agree_to_stop(&mut solo, true).unwrap());
        assert!(!Exchange::<u8>::agree_to_stop(&mut solo, false).unwrap());
        assert_eq!(Exchange::<u8>::workers(&solo), 1);
    }

    #[test]
    fn test_all_gather_exchange() {
        let handles: Vec<_> = local_group::<Vec<u8>>(3)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let mut link = AllGather::new(comm);
                    let rank = Exchange::<Vec<u8>>::rank(&link) as u8;
                    link.exchange(&vec![rank], rank as f64).unwrap()
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), vec![vec![0], vec![1], vec![2]]);
        }
    }

    #[test]
    fn test_min_cost_broadcast_ships_only_winner() {
        let costs = [5.0, 3.0, 3.0, 8.0];
        let handles: Vec<_> = local_group::<&'static str>(4)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let mut link = MinCostBroadcast::new(comm);
                    let rank = Exchange::<&str>::rank(&link);
                    let name = ["a", "b", "c", "d"][rank];
                    link.exchange(&name, costs[rank]).unwrap()
                })
            })
            .collect();
        for h in handles {
            // ranks 1 and 2 tie on cost; the lower rank wins
            assert_eq!(h.join().unwrap(), vec!["b"]);
        }
    }

    #[test]
    fn test_stop_vote_any_stops_all() {
        let handles: Vec<_> = local_group::<()>(3)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let mut link = AllGather::new(comm);
                    let rank = Exchange::<()>::rank(&link);
                    let first = Exchange::<()>::agree_to_stop(&mut link, false).unwrap();
                    let second = Exchange::<()>::agree_to_stop(&mut link, rank == 1).unwrap();
                    Exchange::<()>::barrier(&mut link).unwrap();
                    (first, second)
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), (false, true));
        }
    }

    #[test]
    fn test_exchange_fn_callback() {
        let mut calls = 0;
        let mut link = ExchangeFn::new(|c: &u32| -> Result<Vec<u32>, CommError> {
            calls += 1;
            Ok(vec![*c, c + 1])
        });
        assert_eq!(link.exchange(&4, 4.0).unwrap(), vec![4, 5]);
        drop(link);
        assert_eq!(calls, 1);
    }
}
