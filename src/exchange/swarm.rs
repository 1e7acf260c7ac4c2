//! In-process worker group.
//!
//! Runs one annealer per thread, connected through [`local_group`], and
//! collects every worker's outcome. A failing worker drops its endpoint,
//! which makes every peer's next collective fail: the whole group aborts
//! and the first root-cause error is returned.

use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use super::comm::{local_group, LocalComm};
use super::protocol::{AllGather, Exchange, ExchangeStrategy, MinCostBroadcast};
use crate::error::{AnnealError, CommError, Result};
use crate::sa::AnnealOutcome;

/// One worker's exchange link inside a [`Swarm`].
#[derive(Debug)]
pub enum SwarmLink<C> {
    /// Link for [`ExchangeStrategy::AllGather`].
    AllGather(AllGather<LocalComm<C>>),
    /// Link for [`ExchangeStrategy::MinCostBroadcast`].
    MinCostBroadcast(MinCostBroadcast<LocalComm<C>>),
}

impl<C: Clone + Send> SwarmLink<C> {
    fn new(comm: LocalComm<C>, strategy: ExchangeStrategy) -> Self {
        match strategy {
            ExchangeStrategy::AllGather => SwarmLink::AllGather(AllGather::new(comm)),
            ExchangeStrategy::MinCostBroadcast => {
                SwarmLink::MinCostBroadcast(MinCostBroadcast::new(comm))
            }
        }
    }
}

impl<C: Clone + Send> Exchange<C> for SwarmLink<C> {
    fn rank(&self) -> usize {
        match self {
            SwarmLink::AllGather(x) => Exchange::<C>::rank(x),
            SwarmLink::MinCostBroadcast(x) => Exchange::<C>::rank(x),
        }
    }

    fn workers(&self) -> usize {
        match self {
            SwarmLink::AllGather(x) => Exchange::<C>::workers(x),
            SwarmLink::MinCostBroadcast(x) => Exchange::<C>::workers(x),
        }
    }

    fn exchange(&mut self, best: &C, best_cost: f64) -> std::result::Result<Vec<C>, CommError> {
        match self {
            SwarmLink::AllGather(x) => x.exchange(best, best_cost),
            SwarmLink::MinCostBroadcast(x) => x.exchange(best, best_cost),
        }
    }

    fn agree_to_stop(&mut self, local_stop: bool) -> std::result::Result<bool, CommError> {
        match self {
            SwarmLink::AllGather(x) => Exchange::<C>::agree_to_stop(x, local_stop),
            SwarmLink::MinCostBroadcast(x) => Exchange::<C>::agree_to_stop(x, local_stop),
        }
    }

    fn barrier(&mut self) -> std::result::Result<(), CommError> {
        match self {
            SwarmLink::AllGather(x) => Exchange::<C>::barrier(x),
            SwarmLink::MinCostBroadcast(x) => Exchange::<C>::barrier(x),
        }
    }
}

/// Outcomes of every worker in a swarm run, indexed by rank.
#[derive(Debug, Clone)]
pub struct SwarmOutcome<C> {
    /// Per-worker outcomes; `workers[r].rank == r`.
    pub workers: Vec<AnnealOutcome<C>>,
}

impl<C> SwarmOutcome<C> {
    /// Outcome with the lowest best cost; the lowest rank wins ties.
    pub fn best(&self) -> Option<&AnnealOutcome<C>> {
        self.workers
            .iter()
            .filter(|o| !o.best_cost.is_nan())
            .min_by(|a, b| a.best_cost.total_cmp(&b.best_cost))
    }

    /// Consumes the outcome and returns the best worker's candidate and cost.
    pub fn into_best(self) -> Option<(C, f64)> {
        let idx = self
            .workers
            .iter()
            .enumerate()
            .filter(|(_, o)| !o.best_cost.is_nan())
            .min_by(|a, b| a.1.best_cost.total_cmp(&b.1.best_cost))
            .map(|(i, _)| i)?;
        let outcome = self.workers.into_iter().nth(idx)?;
        Some((outcome.best, outcome.best_cost))
    }
}

/// Builder for an in-process group of cooperating workers.
///
/// # Examples
///
/// ```
/// use u_anneal::exchange::{ExchangeStrategy, Swarm};
/// use u_anneal::sa::{AnnealConfig, Annealer, Cooling, FnProblem};
///
/// let config = AnnealConfig::default()
///     .with_max_iterations(2_000)
///     .with_initial_temperature(10.0)
///     .with_exchange_period(200)
///     .with_seed(3);
///
/// let outcome = Swarm::new(4)
///     .with_strategy(ExchangeStrategy::AllGather)
///     .run(|link| {
///         let problem = FnProblem::new(
///             |_rng| 5.0_f64,
///             |x: &f64| x.abs(),
///             |x: &mut f64, rng| *x += rng.uniform_real() - 0.5,
///         );
///         Annealer::with_exchange(problem, Cooling::Geometric { rate: 0.998 }, link)
///             .solve(&config)
///     })
///     .unwrap();
///
/// assert_eq!(outcome.workers.len(), 4);
/// assert!(outcome.best().unwrap().best_cost < 5.0);
/// ```
#[derive(Debug, Clone)]
pub struct Swarm {
    workers: usize,
    strategy: ExchangeStrategy,
    recv_timeout: Option<Duration>,
}

impl Swarm {
    /// A group of `workers` threads using the all-gather exchange.
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            strategy: ExchangeStrategy::default(),
            recv_timeout: None,
        }
    }

    pub fn with_strategy(mut self, strategy: ExchangeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Turns a peer that stays silent for `timeout` into [`CommError::Timeout`].
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = Some(timeout);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn strategy(&self) -> ExchangeStrategy {
        self.strategy
    }

    /// Runs `worker` once per rank on its own thread.
    ///
    /// Every worker receives a link built from the same strategy. Returns
    /// all outcomes, or the first root-cause error if any worker failed.
    pub fn run<C, F>(&self, worker: F) -> Result<SwarmOutcome<C>>
    where
        C: Clone + Send,
        F: Fn(SwarmLink<C>) -> Result<AnnealOutcome<C>> + Sync,
    {
        if self.workers == 0 {
            return Err(AnnealError::Config("swarm needs at least one worker".into()));
        }

        info!(
            event = "swarm_start",
            workers = self.workers,
            strategy = ?self.strategy,
        );

        let links: Vec<SwarmLink<C>> = local_group::<C>(self.workers)
            .into_iter()
            .map(|comm| {
                let comm = match self.recv_timeout {
                    Some(timeout) => comm.with_recv_timeout(timeout),
                    None => comm,
                };
                SwarmLink::new(comm, self.strategy)
            })
            .collect();

        let results: Vec<Result<AnnealOutcome<C>>> = thread::scope(|scope| {
            let worker = &worker;
            let handles: Vec<_> = links
                .into_iter()
                .map(|link| {
                    let rank = Exchange::<C>::rank(&link);
                    let handle = scope.spawn(move || {
                        let result = worker(link);
                        if let Err(err) = &result {
                            warn!(event = "worker_failed", rank, error = %err);
                        }
                        result
                    });
                    (rank, handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(rank, handle)| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(AnnealError::WorkerPanicked(rank)))
                })
                .collect()
        });

        let mut workers = Vec::with_capacity(results.len());
        let mut root_cause: Option<AnnealError> = None;
        let mut peer_failure: Option<AnnealError> = None;
        for result in results {
            match result {
                Ok(outcome) => workers.push(outcome),
                Err(err) if err.is_peer_failure() => {
                    peer_failure.get_or_insert(err);
                }
                Err(err) => {
                    root_cause.get_or_insert(err);
                }
            }
        }
        if let Some(err) = root_cause.or(peer_failure) {
            return Err(err);
        }

        let outcome = SwarmOutcome { workers };
        if let Some(best) = outcome.best() {
            info!(
                event = "swarm_end",
                best_rank = best.rank,
                best_cost = best.best_cost,
            );
        }
        Ok(outcome)
    }
}

/// Runs a closure on every endpoint of a fresh in-process group.
///
/// Lower-level than [`Swarm::run`]: hands out raw communicators for
/// callers that drive collectives themselves (setup broadcasts, custom
/// reductions).
pub fn run_group<C, T, F>(size: usize, f: F) -> Vec<thread::Result<T>>
where
    C: Clone + Send,
    T: Send,
    F: Fn(LocalComm<C>) -> T + Sync,
{
    thread::scope(|scope| {
        let f = &f;
        let handles: Vec<_> = local_group::<C>(size)
            .into_iter()
            .map(|comm| scope.spawn(move || f(comm)))
            .collect();
        handles.into_iter().map(|h| h.join()).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Communicator;
    use crate::rng::VariateSource;
    use crate::sa::{AnnealConfig, AnnealProblem, Annealer, Cooling, CustomCooling};
    use std::convert::Infallible;
    use std::sync::Mutex;
    use tracing_subscriber::EnvFilter;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Permutation of `n` items; cost = number of misplaced items.
    struct PermSort {
        n: usize,
    }

    impl AnnealProblem for PermSort {
        type Candidate = Vec<usize>;
        type Error = Infallible;

        fn initial_solution(
            &self,
            rng: &mut VariateSource,
        ) -> std::result::Result<Vec<usize>, Infallible> {
            let mut perm: Vec<usize> = (0..self.n).collect();
            rng.shuffle(&mut perm);
            Ok(perm)
        }

        fn cost(&self, perm: &Vec<usize>) -> std::result::Result<f64, Infallible> {
            Ok(perm.iter().enumerate().filter(|&(i, &v)| i != v).count() as f64)
        }

        fn propose_change(
            &self,
            perm: &mut Vec<usize>,
            rng: &mut VariateSource,
        ) -> std::result::Result<(), Infallible> {
            let i = rng.uniform_int(0, self.n - 1);
            let j = rng.uniform_int(0, self.n - 1);
            perm.swap(i, j);
            Ok(())
        }
    }

    /// Candidates are indices into `costs`; moves are no-ops.
    struct Fixed {
        costs: Vec<f64>,
        start: usize,
    }

    impl AnnealProblem for Fixed {
        type Candidate = usize;
        type Error = Infallible;

        fn initial_solution(
            &self,
            _rng: &mut VariateSource,
        ) -> std::result::Result<usize, Infallible> {
            Ok(self.start)
        }

        fn cost(&self, c: &usize) -> std::result::Result<f64, Infallible> {
            Ok(self.costs[*c])
        }

        fn propose_change(
            &self,
            _c: &mut usize,
            _rng: &mut VariateSource,
        ) -> std::result::Result<(), Infallible> {
            Ok(())
        }
    }

    fn frozen_pair_config() -> AnnealConfig {
        AnnealConfig::default()
            .with_max_iterations(3)
            .with_initial_temperature(1.0)
            .with_exchange_period(1)
            .with_seed(1)
    }

    fn run_frozen_pair(strategy: ExchangeStrategy) -> SwarmOutcome<usize> {
        Swarm::new(2)
            .with_strategy(strategy)
            .run(|link| {
                let rank = Exchange::<usize>::rank(&link);
                let problem = Fixed {
                    costs: vec![5.0, 3.0],
                    start: rank,
                };
                Annealer::with_exchange(problem, CustomCooling::new(|t| t), link)
                    .solve(&frozen_pair_config())
            })
            .unwrap()
    }

    #[test]
    fn test_two_workers_adopt_cheaper_all_gather() {
        let outcome = run_frozen_pair(ExchangeStrategy::AllGather);
        for w in &outcome.workers {
            assert_eq!(w.best_cost, 3.0);
            assert_eq!(w.best, 1);
        }
        assert_eq!(outcome.workers[0].adoptions, 1);
        assert_eq!(outcome.workers[1].adoptions, 0);
        assert_eq!(outcome.workers[0].exchanges, 2);
    }

    #[test]
    fn test_two_workers_adopt_cheaper_min_cost() {
        let outcome = run_frozen_pair(ExchangeStrategy::MinCostBroadcast);
        for w in &outcome.workers {
            assert_eq!(w.best_cost, 3.0);
            assert_eq!(w.best, 1);
        }
    }

    #[test]
    fn test_swarm_best_matches_min_worker() {
        init_tracing();
        let config = AnnealConfig::default()
            .with_max_iterations(4_000)
            .with_initial_temperature(5.0)
            .with_exchange_period(100)
            .with_seed(21);
        let outcome = Swarm::new(4)
            .run(|link| {
                let cooling = Cooling::Geometric { rate: 0.999 };
                Annealer::with_exchange(PermSort { n: 10 }, cooling, link).solve(&config)
            })
            .unwrap();

        let min = outcome
            .workers
            .iter()
            .map(|w| w.best_cost)
            .fold(f64::INFINITY, f64::min);
        assert_eq!(outcome.best().unwrap().best_cost, min);
        for (rank, w) in outcome.workers.iter().enumerate() {
            assert_eq!(w.rank, rank);
            assert_eq!(w.exchanges, 39);
            for window in w.cost_history.windows(2) {
                assert!(window[1] <= window[0]);
            }
        }
        let (best, cost) = outcome.into_best().unwrap();
        assert_eq!(cost, min);
        assert_eq!(best.len(), 10);
    }

    #[test]
    fn test_workers_use_distinct_streams() {
        let config = AnnealConfig::default()
            .with_max_iterations(50)
            .with_seed(8);
        let outcome = Swarm::new(3)
            .run(|link| {
                Annealer::with_exchange(PermSort { n: 30 }, Cooling::default(), link).solve(&config)
            })
            .unwrap();
        assert!(outcome.workers.iter().all(|w| w.seed == 8));
        let bests: Vec<&Vec<usize>> = outcome.workers.iter().map(|w| &w.best).collect();
        assert!(
            bests[0] != bests[1] || bests[1] != bests[2],
            "workers should explore different trajectories"
        );
    }

    #[test]
    fn test_time_limit_terminates_all_workers() {
        init_tracing();
        let config = AnnealConfig::default()
            .with_max_iterations(usize::MAX)
            .with_exchange_period(25)
            .with_time_limit_ms(40)
            .with_seed(6);
        let slow_rank = 2;
        let outcome = Swarm::new(3)
            .with_recv_timeout(Duration::from_secs(10))
            .run(|link| {
                let rank = Exchange::<Vec<usize>>::rank(&link);
                let problem = crate::sa::FnProblem::new(
                    move |rng: &mut VariateSource| {
                        let mut p: Vec<usize> = (0..8).collect();
                        rng.shuffle(&mut p);
                        p
                    },
                    |p: &Vec<usize>| p.iter().enumerate().filter(|&(i, &v)| i != v).count() as f64,
                    move |p: &mut Vec<usize>, rng: &mut VariateSource| {
                        if rank == slow_rank {
                            thread::sleep(Duration::from_micros(500));
                        }
                        let i = rng.uniform_int(0, 7);
                        let j = rng.uniform_int(0, 7);
                        p.swap(i, j);
                    },
                );
                Annealer::with_exchange(problem, Cooling::Geometric { rate: 0.999 }, link)
                    .solve(&config)
            })
            .unwrap();

        assert_eq!(outcome.workers.len(), 3);
        for w in &outcome.workers {
            assert!(w.timed_out);
        }
    }

    #[test]
    fn test_failing_worker_aborts_group() {
        init_tracing();
        let config = AnnealConfig::default()
            .with_max_iterations(1_000)
            .with_exchange_period(10)
            .with_seed(2);
        let err = Swarm::new(3)
            .with_recv_timeout(Duration::from_secs(10))
            .run(|link| {
                if Exchange::<Vec<usize>>::rank(&link) == 1 {
                    return Err(AnnealError::Config("rank 1 refuses to start".into()));
                }
                Annealer::with_exchange(PermSort { n: 6 }, Cooling::default(), link).solve(&config)
            })
            .unwrap_err();
        assert!(matches!(err, AnnealError::Config(msg) if msg.contains("rank 1")));
    }

    #[test]
    fn test_panicking_worker_reported() {
        let err = Swarm::new(2)
            .run(|link: SwarmLink<usize>| {
                if Exchange::<usize>::rank(&link) == 0 {
                    panic!("boom");
                }
                let problem = Fixed {
                    costs: vec![1.0, 1.0],
                    start: 1,
                };
                Annealer::with_exchange(problem, Cooling::default(), link)
                    .solve(&frozen_pair_config())
            })
            .unwrap_err();
        assert!(matches!(err, AnnealError::WorkerPanicked(0)));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = Swarm::new(0)
            .run(|link: SwarmLink<u8>| {
                Annealer::with_exchange(
                    crate::sa::FnProblem::new(
                        |_rng: &mut VariateSource| 0u8,
                        |_: &u8| 0.0,
                        |_: &mut u8, _: &mut VariateSource| {},
                    ),
                    Cooling::default(),
                    link,
                )
                .solve(&AnnealConfig::default())
            })
            .unwrap_err();
        assert!(matches!(err, AnnealError::Config(_)));
    }

    #[test]
    fn test_run_group_setup_broadcast() {
        let results = run_group(3, |mut comm: LocalComm<Vec<u32>>| {
            let data = (comm.rank() == 0).then(|| vec![1, 2, 3]);
            comm.broadcast(data, 0)
        });
        for r in results {
            assert_eq!(r.unwrap().unwrap(), vec![1, 2, 3]);
        }
    }

    #[test]
    fn test_observer_sees_adoption() {
        let seen = Mutex::new(Vec::new());
        Swarm::new(2)
            .run(|link| {
                let seen = &seen;
                let rank = Exchange::<usize>::rank(&link);
                let problem = Fixed {
                    costs: vec![5.0, 3.0],
                    start: rank,
                };
                Annealer::with_exchange(problem, CustomCooling::new(|t| t), link)
                    .with_observer(move |c, cost| {
                        if let Ok(mut seen) = seen.lock() {
                            seen.push((rank, *c, cost));
                        }
                    })
                    .solve(&frozen_pair_config())
            })
            .unwrap();
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen, vec![(0, 1, 3.0)]);
    }
}
