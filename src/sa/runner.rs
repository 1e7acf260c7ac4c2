//! Annealing control loop.
//!
//! # Algorithm
//!
//! 1. Seed `current` and `best` with the adapter's initial candidate
//! 2. At each iteration:
//!    a. Keep a copy of `current`, let the adapter mutate `current` in place
//!    b. Metropolis acceptance: improvements always, worsening moves with
//!       probability `exp(-delta / T)`, otherwise restore the copy
//!    c. Cool the temperature
//!    d. On an exchange point, share `best` with the other workers and adopt
//!       the cheapest candidate received if it beats the local best
//!    e. Stop early when the time limit has passed
//! 3. With a time limit, finish with one stop vote and one barrier

use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{debug, info, trace, warn};

use super::config::AnnealConfig;
use super::cooling::CoolingSchedule;
use super::types::AnnealProblem;
use crate::error::{AnnealError, Result};
use crate::exchange::{Exchange, Solo};
use crate::rng::VariateSource;

/// Result of one worker's annealing run.
#[derive(Debug, Clone)]
pub struct AnnealOutcome<C> {
    /// Best candidate seen by this worker (or adopted from a peer).
    pub best: C,

    /// Cost of `best`.
    pub best_cost: f64,

    /// Completed iterations.
    pub iterations: usize,

    /// Temperature after the last iteration.
    pub final_temperature: f64,

    /// Accepted moves, improvements included.
    pub accepted_moves: usize,

    /// Strictly improving moves.
    pub improving_moves: usize,

    /// Exchanges this worker took part in.
    pub exchanges: usize,

    /// Exchanges in which a peer's candidate replaced the local best.
    pub adoptions: usize,

    /// Whether the run was cut short by the time limit (on any worker).
    pub timed_out: bool,

    /// Run seed; `VariateSource::for_worker(seed, rank)` replays this worker.
    pub seed: u64,

    /// Rank of the worker that produced this outcome.
    pub rank: usize,

    /// Best cost sampled every `history_interval` iterations, plus the final value.
    pub cost_history: Vec<f64>,

    /// Wall-clock time spent in `solve`.
    pub elapsed: Duration,
}

/// Mutable search state of one `solve` call.
#[derive(Debug, Clone)]
pub struct SolverState<C> {
    /// Candidate the walk is currently at.
    pub current: C,

    /// Cost of `current`.
    pub current_cost: f64,

    /// Best candidate seen so far.
    pub best: C,

    /// Cost of `best`. Never above `current_cost`.
    pub best_cost: f64,

    /// Temperature used by the next acceptance test.
    pub temperature: f64,

    /// Index of the iteration in progress.
    pub iteration: usize,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: usize,
    improving: usize,
    exchanges: usize,
    adoptions: usize,
}

type Observer<'a, C> = Box<dyn FnMut(&C, f64) + 'a>;

/// Simulated annealing solver for one worker.
///
/// Owns the problem adapter, a cooling schedule behind
/// [`CoolingSchedule`], and the worker's link to its peers.
///
/// # Examples
///
/// ```
/// use u_anneal::sa::{AnnealConfig, Annealer, Cooling, FnProblem};
///
/// let problem = FnProblem::new(
///     |_rng| 8.0_f64,
///     |x: &f64| x * x,
///     |x: &mut f64, rng| *x += rng.uniform_real() - 0.5,
/// );
/// let mut annealer = Annealer::new(problem, Cooling::Geometric { rate: 0.999 });
/// let config = AnnealConfig::default()
///     .with_max_iterations(5_000)
///     .with_initial_temperature(10.0)
///     .with_seed(1);
///
/// let outcome = annealer.solve(&config).unwrap();
/// assert!(outcome.best_cost < 64.0);
/// ```
pub struct Annealer<'a, P: AnnealProblem, X = Solo> {
    problem: P,
    cooling: Box<dyn CoolingSchedule + 'a>,
    exchange: X,
    observer: Option<Observer<'a, P::Candidate>>,
}

impl<'a, P: AnnealProblem> Annealer<'a, P, Solo> {
    /// Creates a single-worker annealer.
    pub fn new(problem: P, cooling: impl CoolingSchedule + 'a) -> Self {
        Self::with_exchange(problem, cooling, Solo)
    }
}

impl<'a, P, X> Annealer<'a, P, X>
where
    P: AnnealProblem,
    X: Exchange<P::Candidate>,
{
    /// Creates an annealer linked to its peers through `exchange`.
    pub fn with_exchange(problem: P, cooling: impl CoolingSchedule + 'a, exchange: X) -> Self {
        Self {
            problem,
            cooling: Box::new(cooling),
            exchange,
            observer: None,
        }
    }

    /// Calls `observer(best, best_cost)` whenever the best candidate improves.
    pub fn with_observer(mut self, observer: impl FnMut(&P::Candidate, f64) + 'a) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn problem(&self) -> &P {
        &self.problem
    }

    /// Runs the annealing loop and returns this worker's best candidate.
    ///
    /// Configuration errors are reported before the first iteration and
    /// before any collective call. Adapter and communication errors abort
    /// the run; there is no partial result.
    pub fn solve(&mut self, config: &AnnealConfig) -> Result<AnnealOutcome<P::Candidate>> {
        config.validate()?;
        self.cooling.validate()?;

        let started = Instant::now();
        let rank = self.exchange.rank();
        let seed = config.seed.unwrap_or_else(rand::random);
        let mut rng = VariateSource::for_worker(seed, rank);
        let time_limit = config.time_limit();

        info!(
            event = "solve_start",
            rank,
            workers = self.exchange.workers(),
            seed,
            max_iterations = config.max_iterations,
            exchange_period = config.effective_exchange_period(),
        );

        let initial = self
            .problem
            .initial_solution(&mut rng)
            .map_err(AnnealError::problem)?;
        let initial_cost = self.cost(&initial)?;
        let mut state = SolverState {
            best: initial.clone(),
            best_cost: initial_cost,
            current: initial,
            current_cost: initial_cost,
            temperature: config.initial_temperature,
            iteration: 0,
        };

        let mut counters = Counters::default();
        let mut cost_history = vec![state.best_cost];
        let mut timed_out = false;
        let mut voted = false;

        for i in 0..config.max_iterations {
            state.iteration = i;
            self.step(&mut state, &mut rng, &mut counters)?;
            state.temperature = self.cooling.next(state.temperature);

            if config.is_exchange_point(i) {
                if let Some(limit) = time_limit {
                    let local_stop = started.elapsed() > limit;
                    if self.exchange.agree_to_stop(local_stop)? {
                        timed_out = true;
                        voted = true;
                        state.iteration = i + 1;
                        break;
                    }
                }
                self.exchange_best(&mut state, config, &mut counters)?;
            }

            state.iteration = i + 1;
            if (i + 1) % config.history_interval == 0 {
                cost_history.push(state.best_cost);
            }

            if let Some(limit) = time_limit {
                if started.elapsed() > limit {
                    warn!(event = "time_limit", rank, iteration = i + 1);
                    timed_out = true;
                    break;
                }
            }
        }

        if time_limit.is_some() {
            // One termination round on every worker: peers still waiting at
            // an exchange point must see this worker's vote.
            if !voted {
                timed_out |= self.exchange.agree_to_stop(timed_out)?;
            }
            self.exchange.barrier()?;
        }

        if cost_history.last() != Some(&state.best_cost) {
            cost_history.push(state.best_cost);
        }

        let elapsed = started.elapsed();
        info!(
            event = "solve_end",
            rank,
            best_cost = state.best_cost,
            iterations = state.iteration,
            exchanges = counters.exchanges,
            timed_out,
            duration_ms = elapsed.as_millis() as u64,
        );

        Ok(AnnealOutcome {
            best: state.best,
            best_cost: state.best_cost,
            iterations: state.iteration,
            final_temperature: state.temperature,
            accepted_moves: counters.accepted,
            improving_moves: counters.improving,
            exchanges: counters.exchanges,
            adoptions: counters.adoptions,
            timed_out,
            seed,
            rank,
            cost_history,
            elapsed,
        })
    }

    fn cost(&self, candidate: &P::Candidate) -> Result<f64> {
        self.problem.cost(candidate).map_err(AnnealError::problem)
    }

    /// One move with Metropolis acceptance.
    ///
    /// `best` only moves on a strict improvement of `current`.
    fn step(
        &mut self,
        state: &mut SolverState<P::Candidate>,
        rng: &mut VariateSource,
        counters: &mut Counters,
    ) -> Result<()> {
        let saved = state.current.clone();
        self.problem
            .propose_change(&mut state.current, rng)
            .map_err(AnnealError::problem)?;
        let new_cost = self.cost(&state.current)?;
        let delta = new_cost - state.current_cost;

        if delta < 0.0 {
            state.current_cost = new_cost;
            counters.accepted += 1;
            counters.improving += 1;
            if new_cost < state.best_cost {
                state.best = state.current.clone();
                state.best_cost = new_cost;
                trace!(iteration = state.iteration, best_cost = new_cost, "new best");
                self.notify(&state.best, new_cost);
            }
        } else if rng.uniform_real() < (-delta / state.temperature).exp() {
            state.current_cost = new_cost;
            counters.accepted += 1;
        } else {
            state.current = saved;
        }
        Ok(())
    }

    /// Shares `best` with the group and adopts a strictly cheaper candidate.
    fn exchange_best(
        &mut self,
        state: &mut SolverState<P::Candidate>,
        config: &AnnealConfig,
        counters: &mut Counters,
    ) -> Result<()> {
        let received = self.exchange.exchange(&state.best, state.best_cost)?;
        counters.exchanges += 1;

        let costs = self.evaluate_all(&received, config.parallel_evaluation)?;
        let cheapest = costs
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_nan())
            .min_by(|a, b| a.1.total_cmp(b.1));

        let mut adopted = false;
        if let Some((idx, &cost)) = cheapest {
            if cost < state.best_cost {
                let candidate = received.into_iter().nth(idx);
                if let Some(candidate) = candidate {
                    state.best = candidate.clone();
                    state.best_cost = cost;
                    state.current = candidate;
                    state.current_cost = cost;
                    counters.adoptions += 1;
                    adopted = true;
                    self.notify(&state.best, cost);
                }
            }
        }

        debug!(
            event = "exchange",
            rank = self.exchange.rank(),
            exchange = counters.exchanges,
            iteration = state.iteration,
            received = costs.len(),
            adopted,
            best_cost = state.best_cost,
        );
        Ok(())
    }

    fn evaluate_all(&self, candidates: &[P::Candidate], parallel: bool) -> Result<Vec<f64>> {
        if parallel {
            let problem = &self.problem;
            candidates
                .par_iter()
                .map(|c| problem.cost(c).map_err(AnnealError::problem))
                .collect()
        } else {
            candidates.iter().map(|c| self.cost(c)).collect()
        }
    }

    fn notify(&mut self, best: &P::Candidate, cost: f64) {
        if let Some(observer) = self.observer.as_mut() {
            observer(best, cost);
        }
    }
}
