//! Problem adapter contract.

use std::convert::Infallible;
use std::fmt;

use crate::rng::VariateSource;

/// Defines a problem for the annealer.
///
/// The adapter owns all problem data (matrices broadcast during setup, for
/// instance). The annealer owns the search state and never looks inside a
/// candidate.
///
/// # Minimization
///
/// The annealer minimizes `cost`. For maximization, negate the cost.
///
/// # Examples
///
/// ```
/// use std::convert::Infallible;
/// use u_anneal::rng::VariateSource;
/// use u_anneal::sa::AnnealProblem;
///
/// struct Qap { flow: Vec<Vec<f64>>, dist: Vec<Vec<f64>> }
///
/// impl AnnealProblem for Qap {
///     type Candidate = Vec<usize>;
///     type Error = Infallible;
///
///     fn initial_solution(&self, rng: &mut VariateSource) -> Result<Vec<usize>, Infallible> {
///         let mut p: Vec<usize> = (0..self.flow.len()).collect();
///         rng.shuffle(&mut p);
///         Ok(p)
///     }
///
///     fn cost(&self, p: &Vec<usize>) -> Result<f64, Infallible> {
///         let n = p.len();
///         let mut c = 0.0;
///         for i in 0..n {
///             for j in 0..n {
///                 c += self.flow[i][j] * self.dist[p[i]][p[j]];
///             }
///         }
///         Ok(c)
///     }
///
///     fn propose_change(
///         &self,
///         p: &mut Vec<usize>,
///         rng: &mut VariateSource,
///     ) -> Result<(), Infallible> {
///         let n = p.len() - 1;
///         let (i, j) = (rng.uniform_int(0, n), rng.uniform_int(0, n));
///         p.swap(i, j);
///         Ok(())
///     }
/// }
/// ```
pub trait AnnealProblem: Sync {
    /// The candidate representation. Opaque to the annealer.
    type Candidate: Clone + Send + Sync;

    /// Error raised by the adapter. Passed to the caller unchanged.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Creates the starting candidate.
    fn initial_solution(&self, rng: &mut VariateSource) -> Result<Self::Candidate, Self::Error>;

    /// Cost of a candidate. Lower is better.
    ///
    /// Must be deterministic for a fixed candidate: workers re-evaluate
    /// candidates received from peers and compare the results.
    fn cost(&self, candidate: &Self::Candidate) -> Result<f64, Self::Error>;

    /// Mutates `candidate` in place into a neighbor.
    ///
    /// The annealer keeps a copy of the pre-move candidate and restores it
    /// if the move is rejected.
    fn propose_change(
        &self,
        candidate: &mut Self::Candidate,
        rng: &mut VariateSource,
    ) -> Result<(), Self::Error>;
}

/// Problem adapter assembled from three closures.
///
/// ```
/// use u_anneal::sa::FnProblem;
///
/// let problem = FnProblem::new(
///     |_rng| 10.0_f64,
///     |x: &f64| x * x,
///     |x: &mut f64, rng| *x += rng.uniform_real() - 0.5,
/// );
/// # let _ = problem;
/// ```
pub struct FnProblem<I, K, M> {
    init: I,
    cost: K,
    change: M,
}

impl<C, I, K, M> FnProblem<I, K, M>
where
    I: Fn(&mut VariateSource) -> C + Sync,
    K: Fn(&C) -> f64 + Sync,
    M: Fn(&mut C, &mut VariateSource) + Sync,
{
    /// Creates an adapter from `initial_solution`, `cost` and `propose_change`.
    pub fn new(init: I, cost: K, change: M) -> Self {
        Self { init, cost, change }
    }
}

impl<I, K, M> fmt::Debug for FnProblem<I, K, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProblem").finish_non_exhaustive()
    }
}

impl<C, I, K, M> AnnealProblem for FnProblem<I, K, M>
where
    C: Clone + Send + Sync,
    I: Fn(&mut VariateSource) -> C + Sync,
    K: Fn(&C) -> f64 + Sync,
    M: Fn(&mut C, &mut VariateSource) + Sync,
{
    type Candidate = C;
    type Error = Infallible;

    fn initial_solution(&self, rng: &mut VariateSource) -> Result<C, Infallible> {
        Ok((self.init)(rng))
    }

    fn cost(&self, candidate: &C) -> Result<f64, Infallible> {
        Ok((self.cost)(candidate))
    }

    fn propose_change(&self, candidate: &mut C, rng: &mut VariateSource) -> Result<(), Infallible> {
        (self.change)(candidate, rng);
        Ok(())
    }
}

impl<P: AnnealProblem + ?Sized> AnnealProblem for &P {
    type Candidate = P::Candidate;
    type Error = P::Error;

    fn initial_solution(&self, rng: &mut VariateSource) -> Result<Self::Candidate, Self::Error> {
        (**self).initial_solution(rng)
    }

    fn cost(&self, candidate: &Self::Candidate) -> Result<f64, Self::Error> {
        (**self).cost(candidate)
    }

    fn propose_change(
        &self,
        candidate: &mut Self::Candidate,
        rng: &mut VariateSource,
    ) -> Result<(), Self::Error> {
        (**self).propose_change(candidate, rng)
    }
}
