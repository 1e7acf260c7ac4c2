//! Error types for annealing runs and worker communication.

use thiserror::Error;

/// Boxed error produced by a problem adapter.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure of a collective operation between workers.
///
/// Every variant is fatal for the whole worker group: a collective with a
/// missing participant can never complete, so nothing is retried.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommError {
    /// A peer dropped its endpoint (finished early, failed, or panicked).
    #[error("worker {peer} disconnected during {op}")]
    Disconnected {
        /// Rank of the unreachable peer.
        peer: usize,
        /// Collective that was in progress.
        op: &'static str,
    },

    /// A peer did not answer within the configured receive timeout.
    #[error("timed out waiting for worker {peer} during {op}")]
    Timeout {
        /// Rank of the silent peer.
        peer: usize,
        /// Collective that was in progress.
        op: &'static str,
    },

    /// Workers issued collectives in a different order.
    #[error("protocol mismatch with worker {peer}: expected {expected} #{seq}, got {got} #{got_seq}")]
    ProtocolMismatch {
        /// Rank of the peer whose message did not match.
        peer: usize,
        /// Collective this worker is executing.
        expected: &'static str,
        /// Collective the peer was executing.
        got: &'static str,
        /// Local collective sequence number.
        seq: u64,
        /// Peer collective sequence number.
        got_seq: u64,
    },

    /// Broadcast root outside `0..size`.
    #[error("invalid broadcast root {root} for a group of {size}")]
    InvalidRoot {
        /// Requested root.
        root: usize,
        /// Group size.
        size: usize,
    },

    /// The broadcast root did not supply a value.
    #[error("broadcast root {root} has no value to send")]
    MissingRootValue {
        /// Root rank.
        root: usize,
    },
}

/// Main error type for annealing operations.
#[derive(Debug, Error)]
pub enum AnnealError {
    /// Invalid solver configuration. Raised before the first iteration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The problem adapter failed; the source is passed through unchanged.
    #[error("problem adapter failed: {0}")]
    Problem(#[source] BoxError),

    /// Communication with other workers failed.
    #[error("communication failed: {0}")]
    Comm(#[from] CommError),

    /// A worker thread panicked inside a swarm run.
    #[error("worker {0} panicked")]
    WorkerPanicked(usize),
}

impl AnnealError {
    /// Wraps an adapter error.
    pub fn problem<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        AnnealError::Problem(Box::new(err))
    }

    /// True for errors caused by a peer going away rather than by this worker.
    pub fn is_peer_failure(&self) -> bool {
        matches!(
            self,
            AnnealError::Comm(CommError::Disconnected { .. } | CommError::Timeout { .. })
        )
    }
}

/// Result type alias for annealing operations.
pub type Result<T> = std::result::Result<T, AnnealError>;
