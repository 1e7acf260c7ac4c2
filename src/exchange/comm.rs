//! Blocking collective primitives and an in-process transport.

use std::fmt;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::error::CommError;

/// Blocking collective operations over a fixed group of workers.
///
/// Every worker must issue the same collectives in the same order. A worker
/// that skips one leaves its peers waiting forever (or until a transport
/// timeout fires).
pub trait Communicator<C> {
    /// Rank of this worker in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of workers in the group.
    fn size(&self) -> usize;

    /// Contributes `item` and returns all contributions ordered by rank.
    fn all_gather(&mut self, item: C) -> Result<Vec<C>, CommError>;

    /// Global minimum of `value` across the group.
    fn all_reduce_min(&mut self, value: f64) -> Result<f64, CommError>;

    /// Sends `item` from `root` to every worker.
    ///
    /// Only the root's `item` is used; other workers pass `None`.
    fn broadcast(&mut self, item: Option<C>, root: usize) -> Result<C, CommError>;

    /// Returns once every worker has entered the barrier.
    fn barrier(&mut self) -> Result<(), CommError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    AllGather,
    ReduceMin,
    Broadcast,
    Barrier,
}

impl Op {
    fn name(self) -> &'static str {
        match self {
            Op::AllGather => "all_gather",
            Op::ReduceMin => "all_reduce_min",
            Op::Broadcast => "broadcast",
            Op::Barrier => "barrier",
        }
    }
}

enum Body<C> {
    Candidate(C),
    Scalar(f64),
    Token,
}

struct Envelope<C> {
    seq: u64,
    op: Op,
    body: Body<C>,
}

/// One worker's endpoint of an in-process group.
///
/// Each ordered pair of workers has its own FIFO channel. Every peer sends
/// at most one message to each other peer per collective, so the next
/// message on a pair channel always belongs to the next collective both
/// sides take part in. A dropped endpoint disconnects its channels, which
/// peers observe as [`CommError::Disconnected`].
pub struct LocalComm<C> {
    rank: usize,
    size: usize,
    outbox: Vec<Option<Sender<Envelope<C>>>>,
    inbox: Vec<Option<Receiver<Envelope<C>>>>,
    seq: u64,
    recv_timeout: Option<Duration>,
}

impl<C> fmt::Debug for LocalComm<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalComm")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .field("seq", &self.seq)
            .field("recv_timeout", &self.recv_timeout)
            .finish()
    }
}

/// Creates `size` connected endpoints, indexed by rank.
///
/// ```
/// use u_anneal::exchange::{local_group, Communicator};
///
/// let group = local_group::<u32>(3);
/// let handles: Vec<_> = group
///     .into_iter()
///     .map(|mut comm| std::thread::spawn(move || comm.all_gather(comm.rank() as u32 * 10)))
///     .collect();
/// for h in handles {
///     assert_eq!(h.join().unwrap().unwrap(), vec![0, 10, 20]);
/// }
/// ```
pub fn local_group<C: Send>(size: usize) -> Vec<LocalComm<C>> {
    let mut comms: Vec<LocalComm<C>> = (0..size)
        .map(|rank| LocalComm {
            rank,
            size,
            outbox: (0..size).map(|_| None).collect(),
            inbox: (0..size).map(|_| None).collect(),
            seq: 0,
            recv_timeout: None,
        })
        .collect();

    for src in 0..size {
        for dst in 0..size {
            if src == dst {
                continue;
            }
            let (tx, rx) = channel::unbounded();
            comms[src].outbox[dst] = Some(tx);
            comms[dst].inbox[src] = Some(rx);
        }
    }
    comms
}

impl<C> LocalComm<C> {
    /// Fails a receive after `timeout` instead of blocking indefinitely.
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = Some(timeout);
        self
    }

    /// Number of collectives issued so far.
    pub fn collectives_issued(&self) -> u64 {
        self.seq
    }

    fn send(&self, dst: usize, op: Op, body: Body<C>) -> Result<(), CommError> {
        let disconnected = CommError::Disconnected {
            peer: dst,
            op: op.name(),
        };
        let tx = self.outbox[dst].as_ref().ok_or(disconnected.clone())?;
        tx.send(Envelope {
            seq: self.seq,
            op,
            body,
        })
        .map_err(|_| disconnected)
    }

    fn recv(&self, src: usize, op: Op) -> Result<Body<C>, CommError> {
        let disconnected = CommError::Disconnected {
            peer: src,
            op: op.name(),
        };
        let rx = self.inbox[src].as_ref().ok_or(disconnected.clone())?;
        let envelope = match self.recv_timeout {
            Some(timeout) => rx.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => CommError::Timeout {
                    peer: src,
                    op: op.name(),
                },
                RecvTimeoutError::Disconnected => disconnected.clone(),
            })?,
            None => rx.recv().map_err(|_| disconnected)?,
        };
        if envelope.seq != self.seq || envelope.op != op {
            return Err(CommError::ProtocolMismatch {
                peer: src,
                expected: op.name(),
                got: envelope.op.name(),
                seq: self.seq,
                got_seq: envelope.seq,
            });
        }
        Ok(envelope.body)
    }

    fn mismatch(&self, src: usize, op: Op) -> CommError {
        CommError::ProtocolMismatch {
            peer: src,
            expected: op.name(),
            got: op.name(),
            seq: self.seq,
            got_seq: self.seq,
        }
    }

    fn gather_scalars(&mut self, op: Op, value: f64) -> Result<Vec<f64>, CommError> {
        self.seq += 1;
        for dst in (0..self.size).filter(|&d| d != self.rank) {
            self.send(dst, op, Body::Scalar(value))?;
        }
        let mut values = Vec::with_capacity(self.size);
        for src in 0..self.size {
            if src == self.rank {
                values.push(value);
                continue;
            }
            match self.recv(src, op)? {
                Body::Scalar(v) => values.push(v),
                _ => return Err(self.mismatch(src, op)),
            }
        }
        Ok(values)
    }
}

impl<C: Clone + Send> Communicator<C> for LocalComm<C> {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_gather(&mut self, item: C) -> Result<Vec<C>, CommError> {
        let op = Op::AllGather;
        self.seq += 1;
        for dst in (0..self.size).filter(|&d| d != self.rank) {
            self.send(dst, op, Body::Candidate(item.clone()))?;
        }
        let mut gathered = Vec::with_capacity(self.size);
        let mut own = Some(item);
        for src in 0..self.size {
            if src == self.rank {
                if let Some(item) = own.take() {
                    gathered.push(item);
                }
                continue;
            }
            match self.recv(src, op)? {
                Body::Candidate(c) => gathered.push(c),
                _ => return Err(self.mismatch(src, op)),
            }
        }
        Ok(gathered)
    }

    fn all_reduce_min(&mut self, value: f64) -> Result<f64, CommError> {
        let values = self.gather_scalars(Op::ReduceMin, value)?;
        Ok(values.into_iter().fold(f64::INFINITY, f64::min))
    }

    fn broadcast(&mut self, item: Option<C>, root: usize) -> Result<C, CommError> {
        let op = Op::Broadcast;
        if root >= self.size {
            return Err(CommError::InvalidRoot {
                root,
                size: self.size,
            });
        }
        self.seq += 1;
        if self.rank == root {
            let item = item.ok_or(CommError::MissingRootValue { root })?;
            for dst in (0..self.size).filter(|&d| d != root) {
                self.send(dst, op, Body::Candidate(item.clone()))?;
            }
            return Ok(item);
        }
        match self.recv(root, op)? {
            Body::Candidate(c) => Ok(c),
            _ => Err(self.mismatch(root, op)),
        }
    }

    fn barrier(&mut self) -> Result<(), CommError> {
        let op = Op::Barrier;
        self.seq += 1;
        for dst in (0..self.size).filter(|&d| d != self.rank) {
            self.send(dst, op, Body::Token)?;
        }
        for src in (0..self.size).filter(|&s| s != self.rank) {
            match self.recv(src, op)? {
                Body::Token => {}
                _ => return Err(self.mismatch(src, op)),
            }
        }
        Ok(())
    }
}
