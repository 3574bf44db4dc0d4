//! Point-to-point transports and the typed collectives built on them.
//!
//! A [`Transport`] moves type-erased payloads between ranks; the
//! [`Communicator`] layers the collective operations algorithms rely on
//! (barrier, broadcast, gather, scatter, all-gather, all-reduce) on top of it.
//!
//! Every collective must be called by every rank of the group, in the same
//! program order. Transports deliver messages between a given pair of ranks
//! in FIFO order, which is what lets consecutive collectives match up without
//! tags.

mod local;
mod thread;

pub use local::*;
pub use thread::*;

use std::any::Any;
use std::sync::Arc;

use crate::error::{DrError, Result};

/// A type-erased message.
pub type Payload = Box<dyn Any + Send>;

/// Ordered point-to-point delivery between the ranks of a group.
pub trait Transport: Send + Sync {
    /// Rank of the calling process.
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Sends `payload` to `dst`. Never blocks waiting for the receiver.
    fn send(&self, dst: usize, payload: Payload) -> Result<()>;

    /// Blocks until the next message from `src` arrives.
    fn recv(&self, src: usize) -> Result<Payload>;
}

/// Typed collective operations over a [`Transport`].
///
/// Results that combine contributions from several ranks are always assembled
/// in rank order, so every rank observes bit-identical values.
#[derive(Clone)]
pub struct Communicator {
    transport: Arc<dyn Transport>,
}

impl Communicator {
    /// Wraps a transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Rank of the calling process.
    pub fn rank(&self) -> usize {
        self.transport.rank()
    }

    /// Number of ranks in the group.
    pub fn size(&self) -> usize {
        self.transport.size()
    }

    fn send_value<T: Send + 'static>(&self, op: &'static str, dst: usize, value: T) -> Result<()> {
        log::trace!("rank {} {op}: send to {dst}", self.rank());
        self.transport.send(dst, Box::new(value))
    }

    fn recv_value<T: 'static>(&self, op: &'static str, src: usize) -> Result<T> {
        let payload = self.transport.recv(src)?;
        log::trace!("rank {} {op}: received from {src}", self.rank());
        payload
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| {
                DrError::collective(
                    op,
                    format!(
                        "rank {src} sent a payload that is not a {}",
                        std::any::type_name::<T>()
                    ),
                )
            })
    }

    fn check_root(&self, op: &'static str, root: usize) -> Result<()> {
        if root >= self.size() {
            return Err(DrError::collective(
                op,
                format!("root {root} is not a rank of a group of size {}", self.size()),
            ));
        }
        Ok(())
    }

    /// Blocks until every rank has entered the barrier.
    pub fn barrier(&self) -> Result<()> {
        self.all_gather(()).map(|_| ())
    }

    /// Returns `value` from `root` on every rank. Non-root inputs are ignored.
    pub fn broadcast<T: Clone + Send + 'static>(&self, root: usize, value: T) -> Result<T> {
        self.check_root("broadcast", root)?;
        if self.rank() == root {
            for dst in (0..self.size()).filter(|&dst| dst != root) {
                self.send_value("broadcast", dst, value.clone())?;
            }
            Ok(value)
        } else {
            self.recv_value("broadcast", root)
        }
    }

    /// Collects one value from every rank, indexed by rank, on every rank.
    pub fn all_gather<T: Clone + Send + 'static>(&self, value: T) -> Result<Vec<T>> {
        let rank = self.rank();
        for dst in (0..self.size()).filter(|&dst| dst != rank) {
            self.send_value("all_gather", dst, value.clone())?;
        }

        let mut value = Some(value);
        (0..self.size())
            .map(|src| {
                if src == rank {
                    value
                        .take()
                        .ok_or_else(|| DrError::collective("all_gather", "own value consumed twice"))
                } else {
                    self.recv_value("all_gather", src)
                }
            })
            .collect()
    }

    /// Combines one value from every rank with `op`, in rank order.
    pub fn all_reduce<T, F>(&self, value: T, op: F) -> Result<T>
    where
        T: Clone + Send + 'static,
        F: Fn(T, T) -> T,
    {
        self.all_gather(value)?
            .into_iter()
            .reduce(op)
            .ok_or_else(|| DrError::collective("all_reduce", "empty group"))
    }

    /// Collects one value from every rank on `root`, indexed by rank.
    ///
    /// Returns `Some` on the root and `None` elsewhere.
    pub fn gather<T: Send + 'static>(&self, root: usize, value: T) -> Result<Option<Vec<T>>> {
        self.check_root("gather", root)?;
        if self.rank() != root {
            self.send_value("gather", root, value)?;
            return Ok(None);
        }

        let mut value = Some(value);
        let gathered = (0..self.size())
            .map(|src| {
                if src == root {
                    value
                        .take()
                        .ok_or_else(|| DrError::collective("gather", "own value consumed twice"))
                } else {
                    self.recv_value("gather", src)
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(gathered))
    }

    /// Sends `values[r]` from `root` to every rank `r`.
    ///
    /// Non-root ranks pass an empty vector. If the root supplies the wrong
    /// number of values it still notifies every rank, so the whole group
    /// fails with the same error instead of waiting forever.
    pub fn scatter<T: Send + 'static>(&self, root: usize, values: Vec<T>) -> Result<T> {
        self.check_root("scatter", root)?;
        let size = self.size();

        if self.rank() != root {
            return self
                .recv_value::<Option<T>>("scatter", root)?
                .ok_or_else(|| DrError::collective("scatter", format!("root {root} aborted")));
        }

        if values.len() != size {
            for dst in (0..size).filter(|&dst| dst != root) {
                self.send_value::<Option<T>>("scatter", dst, None)?;
            }
            return Err(DrError::collective(
                "scatter",
                format!("root supplied {} values for {size} ranks", values.len()),
            ));
        }

        let mut own = None;
        for (dst, value) in values.into_iter().enumerate() {
            if dst == root {
                own = Some(value);
            } else {
                self.send_value("scatter", dst, Some(value))?;
            }
        }
        own.ok_or_else(|| DrError::collective("scatter", "root value missing"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run<R: Send>(ranks: usize, f: impl Fn(Communicator) -> R + Sync) -> Vec<R> {
        let transports = ThreadGroup::new(ranks).transports();
        std::thread::scope(|scope| {
            let handles: Vec<_> = transports
                .into_iter()
                .map(|t| {
                    let f = &f;
                    scope.spawn(move || f(Communicator::new(Arc::new(t))))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    #[test]
    fn test_broadcast() {
        let results = run(4, |comm| {
            let value = if comm.rank() == 2 { 42 } else { 0 };
            comm.broadcast(2, value).unwrap()
        });
        assert_eq!(results, vec![42; 4]);
    }

    #[test]
    fn test_all_gather_is_rank_ordered() {
        let results = run(3, |comm| comm.all_gather(comm.rank() * 10).unwrap());
        for gathered in results {
            assert_eq!(gathered, vec![0, 10, 20]);
        }
    }

    #[test]
    fn test_all_reduce_non_commutative() {
        let results = run(3, |comm| {
            comm.all_reduce(comm.rank().to_string(), |a, b| a + &b)
                .unwrap()
        });
        assert_eq!(results, vec!["012"; 3]);
    }

    #[test]
    fn test_gather_only_root_receives() {
        let results = run(3, |comm| comm.gather(1, comm.rank()).unwrap());
        assert_eq!(results, vec![None, Some(vec![0, 1, 2]), None]);
    }

    #[test]
    fn test_scatter() {
        let results = run(3, |comm| {
            let values = if comm.rank() == 0 { vec!['a', 'b', 'c'] } else { vec![] };
            comm.scatter(0, values).unwrap()
        });
        assert_eq!(results, vec!['a', 'b', 'c']);
    }

    #[test]
    fn test_scatter_wrong_count_fails_everywhere() {
        let results = run(3, |comm| {
            let values = if comm.rank() == 0 { vec![1] } else { vec![] };
            comm.scatter(0, values).is_err()
        });
        assert_eq!(results, vec![true; 3]);
    }

    #[test]
    fn test_consecutive_collectives_match_up() {
        let results = run(4, |comm| {
            let mut acc = Vec::new();
            for round in 0..5 {
                comm.barrier().unwrap();
                acc.push(comm.all_reduce(round + comm.rank(), |a, b| a + b).unwrap());
            }
            acc
        });
        for acc in results {
            assert_eq!(acc, vec![6, 10, 14, 18, 22]);
        }
    }

    #[test]
    fn test_type_mismatch_is_reported() {
        let results = run(2, |comm| {
            if comm.rank() == 0 {
                comm.broadcast(0, 1u32).map(|_| ()).is_err()
            } else {
                comm.broadcast(0, String::new()).map(|_| ()).is_err()
            }
        });
        assert_eq!(results, vec![false, true]);
    }

    #[test]
    fn test_invalid_root() {
        let comm = Communicator::new(Arc::new(SelfTransport::new()));
        assert!(comm.broadcast(1, 0).is_err());
        assert_eq!(comm.broadcast(0, 7).unwrap(), 7);
    }
}
