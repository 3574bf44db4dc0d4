use std::sync::Arc;
use std::thread;

use crossbeam::channel::{Receiver, Sender, unbounded};

use super::{Payload, Transport};
use crate::error::{DrError, Result};
use crate::runtime::{Runtime, RuntimeBuilder};

/// One rank of a [`ThreadGroup`].
///
/// Every ordered pair of ranks is connected by its own unbounded channel, so
/// messages between two ranks arrive in the order they were sent. When a rank
/// exits (or panics) its senders are dropped and peers waiting on it get an
/// error instead of blocking forever.
pub struct ThreadTransport {
    rank: usize,
    /// `senders[dst]` delivers to rank `dst`.
    senders: Vec<Sender<Payload>>,
    /// `receivers[src]` yields messages sent by rank `src`.
    receivers: Vec<Receiver<Payload>>,
}

impl Transport for ThreadTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.senders.len()
    }

    fn send(&self, dst: usize, payload: Payload) -> Result<()> {
        let tx = self.senders.get(dst).ok_or_else(|| {
            DrError::collective("send", format!("rank {dst} is not part of the group"))
        })?;
        tx.send(payload).map_err(|_| {
            DrError::collective("send", format!("rank {dst} has left the group"))
        })
    }

    fn recv(&self, src: usize) -> Result<Payload> {
        let rx = self.receivers.get(src).ok_or_else(|| {
            DrError::collective("recv", format!("rank {src} is not part of the group"))
        })?;
        rx.recv().map_err(|_| {
            DrError::collective("recv", format!("rank {src} has left the group"))
        })
    }
}

/// Runs a group of ranks as threads of the current process.
///
/// This stands in for an MPI launcher: each thread gets its own rank, its own
/// [`Runtime`] and its own devices, and the ranks only share data through
/// collectives.
#[derive(Clone, Copy, Debug)]
pub struct ThreadGroup {
    ranks: usize,
}

impl ThreadGroup {
    /// A group of `ranks` ranks.
    pub fn new(ranks: usize) -> Self {
        Self { ranks }
    }

    /// Number of ranks.
    pub fn ranks(&self) -> usize {
        self.ranks
    }

    /// Builds the fully connected transports, one per rank.
    pub fn transports(&self) -> Vec<ThreadTransport> {
        let n = self.ranks;
        // channels[src][dst]
        let mut senders: Vec<Vec<Sender<Payload>>> = (0..n).map(|_| Vec::with_capacity(n)).collect();
        let mut receivers: Vec<Vec<Receiver<Payload>>> =
            (0..n).map(|_| Vec::with_capacity(n)).collect();

        for src in 0..n {
            for dst in 0..n {
                let (tx, rx) = unbounded();
                senders[src].push(tx);
                receivers[dst].push(rx);
            }
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| ThreadTransport {
                rank,
                senders,
                receivers,
            })
            .collect()
    }

    /// Starts every rank with a runtime built from `builder` and runs `f` on it.
    ///
    /// Returns the per-rank results in rank order. A panic on any rank is
    /// resumed on the calling thread once every rank has finished.
    pub fn run<F, R>(&self, builder: &RuntimeBuilder, f: F) -> Result<Vec<R>>
    where
        F: Fn(Runtime) -> R + Sync,
        R: Send,
    {
        if self.ranks == 0 {
            return Err(DrError::Config("a thread group needs at least one rank".into()));
        }

        thread::scope(|scope| {
            let handles = self
                .transports()
                .into_iter()
                .map(|transport| {
                    let rank = transport.rank;
                    let f = &f;
                    thread::Builder::new()
                        .name(format!("r{rank}"))
                        .spawn_scoped(scope, move || -> Result<R> {
                            let runtime = builder.build_with_transport(Arc::new(transport))?;
                            Ok(f(runtime))
                        })
                        .map_err(|err| {
                            DrError::Config(format!("cannot start rank {rank}: {err}"))
                        })
                })
                .collect::<Result<Vec<_>>>()?;

            let mut results = Vec::with_capacity(handles.len());
            let mut panic = None;
            for handle in handles {
                match handle.join() {
                    Ok(result) => results.push(result),
                    Err(payload) => {
                        panic.get_or_insert(payload);
                    }
                }
            }
            if let Some(payload) = panic {
                std::panic::resume_unwind(payload);
            }
            results.into_iter().collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairwise_fifo() {
        let transports = ThreadGroup::new(2).transports();
        let [a, b]: [ThreadTransport; 2] = transports.try_into().ok().unwrap();

        for i in 0..3 {
            a.send(1, Box::new(i)).unwrap();
        }
        for i in 0..3 {
            let got = *b.recv(0).unwrap().downcast::<i32>().unwrap();
            assert_eq!(got, i);
        }
    }

    #[test]
    fn test_departed_rank_is_detected() {
        let transports = ThreadGroup::new(2).transports();
        let mut transports = transports.into_iter();
        let a = transports.next().unwrap();
        drop(transports);

        assert!(a.recv(1).is_err());
        assert!(a.send(1, Box::new(())).is_err());
    }

    #[test]
    fn test_run_returns_rank_ordered_results() {
        let builder = Runtime::builder().devices(1);
        let ranks = ThreadGroup::new(3)
            .run(&builder, |rt| (rt.rank(), rt.size()))
            .unwrap();
        assert_eq!(ranks, vec![(0, 3), (1, 3), (2, 3)]);
    }

    #[test]
    #[should_panic = "rank 1 failed"]
    fn test_run_resumes_panics() {
        let builder = Runtime::builder().devices(1);
        let _ = ThreadGroup::new(2).run(&builder, |rt| {
            if rt.rank() == 1 {
                panic!("rank 1 failed");
            }
        });
    }
}
