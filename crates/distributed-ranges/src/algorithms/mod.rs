//! Algorithms over distributed ranges.
//!
//! Every algorithm splits its work by segment: the calling rank submits one
//! task per segment it owns to the queue of the owning device, waits for all
//! of them, and combines the results in segment order. Algorithms that
//! produce a global value or move data between ranks are collective and must
//! be called by every rank.

mod copy;
mod for_each;
mod gemv;
mod reduce;

pub use copy::*;
pub use for_each::*;
pub use gemv::*;
pub use reduce::*;

use crate::concepts::{Owner, RemoteRange};
use crate::error::{DrError, Result};
use crate::runtime::{Runtime, queue};

/// Identifies the segment a kernel runs on.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Task {
    /// Position of the segment in the layout.
    pub index: usize,
    /// Resource the kernel runs on.
    pub owner: Owner,
}

impl Task {
    pub(crate) fn fail(&self, reason: impl Into<String>) -> DrError {
        DrError::Kernel {
            owner: self.owner,
            reason: format!("segment {}: {}", self.index, reason.into()),
        }
    }
}

/// Runs `kernel` on the local iterator of every segment owned by the calling
/// rank, one task per segment, and returns `(segment index, result)` pairs in
/// segment order.
pub(crate) fn dispatch<S, R, F>(
    runtime: &Runtime,
    segments: Vec<S>,
    kernel: F,
) -> Result<Vec<(usize, R)>>
where
    S: RemoteRange + Send,
    F: Fn(Task, S::Local) -> Result<R> + Sync,
    R: Send,
{
    let rank = runtime.rank();
    let total = segments.len();
    let kernel = &kernel;

    let results = queue::scope(|scope| {
        let mut events = Vec::new();
        for (idx, segment) in segments.into_iter().enumerate() {
            if segment.rank() != rank {
                continue;
            }
            let owner = segment.owner();
            let device = runtime.device_for(owner)?;
            let task = Task { index: idx, owner };
            events.push(queue::submit(scope, device, move || {
                let local = segment.local().ok_or_else(|| task.fail("no local data"))?;
                kernel(task, local).map(|result| (idx, result))
            }));
        }
        if events.is_empty() && total > 0 {
            log::warn!("rank {rank}: none of the {total} segments are local");
        } else {
            log::trace!("rank {rank}: dispatched {} of {total} segments", events.len());
        }
        queue::wait(events)
    })?;

    Ok(results)
}

/// Exchanges the local outcome of every rank. Collective.
///
/// Returns the values of all ranks in rank order if every rank succeeded.
/// Otherwise every rank returns the same [`DrError::Kernel`], naming the
/// failure of the lowest failing rank, so no rank is left waiting on a peer
/// that gave up.
pub(crate) fn all_gather_outcomes<T>(runtime: &Runtime, local: Result<T>) -> Result<Vec<T>>
where
    T: Clone + Send + 'static,
{
    let rank = runtime.rank();
    let local = local.map_err(|err| match err {
        DrError::Kernel { owner, reason } => (owner, reason),
        DrError::KernelPanicked { owner } => (owner, "panicked".to_string()),
        other => (Owner::new(rank, 0), other.to_string()),
    });
    if let Err((owner, reason)) = &local {
        log::debug!("rank {rank}: reporting failure on {owner} to all ranks: {reason}");
    }

    runtime
        .comm()
        .all_gather(local)?
        .into_iter()
        .map(|outcome| outcome.map_err(|(owner, reason)| DrError::Kernel { owner, reason }))
        .collect()
}
