//! Asynchronous task submission with completion handles.
//!
//! A [`Queue`] lives for the duration of a [`scope`] call, so submitted tasks
//! may borrow data from outside it. Each device used in the scope gets one
//! launcher thread which spawns the device's tasks onto its worker pool, so
//! the number of threads stays bounded whatever the number of tasks.
//! Submitting never blocks; [`wait`] collects the results.

use core::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::Scope;

use crossbeam::channel::{Receiver, Sender, bounded, unbounded};
use hashbrown::HashMap;

use crate::concepts::Owner;
use crate::error::{DrError, Result};
use crate::runtime::Device;

pub(crate) type Job<'scope> = Box<dyn FnOnce() + Send + 'scope>;

/// Submission queue shared by every device used within one [`scope`].
pub struct Queue<'scope, 'env: 'scope> {
    scope: &'scope Scope<'scope, 'env>,
    launchers: RefCell<HashMap<Owner, Sender<Job<'scope>>>>,
}

impl<'scope, 'env> Queue<'scope, 'env> {
    fn launcher(&self, device: &Arc<Device>) -> Sender<Job<'scope>> {
        let mut launchers = self.launchers.borrow_mut();
        launchers
            .entry(device.owner())
            .or_insert_with(|| {
                let (sender, jobs) = unbounded();
                let device = Arc::clone(device);
                let Owner { rank, device: index } = device.owner();
                log::trace!("start launcher for {}", device.owner());
                // Without a launcher the jobs are dropped and their events fail.
                if let Err(err) = std::thread::Builder::new()
                    .name(format!("r{rank}d{index}-queue"))
                    .spawn_scoped(self.scope, move || device.serve(jobs))
                {
                    log::error!("cannot start launcher for r{rank}d{index}: {err}");
                }
                sender
            })
            .clone()
    }
}

/// Runs `f` with a fresh [`Queue`] and returns once every submitted task has
/// finished.
pub fn scope<'env, F, T>(f: F) -> T
where
    F: for<'scope> FnOnce(&Queue<'scope, 'env>) -> T,
{
    std::thread::scope(|scope| {
        let queue = Queue {
            scope,
            launchers: RefCell::new(HashMap::new()),
        };
        let out = f(&queue);
        // Closing the channels lets the launchers exit.
        drop(queue);
        out
    })
}

/// Completion handle of one submitted task.
pub struct Event<R> {
    owner: Owner,
    result: Receiver<Result<R>>,
}

impl<R: Send> Event<R> {
    /// The device the task was submitted to.
    pub fn owner(&self) -> Owner {
        self.owner
    }

    /// Returns true once the task has finished.
    pub fn is_complete(&self) -> bool {
        !self.result.is_empty()
    }

    /// Blocks until the task finishes and returns its result.
    pub fn wait(self) -> Result<R> {
        self.result
            .recv()
            .unwrap_or(Err(DrError::KernelPanicked { owner: self.owner }))
    }

    /// Submits `kernel` to `device`, to run with this task's result once it
    /// completes.
    pub fn then<'scope, 'env, U, F>(
        self,
        queue: &Queue<'scope, 'env>,
        device: &Arc<Device>,
        kernel: F,
    ) -> Event<U>
    where
        F: FnOnce(R) -> Result<U> + Send + 'scope,
        R: 'scope,
        U: Send + 'scope,
    {
        log::trace!("submit dependent task on {} after {}", device.owner(), self.owner);
        submit(queue, device, move || kernel(self.wait()?))
    }
}

/// Submits `kernel` to `device` and returns its completion handle.
pub fn submit<'scope, 'env, R, F>(
    queue: &Queue<'scope, 'env>,
    device: &Arc<Device>,
    kernel: F,
) -> Event<R>
where
    F: FnOnce() -> Result<R> + Send + 'scope,
    R: Send + 'scope,
{
    let owner = device.owner();
    let (done, result) = bounded(1);
    let job: Job<'scope> = Box::new(move || {
        let outcome = panic::catch_unwind(AssertUnwindSafe(kernel))
            .unwrap_or(Err(DrError::KernelPanicked { owner }));
        // The event may have been dropped unawaited.
        let _ = done.send(outcome);
    });
    log::trace!("submit task on {owner}");
    // A closed launcher drops the job, which `wait` reports as a failed task.
    let _ = queue.launcher(device).send(job);
    Event { owner, result }
}

/// Waits for every event, in order, and returns their results.
///
/// All events are awaited even after a failure; the first error is returned.
pub fn wait<R: Send>(events: Vec<Event<R>>) -> Result<Vec<R>> {
    let mut results = Vec::with_capacity(events.len());
    let mut failure = None;
    for event in events {
        match event.wait() {
            Ok(value) => results.push(value),
            Err(err) => {
                failure.get_or_insert(err);
            }
        }
    }
    match failure {
        Some(err) => Err(err),
        None => Ok(results),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices(n: usize) -> Vec<Arc<Device>> {
        (0..n)
            .map(|d| Device::new(Owner::new(0, d), 1, None).unwrap())
            .collect()
    }

    #[test]
    fn test_submit_and_wait_in_order() {
        let devices = devices(3);
        let data = vec![1, 2, 3];
        let results = scope(|queue| {
            let events: Vec<_> = devices
                .iter()
                .zip(&data)
                .map(|(device, x)| submit(queue, device, move || Ok(x * 10)))
                .collect();
            wait(events)
        })
        .unwrap();
        assert_eq!(results, vec![10, 20, 30]);
    }

    #[test]
    fn test_many_tasks_share_one_pool() {
        let devices = devices(2);
        let results = scope(|queue| {
            let events: Vec<_> = (0..60_000)
                .map(|i| submit(queue, &devices[i % 2], move || Ok(i as u64)))
                .collect();
            wait(events)
        })
        .unwrap();
        assert_eq!(results.len(), 60_000);
        assert_eq!(results.iter().sum::<u64>(), 59_999 * 60_000 / 2);
    }

    #[test]
    fn test_panicking_task_is_reported() {
        let devices = devices(2);
        let result = scope(|queue| {
            let events = vec![
                submit(queue, &devices[0], || Ok(1)),
                submit(queue, &devices[1], || -> Result<i32> { panic!("boom") }),
            ];
            wait(events)
        });
        assert!(matches!(
            result,
            Err(DrError::KernelPanicked { owner }) if owner == Owner::new(0, 1)
        ));
    }

    #[test]
    fn test_event_completes() {
        let devices = devices(1);
        scope(|queue| {
            let event = submit(queue, &devices[0], || Ok(7));
            while !event.is_complete() {
                std::thread::yield_now();
            }
            assert_eq!(event.owner(), Owner::new(0, 0));
            assert_eq!(event.wait().unwrap(), 7);
        });
    }

    #[test]
    fn test_then_runs_after_dependency() {
        let devices = devices(2);
        let result = scope(|queue| {
            submit(queue, &devices[0], || Ok(vec![1, 2, 3]))
                .then(queue, &devices[1], |v| Ok(v.iter().sum::<i32>()))
                .wait()
        })
        .unwrap();
        assert_eq!(result, 6);
    }

    #[test]
    fn test_failed_dependency_skips_kernel() {
        let devices = devices(1);
        let result = scope(|queue| {
            submit(queue, &devices[0], || -> Result<i32> {
                Err(DrError::Config("bad".into()))
            })
            .then(queue, &devices[0], |_| -> Result<i32> { unreachable!() })
            .wait()
        });
        assert!(matches!(result, Err(DrError::Config(_))));
    }
}
