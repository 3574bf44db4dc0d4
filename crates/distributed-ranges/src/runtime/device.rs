use core::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::channel::Receiver;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::concepts::Owner;
use crate::error::{DrError, Result};
use crate::runtime::queue::Job;

/// One execution resource: a worker pool plus a memory budget.
///
/// Tasks submitted to the device run on its pool; buffers allocated on it are
/// charged to its budget until they are dropped.
pub struct Device {
    owner: Owner,
    name: String,
    pool: ThreadPool,
    capacity: Option<usize>,
    allocated: AtomicUsize,
}

impl Device {
    pub(crate) fn new(owner: Owner, threads: usize, capacity: Option<usize>) -> Result<Arc<Self>> {
        let Owner { rank, device } = owner;
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("r{rank}d{device}-{i}"))
            .build()
            .map_err(|err| DrError::Config(format!("cannot start pool for {owner}: {err}")))?;

        Ok(Arc::new(Self {
            owner,
            name: format!("cpu:{rank}.{device}"),
            pool,
            capacity,
            allocated: AtomicUsize::new(0),
        }))
    }

    /// The resource this device represents.
    pub fn owner(&self) -> Owner {
        self.owner
    }

    /// Human readable device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Worker threads in the device pool.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Memory budget in bytes, if any.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Bytes currently charged to the device.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    /// Runs `op` on the device pool and returns its result.
    pub fn install<R, F>(&self, op: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }

    /// Spawns every job received on `jobs` onto the pool, then waits for all
    /// of them once the channel is closed.
    pub(crate) fn serve<'a>(&self, jobs: Receiver<Job<'a>>) {
        self.pool.in_place_scope(|scope| {
            for job in jobs {
                scope.spawn(move |_| job());
            }
        });
        log::trace!("{}: launcher done", self.name);
    }

    /// Allocates a buffer of `len` copies of `value` on the device.
    pub fn allocate<T: Clone>(self: &Arc<Self>, len: usize, value: T) -> Result<DeviceBuffer<T>> {
        let bytes = len
            .checked_mul(size_of::<T>())
            .ok_or_else(|| DrError::OutOfMemory {
                owner: self.owner,
                requested: usize::MAX,
                available: self.available(),
            })?;
        self.reserve(bytes)?;

        let mut data = Vec::new();
        if let Err(source) = data.try_reserve_exact(len) {
            self.release(bytes);
            return Err(DrError::Allocation {
                owner: self.owner,
                bytes,
                source,
            });
        }
        data.resize(len, value);
        log::trace!("{}: allocated {} bytes", self.name, bytes);

        Ok(DeviceBuffer {
            data,
            bytes,
            device: Arc::clone(self),
        })
    }

    /// Copies `src` into a new buffer on the device.
    pub fn allocate_from<T: Clone>(self: &Arc<Self>, src: &[T]) -> Result<DeviceBuffer<T>> {
        let bytes = size_of_val(src);
        self.reserve(bytes)?;

        let mut data = Vec::new();
        if let Err(source) = data.try_reserve_exact(src.len()) {
            self.release(bytes);
            return Err(DrError::Allocation {
                owner: self.owner,
                bytes,
                source,
            });
        }
        data.extend_from_slice(src);

        Ok(DeviceBuffer {
            data,
            bytes,
            device: Arc::clone(self),
        })
    }

    fn available(&self) -> usize {
        self.capacity
            .map_or(usize::MAX, |cap| cap.saturating_sub(self.allocated()))
    }

    fn reserve(&self, bytes: usize) -> Result<()> {
        let Some(capacity) = self.capacity else {
            self.allocated.fetch_add(bytes, Ordering::AcqRel);
            return Ok(());
        };

        self.allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|&total| total <= capacity)
            })
            .map(|_| ())
            .map_err(|used| DrError::OutOfMemory {
                owner: self.owner,
                requested: bytes,
                available: capacity.saturating_sub(used),
            })
    }

    fn release(&self, bytes: usize) {
        self.allocated.fetch_sub(bytes, Ordering::AcqRel);
    }
}

impl core::fmt::Debug for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("threads", &self.threads())
            .field("capacity", &self.capacity)
            .field("allocated", &self.allocated())
            .finish()
    }
}

/// Memory owned by one device. Dropping it returns the bytes to the budget.
pub struct DeviceBuffer<T> {
    data: Vec<T>,
    bytes: usize,
    device: Arc<Device>,
}

impl<T> DeviceBuffer<T> {
    /// The device the buffer lives on.
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// The resource the buffer is bound to.
    pub fn owner(&self) -> Owner {
        self.device.owner
    }
}

impl<T> Deref for DeviceBuffer<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.data
    }
}

impl<T> DerefMut for DeviceBuffer<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T> Drop for DeviceBuffer<T> {
    fn drop(&mut self) {
        self.device.release(self.bytes);
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for DeviceBuffer<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("device", &self.device.name)
            .field("data", &self.data)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_is_charged_and_released() {
        let device = Device::new(Owner::new(0, 0), 1, Some(64)).unwrap();
        let a = device.allocate(4, 0u64).unwrap();
        assert_eq!(device.allocated(), 32);

        let err = device.allocate(5, 0u64).unwrap_err();
        assert!(matches!(
            err,
            DrError::OutOfMemory {
                requested: 40,
                available: 32,
                ..
            }
        ));

        drop(a);
        assert_eq!(device.allocated(), 0);
        assert!(device.allocate(8, 0u64).is_ok());
    }

    #[test]
    fn test_install_runs_on_device_pool() {
        let device = Device::new(Owner::new(1, 2), 3, None).unwrap();
        let (threads, name) = device.install(|| {
            let name = std::thread::current().name().map(str::to_string);
            (rayon::current_num_threads(), name)
        });
        assert_eq!(threads, 3);
        assert!(name.unwrap().starts_with("r1d2-"));
    }

    #[test]
    fn test_allocate_from_copies() {
        let device = Device::new(Owner::new(0, 1), 1, None).unwrap();
        let buffer = device.allocate_from(&[1, 2, 3]).unwrap();
        assert_eq!(&buffer[..], &[1, 2, 3]);
        assert_eq!(buffer.owner(), Owner::new(0, 1));
    }

    #[test]
    fn test_size_overflow_is_out_of_memory() {
        let device = Device::new(Owner::new(0, 0), 1, None).unwrap();
        assert!(matches!(
            device.allocate(usize::MAX, 0u64),
            Err(DrError::OutOfMemory { .. })
        ));
    }
}
