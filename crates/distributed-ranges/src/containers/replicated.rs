use crate::concepts::DistributedContiguousRange;
use crate::error::Result;
use crate::runtime::{DeviceBuffer, Runtime, queue};

/// A full copy of a sequence on every device of the calling rank.
///
/// This is the replicated access strategy: reads never leave the device, at
/// the price of one complete buffer per device. Kernels that read the whole
/// input from every segment, such as [`gemv`](crate::algorithms::gemv), stage
/// their input into one.
pub struct ReplicatedVector<T> {
    len: usize,
    copies: Vec<DeviceBuffer<T>>,
}

impl<T: Clone + Send + Sync> ReplicatedVector<T> {
    /// Copies `data` to every device of `runtime`, one copy task per device.
    pub fn from_slice(runtime: &Runtime, data: &[T]) -> Result<Self> {
        let copies = queue::scope(|scope| {
            let events = runtime
                .devices()
                .iter()
                .map(|device| {
                    let target = device.clone();
                    queue::submit(scope, device, move || target.allocate_from(data))
                })
                .collect();
            queue::wait(events)
        })?;

        log::debug!(
            "replicated {} elements on {} devices",
            data.len(),
            copies.len()
        );

        Ok(Self {
            len: data.len(),
            copies,
        })
    }
}

impl<T: Clone + Send + Sync + 'static> ReplicatedVector<T> {
    /// Gathers `range` from every rank and replicates it. Collective.
    pub fn stage<R>(runtime: &Runtime, range: R) -> Result<Self>
    where
        R: DistributedContiguousRange<Element = T>,
    {
        let data = crate::algorithms::all_gather(runtime, range)?;
        Self::from_slice(runtime, &data)
    }
}

impl<T> ReplicatedVector<T> {
    /// Number of elements in every copy.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The copy held by local device `device`.
    pub fn on(&self, device: usize) -> Option<&[T]> {
        self.copies.get(device).map(|copy| &copy[..])
    }

    /// Every copy, indexed by local device.
    pub fn copies(&self) -> &[DeviceBuffer<T>] {
        &self.copies
    }
}
