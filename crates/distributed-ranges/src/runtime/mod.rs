//! The execution context: rank, devices and communicator.
//!
//! Nothing in the crate reads process-wide state. Bootstrap code creates a
//! [`Runtime`] (directly with [`RuntimeBuilder::build`] for a single rank, or
//! through [`ThreadGroup::run`](crate::collective::ThreadGroup::run) for
//! several) and passes it to containers and algorithms. Dropping the last
//! handle shuts the device pools down.

mod device;
pub mod queue;

pub use device::*;

use std::sync::Arc;

use crate::collective::{Communicator, SelfTransport, Transport};
use crate::concepts::Owner;
use crate::error::{DrError, Result};
use crate::sharding::{
    DEVICE_AXIS, Distribution, MeshAxis, RANK_AXIS, ResourceMesh, ResourceMeshBuilder,
};

/// Settings shared by every rank of a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Devices per rank.
    pub devices: usize,
    /// Worker threads per device.
    pub threads_per_device: usize,
    /// Memory budget of every device in bytes. `None` means unlimited.
    pub device_memory: Option<usize>,
    /// Partition strategy used by containers that do not ask for one.
    pub distribution: Distribution,
    /// Name of the node, reported by [`Runtime::node_name`].
    pub node_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            devices: 1,
            threads_per_device: 2,
            device_memory: None,
            distribution: Distribution::default(),
            node_name: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
        }
    }
}

/// Builder for [`Runtime`].
#[derive(Clone, Debug, Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    /// A builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder starting from `config`.
    pub fn from_config(config: RuntimeConfig) -> Self {
        Self { config }
    }

    /// Sets the number of devices per rank.
    pub fn devices(mut self, devices: usize) -> Self {
        self.config.devices = devices;
        self
    }

    /// Sets the number of worker threads per device.
    pub fn threads_per_device(mut self, threads: usize) -> Self {
        self.config.threads_per_device = threads;
        self
    }

    /// Limits the memory of every device to `bytes`.
    pub fn device_memory(mut self, bytes: usize) -> Self {
        self.config.device_memory = Some(bytes);
        self
    }

    /// Sets the default partition strategy.
    pub fn distribution(mut self, distribution: Distribution) -> Self {
        self.config.distribution = distribution;
        self
    }

    /// Sets the node name.
    pub fn node_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.node_name = name.into();
        self
    }

    /// The configuration being built.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Builds a single-rank runtime.
    pub fn build(&self) -> Result<Runtime> {
        self.build_with_transport(Arc::new(SelfTransport::new()))
    }

    /// Builds the runtime of the rank behind `transport`.
    pub fn build_with_transport(&self, transport: Arc<dyn Transport>) -> Result<Runtime> {
        let config = self.config.clone();
        if config.devices == 0 {
            return Err(DrError::Config("at least one device per rank is required".into()));
        }
        if config.threads_per_device == 0 {
            return Err(DrError::Config("devices need at least one thread".into()));
        }

        let comm = Communicator::new(transport);
        let (rank, size) = (comm.rank(), comm.size());

        let owners = (0..size)
            .flat_map(|r| (0..config.devices).map(move |d| Owner::new(r, d)))
            .collect();
        let mesh = ResourceMeshBuilder::new(owners, [size, config.devices])
            .with_axis(0, MeshAxis::new(RANK_AXIS))
            .with_axis(1, MeshAxis::new(DEVICE_AXIS))
            .build()?;

        let devices = (0..config.devices)
            .map(|d| {
                Device::new(
                    Owner::new(rank, d),
                    config.threads_per_device,
                    config.device_memory,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        log::debug!(
            "rank {} of {} on {}: {} devices x {} threads",
            rank,
            size,
            config.node_name,
            config.devices,
            config.threads_per_device
        );

        Ok(Runtime {
            inner: Arc::new(RuntimeInner {
                comm,
                devices,
                mesh,
                config,
            }),
        })
    }
}

struct RuntimeInner {
    comm: Communicator,
    devices: Vec<Arc<Device>>,
    mesh: ResourceMesh,
    config: RuntimeConfig,
}

/// Handle to the execution context of one rank. Cheap to clone.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Starts building a runtime.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Rank of the calling process.
    pub fn rank(&self) -> usize {
        self.inner.comm.rank()
    }

    /// Number of ranks.
    pub fn size(&self) -> usize {
        self.inner.comm.size()
    }

    /// The collectives of the group.
    pub fn comm(&self) -> &Communicator {
        &self.inner.comm
    }

    /// Blocks until every rank has reached the barrier.
    pub fn barrier(&self) -> Result<()> {
        self.inner.comm.barrier()
    }

    /// Devices of the calling rank.
    pub fn devices(&self) -> &[Arc<Device>] {
        &self.inner.devices
    }

    /// The local device with index `device`.
    pub fn device(&self, device: usize) -> Result<&Arc<Device>> {
        self.inner
            .devices
            .get(device)
            .ok_or(DrError::UnknownDevice {
                rank: self.rank(),
                device,
            })
    }

    /// The local device that backs `owner`.
    pub fn device_for(&self, owner: Owner) -> Result<&Arc<Device>> {
        if owner.rank != self.rank() {
            return Err(DrError::UnknownDevice {
                rank: owner.rank,
                device: owner.device,
            });
        }
        self.device(owner.device)
    }

    /// Every resource of the run, rank-major.
    pub fn resources(&self) -> &[Owner] {
        self.inner.mesh.resources()
    }

    /// The `[ranks, devices]` resource mesh.
    pub fn mesh(&self) -> &ResourceMesh {
        &self.inner.mesh
    }

    /// Default partition strategy.
    pub fn distribution(&self) -> Distribution {
        self.inner.config.distribution
    }

    /// Name of the node the rank runs on.
    pub fn node_name(&self) -> &str {
        &self.inner.config.node_name
    }

    /// The configuration the runtime was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }
}

impl core::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Runtime")
            .field("rank", &self.rank())
            .field("size", &self.size())
            .field("devices", &self.inner.devices)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_rank_runtime() {
        let rt = Runtime::builder().devices(3).build().unwrap();
        assert_eq!((rt.rank(), rt.size()), (0, 1));
        assert_eq!(rt.devices().len(), 3);
        assert_eq!(rt.resources().len(), 3);
        assert_eq!(rt.mesh().extent("device"), Some(3));
        assert_eq!(rt.device(2).unwrap().owner(), Owner::new(0, 2));
        assert!(rt.barrier().is_ok());
    }

    #[test]
    fn test_device_lookup_errors() {
        let rt = Runtime::builder().devices(2).build().unwrap();
        assert!(matches!(
            rt.device(2),
            Err(DrError::UnknownDevice { rank: 0, device: 2 })
        ));
        assert!(rt.device_for(Owner::new(1, 0)).is_err());
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            Runtime::builder().devices(0).build(),
            Err(DrError::Config(_))
        ));
        assert!(matches!(
            Runtime::builder().threads_per_device(0).build(),
            Err(DrError::Config(_))
        ));
    }
}
