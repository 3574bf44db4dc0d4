use std::collections::TryReserveError;

use thiserror::Error;

use crate::concepts::Owner;
use crate::sharding::MeshError;

/// Result type used throughout the crate.
pub type Result<T> = core::result::Result<T, DrError>;

/// Errors raised by distributed containers, views and algorithms.
///
/// Contract errors (`SegmentMismatch`, `ShapeMismatch`, `LengthMismatch`,
/// `OutOfBounds`, `NotLocal`) point at the call site and are never retried.
/// Resource errors (`OutOfMemory`, `Allocation`, `KernelPanicked`, `Kernel`,
/// `Collective`) are fatal to the call that raised them.
#[derive(Error, Debug)]
pub enum DrError {
    /// Two ranges that must share a segmentation do not.
    #[error("segment layouts are not aligned: {0}")]
    SegmentMismatch(String),

    /// Matrix or vector extents are incompatible.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A buffer length does not match the destination range.
    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Length required by the destination.
        expected: usize,
        /// Length that was provided.
        actual: usize,
    },

    /// A global index is outside the range.
    #[error("index {index} out of bounds for range of size {size}")]
    OutOfBounds {
        /// Requested global index.
        index: usize,
        /// Size of the range.
        size: usize,
    },

    /// Direct access to an element stored on another rank.
    #[error("element {index} is owned by {owner} and cannot be accessed from rank {rank}")]
    NotLocal {
        /// Requested global index.
        index: usize,
        /// Resource that stores the element.
        owner: Owner,
        /// Rank that attempted the access.
        rank: usize,
    },

    /// The device memory budget is exhausted.
    #[error("{owner} cannot allocate {requested} bytes ({available} bytes available)")]
    OutOfMemory {
        /// Device that refused the allocation.
        owner: Owner,
        /// Bytes requested.
        requested: usize,
        /// Bytes still free in the budget.
        available: usize,
    },

    /// The host allocator refused the buffer.
    #[error("allocation of {bytes} bytes on {owner} failed")]
    Allocation {
        /// Device the buffer was meant for.
        owner: Owner,
        /// Bytes requested.
        bytes: usize,
        /// Underlying allocator error.
        #[source]
        source: TryReserveError,
    },

    /// A device index outside the runtime's device list.
    #[error("rank {rank} has no device {device}")]
    UnknownDevice {
        /// Rank that was queried.
        rank: usize,
        /// Requested device index.
        device: usize,
    },

    /// A task panicked while running on a device.
    #[error("task on {owner} panicked")]
    KernelPanicked {
        /// Device the task ran on.
        owner: Owner,
    },

    /// A task reported a failure.
    #[error("task on {owner} failed: {reason}")]
    Kernel {
        /// Device the task ran on.
        owner: Owner,
        /// Failure description.
        reason: String,
    },

    /// A collective operation could not complete.
    #[error("collective {op} failed: {reason}")]
    Collective {
        /// Name of the collective.
        op: &'static str,
        /// Failure description.
        reason: String,
    },

    /// The runtime configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The resource mesh could not be built.
    #[error(transparent)]
    Mesh(#[from] MeshError),
}

impl DrError {
    pub(crate) fn collective(op: &'static str, reason: impl Into<String>) -> Self {
        DrError::Collective {
            op,
            reason: reason.into(),
        }
    }
}
