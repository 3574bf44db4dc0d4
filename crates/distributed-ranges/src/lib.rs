#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Distributed ranges.
//!
//! Containers split a logical sequence into segments owned by `(rank,
//! device)` resources. Views compose lazily on top of them, and algorithms
//! run one task per segment on the owning device, combining results in
//! segment order.
//!
//! ```rust
//! use distributed_ranges::containers::DistributedVector;
//! use distributed_ranges::{Runtime, ThreadGroup, dot_product};
//!
//! let builder = Runtime::builder().devices(2);
//! let sums = ThreadGroup::new(2)
//!     .run(&builder, |rt| {
//!         let x = DistributedVector::from_fn(&rt, 100, |i| i as f64).unwrap();
//!         let y = DistributedVector::from_fn(&rt, 100, |_| 1.0).unwrap();
//!         dot_product(&rt, &x, &y).unwrap()
//!     })
//!     .unwrap();
//! assert_eq!(sums, vec![4950.0, 4950.0]);
//! ```

mod error;
mod layout;

pub mod algorithms;
pub mod collective;
pub mod concepts;
pub mod containers;
pub mod runtime;
pub mod sharding;
pub mod views;

pub use algorithms::*;
pub use collective::{Communicator, ThreadGroup, Transport};
pub use concepts::Owner;
pub use error::*;
pub use layout::*;
pub use runtime::{Runtime, RuntimeBuilder, RuntimeConfig};
