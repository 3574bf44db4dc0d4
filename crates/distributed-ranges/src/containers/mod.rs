//! Distributed containers.

mod replicated;
mod sparse;
mod vector;

pub use replicated::*;
pub use sparse::*;
pub use vector::*;
