//! How ranges are spread over execution resources.

mod distribution;
mod mesh;

pub use distribution::*;
pub use mesh::*;
