use crate::concepts::Owner;
use crate::error::{DrError, Result};
use crate::layout::Layout;

/// Strategy for partitioning `[0, n)` over a list of resources.
///
/// Every strategy produces contiguous segments in global index order; they
/// differ in segment sizes and in how segments are assigned to resources.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Distribution {
    /// One segment of `ceil(n / p)` elements per resource. Trailing resources
    /// may receive a shorter segment or none at all.
    #[default]
    Block,

    /// One segment per resource, sizes differing by at most one element.
    Balanced,

    /// Segments of `block_size` elements dealt to the resources round-robin,
    /// so a resource may own several segments.
    BlockCyclic {
        /// Elements per segment (the last one may be shorter).
        block_size: usize,
    },
}

impl Distribution {
    /// Builds the segment table of a range of `n` elements.
    pub fn layout(&self, n: usize, resources: &[Owner]) -> Result<Layout> {
        if resources.is_empty() {
            if n == 0 {
                return Ok(Layout::default());
            }
            return Err(DrError::Config(format!(
                "cannot distribute {n} elements over zero resources"
            )));
        }
        let p = resources.len();

        let layout = match *self {
            Distribution::Block => {
                let block = n.div_ceil(p);
                Layout::from_lengths(resources.iter().enumerate().map(|(i, &owner)| {
                    let start = (i * block).min(n);
                    let end = (start + block).min(n);
                    (owner, end - start)
                }))
            }
            Distribution::Balanced => {
                let base = n / p;
                let extra = n % p;
                Layout::from_lengths(
                    resources
                        .iter()
                        .enumerate()
                        .map(|(i, &owner)| (owner, base + usize::from(i < extra))),
                )
            }
            Distribution::BlockCyclic { block_size } => {
                if block_size == 0 {
                    return Err(DrError::Config(
                        "block_size must be greater than 0".to_string(),
                    ));
                }
                let blocks = n.div_ceil(block_size);
                Layout::from_lengths((0..blocks).map(|b| {
                    let start = b * block_size;
                    (resources[b % p], (start + block_size).min(n) - start)
                }))
            }
        };

        Ok(layout)
    }
}
