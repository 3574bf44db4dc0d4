use core::ops::{Add, Mul};

use num_traits::Zero;

use super::{all_gather_outcomes, dispatch};
use crate::concepts::DistributedRange;
use crate::error::Result;
use crate::runtime::Runtime;
use crate::views::{transform, zip};

/// Folds every element of `range` into `init` with `op`. Collective.
///
/// Each segment is folded sequentially on its device. The partial results of
/// all ranks are then exchanged and combined in segment order, starting from
/// `init`, so every rank returns the same value and repeated calls on the
/// same data and layout are bit-identical, whatever the scheduling.
///
/// `op` should be associative; it is never assumed to be commutative. If a
/// task fails on any rank, every rank returns the same [`DrError::Kernel`].
///
/// [`DrError::Kernel`]: crate::DrError::Kernel
pub fn reduce<R, T, F>(runtime: &Runtime, range: R, init: T, op: F) -> Result<T>
where
    R: DistributedRange<Item = T>,
    R::Segment: Send,
    T: Clone + Send + 'static,
    F: Fn(T, T) -> T + Sync,
{
    // Layout errors are the same on every rank; task failures may not be.
    let segments = range.segments()?;
    let partials = dispatch(runtime, segments, |_, local| Ok(local.reduce(&op))).map(|partials| {
        partials
            .into_iter()
            .filter_map(|(idx, partial)| partial.map(|p| (idx, p)))
            .collect::<Vec<(usize, T)>>()
    });

    let mut all: Vec<(usize, T)> = all_gather_outcomes(runtime, partials)?
        .into_iter()
        .flatten()
        .collect();
    all.sort_by_key(|&(idx, _)| idx);

    log::trace!("rank {}: combining {} partial results", runtime.rank(), all.len());
    Ok(all.into_iter().fold(init, |acc, (_, partial)| op(acc, partial)))
}

/// The sum of the element-wise products of `a` and `b`. Collective.
///
/// `a` and `b` must share one segmentation.
pub fn dot_product<A, B, T>(runtime: &Runtime, a: A, b: B) -> Result<T>
where
    A: DistributedRange,
    B: DistributedRange,
    A::Segment: Send,
    B::Segment: Send,
    A::Item: Mul<B::Item, Output = T>,
    T: Zero + Add<Output = T> + Clone + Send + 'static,
{
    let products = transform(zip((a, b)), |(x, y): (A::Item, B::Item)| x * y);
    reduce(runtime, products, T::zero(), |x, y| x + y)
}
