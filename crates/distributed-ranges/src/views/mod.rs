//! Lazy views over distributed ranges.
//!
//! A view is a small descriptor: it holds its base range (by reference when
//! built from `&DistributedVector`) and the adaptor, never element memory.
//! Views are distributed ranges themselves, so they compose and can be handed
//! to any algorithm. Evaluation happens in the local iterators of their
//! segments, on the device that owns each segment.
//!
//! ```rust
//! use distributed_ranges::containers::DistributedVector;
//! use distributed_ranges::views::{self, DistributedRangeExt};
//! use distributed_ranges::{Runtime, reduce};
//!
//! let rt = Runtime::builder().devices(2).build().unwrap();
//! let v = DistributedVector::from_fn(&rt, 10, |i| i as i64).unwrap();
//!
//! let evens = views::take(&v, 6).transform(|x: &i64| x * 2);
//! assert_eq!(reduce(&rt, evens, 0, |a, b| a + b).unwrap(), 30);
//! ```

mod cloned;
mod enumerate;
mod subrange;
mod transform;
mod zip;

pub use cloned::*;
pub use enumerate::*;
pub use subrange::*;
pub use transform::*;
pub use zip::*;

use core::ops::Range;

use crate::concepts::DistributedRange;

/// Applies `f` to every element of `range` on access.
pub fn transform<R, F, U>(range: R, f: F) -> Transform<R, F>
where
    R: DistributedRange,
    F: Fn(R::Item) -> U + Clone,
{
    Transform::new(range, f)
}

/// Zips a tuple of two or three ranges element-wise.
///
/// The ranges must share one segmentation; a mismatch is reported as
/// [`DrError::SegmentMismatch`](crate::DrError::SegmentMismatch) when the view
/// is evaluated.
pub fn zip<Z: ZipRanges>(ranges: Z) -> Z::Output {
    ranges.zip_ranges()
}

/// The first `n` elements of `range`.
pub fn take<R: DistributedRange>(range: R, n: usize) -> Subrange<R> {
    Subrange::new(range, 0..n)
}

/// Every element of `range` after the first `n`.
pub fn drop<R: DistributedRange>(range: R, n: usize) -> Subrange<R> {
    Subrange::new(range, n..usize::MAX)
}

/// The elements of `range` at positions `bounds`.
pub fn subrange<R: DistributedRange>(range: R, bounds: Range<usize>) -> Subrange<R> {
    Subrange::new(range, bounds)
}

/// Pairs every element of `range` with its index.
pub fn enumerate<R: DistributedRange>(range: R) -> Enumerate<R> {
    Enumerate::new(range)
}

/// Clones the borrowed elements of `range`.
pub fn cloned<'a, R, T>(range: R) -> Cloned<R>
where
    R: DistributedRange<Item = &'a T>,
    T: Clone + 'a,
{
    Cloned::new(range)
}

/// Method syntax for the views of this module.
pub trait DistributedRangeExt: DistributedRange {
    /// See [`transform`].
    fn transform<F, U>(self, f: F) -> Transform<Self, F>
    where
        F: Fn(Self::Item) -> U + Clone,
    {
        transform(self, f)
    }

    /// Zips `self` with `other`. See [`zip`].
    fn zip<B: DistributedRange>(self, other: B) -> Zip2<Self, B> {
        zip((self, other))
    }

    /// See [`take`].
    fn take(self, n: usize) -> Subrange<Self> {
        take(self, n)
    }

    /// Skips the first `n` elements. See [`drop`].
    fn skip(self, n: usize) -> Subrange<Self> {
        drop(self, n)
    }

    /// See [`subrange`].
    fn subrange(self, bounds: Range<usize>) -> Subrange<Self> {
        subrange(self, bounds)
    }

    /// See [`enumerate`].
    fn enumerate(self) -> Enumerate<Self> {
        enumerate(self)
    }

    /// See [`cloned`].
    fn cloned<'a, T>(self) -> Cloned<Self>
    where
        Self: DistributedRange<Item = &'a T>,
        T: Clone + 'a,
    {
        cloned(self)
    }
}

impl<R: DistributedRange> DistributedRangeExt for R {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concepts::{RemoteRange, check_segments};
    use crate::containers::DistributedVector;
    use crate::runtime::Runtime;
    use crate::sharding::Distribution;

    fn locals<R: DistributedRange>(range: R) -> Vec<R::Item> {
        range
            .segments()
            .unwrap()
            .into_iter()
            .flat_map(|segment| segment.local().unwrap())
            .collect()
    }

    #[test]
    fn test_subrange_cuts_and_drops_segments() {
        let rt = Runtime::builder().devices(4).build().unwrap();
        let v = DistributedVector::from_fn(&rt, 20, |i| i).unwrap();

        let view = subrange(&v, 3..12);
        assert!(check_segments(&view));
        let lens: Vec<_> = view.layout().unwrap().segments().iter().map(|s| s.len).collect();
        assert_eq!(lens, vec![2, 5, 2]);
        assert_eq!(locals(view.cloned()), (3..12).collect::<Vec<_>>());

        assert_eq!(drop(&v, 25).size().unwrap(), 0);
        assert_eq!(take(&v, 100).size().unwrap(), 20);
        assert!(drop(&v, 20).segments().unwrap().is_empty());
    }

    #[test]
    fn test_enumerate_is_view_relative() {
        let rt = Runtime::builder().devices(3).build().unwrap();
        let v = DistributedVector::from_fn(&rt, 9, |i| i * 10).unwrap();
        let pairs: Vec<_> = locals(enumerate(drop(&v, 4)))
            .into_iter()
            .map(|(i, x)| (i, *x))
            .collect();
        assert_eq!(pairs, vec![(0, 40), (1, 50), (2, 60), (3, 70), (4, 80)]);
    }

    #[test]
    fn test_zip_mismatch_fails_at_evaluation() {
        let rt = Runtime::builder().devices(2).build().unwrap();
        let a = DistributedVector::<f64>::new(&rt, 10).unwrap();
        let b = DistributedVector::<f64>::with_distribution(&rt, 10, Distribution::BlockCyclic {
            block_size: 2,
        })
        .unwrap();

        let view = zip((&a, &b));
        assert!(!check_segments(&view));
        assert!(matches!(view.segments(), Err(crate::DrError::SegmentMismatch(_))));
    }

    #[test]
    fn test_zip3_items() {
        let rt = Runtime::builder().devices(2).build().unwrap();
        let a = DistributedVector::from_fn(&rt, 5, |i| i).unwrap();
        let b = DistributedVector::from_fn(&rt, 5, |i| i * 2).unwrap();
        let c = DistributedVector::from_fn(&rt, 5, |i| i * 3).unwrap();
        let sums: Vec<_> = locals(zip((&a, &b, &c)).transform(|(x, y, z)| x + y + z));
        assert_eq!(sums, vec![0, 6, 12, 18, 24]);
    }
}
