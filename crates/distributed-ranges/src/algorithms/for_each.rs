use core::ops::Add;

use num_traits::FromPrimitive;

use super::dispatch;
use crate::concepts::DistributedRange;
use crate::error::Result;
use crate::runtime::Runtime;
use crate::views::enumerate;

/// Calls `f` on every element of `range` stored on the calling rank.
///
/// Segments run concurrently on their devices; within a segment elements are
/// visited in order.
pub fn for_each<R, F>(runtime: &Runtime, range: R, f: F) -> Result<()>
where
    R: DistributedRange,
    R::Segment: Send,
    F: Fn(R::Item) + Sync,
{
    let segments = range.segments()?;
    dispatch(runtime, segments, |_, local| {
        local.for_each(&f);
        Ok(())
    })?;
    Ok(())
}

/// Assigns `value` to every element of `range`.
pub fn fill<'a, R, T>(runtime: &Runtime, range: R, value: T) -> Result<()>
where
    R: DistributedRange<Item = &'a mut T>,
    R::Segment: Send,
    T: Clone + Sync + 'a,
{
    for_each(runtime, range, |x| *x = value.clone())
}

/// Assigns `start`, `start + 1`, ... to the elements of `range`, in order.
pub fn iota<'a, R, T>(runtime: &Runtime, range: R, start: T) -> Result<()>
where
    R: DistributedRange<Item = &'a mut T>,
    R::Segment: Send,
    T: Copy + Add<Output = T> + FromPrimitive + Sync + 'a,
{
    let segments = enumerate(range).segments()?;
    dispatch(runtime, segments, |task, local| {
        for (i, x) in local {
            let step = T::from_usize(i)
                .ok_or_else(|| task.fail(format!("index {i} is not representable")))?;
            *x = start + step;
        }
        Ok(())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::DistributedVector;
    use crate::views::{DistributedRangeExt, drop};

    #[test]
    fn test_fill_then_for_each() {
        let rt = Runtime::builder().devices(3).build().unwrap();
        let mut v = DistributedVector::<i32>::new(&rt, 11).unwrap();
        fill(&rt, &mut v, 7).unwrap();
        for_each(&rt, drop(&mut v, 5), |x| *x += 1).unwrap();

        let values: Vec<_> = (0..11).map(|i| *v.get(i).unwrap()).collect();
        assert_eq!(values, vec![7, 7, 7, 7, 7, 8, 8, 8, 8, 8, 8]);
    }

    #[test]
    fn test_iota_over_subrange() {
        let rt = Runtime::builder().devices(2).build().unwrap();
        let mut v = DistributedVector::<u64>::new(&rt, 8).unwrap();
        iota(&rt, (&mut v).subrange(2..6), 100).unwrap();
        assert_eq!(v.to_vec().unwrap(), vec![0, 0, 100, 101, 102, 103, 0, 0]);
    }
}
