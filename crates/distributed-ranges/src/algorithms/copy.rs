use core::borrow::Borrow;

use super::dispatch;
use crate::concepts::{DistributedContiguousRange, DistributedRange};
use crate::error::{DrError, Result};
use crate::runtime::Runtime;
use crate::views::zip;

/// Copies `src`, held by rank `root`, into `dst`. Collective.
///
/// The root cuts `src` along the layout of `dst` and sends every rank the
/// elements of its segments. Other ranks pass an empty slice. If the length
/// of `src` differs from the size of `dst`, every rank fails with
/// [`DrError::LengthMismatch`].
pub fn copy<'a, R, T>(runtime: &Runtime, root: usize, src: &[T], dst: R) -> Result<()>
where
    R: DistributedRange<Item = &'a mut T>,
    R::Segment: Send,
    T: Clone + Send + Sync + 'static,
{
    let comm = runtime.comm();
    let layout = dst.layout()?;

    let len = comm.broadcast(root, src.len())?;
    if len != layout.size() {
        return Err(DrError::LengthMismatch {
            expected: layout.size(),
            actual: len,
        });
    }

    // Segments of one rank, in layout order, concatenated.
    let chunks = if runtime.rank() == root {
        let mut chunks: Vec<Vec<T>> = vec![Vec::new(); runtime.size()];
        for info in layout.segments() {
            chunks[info.owner.rank].extend_from_slice(&src[info.range()]);
        }
        chunks
    } else {
        Vec::new()
    };
    let chunk = comm.scatter(root, chunks)?;

    let mut starts = vec![0; layout.num_segments()];
    let mut pos = 0;
    for (idx, info) in layout.owned_by(runtime.rank()) {
        starts[idx] = pos;
        pos += info.len;
    }
    log::debug!(
        "rank {}: received {} of {} elements from rank {root}",
        runtime.rank(),
        chunk.len(),
        len
    );

    dispatch(runtime, dst.segments()?, |task, local| {
        let start = starts[task.index];
        for (slot, value) in local.zip(&chunk[start..]) {
            *slot = value.clone();
        }
        Ok(())
    })?;
    Ok(())
}

/// Copies `src` into `dst` element by element. Both must share one
/// segmentation.
pub fn copy_range<'a, S, D, T>(runtime: &Runtime, src: S, dst: D) -> Result<()>
where
    S: DistributedRange,
    D: DistributedRange<Item = &'a mut T>,
    S::Segment: Send,
    D::Segment: Send,
    S::Item: Borrow<T>,
    T: Clone + 'a,
{
    transform(runtime, src, dst, |x| x.borrow().clone())
}

/// Writes `f(x)` to `dst` for every element `x` of `src`. Both must share one
/// segmentation.
pub fn transform<'a, S, D, T, F>(runtime: &Runtime, src: S, dst: D, f: F) -> Result<()>
where
    S: DistributedRange,
    D: DistributedRange<Item = &'a mut T>,
    S::Segment: Send,
    D::Segment: Send,
    F: Fn(S::Item) -> T + Sync,
    T: 'a,
{
    let segments = zip((src, dst)).segments()?;
    dispatch(runtime, segments, |_, local| {
        for (x, out) in local {
            *out = f(x);
        }
        Ok(())
    })?;
    Ok(())
}

fn local_parts<R>(range: &R) -> Result<Vec<(usize, Vec<R::Element>)>>
where
    R: DistributedContiguousRange,
    R::Element: Clone,
{
    Ok(range
        .local_slices()?
        .into_iter()
        .map(|(idx, slice)| (idx, slice.to_vec()))
        .collect())
}

fn assemble<T>(parts: Vec<Vec<(usize, Vec<T>)>>, size: usize) -> Vec<T> {
    let mut parts: Vec<_> = parts.into_iter().flatten().collect();
    parts.sort_by_key(|(idx, _)| *idx);
    let mut out = Vec::with_capacity(size);
    for (_, part) in parts {
        out.extend(part);
    }
    out
}

/// Collects every element of `range` on rank `root`. Collective.
///
/// Returns `Some` on the root and `None` elsewhere.
pub fn gather<R>(runtime: &Runtime, root: usize, range: R) -> Result<Option<Vec<R::Element>>>
where
    R: DistributedContiguousRange,
    R::Element: Clone + Send + 'static,
{
    let size = range.size()?;
    let parts = runtime.comm().gather(root, local_parts(&range)?)?;
    Ok(parts.map(|parts| assemble(parts, size)))
}

/// Collects every element of `range` on every rank. Collective.
pub fn all_gather<R>(runtime: &Runtime, range: R) -> Result<Vec<R::Element>>
where
    R: DistributedContiguousRange,
    R::Element: Clone + Send + 'static,
{
    let size = range.size()?;
    let parts = runtime.comm().all_gather(local_parts(&range)?)?;
    Ok(assemble(parts, size))
}
