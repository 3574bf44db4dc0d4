use core::cmp::Ordering;
use core::ops::{Add, AddAssign, Range, Sub};

use rayon::prelude::*;

use crate::concepts::{
    DistributedContiguousRange, DistributedRange, Owner, Remote, RemoteContiguousIterator,
    RemoteContiguousRange, RemoteIterator, RemoteRange,
};
use crate::error::{DrError, Result};
use crate::layout::Layout;
use crate::runtime::{DeviceBuffer, Runtime, queue};
use crate::sharding::Distribution;

/// A one-dimensional sequence partitioned over the resources of a run.
///
/// The vector owns one arena per device of the calling rank. Every segment of
/// its [`Layout`] is an index range into the arena of its owner; segments
/// owned by other ranks exist only as descriptors.
///
/// Elements stored on another rank cannot be dereferenced directly: `get`
/// returns [`DrError::NotLocal`] and data moves between ranks only through
/// collective algorithms such as [`copy`](crate::algorithms::copy) and
/// [`all_gather`](crate::algorithms::all_gather).
pub struct DistributedVector<T> {
    runtime: Runtime,
    layout: Layout,
    /// Position of every segment inside its owner's arena.
    arena_offsets: Vec<usize>,
    /// One arena per device of the calling rank.
    arenas: Vec<DeviceBuffer<T>>,
}

impl<T: Clone + Default> DistributedVector<T> {
    /// A vector of `n` default values, partitioned with the runtime's default
    /// distribution.
    pub fn new(runtime: &Runtime, n: usize) -> Result<Self> {
        Self::with_distribution(runtime, n, runtime.distribution())
    }

    /// A vector of `n` default values, partitioned with `distribution`.
    pub fn with_distribution(
        runtime: &Runtime,
        n: usize,
        distribution: Distribution,
    ) -> Result<Self> {
        Self::from_elem(runtime, n, distribution, T::default())
    }
}

impl<T: Clone> DistributedVector<T> {
    /// A vector of `n` copies of `value`.
    pub fn from_elem(
        runtime: &Runtime,
        n: usize,
        distribution: Distribution,
        value: T,
    ) -> Result<Self> {
        let layout = distribution.layout(n, runtime.resources())?;
        Self::with_layout(runtime, layout, value)
    }

    /// A vector with an explicit segment table.
    ///
    /// Every owner in `layout` must be a resource of `runtime`.
    pub fn with_layout(runtime: &Runtime, layout: Layout, value: T) -> Result<Self> {
        let rank = runtime.rank();
        let mut arena_len = vec![0; runtime.devices().len()];
        let mut arena_offsets = Vec::with_capacity(layout.num_segments());

        for info in layout.segments() {
            if !runtime.resources().contains(&info.owner) {
                return Err(DrError::Config(format!(
                    "{} is not a resource of this runtime",
                    info.owner
                )));
            }
            if info.owner.rank == rank {
                let used = &mut arena_len[info.owner.device];
                arena_offsets.push(*used);
                *used += info.len;
            } else {
                arena_offsets.push(0);
            }
        }

        let arenas = runtime
            .devices()
            .iter()
            .zip(&arena_len)
            .map(|(device, &len)| device.allocate(len, value.clone()))
            .collect::<Result<Vec<_>>>()?;

        log::debug!(
            "rank {}: distributed vector of {} elements in {} segments ({} local elements)",
            rank,
            layout.size(),
            layout.num_segments(),
            arena_len.iter().sum::<usize>()
        );

        Ok(Self {
            runtime: runtime.clone(),
            layout,
            arena_offsets,
            arenas,
        })
    }
}

impl<T: Clone + Default + Send + Sync> DistributedVector<T> {
    /// A vector whose element `i` is `f(i)`. Only local elements are computed.
    pub fn from_fn<F>(runtime: &Runtime, n: usize, f: F) -> Result<Self>
    where
        F: Fn(usize) -> T + Sync,
    {
        let mut vec = Self::new(runtime, n)?;
        let layout = vec.layout.clone();
        let f = &f;

        queue::scope(|scope| {
            let events: Vec<_> = vec
                .local_slices_mut()
                .into_iter()
                .map(|(seg, slice)| {
                    let info = layout.segments()[seg];
                    let device = &runtime.devices()[info.owner.device];
                    queue::submit(scope, device, move || {
                        slice
                            .par_iter_mut()
                            .enumerate()
                            .for_each(|(i, x)| *x = f(info.offset + i));
                        Ok(())
                    })
                })
                .collect();
            queue::wait(events)
        })?;
        Ok(vec)
    }
}

impl<T> DistributedVector<T> {
    /// The runtime the vector was created with.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// The segment table.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// Returns true if the vector has no elements.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// The resource that stores element `index`.
    pub fn owner_of(&self, index: usize) -> Result<Owner> {
        self.layout.owner_of(index).ok_or(DrError::OutOfBounds {
            index,
            size: self.size(),
        })
    }

    fn resolve(&self, index: usize) -> Result<(usize, usize)> {
        let (seg, local) = self.layout.locate(index).ok_or(DrError::OutOfBounds {
            index,
            size: self.size(),
        })?;
        let owner = self.layout.segments()[seg].owner;
        if owner.rank != self.runtime.rank() {
            return Err(DrError::NotLocal {
                index,
                owner,
                rank: self.runtime.rank(),
            });
        }
        Ok((owner.device, self.arena_offsets[seg] + local))
    }

    /// The element at global `index`, if it is stored on the calling rank.
    pub fn get(&self, index: usize) -> Result<&T> {
        let (device, pos) = self.resolve(index)?;
        Ok(&self.arenas[device][pos])
    }

    /// Mutable access to the element at global `index`, if it is local.
    pub fn get_mut(&mut self, index: usize) -> Result<&mut T> {
        let (device, pos) = self.resolve(index)?;
        Ok(&mut self.arenas[device][pos])
    }

    /// Cursor at the first element.
    pub fn begin(&self) -> Cursor<'_, T> {
        Cursor {
            vec: self,
            index: 0,
        }
    }

    /// Cursor one past the last element.
    pub fn end(&self) -> Cursor<'_, T> {
        Cursor {
            vec: self,
            index: self.size(),
        }
    }

    /// Memory of segment `seg`, or `None` if it is stored on another rank.
    pub fn segment_slice(&self, seg: usize) -> Option<&[T]> {
        let info = self.layout.segment(seg)?;
        if info.owner.rank != self.runtime.rank() {
            return None;
        }
        let start = self.arena_offsets[seg];
        Some(&self.arenas[info.owner.device][start..start + info.len])
    }

    /// Memory of every local segment, tagged with its position in the layout.
    pub fn local_slices_mut(&mut self) -> Vec<(usize, &mut [T])> {
        self.split_arenas()
            .into_iter()
            .enumerate()
            .filter_map(|(seg, slice)| slice.map(|slice| (seg, slice)))
            .collect()
    }

    /// Splits the arenas into one disjoint slice per local segment.
    fn split_arenas(&mut self) -> Vec<Option<&mut [T]>> {
        let rank = self.runtime.rank();
        let mut rests: Vec<&mut [T]> = self.arenas.iter_mut().map(|a| &mut a[..]).collect();
        let mut slices = Vec::with_capacity(self.layout.num_segments());

        // Segments of one device are laid out in its arena in global order.
        for info in self.layout.segments() {
            if info.owner.rank != rank {
                slices.push(None);
                continue;
            }
            let rest = core::mem::take(&mut rests[info.owner.device]);
            let (head, tail) = rest.split_at_mut(info.len);
            rests[info.owner.device] = tail;
            slices.push(Some(head));
        }
        slices
    }
}

impl<T: Clone + Send + Sync + 'static> DistributedVector<T> {
    /// Every element, gathered on every rank. Collective.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        crate::algorithms::all_gather(&self.runtime, self)
    }
}

impl<T> core::fmt::Debug for DistributedVector<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DistributedVector")
            .field("rank", &self.runtime.rank())
            .field("layout", &self.layout)
            .finish()
    }
}

/// A read-only segment of a [`DistributedVector`].
pub struct VectorSegment<'a, T> {
    owner: Owner,
    len: usize,
    data: Option<&'a [T]>,
}

impl<T> Clone for VectorSegment<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for VectorSegment<'_, T> {}

impl<T> Remote for VectorSegment<'_, T> {
    fn owner(&self) -> Owner {
        self.owner
    }
}

impl<'a, T> RemoteRange for VectorSegment<'a, T> {
    type Item = &'a T;
    type Local = core::slice::Iter<'a, T>;

    fn len(&self) -> usize {
        self.len
    }

    fn slice(self, range: Range<usize>) -> Self {
        Self {
            owner: self.owner,
            len: range.len(),
            data: self.data.map(|data| &data[range]),
        }
    }

    fn local(self) -> Option<Self::Local> {
        self.data.map(|data| data.iter())
    }
}

impl<'a, T> RemoteContiguousRange for VectorSegment<'a, T> {
    type Element = T;

    fn local_slice(&self) -> Option<&[T]> {
        self.data
    }
}

/// A mutable segment of a [`DistributedVector`].
pub struct VectorSegmentMut<'a, T> {
    owner: Owner,
    len: usize,
    data: Option<&'a mut [T]>,
}

impl<T> Remote for VectorSegmentMut<'_, T> {
    fn owner(&self) -> Owner {
        self.owner
    }
}

impl<'a, T> RemoteRange for VectorSegmentMut<'a, T> {
    type Item = &'a mut T;
    type Local = core::slice::IterMut<'a, T>;

    fn len(&self) -> usize {
        self.len
    }

    fn slice(self, range: Range<usize>) -> Self {
        Self {
            owner: self.owner,
            len: range.len(),
            data: self.data.map(|data| &mut data[range]),
        }
    }

    fn local(self) -> Option<Self::Local> {
        self.data.map(|data| data.iter_mut())
    }
}

impl<'a, T> RemoteContiguousRange for VectorSegmentMut<'a, T> {
    type Element = T;

    fn local_slice(&self) -> Option<&[T]> {
        self.data.as_deref()
    }
}

impl<'a, T> DistributedRange for &'a DistributedVector<T> {
    type Item = &'a T;
    type Segment = VectorSegment<'a, T>;

    fn layout(&self) -> Result<Layout> {
        Ok(self.layout.clone())
    }

    fn segments(self) -> Result<Vec<Self::Segment>> {
        Ok(self
            .layout
            .segments()
            .iter()
            .enumerate()
            .map(|(seg, info)| VectorSegment {
                owner: info.owner,
                len: info.len,
                data: self.segment_slice(seg),
            })
            .collect())
    }
}

impl<'a, T> DistributedRange for &'a mut DistributedVector<T> {
    type Item = &'a mut T;
    type Segment = VectorSegmentMut<'a, T>;

    fn layout(&self) -> Result<Layout> {
        Ok(self.layout.clone())
    }

    fn segments(self) -> Result<Vec<Self::Segment>> {
        let infos = self.layout.segments().to_vec();
        Ok(infos
            .into_iter()
            .zip(self.split_arenas())
            .map(|(info, data)| VectorSegmentMut {
                owner: info.owner,
                len: info.len,
                data,
            })
            .collect())
    }
}

impl<T> DistributedContiguousRange for &DistributedVector<T> {
    type Element = T;

    fn local_slices(&self) -> Result<Vec<(usize, &[T])>> {
        Ok(self.local_segments())
    }
}

impl<T> DistributedContiguousRange for &mut DistributedVector<T> {
    type Element = T;

    fn local_slices(&self) -> Result<Vec<(usize, &[T])>> {
        Ok(self.local_segments())
    }
}

impl<T> DistributedVector<T> {
    /// Memory of every segment stored on the calling rank, tagged with its
    /// position in the layout.
    pub fn local_segments(&self) -> Vec<(usize, &[T])> {
        self.layout
            .owned_by(self.runtime.rank())
            .filter_map(|(seg, _)| self.segment_slice(seg).map(|slice| (seg, slice)))
            .collect()
    }
}

/// A position in a [`DistributedVector`].
///
/// Cursors compare by global index, so ordering is well defined across
/// segment boundaries. Cursors of different vectors are never equal and are
/// unordered. Dereferencing is checked: positions on other ranks yield
/// [`DrError::NotLocal`].
pub struct Cursor<'a, T> {
    vec: &'a DistributedVector<T>,
    index: usize,
}

impl<'a, T> Cursor<'a, T> {
    /// The element under the cursor.
    pub fn get(&self) -> Result<&'a T> {
        self.vec.get(self.index)
    }

    /// Signed number of positions from `self` to `other`.
    pub fn distance(&self, other: &Self) -> isize {
        other.index as isize - self.index as isize
    }

    /// The vector the cursor points into.
    pub fn container(&self) -> &'a DistributedVector<T> {
        self.vec
    }
}

impl<T> Clone for Cursor<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Cursor<'_, T> {}

impl<T> PartialEq for Cursor<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self.vec, other.vec) && self.index == other.index
    }
}

impl<T> PartialOrd for Cursor<'_, T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        core::ptr::eq(self.vec, other.vec).then(|| self.index.cmp(&other.index))
    }
}

impl<T> Remote for Cursor<'_, T> {
    /// Owner of the element under the cursor. The end position reports the
    /// owner of the last segment.
    fn owner(&self) -> Owner {
        let layout = &self.vec.layout;
        layout
            .owner_of(self.index)
            .or_else(|| layout.segments().last().map(|info| info.owner))
            .unwrap_or(Owner::new(self.vec.runtime.rank(), 0))
    }
}

impl<T> RemoteIterator for Cursor<'_, T> {
    fn index(&self) -> usize {
        self.index
    }

    fn advance(&mut self, n: usize) {
        self.index += n;
    }
}

impl<T> RemoteContiguousIterator for Cursor<'_, T> {
    type Element = T;

    fn retreat(&mut self, n: usize) {
        self.index = self.index.saturating_sub(n);
    }

    fn local(&self) -> Result<&[T]> {
        let (seg, local) = self.vec.layout.locate(self.index).ok_or(DrError::OutOfBounds {
            index: self.index,
            size: self.vec.size(),
        })?;
        self.vec
            .segment_slice(seg)
            .map(|slice| &slice[local..])
            .ok_or(DrError::NotLocal {
                index: self.index,
                owner: self.vec.layout.segments()[seg].owner,
                rank: self.vec.runtime.rank(),
            })
    }
}

impl<T> Add<usize> for Cursor<'_, T> {
    type Output = Self;

    fn add(mut self, n: usize) -> Self {
        self.advance(n);
        self
    }
}

impl<T> AddAssign<usize> for Cursor<'_, T> {
    fn add_assign(&mut self, n: usize) {
        self.advance(n);
    }
}

impl<T> Sub<usize> for Cursor<'_, T> {
    type Output = Self;

    fn sub(mut self, n: usize) -> Self {
        self.retreat(n);
        self
    }
}

impl<T> core::fmt::Debug for Cursor<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Cursor").field("index", &self.index).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collective::ThreadGroup;

    #[test]
    fn test_local_slice_only_on_owning_rank() {
        let builder = Runtime::builder().devices(1);
        ThreadGroup::new(2)
            .run(&builder, |rt| {
                let v = DistributedVector::from_fn(&rt, 8, |i| i as i32).unwrap();
                let segments = (&v).segments().unwrap();
                assert_eq!(segments.len(), 2);

                let mine = segments[rt.rank()];
                let theirs = segments[1 - rt.rank()];
                let start = 4 * rt.rank() as i32;
                assert_eq!(mine.local_slice(), Some(&[start, start + 1, start + 2, start + 3][..]));
                assert_eq!(mine.slice(1..3).local_slice(), Some(&[start + 1, start + 2][..]));
                assert_eq!(theirs.local_slice(), None);
                assert!(theirs.local().is_none());
            })
            .unwrap();
    }

    #[test]
    fn test_mutable_segment_exposes_its_memory() {
        let rt = Runtime::builder().devices(2).build().unwrap();
        let mut v = DistributedVector::from_fn(&rt, 6, |i| i as u8).unwrap();
        let mut segments = (&mut v).segments().unwrap();
        let last = segments.pop().unwrap();
        drop(segments);
        assert_eq!(last.local_slice(), Some(&[3, 4, 5][..]));

        for x in last.local().unwrap() {
            *x *= 2;
        }
        assert_eq!(v.to_vec().unwrap(), vec![0, 1, 2, 6, 8, 10]);
    }
}
