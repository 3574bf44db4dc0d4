//! Capability traits for remote and distributed ranges.
//!
//! The traits are the compile-time contract between containers, views and
//! algorithms. A type that cannot report its owner or enumerate its segments
//! simply does not implement them, so passing it to a distributed algorithm is
//! rejected by the compiler instead of being iterated without regard for its
//! segmentation.
//!
//! | Trait | Requires |
//! |-------|----------|
//! | [`RemoteIterator`] | forward traversal and an owner query |
//! | [`RemoteContiguousIterator`] | random access and a contiguous local projection |
//! | [`RemoteRange`] | length, sub-slicing, owner query and a local iterator |
//! | [`RemoteContiguousRange`] | a contiguous local slice |
//! | [`DistributedRange`] | an ordered list of remote segments |
//! | [`DistributedContiguousRange`] | contiguous local slices for every owned segment |

use core::fmt;
use core::ops::Range;

use crate::error::Result;
use crate::layout::Layout;

/// An execution resource: one device on one rank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Owner {
    /// Rank of the process that holds the memory.
    pub rank: usize,
    /// Device index local to that rank.
    pub device: usize,
}

impl Owner {
    /// Creates an owner for `device` on `rank`.
    pub const fn new(rank: usize, device: usize) -> Self {
        Self { rank, device }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rank {} device {}", self.rank, self.device)
    }
}

/// Anything that can tell which resource it lives on.
pub trait Remote {
    /// The owning resource.
    fn owner(&self) -> Owner;

    /// The owning rank.
    fn rank(&self) -> usize {
        self.owner().rank
    }
}

/// A forward cursor over a distributed sequence that knows its owner.
pub trait RemoteIterator: Remote + Clone + PartialEq {
    /// Global position of the cursor.
    fn index(&self) -> usize;

    /// Moves the cursor `n` positions forward.
    fn advance(&mut self, n: usize);
}

/// A random-access remote cursor with a contiguous local projection.
pub trait RemoteContiguousIterator: RemoteIterator {
    /// Element type of the underlying memory.
    type Element;

    /// Moves the cursor `n` positions backward.
    fn retreat(&mut self, n: usize);

    /// The rest of the owning segment, starting at the cursor.
    ///
    /// Fails with [`DrError::NotLocal`](crate::DrError::NotLocal) when the
    /// segment is stored on another rank.
    fn local(&self) -> Result<&[Self::Element]>;
}

/// A segment of a distributed range: a forward range with an owner.
pub trait RemoteRange: Remote + Sized {
    /// Item produced by the local iterator.
    type Item;
    /// Iterator over the segment, valid only on the owning rank.
    type Local: Iterator<Item = Self::Item>;

    /// Number of elements in the segment.
    fn len(&self) -> usize;

    /// Returns true if the segment has no elements.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Restricts the segment to `range`, relative to its first element.
    fn slice(self, range: Range<usize>) -> Self;

    /// The local iterator, or `None` when the data lives on another rank.
    fn local(self) -> Option<Self::Local>;
}

/// A remote range backed by contiguous memory.
pub trait RemoteContiguousRange: RemoteRange {
    /// Element type of the underlying memory.
    type Element;

    /// The segment's memory, or `None` when it lives on another rank.
    fn local_slice(&self) -> Option<&[Self::Element]>;
}

/// A logical sequence split into an ordered list of remote segments.
///
/// `layout` and `segments` must describe the same segments in the same order.
/// Both are fallible: composed views check the compatibility of their inputs
/// when an algorithm asks for them, not when the view is built.
pub trait DistributedRange: Sized {
    /// Item produced when iterating the range.
    type Item;
    /// Segment type.
    type Segment: RemoteRange<Item = Self::Item>;

    /// Segment table of the range.
    fn layout(&self) -> Result<Layout>;

    /// The segments, in global index order.
    fn segments(self) -> Result<Vec<Self::Segment>>;

    /// Number of elements in the range.
    fn size(&self) -> Result<usize> {
        Ok(self.layout()?.size())
    }
}

/// A distributed range whose segments are contiguous memory.
pub trait DistributedContiguousRange: DistributedRange {
    /// Element type of the underlying memory.
    type Element;

    /// Slices of the segments stored on the calling rank, tagged with their
    /// position in the layout.
    fn local_slices(&self) -> Result<Vec<(usize, &[Self::Element])>>;
}

/// The rank that owns `remote`.
pub fn rank<R: Remote + ?Sized>(remote: &R) -> usize {
    remote.rank()
}

/// The segments of a distributed range.
pub fn segments<R: DistributedRange>(range: R) -> Result<Vec<R::Segment>> {
    range.segments()
}

/// The local iterator of a segment.
pub fn local<R: RemoteRange>(segment: R) -> Option<R::Local> {
    segment.local()
}

/// Verifies that a range's segments agree with its layout.
///
/// Returns false when the layout cannot be computed, when a segment's owner
/// or length differs from its layout entry, or when the layout does not
/// partition `[0, size)`.
pub fn check_segments<R: DistributedRange + Clone>(range: &R) -> bool {
    let Ok(layout) = range.layout() else {
        return false;
    };
    let Ok(segments) = range.clone().segments() else {
        return false;
    };

    layout.is_partition()
        && layout.num_segments() == segments.len()
        && layout
            .segments()
            .iter()
            .zip(&segments)
            .all(|(info, segment)| info.owner == segment.owner() && info.len == segment.len())
}
