//! Segment tables.

use core::ops::Range;

use crate::concepts::Owner;
use crate::error::{DrError, Result};

/// One entry of a [`Layout`]: which resource holds which part of the range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Resource that stores the segment.
    pub owner: Owner,
    /// Position of the segment's first element in the range.
    pub offset: usize,
    /// Number of elements.
    pub len: usize,
}

impl SegmentInfo {
    /// The global index range covered by the segment.
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// The ordered segment table of a distributed range.
///
/// Offsets are relative to the range, start at zero and are contiguous, so
/// the segments always partition `[0, size)`. Empty segments are never
/// stored; a range of size zero has no segments at all.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Layout {
    segments: Vec<SegmentInfo>,
    size: usize,
}

impl Layout {
    /// Builds a layout from `(owner, len)` pairs in global order.
    pub fn from_lengths<I>(lengths: I) -> Self
    where
        I: IntoIterator<Item = (Owner, usize)>,
    {
        let mut segments = Vec::new();
        let mut offset = 0;
        for (owner, len) in lengths {
            if len == 0 {
                continue;
            }
            segments.push(SegmentInfo { owner, offset, len });
            offset += len;
        }

        Self {
            segments,
            size: offset,
        }
    }

    /// Number of elements covered by the layout.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of segments.
    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    /// All segments in global order.
    pub fn segments(&self) -> &[SegmentInfo] {
        &self.segments
    }

    /// The segment at position `idx`.
    pub fn segment(&self, idx: usize) -> Option<&SegmentInfo> {
        self.segments.get(idx)
    }

    /// Segments stored on `rank`, with their positions in the table.
    pub fn owned_by(&self, rank: usize) -> impl Iterator<Item = (usize, &SegmentInfo)> {
        self.segments
            .iter()
            .enumerate()
            .filter(move |(_, info)| info.owner.rank == rank)
    }

    /// Resolves a global index to `(segment, local offset)` in O(log segments).
    pub fn locate(&self, index: usize) -> Option<(usize, usize)> {
        if index >= self.size {
            return None;
        }
        let seg = self
            .segments
            .partition_point(|info| info.offset + info.len <= index);
        let info = self.segments.get(seg)?;
        Some((seg, index - info.offset))
    }

    /// The resource that stores the element at `index`.
    pub fn owner_of(&self, index: usize) -> Option<Owner> {
        self.locate(index).map(|(seg, _)| self.segments[seg].owner)
    }

    /// True if the segments exactly tile `[0, size)` in order.
    pub fn is_partition(&self) -> bool {
        let mut expected = 0;
        for info in &self.segments {
            if info.offset != expected || info.len == 0 {
                return false;
            }
            expected += info.len;
        }
        expected == self.size
    }

    /// Checks that `other` has the same segment count, lengths and owners.
    pub fn check_aligned(&self, other: &Layout) -> Result<()> {
        if self.segments.len() != other.segments.len() {
            return Err(DrError::SegmentMismatch(format!(
                "{} segments vs {} segments",
                self.segments.len(),
                other.segments.len()
            )));
        }
        for (idx, (a, b)) in self.segments.iter().zip(&other.segments).enumerate() {
            if a.len != b.len || a.owner != b.owner {
                return Err(DrError::SegmentMismatch(format!(
                    "segment {idx}: {} elements on {} vs {} elements on {}",
                    a.len, a.owner, b.len, b.owner
                )));
            }
        }
        Ok(())
    }

    /// Intersects the layout with `range`.
    ///
    /// Returns, for every segment that overlaps `range`, its position in the
    /// table and the overlapping part relative to the segment's start.
    pub fn intersect(&self, range: Range<usize>) -> Vec<(usize, Range<usize>)> {
        let start = range.start.min(self.size);
        let end = range.end.clamp(start, self.size);

        self.segments
            .iter()
            .enumerate()
            .filter_map(|(idx, info)| {
                let lo = info.offset.max(start);
                let hi = (info.offset + info.len).min(end);
                (lo < hi).then(|| (idx, lo - info.offset..hi - info.offset))
            })
            .collect()
    }

    /// The layout of the sub-range `range`, rebased to start at zero.
    pub fn slice(&self, range: Range<usize>) -> Layout {
        Layout::from_lengths(
            self.intersect(range)
                .into_iter()
                .map(|(idx, local)| (self.segments[idx].owner, local.len())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owners(n: usize) -> Vec<Owner> {
        (0..n).map(|d| Owner::new(0, d)).collect()
    }

    fn sample() -> Layout {
        let o = owners(3);
        Layout::from_lengths([(o[0], 4), (o[1], 0), (o[1], 3), (o[2], 3)])
    }

    #[test]
    fn test_layout_skips_empty_segments() {
        let layout = sample();
        assert_eq!(layout.num_segments(), 3);
        assert_eq!(layout.size(), 10);
        assert!(layout.is_partition());
        assert_eq!(layout.segment(1).unwrap().range(), 4..7);
    }

    #[test]
    fn test_locate_every_index() {
        let layout = sample();
        let mut expected = Vec::new();
        for (seg, info) in layout.segments().iter().enumerate() {
            for local in 0..info.len {
                expected.push((seg, local));
            }
        }
        let located: Vec<_> = (0..layout.size())
            .map(|i| layout.locate(i).unwrap())
            .collect();
        assert_eq!(located, expected);
        assert_eq!(layout.locate(10), None);
    }

    #[test]
    fn test_zero_size_layout() {
        let layout = Layout::from_lengths(owners(4).into_iter().map(|o| (o, 0)));
        assert_eq!(layout.num_segments(), 0);
        assert_eq!(layout.size(), 0);
        assert!(layout.is_partition());
        assert_eq!(layout.locate(0), None);
    }

    #[test]
    fn test_slice_rebases_offsets() {
        let layout = sample().slice(2..8);
        let lens: Vec<_> = layout.segments().iter().map(|s| (s.offset, s.len)).collect();
        assert_eq!(lens, vec![(0, 2), (2, 3), (5, 1)]);
        assert!(layout.is_partition());
    }

    #[test]
    fn test_slice_clamps_bounds() {
        let layout = sample();
        assert_eq!(layout.slice(7..100).size(), 3);
        assert_eq!(layout.slice(20..30).size(), 0);
        assert_eq!(layout.slice(5..2).size(), 0);
    }

    #[test]
    fn test_check_aligned() {
        let o = owners(2);
        let a = Layout::from_lengths([(o[0], 5), (o[1], 5)]);
        let b = Layout::from_lengths([(o[0], 5), (o[1], 5)]);
        let c = Layout::from_lengths([(o[0], 6), (o[1], 4)]);
        let d = Layout::from_lengths([(o[1], 5), (o[0], 5)]);

        assert!(a.check_aligned(&b).is_ok());
        assert!(matches!(a.check_aligned(&c), Err(DrError::SegmentMismatch(_))));
        assert!(matches!(a.check_aligned(&d), Err(DrError::SegmentMismatch(_))));
    }
}
