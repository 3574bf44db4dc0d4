use core::ops::Range;

use crate::concepts::{DistributedRange, RemoteRange};
use crate::error::Result;
use crate::layout::Layout;

/// A contiguous window of a distributed range. Created by
/// [`take`](super::take), [`drop`](super::drop) and
/// [`subrange`](super::subrange).
///
/// Bounds are clamped to the size of the base range when the view is
/// evaluated. Segments that fall entirely outside the window disappear,
/// boundary segments are cut, and offsets are rebased to start at zero.
#[derive(Clone, Copy, Debug)]
pub struct Subrange<R> {
    base: R,
    start: usize,
    end: usize,
}

impl<R> Subrange<R> {
    pub(crate) fn new(base: R, range: Range<usize>) -> Self {
        Self {
            base,
            start: range.start,
            end: range.end,
        }
    }

    fn window(&self) -> Range<usize> {
        self.start..self.end.max(self.start)
    }
}

impl<R: DistributedRange> DistributedRange for Subrange<R> {
    type Item = R::Item;
    type Segment = R::Segment;

    fn layout(&self) -> Result<Layout> {
        Ok(self.base.layout()?.slice(self.window()))
    }

    fn segments(self) -> Result<Vec<Self::Segment>> {
        let window = self.window();
        let mut cuts = self.base.layout()?.intersect(window).into_iter().peekable();

        Ok(self
            .base
            .segments()?
            .into_iter()
            .enumerate()
            .filter_map(|(idx, segment)| {
                let (_, local) = cuts.next_if(|(cut, _)| *cut == idx)?;
                Some(segment.slice(local))
            })
            .collect())
    }
}
