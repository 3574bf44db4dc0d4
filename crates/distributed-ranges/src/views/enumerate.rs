use core::iter::Zip;
use core::ops::{Range, RangeFrom};

use crate::concepts::{DistributedRange, Owner, Remote, RemoteRange};
use crate::error::Result;
use crate::layout::Layout;

/// Pairs every element with its index in the view. Created by
/// [`enumerate`](super::enumerate).
#[derive(Clone, Copy, Debug)]
pub struct Enumerate<R> {
    base: R,
}

impl<R> Enumerate<R> {
    pub(crate) fn new(base: R) -> Self {
        Self { base }
    }
}

impl<R: DistributedRange> DistributedRange for Enumerate<R> {
    type Item = (usize, R::Item);
    type Segment = EnumerateSegment<R::Segment>;

    fn layout(&self) -> Result<Layout> {
        self.base.layout()
    }

    fn segments(self) -> Result<Vec<Self::Segment>> {
        let layout = self.base.layout()?;
        Ok(self
            .base
            .segments()?
            .into_iter()
            .zip(layout.segments())
            .map(|(base, info)| EnumerateSegment {
                base,
                offset: info.offset,
            })
            .collect())
    }
}

/// A segment of an [`Enumerate`] view.
#[derive(Clone, Copy, Debug)]
pub struct EnumerateSegment<S> {
    base: S,
    offset: usize,
}

impl<S: Remote> Remote for EnumerateSegment<S> {
    fn owner(&self) -> Owner {
        self.base.owner()
    }
}

impl<S: RemoteRange> RemoteRange for EnumerateSegment<S> {
    type Item = (usize, S::Item);
    type Local = Zip<RangeFrom<usize>, S::Local>;

    fn len(&self) -> usize {
        self.base.len()
    }

    fn slice(self, range: Range<usize>) -> Self {
        Self {
            offset: self.offset + range.start,
            base: self.base.slice(range),
        }
    }

    fn local(self) -> Option<Self::Local> {
        let offset = self.offset;
        self.base.local().map(|local| (offset..).zip(local))
    }
}
