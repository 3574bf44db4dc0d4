use core::ops::Range;

use crate::concepts::{DistributedRange, Owner, Remote, RemoteRange};
use crate::error::Result;
use crate::layout::Layout;

/// Clones borrowed elements into owned values. Created by
/// [`cloned`](super::cloned).
#[derive(Clone, Copy, Debug)]
pub struct Cloned<R> {
    base: R,
}

impl<R> Cloned<R> {
    pub(crate) fn new(base: R) -> Self {
        Self { base }
    }
}

impl<'a, R, T> DistributedRange for Cloned<R>
where
    R: DistributedRange<Item = &'a T>,
    T: Clone + 'a,
{
    type Item = T;
    type Segment = ClonedSegment<R::Segment>;

    fn layout(&self) -> Result<Layout> {
        self.base.layout()
    }

    fn segments(self) -> Result<Vec<Self::Segment>> {
        Ok(self
            .base
            .segments()?
            .into_iter()
            .map(|base| ClonedSegment { base })
            .collect())
    }
}

/// A segment of a [`Cloned`] view.
#[derive(Clone, Copy, Debug)]
pub struct ClonedSegment<S> {
    base: S,
}

impl<S: Remote> Remote for ClonedSegment<S> {
    fn owner(&self) -> Owner {
        self.base.owner()
    }
}

impl<'a, S, T> RemoteRange for ClonedSegment<S>
where
    S: RemoteRange<Item = &'a T>,
    T: Clone + 'a,
{
    type Item = T;
    type Local = core::iter::Cloned<S::Local>;

    fn len(&self) -> usize {
        self.base.len()
    }

    fn slice(self, range: Range<usize>) -> Self {
        Self {
            base: self.base.slice(range),
        }
    }

    fn local(self) -> Option<Self::Local> {
        self.base.local().map(Iterator::cloned)
    }
}
