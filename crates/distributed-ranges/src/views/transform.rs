use core::ops::Range;

use crate::concepts::{DistributedRange, Owner, Remote, RemoteRange};
use crate::error::Result;
use crate::layout::Layout;

/// A distributed range whose elements are `f` applied to the elements of
/// `base`. Created by [`transform`](super::transform).
#[derive(Clone, Copy, Debug)]
pub struct Transform<R, F> {
    base: R,
    f: F,
}

impl<R, F> Transform<R, F> {
    pub(crate) fn new(base: R, f: F) -> Self {
        Self { base, f }
    }
}

impl<R, F, U> DistributedRange for Transform<R, F>
where
    R: DistributedRange,
    F: Fn(R::Item) -> U + Clone,
{
    type Item = U;
    type Segment = TransformSegment<R::Segment, F>;

    fn layout(&self) -> Result<Layout> {
        self.base.layout()
    }

    fn segments(self) -> Result<Vec<Self::Segment>> {
        let f = self.f;
        Ok(self
            .base
            .segments()?
            .into_iter()
            .map(|base| TransformSegment { base, f: f.clone() })
            .collect())
    }
}

/// A segment of a [`Transform`] view.
#[derive(Clone, Copy, Debug)]
pub struct TransformSegment<S, F> {
    base: S,
    f: F,
}

impl<S: Remote, F> Remote for TransformSegment<S, F> {
    fn owner(&self) -> Owner {
        self.base.owner()
    }
}

impl<S, F, U> RemoteRange for TransformSegment<S, F>
where
    S: RemoteRange,
    F: Fn(S::Item) -> U,
{
    type Item = U;
    type Local = core::iter::Map<S::Local, F>;

    fn len(&self) -> usize {
        self.base.len()
    }

    fn slice(self, range: Range<usize>) -> Self {
        Self {
            base: self.base.slice(range),
            f: self.f,
        }
    }

    fn local(self) -> Option<Self::Local> {
        let f = self.f;
        self.base.local().map(|local| local.map(f))
    }
}
