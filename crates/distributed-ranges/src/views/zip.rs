use core::ops::Range;

use crate::concepts::{DistributedRange, Owner, Remote, RemoteRange};
use crate::error::Result;
use crate::layout::Layout;

/// Tuples of ranges that can be zipped. Implemented for pairs and triples.
pub trait ZipRanges {
    /// The zipped view.
    type Output: DistributedRange;

    /// Builds the view.
    fn zip_ranges(self) -> Self::Output;
}

/// Iterates several local iterators in lockstep.
#[derive(Clone, Debug)]
pub struct LockstepIter<I> {
    iters: I,
}

/// Generates the view, segment, iterator and tuple impls for one arity.
macro_rules! zip_arity {
    ($view:ident, $segment:ident; ($T0:ident, $f0:ident) $(, ($T:ident, $f:ident))+) => {
        /// A distributed range of element tuples taken at the same index from
        /// every base range. Created by [`zip`](super::zip).
        ///
        /// The bases must share one segmentation: same segment count, lengths
        /// and owners. This is checked when an algorithm asks for the layout
        /// or the segments, and fails with
        /// [`DrError::SegmentMismatch`](crate::DrError::SegmentMismatch).
        #[derive(Clone, Copy, Debug)]
        pub struct $view<$T0, $($T),+> {
            $f0: $T0,
            $($f: $T),+
        }

        impl<$T0: DistributedRange, $($T: DistributedRange),+> DistributedRange
            for $view<$T0, $($T),+>
        {
            type Item = ($T0::Item, $($T::Item),+);
            type Segment = $segment<$T0::Segment, $($T::Segment),+>;

            fn layout(&self) -> Result<Layout> {
                let layout = self.$f0.layout()?;
                $(layout.check_aligned(&self.$f.layout()?)?;)+
                Ok(layout)
            }

            fn segments(self) -> Result<Vec<Self::Segment>> {
                self.layout()?;
                let $f0 = self.$f0.segments()?;
                $(let mut $f = self.$f.segments()?.into_iter();)+
                Ok($f0
                    .into_iter()
                    .filter_map(|$f0| {
                        Some($segment {
                            $f0,
                            $($f: $f.next()?),+
                        })
                    })
                    .collect())
            }
        }

        /// A segment of a zipped view.
        #[derive(Clone, Copy, Debug)]
        pub struct $segment<$T0, $($T),+> {
            $f0: $T0,
            $($f: $T),+
        }

        impl<$T0: Remote, $($T),+> Remote for $segment<$T0, $($T),+> {
            fn owner(&self) -> Owner {
                self.$f0.owner()
            }
        }

        impl<$T0: RemoteRange, $($T: RemoteRange),+> RemoteRange
            for $segment<$T0, $($T),+>
        {
            type Item = ($T0::Item, $($T::Item),+);
            type Local = LockstepIter<($T0::Local, $($T::Local),+)>;

            fn len(&self) -> usize {
                self.$f0.len()
            }

            fn slice(self, range: Range<usize>) -> Self {
                Self {
                    $f0: self.$f0.slice(range.clone()),
                    $($f: self.$f.slice(range.clone())),+
                }
            }

            fn local(self) -> Option<Self::Local> {
                Some(LockstepIter {
                    iters: (self.$f0.local()?, $(self.$f.local()?),+),
                })
            }
        }

        impl<$T0: Iterator, $($T: Iterator),+> Iterator for LockstepIter<($T0, $($T),+)> {
            type Item = ($T0::Item, $($T::Item),+);

            fn next(&mut self) -> Option<Self::Item> {
                let ($f0, $($f),+) = &mut self.iters;
                Some(($f0.next()?, $($f.next()?),+))
            }

            fn size_hint(&self) -> (usize, Option<usize>) {
                self.iters.0.size_hint()
            }
        }

        impl<$T0: DistributedRange, $($T: DistributedRange),+> ZipRanges for ($T0, $($T),+) {
            type Output = $view<$T0, $($T),+>;

            fn zip_ranges(self) -> Self::Output {
                let ($f0, $($f),+) = self;
                $view { $f0, $($f),+ }
            }
        }
    };
}

zip_arity!(Zip2, Zip2Segment; (A, a), (B, b));
zip_arity!(Zip3, Zip3Segment; (A, a), (B, b), (C, c));
