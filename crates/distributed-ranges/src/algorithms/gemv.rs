use core::ops::{Add, Mul};
use core::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use atomic_float::{AtomicF32, AtomicF64};
use num_traits::Zero;
use rayon::prelude::*;

use super::dispatch;
use crate::concepts::{DistributedContiguousRange, DistributedRange};
use crate::containers::{CsrTile, DistributedVector, ReplicatedVector, SparseMatrix};
use crate::error::{DrError, Result};
use crate::runtime::{Runtime, queue};

/// Element types that can be accumulated concurrently.
///
/// All column tiles of a row block add into the same output rows, so the
/// partial products are summed through atomics.
pub trait AtomicElement:
    Copy + Send + Sync + Zero + Add<Output = Self> + Mul<Output = Self> + 'static
{
    /// The atomic counterpart of the type.
    type Atomic: Send + Sync;

    /// A new atomic holding `value`.
    fn atomic(value: Self) -> Self::Atomic;

    /// Adds `value` to `atomic`.
    fn fetch_add(atomic: &Self::Atomic, value: Self);

    /// The current value of `atomic`.
    fn load(atomic: &Self::Atomic) -> Self;
}

macro_rules! atomic_element {
    ($($ty:ty => $atomic:ty),+ $(,)?) => {
        $(
            impl AtomicElement for $ty {
                type Atomic = $atomic;

                fn atomic(value: Self) -> Self::Atomic {
                    <$atomic>::new(value)
                }

                fn fetch_add(atomic: &Self::Atomic, value: Self) {
                    atomic.fetch_add(value, Ordering::Relaxed);
                }

                fn load(atomic: &Self::Atomic) -> Self {
                    atomic.load(Ordering::Relaxed)
                }
            }
        )+
    };
}

atomic_element!(
    f32 => AtomicF32,
    f64 => AtomicF64,
    i32 => AtomicI32,
    i64 => AtomicI64,
    u32 => AtomicU32,
    u64 => AtomicU64,
    usize => AtomicUsize,
);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kernel {
    /// One work item per matrix row.
    Rows,
    /// One work item per stored entry.
    Entries,
}

/// `c += a * b` for a sparse `a`. Collective.
///
/// `b` is gathered and copied to every local device first. Every local tile
/// then multiplies its rows on the device that owns it, adding into per-row
/// accumulators, and the accumulators are finally added to `c` with one task
/// per output segment.
///
/// `c` must have as many elements as `a` has rows and the same layout as the
/// row blocks of `a`; `b` must have as many elements as `a` has columns.
pub fn gemv<T, R>(
    runtime: &Runtime,
    c: &mut DistributedVector<T>,
    a: &SparseMatrix<T>,
    b: R,
) -> Result<()>
where
    T: AtomicElement,
    R: DistributedContiguousRange<Element = T>,
{
    multiply(runtime, c, a, b, Kernel::Rows)
}

/// Like [`gemv`], but parallelises over the stored entries of every tile
/// instead of its rows. Balances better when a few rows hold most entries.
pub fn flat_gemv<T, R>(
    runtime: &Runtime,
    c: &mut DistributedVector<T>,
    a: &SparseMatrix<T>,
    b: R,
) -> Result<()>
where
    T: AtomicElement,
    R: DistributedContiguousRange<Element = T>,
{
    multiply(runtime, c, a, b, Kernel::Entries)
}

fn multiply<T, R>(
    runtime: &Runtime,
    c: &mut DistributedVector<T>,
    a: &SparseMatrix<T>,
    b: R,
    kernel: Kernel,
) -> Result<()>
where
    T: AtomicElement,
    R: DistributedContiguousRange<Element = T>,
{
    let [m, n] = a.shape();
    let out: &DistributedVector<T> = c;
    let (c_len, b_len) = (out.size(), b.size()?);
    if c_len != m || b_len != n {
        return Err(DrError::ShapeMismatch(format!(
            "c[{c_len}] += a[{m}x{n}] * b[{b_len}]"
        )));
    }
    out.layout().check_aligned(a.row_layout())?;

    let staged = ReplicatedVector::stage(runtime, b)?;
    let rank = runtime.rank();
    let accumulators: Vec<Option<Vec<T::Atomic>>> = a
        .row_layout()
        .segments()
        .iter()
        .map(|info| {
            (info.owner.rank == rank)
                .then(|| (0..info.len).map(|_| T::atomic(T::zero())).collect())
        })
        .collect();

    log::debug!(
        "rank {rank}: {:?} gemv over {} local tiles",
        kernel,
        a.local_tiles().count()
    );

    queue::scope(|scope| {
        let events = a
            .local_tiles()
            .map(|([i, j], tile)| -> Result<_> {
                let owner = tile.owner();
                let device = runtime.device_for(owner)?;
                let x = staged.on(owner.device).ok_or(DrError::UnknownDevice {
                    rank,
                    device: owner.device,
                })?;
                let x = &x[tile.cols()];
                let acc = accumulators[i].as_deref().ok_or_else(|| DrError::Kernel {
                    owner,
                    reason: format!("tile ({i}, {j}) has no local accumulator"),
                })?;
                Ok(queue::submit(scope, device, move || {
                    match kernel {
                        Kernel::Rows => multiply_rows(tile, x, acc),
                        Kernel::Entries => multiply_entries(tile, x, acc),
                    }
                    Ok(())
                }))
            })
            .collect::<Result<Vec<_>>>()?;
        queue::wait(events)
    })?;

    let accumulators = &accumulators;
    dispatch(runtime, c.segments()?, |task, local| {
        let acc = accumulators[task.index]
            .as_deref()
            .ok_or_else(|| task.fail("no accumulator"))?;
        for (out, sum) in local.zip(acc) {
            *out = *out + T::load(sum);
        }
        Ok(())
    })?;
    Ok(())
}

fn multiply_rows<T: AtomicElement>(tile: &CsrTile<T>, x: &[T], acc: &[T::Atomic]) {
    (0..tile.rows().len()).into_par_iter().for_each(|r| {
        let sum = tile
            .row(r)
            .fold(T::zero(), |sum, (col, &value)| sum + value * x[col]);
        T::fetch_add(&acc[r], sum);
    });
}

fn multiply_entries<T: AtomicElement>(tile: &CsrTile<T>, x: &[T], acc: &[T::Atomic]) {
    let row_ptr = tile.row_ptr();
    let cols = tile.col_indices();
    let values = tile.values();
    (0..tile.nnz()).into_par_iter().for_each(|k| {
        let row = row_ptr.partition_point(|&start| start <= k) - 1;
        T::fetch_add(&acc[row], values[k] * x[cols[k]]);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gemv_accumulates_into_c() {
        let rt = Runtime::builder().devices(2).build().unwrap();
        let entries = [(0, 0, 1), (0, 3, 2), (1, 1, 3), (2, 2, 4), (3, 0, 5), (3, 3, 6)];
        let a = SparseMatrix::from_triplets(&rt, [4, 4], &entries).unwrap();
        let b = DistributedVector::from_fn(&rt, 4, |i| i as i64 + 1).unwrap();
        let mut c = DistributedVector::from_fn(&rt, 4, |_| 100).unwrap();

        gemv(&rt, &mut c, &a, &b).unwrap();
        assert_eq!(c.to_vec().unwrap(), vec![109, 106, 112, 129]);

        flat_gemv(&rt, &mut c, &a, &b).unwrap();
        assert_eq!(c.to_vec().unwrap(), vec![118, 112, 124, 158]);
    }

    #[test]
    fn test_gemv_shape_checks() {
        let rt = Runtime::builder().devices(2).build().unwrap();
        let a = SparseMatrix::<f64>::from_triplets(&rt, [4, 3], &[]).unwrap();
        let b = DistributedVector::<f64>::new(&rt, 4).unwrap();
        let mut c = DistributedVector::<f64>::new(&rt, 4).unwrap();
        assert!(matches!(
            gemv(&rt, &mut c, &a, &b),
            Err(DrError::ShapeMismatch(_))
        ));

        let b = DistributedVector::<f64>::new(&rt, 3).unwrap();
        let mut c = DistributedVector::<f64>::with_distribution(
            &rt,
            4,
            crate::sharding::Distribution::BlockCyclic { block_size: 1 },
        )
        .unwrap();
        assert!(matches!(
            gemv(&rt, &mut c, &a, &b),
            Err(DrError::SegmentMismatch(_))
        ));
    }
}
