use core::ops::{AddAssign, Range};

use hashbrown::HashMap;
use rand::distr::{Distribution as _, StandardUniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::concepts::Owner;
use crate::error::{DrError, Result};
use crate::layout::Layout;
use crate::runtime::{DeviceBuffer, Runtime};
use crate::sharding::Distribution;

/// A block of a [`SparseMatrix`] in compressed sparse row format.
///
/// Row and column indices are relative to the tile's origin.
pub struct CsrTile<T> {
    owner: Owner,
    rows: Range<usize>,
    cols: Range<usize>,
    row_ptr: DeviceBuffer<usize>,
    col_idx: DeviceBuffer<usize>,
    values: DeviceBuffer<T>,
}

impl<T> CsrTile<T> {
    /// The resource that stores the tile.
    pub fn owner(&self) -> Owner {
        self.owner
    }

    /// Global rows covered by the tile.
    pub fn rows(&self) -> Range<usize> {
        self.rows.clone()
    }

    /// Global columns covered by the tile.
    pub fn cols(&self) -> Range<usize> {
        self.cols.clone()
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Start of every row in `col_indices` and `values`, plus the end.
    pub fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }

    /// Tile-relative column of every entry.
    pub fn col_indices(&self) -> &[usize] {
        &self.col_idx
    }

    /// Value of every entry.
    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Entries of tile-relative row `row` as `(column, value)` pairs.
    pub fn row(&self, row: usize) -> impl Iterator<Item = (usize, &T)> {
        let span = self.row_ptr[row]..self.row_ptr[row + 1];
        self.col_idx[span.clone()]
            .iter()
            .copied()
            .zip(&self.values[span])
    }

    /// Every entry as `(row, column, value)`, tile-relative.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &T)> {
        (0..self.rows.len()).flat_map(move |r| self.row(r).map(move |(c, v)| (r, c, v)))
    }
}

/// A sparse matrix cut into a grid of CSR tiles.
///
/// Row blocks follow the runtime's distribution, so row block `i` is stored
/// on the owner of segment `i` of a vector with as many elements as the
/// matrix has rows. Every row block is further cut into `col_tiles` column
/// blocks. Each rank keeps only the tiles of its own row blocks.
pub struct SparseMatrix<T> {
    runtime: Runtime,
    shape: [usize; 2],
    row_layout: Layout,
    col_bounds: Vec<usize>,
    /// Row-major over the grid; `None` for tiles stored on other ranks.
    tiles: Vec<Option<CsrTile<T>>>,
    nnz: usize,
}

impl<T: Copy + Default + AddAssign> SparseMatrix<T> {
    /// Builds a matrix from `(row, column, value)` entries, one column tile
    /// per local device.
    ///
    /// Every rank passes the same entries. Duplicate coordinates are summed.
    pub fn from_triplets(
        runtime: &Runtime,
        shape: [usize; 2],
        triplets: &[(usize, usize, T)],
    ) -> Result<Self> {
        Self::from_triplets_tiled(runtime, shape, runtime.devices().len(), triplets)
    }

    /// Like [`from_triplets`](Self::from_triplets) with an explicit number of
    /// column tiles.
    pub fn from_triplets_tiled(
        runtime: &Runtime,
        shape: [usize; 2],
        col_tiles: usize,
        triplets: &[(usize, usize, T)],
    ) -> Result<Self> {
        let [m, n] = shape;
        if col_tiles == 0 {
            return Err(DrError::Config("at least one column tile is required".into()));
        }

        let mut merged: HashMap<(usize, usize), T> = HashMap::with_capacity(triplets.len());
        for &(i, j, v) in triplets {
            if i >= m || j >= n {
                return Err(DrError::ShapeMismatch(format!(
                    "entry ({i}, {j}) is outside a {m}x{n} matrix"
                )));
            }
            *merged.entry((i, j)).or_default() += v;
        }
        let nnz = merged.len();

        let row_layout = runtime.distribution().layout(m, runtime.resources())?;
        let col_bounds = Distribution::Balanced
            .layout(n, &vec![Owner::new(0, 0); col_tiles])?
            .segments()
            .iter()
            .map(|s| s.offset)
            .chain([n])
            .collect::<Vec<_>>();
        let col_bounds = if col_bounds.len() == 1 { vec![0, n] } else { col_bounds };
        let col_tiles = col_bounds.len() - 1;

        // Bucket entries by tile, keeping only row blocks of this rank.
        let rank = runtime.rank();
        let mut buckets: Vec<Vec<(usize, usize, T)>> =
            (0..row_layout.num_segments() * col_tiles).map(|_| Vec::new()).collect();
        for ((i, j), v) in merged {
            let Some((seg, local_row)) = row_layout.locate(i) else {
                continue;
            };
            if row_layout.segments()[seg].owner.rank != rank {
                continue;
            }
            let tile_col = col_bounds.partition_point(|&b| b <= j) - 1;
            buckets[seg * col_tiles + tile_col].push((local_row, j - col_bounds[tile_col], v));
        }

        let tiles = buckets
            .into_iter()
            .enumerate()
            .map(|(t, mut entries)| -> Result<Option<CsrTile<T>>> {
                let info = row_layout.segments()[t / col_tiles];
                if info.owner.rank != rank {
                    return Ok(None);
                }
                let cols = col_bounds[t % col_tiles]..col_bounds[t % col_tiles + 1];
                entries.sort_unstable_by_key(|&(r, c, _)| (r, c));

                let mut row_ptr = vec![0; info.len + 1];
                for &(r, _, _) in &entries {
                    row_ptr[r + 1] += 1;
                }
                for r in 0..info.len {
                    row_ptr[r + 1] += row_ptr[r];
                }
                let col_idx: Vec<_> = entries.iter().map(|&(_, c, _)| c).collect();
                let values: Vec<_> = entries.iter().map(|&(_, _, v)| v).collect();

                let device = runtime.device_for(info.owner)?;
                Ok(Some(CsrTile {
                    owner: info.owner,
                    rows: info.range(),
                    cols,
                    row_ptr: device.allocate_from(&row_ptr)?,
                    col_idx: device.allocate_from(&col_idx)?,
                    values: device.allocate_from(&values)?,
                }))
            })
            .collect::<Result<Vec<_>>>()?;

        log::debug!(
            "rank {}: {}x{} sparse matrix, {} entries, {}x{} tiles",
            rank,
            m,
            n,
            nnz,
            row_layout.num_segments(),
            col_tiles
        );

        Ok(Self {
            runtime: runtime.clone(),
            shape,
            row_layout,
            col_bounds,
            tiles,
            nnz,
        })
    }
}

impl<T> SparseMatrix<T>
where
    T: Copy + Default + AddAssign,
    StandardUniform: rand::distr::Distribution<T>,
{
    /// A matrix with about `density * m * n` uniformly placed random entries.
    ///
    /// The entries only depend on `seed`, so every rank builds the same
    /// matrix.
    pub fn random(runtime: &Runtime, shape: [usize; 2], density: f64, seed: u64) -> Result<Self> {
        let [m, n] = shape;
        if !(0.0..=1.0).contains(&density) {
            return Err(DrError::Config(format!(
                "density {density} is not within [0, 1]"
            )));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let count = if m == 0 || n == 0 {
            0
        } else {
            (density * m as f64 * n as f64).round() as usize
        };

        let triplets: Vec<_> = (0..count)
            .map(|_| {
                let i = rng.random_range(0..m);
                let j = rng.random_range(0..n);
                (i, j, StandardUniform.sample(&mut rng))
            })
            .collect();
        Self::from_triplets(runtime, shape, &triplets)
    }
}

impl<T> SparseMatrix<T> {
    /// `[rows, columns]`.
    pub fn shape(&self) -> [usize; 2] {
        self.shape
    }

    /// `[row blocks, column blocks]` of the tile grid.
    pub fn grid_shape(&self) -> [usize; 2] {
        [self.row_layout.num_segments(), self.col_bounds.len() - 1]
    }

    /// Number of distinct stored entries over the whole matrix.
    pub fn nnz(&self) -> usize {
        self.nnz
    }

    /// How rows are split into row blocks.
    pub fn row_layout(&self) -> &Layout {
        &self.row_layout
    }

    /// Global columns of column block `j`.
    pub fn col_range(&self, j: usize) -> Option<Range<usize>> {
        let end = *self.col_bounds.get(j + 1)?;
        Some(self.col_bounds[j]..end)
    }

    /// The runtime the matrix was created with.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Tile `(i, j)` of the grid, if it is stored on the calling rank.
    pub fn tile(&self, i: usize, j: usize) -> Option<&CsrTile<T>> {
        let [rows, cols] = self.grid_shape();
        if i >= rows || j >= cols {
            return None;
        }
        self.tiles[i * cols + j].as_ref()
    }

    /// Tiles stored on the calling rank with their grid coordinates.
    pub fn local_tiles(&self) -> impl Iterator<Item = ([usize; 2], &CsrTile<T>)> {
        let cols = self.grid_shape()[1];
        self.tiles
            .iter()
            .enumerate()
            .filter_map(move |(t, tile)| tile.as_ref().map(|tile| ([t / cols, t % cols], tile)))
    }
}
