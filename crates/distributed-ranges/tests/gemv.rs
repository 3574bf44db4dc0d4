mod common;

use distributed_ranges::containers::{DistributedVector, SparseMatrix};
use distributed_ranges::sharding::Distribution;
use distributed_ranges::{flat_gemv, gemv};
use float_cmp::approx_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rstest::rstest;

use common::on_every_rank;

fn random_triplets(m: usize, n: usize, count: usize, seed: u64) -> Vec<(usize, usize, f64)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| (rng.random_range(0..m), rng.random_range(0..n), rng.random()))
        .collect()
}

fn dense_gemv(m: usize, triplets: &[(usize, usize, f64)], b: &[f64]) -> Vec<f64> {
    let mut c = vec![0.0; m];
    for &(i, j, v) in triplets {
        c[i] += v * b[j];
    }
    c
}

#[rstest]
#[case(1, 1, false)]
#[case(1, 4, false)]
#[case(2, 2, true)]
#[case(3, 1, true)]
fn test_gemv_matches_dense(#[case] ranks: usize, #[case] devices: usize, #[case] flat: bool) {
    let (m, n) = (257, 130);
    let triplets = random_triplets(m, n, 2000, 3);
    let b_host: Vec<f64> = (0..n).map(|j| (j % 11) as f64 * 0.25).collect();
    let expected = dense_gemv(m, &triplets, &b_host);

    let results = on_every_rank(ranks, devices, Distribution::Block, |rt| {
        let a = SparseMatrix::from_triplets(&rt, [m, n], &triplets).unwrap();
        let b = DistributedVector::from_fn(&rt, n, |j| b_host[j]).unwrap();
        let mut c = DistributedVector::<f64>::new(&rt, m).unwrap();
        if flat {
            flat_gemv(&rt, &mut c, &a, &b).unwrap();
        } else {
            gemv(&rt, &mut c, &a, &b).unwrap();
        }
        c.to_vec().unwrap()
    });

    for c in results {
        assert_eq!(c.len(), m);
        for (got, want) in c.iter().zip(&expected) {
            assert!(approx_eq!(f64, *got, *want, epsilon = 1e-9, ulps = 8), "{got} vs {want}");
        }
    }
}

#[test]
fn test_random_matrix_gemv() {
    on_every_rank(1, 3, Distribution::Balanced, |rt| {
        let (m, n) = (60, 45);
        let a = SparseMatrix::<f32>::random(&rt, [m, n], 0.05, 11).unwrap();
        assert_eq!(a.grid_shape(), [3, 3]);

        let mut dense = vec![vec![0.0f32; n]; m];
        for (_, tile) in a.local_tiles() {
            for (r, c, v) in tile.iter() {
                dense[tile.rows().start + r][tile.cols().start + c] = *v;
            }
        }

        let b = DistributedVector::from_fn(&rt, n, |j| 1.0 + j as f32).unwrap();
        let mut c = DistributedVector::from_fn(&rt, m, |_| 1.0f32).unwrap();
        gemv(&rt, &mut c, &a, &b).unwrap();

        for (i, got) in c.to_vec().unwrap().into_iter().enumerate() {
            let want = 1.0 + dense[i].iter().enumerate().map(|(j, v)| v * (1.0 + j as f32)).sum::<f32>();
            assert!(approx_eq!(f32, got, want, epsilon = 1e-3), "row {i}: {got} vs {want}");
        }
    });
}
