mod common;

use distributed_ranges::concepts::{
    DistributedRange, Remote, RemoteContiguousIterator, RemoteIterator, RemoteRange, check_segments,
};
use distributed_ranges::containers::DistributedVector;
use distributed_ranges::sharding::Distribution;
use distributed_ranges::views::{self, DistributedRangeExt};
use distributed_ranges::{DrError, Owner, all_gather, fill, for_each, iota, reduce};
use rstest::rstest;

use common::on_every_rank;

#[rstest]
#[case(1, 1, 0)]
#[case(1, 3, 1)]
#[case(1, 4, 3)]
#[case(2, 2, 17)]
#[case(3, 2, 1000)]
fn test_segments_partition_the_range(
    #[case] ranks: usize,
    #[case] devices: usize,
    #[case] n: usize,
) {
    for distribution in [
        Distribution::Block,
        Distribution::Balanced,
        Distribution::BlockCyclic { block_size: 3 },
    ] {
        on_every_rank(ranks, devices, distribution, |rt| {
            let v = DistributedVector::<u32>::new(&rt, n).unwrap();
            assert!(check_segments(&&v));

            let layout = v.layout();
            assert_eq!(layout.size(), n);
            assert!(layout.segments().iter().all(|s| s.len > 0));
            assert_eq!(layout.segments().iter().map(|s| s.len).sum::<usize>(), n);
            if n == 0 {
                assert_eq!(layout.num_segments(), 0);
            }

            for i in (0..n).step_by(7) {
                let owner = v.owner_of(i).unwrap();
                assert!(owner.rank < ranks && owner.device < devices);
            }
        });
    }
}

#[rstest]
#[case(1, 3)]
#[case(2, 2)]
fn test_iteration_matches_sequential(#[case] ranks: usize, #[case] devices: usize) {
    let n = 103;
    let gathered = on_every_rank(ranks, devices, Distribution::Balanced, |rt| {
        let v = DistributedVector::from_fn(&rt, n, |i| i * i).unwrap();

        let mut cursor = v.begin();
        let end = v.end();
        let mut local = Vec::new();
        while cursor != end {
            match cursor.get() {
                Ok(x) => local.push((cursor.index(), *x)),
                Err(DrError::NotLocal { owner, rank, .. }) => {
                    assert_ne!(owner.rank, rank);
                }
                Err(err) => panic!("{err}"),
            }
            cursor += 1;
        }
        (local, all_gather(&rt, &v).unwrap())
    });

    let expected: Vec<_> = (0..n).map(|i| i * i).collect();
    let mut seen = Vec::new();
    for (local, all) in gathered {
        assert_eq!(all, expected);
        seen.extend(local);
    }
    seen.sort();
    assert_eq!(seen, expected.into_iter().enumerate().collect::<Vec<_>>());
}

#[test]
fn test_cursor_arithmetic() {
    let rt = distributed_ranges::Runtime::builder().devices(3).build().unwrap();
    let v = DistributedVector::from_fn(&rt, 9, |i| i as i32).unwrap();
    let w = DistributedVector::from_fn(&rt, 9, |i| i as i32).unwrap();

    let c = v.begin() + 4;
    assert_eq!(*c.get().unwrap(), 4);
    assert_eq!((c - 2).get().unwrap(), &2);
    assert_eq!(c.distance(&v.end()), 5);
    assert!(c < v.end());
    assert_eq!(c.owner(), Owner::new(0, 1));
    assert_eq!(c.local().unwrap(), &[4, 5]);
    assert_ne!(v.begin(), w.begin());
    assert!(v.begin().partial_cmp(&w.begin()).is_none());
}

#[rstest]
#[case(1, 4)]
#[case(2, 2)]
fn test_transform_is_transparent(#[case] ranks: usize, #[case] devices: usize) {
    let results = on_every_rank(ranks, devices, Distribution::Block, |rt| {
        let v = DistributedVector::from_fn(&rt, 500, |i| i as i64).unwrap();
        let view = views::transform(&v, |x: &i64| x * 3 + 1);
        assert_eq!(view.layout().unwrap(), *v.layout());
        assert!(check_segments(&view));
        reduce(&rt, view, 0, |a, b| a + b).unwrap()
    });
    let expected: i64 = (0..500).map(|i| i * 3 + 1).sum();
    assert!(results.iter().all(|&r| r == expected));
}

#[test]
fn test_zip_requires_aligned_segments() {
    on_every_rank(2, 2, Distribution::Block, |rt| {
        let a = DistributedVector::<f32>::new(&rt, 40).unwrap();
        let b = DistributedVector::<f32>::new(&rt, 40).unwrap();
        let c = DistributedVector::<f32>::new(&rt, 41).unwrap();

        let aligned = views::zip((&a, &b));
        assert!(check_segments(&aligned));
        assert_eq!(aligned.segments().unwrap().len(), 4);

        let shifted = views::zip((&a, views::drop(&c, 1)));
        assert!(matches!(shifted.layout(), Err(DrError::SegmentMismatch(_))));
        let triple = views::zip((&a, &b, &c));
        assert!(matches!(
            reduce(&rt, triple.transform(|(x, _, _)| *x), 0.0, |p, q| p + q),
            Err(DrError::SegmentMismatch(_))
        ));
    });
}

#[rstest]
#[case(1, 3, 0)]
#[case(1, 3, 5)]
#[case(2, 2, 11)]
#[case(2, 2, 40)]
fn test_mutation_through_drop_stays_in_bounds(
    #[case] ranks: usize,
    #[case] devices: usize,
    #[case] k: usize,
) {
    let n = 40;
    let results = on_every_rank(ranks, devices, Distribution::Block, |rt| {
        let mut v = DistributedVector::<i32>::new(&rt, n).unwrap();
        fill(&rt, &mut v, 1).unwrap();
        {
            let view = views::drop(&v, k);
            assert!(check_segments(&view));
            assert_eq!(view.size().unwrap(), n - k);
        }
        for_each(&rt, views::drop(&mut v, k), |x| *x = 5).unwrap();
        for_each(&rt, (&mut v).take(2), |x| *x -= 1).unwrap();
        v.to_vec().unwrap()
    });

    for values in results {
        for (i, x) in values.into_iter().enumerate() {
            let base = if i < k { 1 } else { 5 };
            let expected = if i < 2 { base - 1 } else { base };
            assert_eq!(x, expected, "element {i}");
        }
    }
}

#[test]
fn test_subrange_segments_are_cut() {
    on_every_rank(1, 3, Distribution::Block, |rt| {
        let mut v = DistributedVector::<u16>::new(&rt, 12).unwrap();
        iota(&rt, &mut v, 0).unwrap();

        let window = views::subrange(&v, 2..10);
        let segments = window.segments().unwrap();
        let lens: Vec<_> = segments.iter().map(|s| s.len()).collect();
        assert_eq!(lens, vec![2, 4, 2]);
        let items: Vec<u16> = segments
            .into_iter()
            .flat_map(|s| s.local().unwrap().copied())
            .collect();
        assert_eq!(items, (2..10).collect::<Vec<_>>());
    });
}

#[test]
fn test_enumerate_and_iota_agree() {
    let results = on_every_rank(2, 2, Distribution::BlockCyclic { block_size: 5 }, |rt| {
        let mut a = DistributedVector::<u64>::new(&rt, 37).unwrap();
        iota(&rt, &mut a, 10).unwrap();
        let offsets = views::enumerate(&a).transform(|(i, x): (usize, &u64)| *x - i as u64);
        reduce(&rt, offsets, 0, u64::max).unwrap()
    });
    assert_eq!(results, vec![10, 10]);
}
