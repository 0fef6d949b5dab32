//! Index-space iterator properties.

use std::collections::HashSet;

use crate::dims::DimensionInfo;

fn space(offsets: &[usize], globals: &[usize], locals: &[usize]) -> DimensionInfo {
    DimensionInfo::new(offsets, globals, locals)
}

/// Every point of the space is visited exactly once, and a group's index
/// only advances after all of its local indices were seen.
#[test]
fn iteration_covers_each_point_once_group_major() {
    let cases: Vec<(Vec<usize>, Vec<usize>, Vec<usize>)> = vec![
        (vec![0], vec![1], vec![1]),
        (vec![0], vec![4], vec![2]),
        (vec![5], vec![12], vec![3]),
        (vec![0, 0], vec![9, 9], vec![3, 3]),
        (vec![0, 0], vec![4, 6], vec![2, 3]),
        (vec![1, 2, 3], vec![4, 2, 6], vec![2, 2, 3]),
    ];

    for (offsets, globals, locals) in cases {
        let info = space(&offsets, &globals, &locals);
        let dims = info.work_dim();
        let group_items = info.local_items();

        let mut seen = HashSet::new();
        let mut visited_in_group = 0;
        let mut last_group: Option<Vec<usize>> = None;
        let mut count = 0;

        let mut it = info.iter();
        while !it.is_end() {
            let global: Vec<usize> = (0..dims).map(|d| it.global_id(d)).collect();
            let group: Vec<usize> = (0..dims).map(|d| it.group_id(d)).collect();

            assert!(seen.insert(global.clone()), "revisited {:?}", global);

            match &last_group {
                Some(prev) if *prev == group => visited_in_group += 1,
                Some(_) => {
                    assert_eq!(
                        visited_in_group, group_items,
                        "group changed before all local ids were visited"
                    );
                    visited_in_group = 1;
                }
                None => visited_in_group = 1,
            }
            last_group = Some(group);

            for d in 0..dims {
                assert!(it.global_id(d) >= offsets[d]);
                assert!(it.global_id(d) < offsets[d] + globals[d]);
                assert_eq!(
                    it.global_id(d),
                    offsets[d] + it.group_id(d) * locals[d] + it.local_id(d)
                );
            }

            count += 1;
            it.advance(1);
        }

        assert_eq!(count, info.global_items());
        assert_eq!(visited_in_group, group_items);
    }
}

#[test]
fn iteration_is_restartable() {
    let info = space(&[0, 0], &[6, 4], &[3, 2]);

    let first: Vec<_> = info.iter().collect();
    let second: Vec<_> = info.iter().collect();

    assert_eq!(first.len(), 24);
    assert_eq!(first, second);
}

/// Striding by the work-group size lands exactly on group origins; this
/// is how an ND-range is split into per-group blocks.
#[test]
fn group_strides_enumerate_group_origins() {
    let info = space(&[0, 0], &[9, 9], &[3, 3]);
    let group_size = info.local_items();
    let end = info.iter_end();

    let mut it = info.iter();
    let mut origins = Vec::new();

    while it != end {
        assert_eq!(it.local_id(0), 0);
        assert_eq!(it.local_id(1), 0);
        origins.push((it.group_id(0), it.group_id(1)));
        it.advance(group_size);
    }

    assert_eq!(origins.len(), info.work_groups());
    let unique: HashSet<_> = origins.iter().collect();
    assert_eq!(unique.len(), origins.len());
}

#[test]
fn queries_match_the_geometry() {
    let info = space(&[2], &[8], &[4]);
    let it = info.iter();

    assert_eq!(it.work_dim(), 1);
    assert_eq!(it.global_size(0), 8);
    assert_eq!(it.local_size(0), 4);
    assert_eq!(it.num_groups(0), 2);
    assert_eq!(it.global_offset(0), 2);
    assert_eq!(it.global_id(0), 2);

    // Out-of-range dimensions answer zero.
    assert_eq!(it.global_size(2), 0);
    assert_eq!(it.local_id(2), 0);
}

#[test]
fn unspecified_local_sizes_can_be_set_later() {
    let mut info = space(&[0], &[12], &[]);
    assert!(!info.local_specified());

    assert!(!info.set_local_sizes(&[5]), "5 does not divide 12");
    assert!(info.set_local_sizes(&[4]));
    assert!(info.local_specified());
    assert_eq!(info.work_groups(), 3);
}

#[test]
fn advancing_saturates_at_the_end() {
    let info = space(&[0], &[4], &[2]);

    let mut it = info.iter();
    it.advance(100);
    assert!(it.is_end());
    assert_eq!(it, info.iter_end());

    it.advance(1);
    assert!(it.is_end());
}
