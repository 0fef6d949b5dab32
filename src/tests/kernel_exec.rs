//! End-to-end kernel execution scenarios.

use std::sync::atomic::Ordering;

use super::fixtures::{
    CTOR_RUNS, DTOR_RUNS, SRC_BUTTERFLY, SRC_COPY, SRC_COPY_VAL, SRC_COPY_VEC, SRC_LOCAL_IDS,
    SRC_OFFSET_PROBE, SRC_SUDOKU, SRC_WITH_CTORS,
};
use super::{built_kernel, harness, read_u32s};
use crate::prm::Int3;
use crate::util;

/// Copy a single word through a kernel: global-pointer arguments both
/// ways.
#[test]
fn copy_by_kernel() {
    let h = harness();

    let out = h.ctx.buffer_builder(4).build().unwrap();
    let input = [7u32];
    let inp = h
        .ctx
        .buffer_builder(4)
        .copy_host_slice(util::slice_bytes(&input))
        .build()
        .unwrap();

    let kernel = built_kernel(&h, SRC_COPY, "copy");
    kernel.set_arg_buffer(0, Some(&out)).unwrap();
    kernel.set_arg_buffer(1, Some(&inp)).unwrap();

    h.queue.kernel(&kernel).global_work_size(1).enq().unwrap();

    assert_eq!(read_u32s(&h, &out, 1), vec![7]);
}

/// A by-value scalar argument: the slot points at the value.
#[test]
fn by_value_argument() {
    let h = harness();

    let out = h.ctx.buffer_builder(4).build().unwrap();
    let kernel = built_kernel(&h, SRC_COPY_VAL, "copy");
    kernel.set_arg_buffer(0, Some(&out)).unwrap();
    kernel.set_arg_scalar(1, 7u32).unwrap();

    h.queue.kernel(&kernel).global_work_size(1).enq().unwrap();

    assert_eq!(read_u32s(&h, &out, 1), vec![7]);
}

/// A by-value vector argument survives the trip intact.
#[test]
fn by_value_vector_argument() {
    let h = harness();

    let out = h
        .ctx
        .buffer_builder(std::mem::size_of::<Int3>())
        .build()
        .unwrap();
    let kernel = built_kernel(&h, SRC_COPY_VEC, "copy");
    kernel.set_arg_buffer(0, Some(&out)).unwrap();
    kernel.set_arg_scalar(1, Int3::from_xyz(-1, 0, 1)).unwrap();

    h.queue.kernel(&kernel).global_work_size(1).enq().unwrap();

    let mut result = [Int3::default()];
    h.queue
        .read_buffer(&out, util::slice_bytes_mut(&mut result))
        .enq()
        .unwrap();
    assert_eq!(result[0].xyz(), (-1, 0, 1));
}

/// Two work-groups of two items each: local ids restart per group.
#[test]
fn double_work_group_local_ids() {
    let h = harness();

    let out = h.ctx.buffer_builder(16).build().unwrap();
    let kernel = built_kernel(&h, SRC_LOCAL_IDS, "lids");
    kernel.set_arg_buffer(0, Some(&out)).unwrap();

    h.queue
        .kernel(&kernel)
        .global_work_size(4)
        .local_work_size(2)
        .enq()
        .unwrap();

    assert_eq!(read_u32s(&h, &out, 4), vec![0, 1, 0, 1]);
}

/// The barrier butterfly: every work-item writes its id into local
/// memory, synchronizes, then reads its mirror.
#[test]
fn barrier_butterfly_reverses_ids() {
    let h = harness();

    let out = h.ctx.buffer_builder(16).build().unwrap();
    let kernel = built_kernel(&h, SRC_BUTTERFLY, "butterfly");
    kernel.set_arg_local(0, 16).unwrap();
    kernel.set_arg_buffer(1, Some(&out)).unwrap();

    h.queue
        .kernel(&kernel)
        .global_work_size(4)
        .local_work_size(4)
        .enq()
        .unwrap();

    assert_eq!(read_u32s(&h, &out, 4), vec![3, 2, 1, 0]);
}

/// Barrier fairness over several group sizes: the output must be the
/// reversal of 0..n for every valid n.
#[test]
fn barrier_butterfly_all_group_sizes() {
    let h = harness();

    for n in [1usize, 2, 3, 7, 16, 64] {
        let out = h.ctx.buffer_builder(4 * n).build().unwrap();
        let kernel = built_kernel(&h, SRC_BUTTERFLY, "butterfly");
        kernel.set_arg_local(0, 4 * n).unwrap();
        kernel.set_arg_buffer(1, Some(&out)).unwrap();

        h.queue
            .kernel(&kernel)
            .global_work_size(n)
            .local_work_size(n)
            .enq()
            .unwrap();

        let expected: Vec<u32> = (0..n as u32).rev().collect();
        assert_eq!(read_u32s(&h, &out, n), expected, "group size {}", n);
    }
}

/// The 9×9 index space split into 3×3 groups: every cell observes the
/// global, local and group ids the geometry implies.
#[test]
fn sudoku_iteration_space() {
    let h = harness();

    let out = h.ctx.buffer_builder(9 * 9 * 6 * 4).build().unwrap();
    let kernel = built_kernel(&h, SRC_SUDOKU, "cells");
    kernel.set_arg_buffer(0, Some(&out)).unwrap();

    h.queue
        .kernel(&kernel)
        .global_work_size([9, 9])
        .local_work_size([3, 3])
        .enq()
        .unwrap();

    let cells = read_u32s(&h, &out, 9 * 9 * 6);
    for y in 0..9u32 {
        for x in 0..9u32 {
            let base = ((y * 9 + x) * 6) as usize;
            assert_eq!(&cells[base..base + 6], &[x, y, x % 3, y % 3, x / 3, y / 3]);
        }
    }
}

/// Global offsets shift `get_global_id` without changing the covered
/// index count.
#[test]
fn global_offset_is_visible_to_work_items() {
    let h = harness();

    let out = h.ctx.buffer_builder(4 * 8).build().unwrap();
    let kernel = built_kernel(&h, SRC_OFFSET_PROBE, "probe");
    kernel.set_arg_buffer(0, Some(&out)).unwrap();

    h.queue
        .kernel(&kernel)
        .global_work_size(8)
        .global_work_offset(100)
        .local_work_size(4)
        .enq()
        .unwrap();

    let expected: Vec<u32> = (100..108).collect();
    assert_eq!(read_u32s(&h, &out, 8), expected);
}

/// Omitted local sizes default to a single group spanning the range.
#[test]
fn missing_local_size_runs_one_group() {
    let h = harness();

    let out = h.ctx.buffer_builder(4 * 6).build().unwrap();
    let kernel = built_kernel(&h, SRC_LOCAL_IDS, "lids");
    kernel.set_arg_buffer(0, Some(&out)).unwrap();

    h.queue.kernel(&kernel).global_work_size(6).enq().unwrap();

    assert_eq!(read_u32s(&h, &out, 6), vec![0, 1, 2, 3, 4, 5]);
}

/// Module static constructors run before the first launch; destructors
/// run when the last kernel goes away.
#[test]
fn static_constructors_and_destructors() {
    let h = harness();

    let ctors_before = CTOR_RUNS.load(Ordering::SeqCst);
    let dtors_before = DTOR_RUNS.load(Ordering::SeqCst);

    {
        let out = h.ctx.buffer_builder(4).build().unwrap();
        let kernel = built_kernel(&h, SRC_WITH_CTORS, "five");
        kernel.set_arg_buffer(0, Some(&out)).unwrap();

        h.queue.kernel(&kernel).global_work_size(1).enq().unwrap();
        assert_eq!(read_u32s(&h, &out, 1), vec![5]);

        assert_eq!(CTOR_RUNS.load(Ordering::SeqCst), ctors_before + 1);
        assert_eq!(DTOR_RUNS.load(Ordering::SeqCst), dtors_before);
    }

    // Kernel (and program) released above.
    assert_eq!(DTOR_RUNS.load(Ordering::SeqCst), dtors_before + 1);
}

/// A larger launch crossing every worker: 64 groups of 16.
#[test]
fn many_groups_cover_the_space() {
    let h = harness();

    let n = 1024usize;
    let out = h.ctx.buffer_builder(4 * n).build().unwrap();
    let kernel = built_kernel(&h, SRC_LOCAL_IDS, "lids");
    kernel.set_arg_buffer(0, Some(&out)).unwrap();

    h.queue
        .kernel(&kernel)
        .global_work_size(n)
        .local_work_size(16)
        .enq()
        .unwrap();

    let got = read_u32s(&h, &out, n);
    for (i, &v) in got.iter().enumerate() {
        assert_eq!(v, (i % 16) as u32);
    }
}
