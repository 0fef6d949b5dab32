//! Memory-object creation rules, device arena accounting, and bulk
//! copies.

use std::sync::{Arc, Mutex};

use rand::{rngs::SmallRng, Rng, SeedableRng};

use super::{harness, read_u32s};
use crate::error::Status;
use crate::standard::{Access, Context, MemFlags, Platform, Queue, QueueProperties};
use crate::util;

/// Available arena bytes always equal the initial size minus the live
/// buffers (property: allocation accounting).
#[test]
fn arena_accounting_follows_live_buffers() {
    let h = harness();
    let initial = h.device.global_mem_available();

    let a = h.ctx.buffer_builder(1 << 16).build().unwrap();
    assert_eq!(h.device.global_mem_available(), initial - (1 << 16));

    let b = h.ctx.buffer_builder(1 << 12).build().unwrap();
    assert_eq!(
        h.device.global_mem_available(),
        initial - (1 << 16) - (1 << 12)
    );

    drop(a);
    assert_eq!(h.device.global_mem_available(), initial - (1 << 12));

    drop(b);
    assert_eq!(h.device.global_mem_available(), initial);
}

#[test]
fn oversized_buffers_are_rejected() {
    let h = harness();

    // Larger than the device max allocation.
    let e = h.ctx.buffer_builder(1 << 40).build().unwrap_err();
    assert_eq!(e.api_status(), Status::InvalidBufferSize);

    let e = h.ctx.buffer_builder(0).build().unwrap_err();
    assert_eq!(e.api_status(), Status::InvalidBufferSize);
}

/// Exhausting the arena is a recoverable error, reported through the
/// context error callback.
#[test]
fn arena_exhaustion_reports_through_the_callback() {
    let reports: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);

    let platform = Platform::builder()
        .frontend(Arc::new(super::fixtures::FixtureFrontend::new()))
        .topology(super::test_topology(2, 8 << 20))
        .build()
        .unwrap();
    let device = platform.devices()[0].clone();
    let ctx = Context::new(
        &platform,
        &[device.clone()],
        Some(Box::new(move |msg| {
            sink.lock().unwrap().push(msg.to_string())
        })),
    )
    .unwrap();

    // Fits the 8 MiB arena.
    let _a = ctx.buffer_builder(6 << 20).build().unwrap();

    // Within the max-alloc limit, but the arena can no longer cover it.
    let e = ctx.buffer_builder(4 << 20).build().unwrap_err();
    assert_eq!(e.api_status(), Status::MemObjectAllocationFailure);
    assert!(!reports.lock().unwrap().is_empty());

    // The failed attempt must not leak accounting.
    assert_eq!(device.global_mem_available(), (8 << 20) - (6 << 20));
}

#[test]
fn access_flags_are_mutually_exclusive() {
    let h = harness();

    let e = h
        .ctx
        .buffer_builder(64)
        .flags(MemFlags::READ_WRITE | MemFlags::READ_ONLY)
        .build()
        .unwrap_err();
    assert_eq!(e.api_status(), Status::InvalidValue);

    let buf = h
        .ctx
        .buffer_builder(64)
        .flags(MemFlags::READ_ONLY)
        .build()
        .unwrap();
    assert_eq!(buf.access(), Access::ReadOnly);
}

#[test]
fn storage_flags_are_mutually_exclusive() {
    let h = harness();
    let src = vec![0u8; 64];
    let mut host = vec![0u8; 64];

    let e = unsafe {
        h.ctx
            .buffer_builder(64)
            .copy_host_slice(&src)
            .use_host_ptr(host.as_mut_ptr())
            .build()
            .unwrap_err()
    };
    assert_eq!(e.api_status(), Status::InvalidValue);

    let e = h
        .ctx
        .buffer_builder(64)
        .alloc_host()
        .copy_host_slice(&src)
        .build()
        .unwrap_err();
    assert_eq!(e.api_status(), Status::InvalidValue);
}

#[test]
fn short_init_data_is_rejected() {
    let h = harness();
    let src = vec![0u8; 8];

    let e = h
        .ctx
        .buffer_builder(64)
        .copy_host_slice(&src)
        .build()
        .unwrap_err();
    assert_eq!(e.api_status(), Status::InvalidHostPtr);
}

#[test]
fn null_host_pointer_is_rejected() {
    let h = harness();

    let e = unsafe {
        h.ctx
            .buffer_builder(64)
            .use_host_ptr(std::ptr::null_mut())
            .build()
            .unwrap_err()
    };
    assert_eq!(e.api_status(), Status::InvalidHostPtr);
}

/// A host-pointer buffer reads and writes the caller's storage in place.
#[test]
fn host_pointer_buffers_share_caller_storage() {
    let h = harness();
    let mut storage = [11u32, 22, 33, 44];

    let buf = unsafe {
        h.ctx
            .buffer_builder(16)
            .use_host_ptr(storage.as_mut_ptr() as *mut u8)
            .build()
            .unwrap()
    };

    // Host buffers are not arena-accounted.
    assert_eq!(h.device.global_mem_available(), 64 << 20);

    assert_eq!(read_u32s(&h, &buf, 4), vec![11, 22, 33, 44]);

    let update = [5u32, 6, 7, 8];
    h.queue
        .write_buffer(&buf, util::slice_bytes(&update))
        .block(true)
        .enq()
        .unwrap();
    h.queue.finish();

    assert_eq!(storage, [5, 6, 7, 8]);
}

#[test]
fn copy_host_slice_seeds_the_device_buffer() {
    let h = harness();
    let init = [3u32, 1, 4, 1];

    let buf = h
        .ctx
        .buffer_builder(16)
        .copy_host_slice(util::slice_bytes(&init))
        .build()
        .unwrap();

    assert_eq!(read_u32s(&h, &buf, 4), vec![3, 1, 4, 1]);
}

#[test]
fn out_of_bounds_reads_and_writes_are_rejected() {
    let h = harness();
    let buf = h.ctx.buffer_builder(16).build().unwrap();

    let mut dst = [0u8; 16];
    let e = h
        .queue
        .read_buffer(&buf, &mut dst)
        .offset(8)
        .enq()
        .unwrap_err();
    assert_eq!(e.api_status(), Status::InvalidValue);

    let e = h
        .queue
        .write_buffer(&buf, &[0u8; 12])
        .offset(8)
        .enq()
        .unwrap_err();
    assert_eq!(e.api_status(), Status::InvalidValue);
}

/// Bulk random contents survive the write/read round trip through the
/// device arena, whole and through randomly chosen windows.
#[test]
fn bulk_random_copies_round_trip() {
    let h = harness();
    let mut rng = SmallRng::from_entropy();

    let words: Vec<u32> = (0..1 << 14).map(|_| rng.gen()).collect();
    let buf = h.ctx.buffer_builder(words.len() * 4).build().unwrap();

    h.queue
        .write_buffer(&buf, util::slice_bytes(&words))
        .block(true)
        .enq()
        .unwrap();

    assert_eq!(read_u32s(&h, &buf, words.len()), words);

    for _ in 0..4 {
        let start = rng.gen_range(0..words.len());
        let len = rng.gen_range(1..=words.len() - start);

        let mut window = vec![0u32; len];
        h.queue
            .read_buffer(&buf, util::slice_bytes_mut(&mut window))
            .offset(start * 4)
            .enq()
            .unwrap();

        assert_eq!(&window[..], &words[start..start + len]);
    }
}

#[test]
fn offset_copies_move_the_right_bytes() {
    let h = harness();
    let buf = h.ctx.buffer_builder(16).build().unwrap();

    let all = [1u32, 2, 3, 4];
    h.queue
        .write_buffer(&buf, util::slice_bytes(&all))
        .block(true)
        .enq()
        .unwrap();

    let patch = [9u32];
    h.queue
        .write_buffer(&buf, util::slice_bytes(&patch))
        .offset(4)
        .block(true)
        .enq()
        .unwrap();

    let mut tail = [0u32; 2];
    h.queue
        .read_buffer(&buf, util::slice_bytes_mut(&mut tail))
        .offset(8)
        .enq()
        .unwrap();

    assert_eq!(read_u32s(&h, &buf, 4), vec![1, 9, 3, 4]);
    assert_eq!(tail, [3, 4]);
}

#[test]
fn queue_requires_a_context_device() {
    let h = harness();

    let other_platform = Platform::builder()
        .frontend(Arc::new(super::fixtures::FixtureFrontend::new()))
        .topology(super::test_topology(1, 8 << 20))
        .build()
        .unwrap();
    let foreign = other_platform.devices()[0].clone();

    let e = Queue::new(&h.ctx, &foreign, QueueProperties::empty()).unwrap_err();
    assert_eq!(e.api_status(), Status::InvalidDevice);
}
