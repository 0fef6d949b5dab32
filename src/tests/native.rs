//! Native kernel commands: argument deep-copy and address rebasing.

use std::os::raw::c_void;

use super::{harness, read_u32s};
use crate::error::Status;
use crate::util;

#[repr(C)]
struct FillArgs {
    dst: *mut u32,
    len: usize,
    base: u32,
}

unsafe extern "C" fn fill_sequence(args: *mut c_void) {
    let args = &*(args as *const FillArgs);
    for i in 0..args.len {
        *args.dst.add(i) = args.base + i as u32;
    }
}

fn arg_bytes<T>(value: &T) -> Vec<u8> {
    let view = unsafe {
        std::slice::from_raw_parts(value as *const T as *const u8, std::mem::size_of::<T>())
    };
    view.to_vec()
}

/// A buffer slot in the argument block is patched to the buffer's device
/// address before the function runs on a worker.
#[test]
fn buffer_arguments_are_rebased_to_device_addresses() {
    let h = harness();

    let buf = h.ctx.buffer_builder(4 * 8).build().unwrap();
    let args = FillArgs {
        dst: std::ptr::null_mut(),
        len: 8,
        base: 40,
    };

    unsafe {
        h.queue
            .native_kernel(fill_sequence, &arg_bytes(&args))
            .mem_arg(0, &buf)
            .block(true)
            .enq()
            .unwrap();
    }

    let expected: Vec<u32> = (40..48).collect();
    assert_eq!(read_u32s(&h, &buf, 8), expected);
}

/// Without mappings the argument block is passed through as copied.
#[test]
fn plain_argument_blocks_are_deep_copied() {
    let h = harness();

    let mut sink = vec![0u32; 4];
    let args = FillArgs {
        dst: sink.as_mut_ptr(),
        len: 4,
        base: 7,
    };
    let mut bytes = arg_bytes(&args);

    let ev = unsafe {
        h.queue
            .native_kernel(fill_sequence, &bytes)
            .enq()
            .unwrap()
    };

    // The command owns its copy; scribbling on the caller block after
    // enqueue must not matter.
    for b in bytes.iter_mut() {
        *b = 0xAA;
    }

    ev.wait();
    h.queue.finish();
    assert_eq!(sink, vec![7, 8, 9, 10]);
}

#[test]
fn mappings_outside_the_block_are_rejected() {
    let h = harness();
    let buf = h.ctx.buffer_builder(16).build().unwrap();

    let e = unsafe {
        h.queue
            .native_kernel(fill_sequence, &[0u8; 4])
            .mem_arg(2, &buf)
            .enq()
            .unwrap_err()
    };
    assert_eq!(e.api_status(), Status::InvalidValue);

    let e = unsafe {
        h.queue
            .native_kernel(fill_sequence, &[])
            .mem_arg(0, &buf)
            .enq()
            .unwrap_err()
    };
    assert_eq!(e.api_status(), Status::InvalidValue);
}

/// Native commands interleave with kernel and copy commands in order.
#[test]
fn native_commands_respect_queue_order() {
    let h = harness();

    let buf = h.ctx.buffer_builder(4 * 4).build().unwrap();
    let seed = [0u32; 4];
    h.queue
        .write_buffer(&buf, util::slice_bytes(&seed))
        .enq()
        .unwrap();

    let args = FillArgs {
        dst: std::ptr::null_mut(),
        len: 4,
        base: 1,
    };
    unsafe {
        h.queue
            .native_kernel(fill_sequence, &arg_bytes(&args))
            .mem_arg(0, &buf)
            .enq()
            .unwrap();
    }

    assert_eq!(read_u32s(&h, &buf, 4), vec![1, 2, 3, 4]);
}
