//! # clrun
//!
//! An OpenCL-1.1-class data-parallel compute runtime that compiles
//! C-dialect kernels through a pluggable front-end service and executes
//! them on CPU cores with correct work-group, barrier and memory
//! semantics.
//!
//! The execution core is organized the way the index at the top of each
//! module describes it: a ref-counted object fabric ([`Platform`],
//! [`Device`], [`Context`], [`Queue`], [`Program`], [`Kernel`],
//! [`Buffer`], [`Event`]); a per-device memory manager; typed command
//! builders with eager validation; an in-order queue scheduler; a
//! multiprocessor/worker-thread pool per last-level-cache group; and the
//! work-item engine, which runs every work-item of a work-group as a
//! cooperative coroutine on a bank of per-work-item stacks, yielding
//! between them at barriers.
//!
//! ## A complete round trip
//!
//! ```no_run
//! use std::sync::Arc;
//! use clrun::{Context, Platform, Program, Queue, QueueProperties};
//!
//! # fn main() -> clrun::Result<()> {
//! # let my_frontend: Arc<dyn clrun::frontend::Frontend> = unimplemented!();
//! let platform = Platform::builder().frontend(my_frontend).build()?;
//! let device = platform.devices()[0].clone();
//! let ctx = Context::new(&platform, &[device.clone()], None)?;
//! let queue = Queue::new(&ctx, &device, QueueProperties::empty())?;
//!
//! let out = ctx.buffer_builder(4).build()?;
//! let input = [7u32];
//! let inp = ctx
//!     .buffer_builder(4)
//!     .copy_host_slice(clrun::util::slice_bytes(&input))
//!     .build()?;
//!
//! let program = Program::with_source(
//!     &ctx,
//!     "kernel void copy(global uint *o, global uint *i) { *o = *i; }",
//! )?;
//! program.build(&[], "", None)?;
//! let kernel = program.create_kernel("copy")?;
//! kernel.set_arg_buffer(0, Some(&out))?;
//! kernel.set_arg_buffer(1, Some(&inp))?;
//!
//! queue.kernel(&kernel).global_work_size(1).enq()?;
//!
//! let mut result = [0u32];
//! queue
//!     .read_buffer(&out, clrun::util::slice_bytes_mut(&mut result))
//!     .enq()?;
//! assert_eq!(result[0], 7);
//! # Ok(())
//! # }
//! ```

pub mod cpu;
pub mod dims;
pub mod error;
pub mod frontend;
pub mod hw;
pub mod prm;
pub mod profile;
pub(crate) mod standard;
pub(crate) mod sys;
pub mod util;

#[cfg(test)]
mod tests;

pub use crate::error::{Error, Result, Status};
pub use crate::standard::{
    status, wait_for_events, Access, Buffer, BufferBuilder, BuildCallback, BuildStatus,
    CommandType, Context, Device, DeviceInfo, DeviceType, ErrorCallback, Event, ExecutionStatus,
    Kernel, KernelCmd, MemFlags, NativeKernelCmd, Platform, PlatformBuilder, Program, Queue,
    QueueProperties, QueueType, ReadBufferCmd, SpatialDims, WriteBufferCmd,
};

pub mod builders {
    //! Builders and command types, re-exported together.

    pub use crate::standard::{
        BufferBuilder, KernelCmd, NativeKernelCmd, PlatformBuilder, ReadBufferCmd, WriteBufferCmd,
    };
}
