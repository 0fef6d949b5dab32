//! Queue commands and their builders.
//!
//! Every enqueueable operation has a fluent, single-use builder obtained
//! from the queue. Builders accumulate at most one error; `enq` either
//! returns that error or hands the validated command to the queue and
//! returns its notify event.

use std::marker::PhantomData;

use crate::cpu::command::NativeFn;
use crate::dims::DimensionInfo;
use crate::error::{Error, Result, Status};
use crate::standard::buffer::Buffer;
use crate::standard::event::{CommandType, Event};
use crate::standard::kernel::Kernel;
use crate::standard::queue::Queue;
use crate::standard::spatial_dims::SpatialDims;

pub(crate) enum CommandKind {
    ReadBuffer {
        buf: Buffer,
        offset: usize,
        size: usize,
        dst: *mut u8,
    },
    WriteBuffer {
        buf: Buffer,
        offset: usize,
        data: Vec<u8>,
    },
    NDRangeKernel {
        kernel: Kernel,
        dims: DimensionInfo,
    },
    NativeKernel {
        func: NativeFn,
        args: Box<[u8]>,
        mappings: Vec<(Buffer, usize)>,
    },
}

unsafe impl Send for CommandKind {}

/// A validated command, queued until its wait list clears and a device
/// accepts it.
pub(crate) struct Command {
    pub kind: CommandKind,
    pub wait_list: Vec<Event>,
    pub blocking: bool,
    pub event: Event,
}

impl Command {
    pub fn can_run(&self) -> bool {
        self.wait_list.iter().all(|ev| ev.is_complete())
    }
}

impl CommandKind {
    pub fn command_type(&self) -> CommandType {
        match self {
            CommandKind::ReadBuffer { .. } => CommandType::ReadBuffer,
            CommandKind::WriteBuffer { .. } => CommandType::WriteBuffer,
            CommandKind::NDRangeKernel { .. } => CommandType::NDRangeKernel,
            CommandKind::NativeKernel { .. } => CommandType::NativeKernel,
        }
    }
}

fn wait_list_inconsistent(wait: &[Event]) -> bool {
    wait.iter().any(|ev| ev.is_error())
}

fn blocking_wait_error() -> Error {
    Error::new(
        Status::ExecStatusErrorForEventsInWaitList,
        "cannot block on an inconsistent wait list",
    )
}

/// Reads a buffer region into caller memory.
///
/// Blocking by default; a non-blocking read needs the raw-pointer
/// constructor, since the runtime would otherwise write into the
/// destination after the borrow expired.
#[must_use = "commands do nothing unless enqueued"]
pub struct ReadBufferCmd<'d> {
    queue: Queue,
    buf: Buffer,
    dst: *mut u8,
    size: usize,
    offset: usize,
    blocking: bool,
    wait: Vec<Event>,
    err: Option<Error>,
    _dst: PhantomData<&'d mut [u8]>,
}

impl<'d> ReadBufferCmd<'d> {
    pub(crate) fn new(queue: Queue, buf: &Buffer, dst: &'d mut [u8]) -> ReadBufferCmd<'d> {
        ReadBufferCmd {
            queue,
            buf: buf.clone(),
            dst: dst.as_mut_ptr(),
            size: dst.len(),
            offset: 0,
            blocking: true,
            wait: Vec::new(),
            err: None,
            _dst: PhantomData,
        }
    }

    pub(crate) fn new_raw(
        queue: Queue,
        buf: &Buffer,
        dst: *mut u8,
        size: usize,
    ) -> ReadBufferCmd<'static> {
        let mut cmd = ReadBufferCmd {
            queue,
            buf: buf.clone(),
            dst,
            size,
            offset: 0,
            blocking: true,
            wait: Vec::new(),
            err: None,
            _dst: PhantomData,
        };

        if dst.is_null() {
            cmd.fail(Status::InvalidValue, "pointer to data sink is null");
        }
        cmd
    }

    fn fail(&mut self, status: Status, msg: &'static str) {
        if self.err.is_none() {
            self.err = Some(Error::new(status, msg));
        }
    }

    /// Byte offset into the buffer to read from.
    pub fn offset(mut self, offset: usize) -> ReadBufferCmd<'d> {
        self.offset = offset;
        self
    }

    /// Sets the blocking flag.
    ///
    /// ## Safety
    ///
    /// A non-blocking read writes the destination when the command runs;
    /// the caller must keep the destination alive and unaliased until the
    /// notify event completes.
    pub unsafe fn block(mut self, blocking: bool) -> ReadBufferCmd<'d> {
        self.blocking = blocking;
        self
    }

    pub fn ewait(mut self, events: &[Event]) -> ReadBufferCmd<'d> {
        self.wait.extend_from_slice(events);
        self
    }

    pub fn enq(mut self) -> Result<Event> {
        if self.offset + self.size > self.buf.size() {
            self.fail(Status::InvalidValue, "out of bounds buffer read");
        }
        if self.blocking && wait_list_inconsistent(&self.wait) {
            return Err(blocking_wait_error());
        }
        if let Some(e) = self.err {
            return Err(e);
        }

        self.queue.clone().enqueue(
            CommandKind::ReadBuffer {
                buf: self.buf,
                offset: self.offset,
                size: self.size,
                dst: self.dst,
            },
            self.wait,
            self.blocking,
        )
    }
}

/// Writes caller data into a buffer region. The source is copied when
/// the command is built, so the command is safe whether or not it
/// blocks.
#[must_use = "commands do nothing unless enqueued"]
pub struct WriteBufferCmd {
    queue: Queue,
    buf: Buffer,
    data: Vec<u8>,
    offset: usize,
    blocking: bool,
    wait: Vec<Event>,
    err: Option<Error>,
}

impl WriteBufferCmd {
    pub(crate) fn new(queue: Queue, buf: &Buffer, src: &[u8]) -> WriteBufferCmd {
        WriteBufferCmd {
            queue,
            buf: buf.clone(),
            data: src.to_vec(),
            offset: 0,
            blocking: false,
            wait: Vec::new(),
            err: None,
        }
    }

    fn fail(&mut self, status: Status, msg: &'static str) {
        if self.err.is_none() {
            self.err = Some(Error::new(status, msg));
        }
    }

    pub fn offset(mut self, offset: usize) -> WriteBufferCmd {
        self.offset = offset;
        self
    }

    pub fn block(mut self, blocking: bool) -> WriteBufferCmd {
        if blocking && wait_list_inconsistent(&self.wait) {
            self.err = Some(blocking_wait_error());
        }
        self.blocking = blocking;
        self
    }

    pub fn ewait(mut self, events: &[Event]) -> WriteBufferCmd {
        self.wait.extend_from_slice(events);
        if self.blocking && wait_list_inconsistent(&self.wait) {
            self.err = Some(blocking_wait_error());
        }
        self
    }

    pub fn enq(mut self) -> Result<Event> {
        if self.offset + self.data.len() > self.buf.size() {
            self.fail(Status::InvalidValue, "data size exceeds buffer capacity");
        }
        if self.blocking && wait_list_inconsistent(&self.wait) {
            return Err(blocking_wait_error());
        }
        if let Some(e) = self.err {
            return Err(e);
        }

        self.queue.clone().enqueue(
            CommandKind::WriteBuffer {
                buf: self.buf,
                offset: self.offset,
                data: self.data,
            },
            self.wait,
            self.blocking,
        )
    }
}

/// Launches a kernel over an ND index space.
#[must_use = "commands do nothing unless enqueued"]
pub struct KernelCmd {
    queue: Queue,
    kernel: Kernel,
    gws: Option<SpatialDims>,
    gwo: Option<SpatialDims>,
    lws: Option<SpatialDims>,
    blocking: bool,
    wait: Vec<Event>,
}

impl KernelCmd {
    pub(crate) fn new(queue: Queue, kernel: &Kernel) -> KernelCmd {
        KernelCmd {
            queue,
            kernel: kernel.clone(),
            gws: None,
            gwo: None,
            lws: None,
            blocking: false,
            wait: Vec::new(),
        }
    }

    pub fn global_work_size<D: Into<SpatialDims>>(mut self, gws: D) -> KernelCmd {
        self.gws = Some(gws.into());
        self
    }

    pub fn global_work_offset<D: Into<SpatialDims>>(mut self, gwo: D) -> KernelCmd {
        self.gwo = Some(gwo.into());
        self
    }

    pub fn local_work_size<D: Into<SpatialDims>>(mut self, lws: D) -> KernelCmd {
        self.lws = Some(lws.into());
        self
    }

    pub fn block(mut self, blocking: bool) -> KernelCmd {
        self.blocking = blocking;
        self
    }

    pub fn ewait(mut self, events: &[Event]) -> KernelCmd {
        self.wait.extend_from_slice(events);
        self
    }

    pub fn enq(self) -> Result<Event> {
        let dims = self.validate()?;

        self.queue.clone().enqueue(
            CommandKind::NDRangeKernel {
                kernel: self.kernel,
                dims,
            },
            self.wait,
            self.blocking,
        )
    }

    fn validate(&self) -> Result<DimensionInfo> {
        let dev = self.queue.device();
        let fail = |status, msg: &'static str| -> Result<DimensionInfo> {
            self.queue.context().report_diagnostic(msg);
            Err(Error::new(status, msg))
        };

        if !self.kernel.is_built_for(dev) {
            return fail(
                Status::InvalidProgramExecutable,
                "kernel not built for the queue device",
            );
        }

        if !self.kernel.context().same_context(self.queue.context()) {
            return fail(
                Status::InvalidContext,
                "cannot enqueue a kernel into a command queue with a different context",
            );
        }

        if !self.kernel.all_args_set() {
            return fail(
                Status::InvalidKernelArgs,
                "not all kernel arguments have been specified",
            );
        }

        let gws = match &self.gws {
            Some(gws) => gws,
            None => {
                return fail(
                    Status::InvalidGlobalWorkSize,
                    "no global work size specified",
                )
            }
        };

        let work_dim = gws.dim_count();
        if work_dim < 1 || work_dim > dev.max_work_item_dimensions() {
            return fail(
                Status::InvalidWorkDimension,
                "given work dimensions is out of range",
            );
        }

        let globals = gws.to_vec();
        for &size in &globals {
            if size == 0 || size > dev.size_type_max() {
                return fail(
                    Status::InvalidGlobalWorkSize,
                    "out of range global work size given",
                );
            }
        }

        let offsets = match &self.gwo {
            None => vec![0; work_dim],
            Some(gwo) => {
                if gwo.matching_dims(gws).is_err() {
                    return fail(
                        Status::InvalidGlobalOffset,
                        "global offset dimensions do not match the global size",
                    );
                }
                let offsets = gwo.to_vec();
                for (&off, &size) in offsets.iter().zip(&globals) {
                    if off.checked_add(size).map_or(true, |e| e > dev.size_type_max()) {
                        return fail(
                            Status::InvalidGlobalOffset,
                            "given global offset shifts work items out of range",
                        );
                    }
                }
                offsets
            }
        };

        let required = self.kernel.required_work_group_size(dev);

        let locals = match &self.lws {
            None => {
                if required.is_some() {
                    return fail(
                        Status::InvalidWorkGroupSize,
                        "kernel requires a fixed local work size",
                    );
                }
                Vec::new()
            }
            Some(lws) => {
                if lws.matching_dims(gws).is_err() {
                    return fail(
                        Status::InvalidWorkGroupSize,
                        "local size dimensions do not match the global size",
                    );
                }

                let locals = lws.to_vec();
                let max_sizes = dev.max_work_item_sizes();
                let mut group_size = 1usize;

                for (i, (&local, &global)) in locals.iter().zip(&globals).enumerate() {
                    if local == 0 || local > max_sizes[i] {
                        return fail(
                            Status::InvalidWorkGroupSize,
                            "work group size exceeds device limits",
                        );
                    }

                    if global % local != 0 {
                        return fail(
                            Status::InvalidWorkGroupSize,
                            "work group size does not divide number of work items",
                        );
                    }

                    if let Some(req) = required {
                        if req[i] != local {
                            return fail(
                                Status::InvalidWorkGroupSize,
                                "work group size does not match the one required by the kernel",
                            );
                        }
                    }

                    group_size *= local;
                }

                if group_size > dev.max_work_group_size() {
                    return fail(
                        Status::InvalidWorkGroupSize,
                        "work group size exceeds device limits",
                    );
                }

                locals
            }
        };

        Ok(DimensionInfo::new(&offsets, &globals, &locals))
    }
}

/// Runs a host function on a worker thread, with buffer arguments
/// rebased to device addresses at dispatch.
#[must_use = "commands do nothing unless enqueued"]
pub struct NativeKernelCmd {
    queue: Queue,
    func: NativeFn,
    args: Box<[u8]>,
    mappings: Vec<(Buffer, usize)>,
    blocking: bool,
    wait: Vec<Event>,
    err: Option<Error>,
}

impl NativeKernelCmd {
    pub(crate) fn new(queue: Queue, func: NativeFn, args: &[u8]) -> NativeKernelCmd {
        NativeKernelCmd {
            queue,
            func,
            args: args.into(),
            mappings: Vec::new(),
            blocking: false,
            wait: Vec::new(),
            err: None,
        }
    }

    fn fail(&mut self, status: Status, msg: &'static str) {
        if self.err.is_none() {
            self.err = Some(Error::new(status, msg));
        }
    }

    /// Declares that the argument block holds a buffer reference at
    /// `offset`; the slot is patched to the buffer's device address when
    /// the command is dispatched.
    pub fn mem_arg(mut self, offset: usize, buf: &Buffer) -> NativeKernelCmd {
        if self.args.is_empty() {
            self.fail(Status::InvalidValue, "unexpected memory mappings");
            return self;
        }

        if offset + std::mem::size_of::<usize>() > self.args.len() {
            self.fail(
                Status::InvalidValue,
                "memory mapping outside the argument block",
            );
            return self;
        }

        self.mappings.push((buf.clone(), offset));
        self
    }

    pub fn block(mut self, blocking: bool) -> NativeKernelCmd {
        if blocking && wait_list_inconsistent(&self.wait) {
            self.err = Some(blocking_wait_error());
        }
        self.blocking = blocking;
        self
    }

    pub fn ewait(mut self, events: &[Event]) -> NativeKernelCmd {
        self.wait.extend_from_slice(events);
        if self.blocking && wait_list_inconsistent(&self.wait) {
            self.err = Some(blocking_wait_error());
        }
        self
    }

    pub fn enq(self) -> Result<Event> {
        if let Some(e) = self.err {
            return Err(e);
        }
        if self.blocking && wait_list_inconsistent(&self.wait) {
            return Err(blocking_wait_error());
        }

        self.queue.clone().enqueue(
            CommandKind::NativeKernel {
                func: self.func,
                args: self.args,
                mappings: self.mappings,
            },
            self.wait,
            self.blocking,
        )
    }
}
