//! Commands as seen by worker threads, and the shared result recorder.

use std::os::raw::c_void;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::dims::DimensionIter;
use crate::error::Status;
use crate::frontend::{KernelFn, KernelModule};
use crate::profile::{profiler, SampleLabel};
use crate::standard::buffer::Buffer;
use crate::standard::event::Event;
use crate::standard::kernel::Kernel;
use crate::sys::Rendezvous;

/// Exit status of one executed part: `0` is success, anything else is the
/// raw error status it failed with.
pub(crate) const NO_ERROR: i32 = 0;

/// Native kernel entry: a single opaque argument block.
pub type NativeFn = unsafe extern "C" fn(args: *mut c_void);

/// Aggregates the per-part exit statuses of a command split into several
/// worker-level parts.
///
/// `set_started` is won by exactly one part (it emits the running sample);
/// `set_exit_status` is an atomic countdown where the last decrementer wins
/// the right to publish the final event status.
pub(crate) struct ResultRecorder {
    started: AtomicBool,
    to_wait: AtomicUsize,
    statuses: Vec<AtomicI32>,
}

impl ResultRecorder {
    pub fn new(parts: usize) -> ResultRecorder {
        assert!(parts > 0);

        ResultRecorder {
            started: AtomicBool::new(false),
            to_wait: AtomicUsize::new(parts),
            statuses: (0..parts).map(|_| AtomicI32::new(NO_ERROR)).collect(),
        }
    }

    /// True for exactly one caller: the part that starts the command.
    pub fn set_started(&self) -> bool {
        // Common case, command already started: skip the RMW.
        if self.started.load(Ordering::Acquire) {
            return false;
        }

        !self.started.swap(true, Ordering::AcqRel)
    }

    /// Records one part's exit status; true when this was the last part.
    pub fn set_exit_status(&self, status: i32) -> bool {
        let slot = self.to_wait.fetch_sub(1, Ordering::AcqRel) - 1;
        self.statuses[slot].store(status, Ordering::Release);
        slot == 0
    }

    /// The aggregated status: the first recorded non-success status, else
    /// success.
    pub fn exit_status(&self) -> i32 {
        for status in &self.statuses {
            let st = status.load(Ordering::Acquire);
            if st != NO_ERROR {
                return st;
            }
        }
        NO_ERROR
    }
}

/// Service commands act on the worker itself rather than on behalf of a
/// queued command.
pub(crate) enum ServiceCommand {
    RunConstructors {
        module: Arc<KernelModule>,
        sync: Arc<Rendezvous>,
    },
    RunDestructors {
        module: Arc<KernelModule>,
        sync: Arc<Rendezvous>,
    },
    Stop,
}

/// One worker-level unit of a queued command.
pub(crate) struct ExecCommand {
    pub event: Event,
    pub recorder: Arc<ResultRecorder>,
    /// Part id within a split command; `None` for single-part commands.
    pub sub_id: Option<u32>,
    pub kind: ExecKind,
}

pub(crate) enum ExecKind {
    ReadBuffer(CopyOut),
    WriteBuffer(CopyIn),
    NDRangeBlock(NDRangeBlock),
    Native(NativeCall),
}

/// Device-to-host copy; the source address was resolved at submit time.
pub(crate) struct CopyOut {
    pub dst: *mut u8,
    pub src: *const u8,
    pub size: usize,
    /// Keeps the source mapping alive until the copy ran.
    pub _buf: Buffer,
}

/// Host-to-device copy from command-owned bytes.
pub(crate) struct CopyIn {
    pub dst: *mut u8,
    pub data: Vec<u8>,
    pub _buf: Buffer,
}

/// One work-group of an ND-range launch.
pub(crate) struct NDRangeBlock {
    pub entry: KernelFn,
    /// The packed argument array handed to the stub; local-buffer slots
    /// are patched by the executing worker.
    pub slots: Vec<*mut c_void>,
    /// Backing storage for by-value argument slots, shared by all blocks.
    pub _values: Arc<Vec<Box<[u8]>>>,
    /// (slot index, byte size) of each local-memory argument.
    pub locals: Vec<(usize, usize)>,
    pub begin: DimensionIter,
    pub end: DimensionIter,
    /// Keeps the kernel (and through it every buffer argument) alive for
    /// the duration of the block.
    pub _kernel: Kernel,
}

pub(crate) struct NativeCall {
    pub func: NativeFn,
    pub args: Box<[u8]>,
    /// Buffers referenced through the argument block.
    pub _buffers: Vec<Buffer>,
}

pub(crate) enum WorkerCommand {
    Service(ServiceCommand),
    Exec(ExecCommand),
}

unsafe impl Send for CopyOut {}
unsafe impl Send for CopyIn {}
unsafe impl Send for NDRangeBlock {}
unsafe impl Send for NativeCall {}

impl ExecCommand {
    pub fn profiled(&self) -> bool {
        self.event.is_profiled()
    }
}

/// Completion protocol shared by workers and by submit paths that must
/// account a part without executing it: a per-part completed sample, then
/// the countdown; the last part publishes the aggregate status.
pub(crate) fn complete(cmd: ExecCommand, exit_status: i32) {
    let profiled = cmd.profiled();

    if let Some(id) = cmd.sub_id {
        cmd.event.mark_sub_completed(profiler().sample(
            profiled,
            SampleLabel::CommandCompleted,
            Some(id),
        ));
    }

    if cmd.recorder.set_exit_status(exit_status) {
        let aggregated = cmd.recorder.exit_status();
        cmd.event.mark_completed(
            aggregated,
            profiler().sample(profiled, SampleLabel::CommandCompleted, None),
        );
    }
}

/// Status used when a part could not be handed to any worker.
pub(crate) fn rejected_status() -> i32 {
    Status::InvalidOperation.as_i32()
}
