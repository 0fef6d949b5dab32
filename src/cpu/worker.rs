//! Worker threads: one pinned OS thread per core of a multiprocessor.

use std::cell::Cell;
use std::collections::VecDeque;
use std::os::raw::c_void;
use std::ptr;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::cpu::command::{
    self, CopyIn, CopyOut, ExecCommand, ExecKind, NDRangeBlock, NativeCall, ServiceCommand,
    WorkerCommand,
};
use crate::cpu::memory::LocalMemory;
use crate::cpu::stack::ExecutionStack;
use crate::dims::DimensionIter;
use crate::error::Status;
use crate::frontend::KernelFn;
use crate::hw;
use crate::profile::{profiler, SampleLabel};
use crate::sys::Monitor;

/// The worker state machine. A stop command moves the worker to
/// `TearDown` at submission (no new jobs) and to `Stopped` when executed
/// (exit the run loop); jobs already queued still drain in between.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WorkingMode {
    FullyOperational,
    TearDown,
    Stopped,
}

impl WorkingMode {
    fn accepts_jobs(self) -> bool {
        self == WorkingMode::FullyOperational
    }
}

struct WorkerState {
    mode: WorkingMode,
    commands: VecDeque<WorkerCommand>,
}

pub(crate) struct WorkerShared {
    monitor: Monitor<WorkerState>,
}

pub(crate) struct Worker {
    shared: Arc<WorkerShared>,
    handle: Option<JoinHandle<()>>,
}

/// Per-thread execution context: the stack bank, the local-memory arena
/// and, while an ND-range block runs, the group cursor the work-item
/// builtins read.
pub(crate) struct WorkerCtx {
    pub stack: ExecutionStack,
    pub local: LocalMemory,
    pub block: Option<BlockCtx>,
}

pub(crate) struct BlockCtx {
    pub cur: DimensionIter,
    pub begin: DimensionIter,
    pub end: DimensionIter,
    pub entry: KernelFn,
}

thread_local! {
    static CURRENT_CTX: Cell<*mut WorkerCtx> = Cell::new(ptr::null_mut());
}

/// The executing worker's context, or `None` outside a worker thread.
///
/// ## Safety contract (internal)
///
/// Only the owning worker thread ever dereferences the pointer, and only
/// between `run` entry and exit; builtins called from kernel code run on
/// that same thread by construction.
pub(crate) fn with_current_ctx<R>(f: impl FnOnce(Option<&mut WorkerCtx>) -> R) -> R {
    let ptr = CURRENT_CTX.with(|c| c.get());
    if ptr.is_null() {
        f(None)
    } else {
        f(Some(unsafe { &mut *ptr }))
    }
}

/// Yields the current work-item: advances the group cursor (wrapping at
/// the end of the group) and switches to the next work-item stack.
/// Outside a running work-group this is a no-op.
pub(crate) fn switch_to_next_work_item() {
    with_current_ctx(|ctx| {
        let ctx = match ctx {
            Some(ctx) => ctx,
            None => return,
        };
        let block = match ctx.block.as_mut() {
            Some(block) => block,
            None => return,
        };

        block.cur.advance(1);
        if block.cur == block.end {
            block.cur = block.begin.clone();
        }

        ctx.stack.switch_to_next();
    })
}

impl Worker {
    pub fn spawn(cpu: &hw::Cpu, group: &hw::CacheGroup) -> Worker {
        let shared = Arc::new(WorkerShared {
            monitor: Monitor::new(WorkerState {
                mode: WorkingMode::FullyOperational,
                commands: VecDeque::new(),
            }),
        });

        let thread_shared = Arc::clone(&shared);
        let os_id = cpu.os_id;
        let l1_size = group.l1_size;
        let local_size = group.size;

        let handle = std::thread::Builder::new()
            .name(format!("clrun-worker-{}", os_id))
            .spawn(move || run(thread_shared, os_id, l1_size, local_size))
            .expect("failed spawning worker thread");

        Worker {
            shared,
            handle: Some(handle),
        }
    }

    /// Hands a command to this worker. Fails once the worker stopped
    /// accepting jobs; the command is returned to the caller.
    pub fn submit(&self, cmd: WorkerCommand) -> Result<(), WorkerCommand> {
        let mut state = self.shared.monitor.lock();

        if !state.mode.accepts_jobs() {
            return Err(cmd);
        }

        if matches!(cmd, WorkerCommand::Service(ServiceCommand::Stop)) {
            state.mode = WorkingMode::TearDown;
        }

        state.commands.push_back(cmd);
        drop(state);
        self.shared.monitor.notify_one();

        Ok(())
    }

    /// Queue depth, the load metric the block dispatcher minimizes.
    pub fn load_indicator(&self) -> usize {
        self.shared.monitor.lock().commands.len()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _ = self.submit(WorkerCommand::Service(ServiceCommand::Stop));

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(shared: Arc<WorkerShared>, os_id: usize, l1_size: usize, local_size: usize) {
    pin_to_cpu(os_id);
    log::debug!("worker on cpu {} up", os_id);

    let mut ctx = WorkerCtx {
        stack: ExecutionStack::new(l1_size),
        local: LocalMemory::new(local_size),
        block: None,
    };

    CURRENT_CTX.with(|c| c.set(&mut ctx as *mut WorkerCtx));

    loop {
        let cmd = {
            let mut state = shared.monitor.lock();
            loop {
                if state.mode == WorkingMode::Stopped {
                    break None;
                }
                match state.commands.pop_front() {
                    Some(cmd) => break Some(cmd),
                    None => state = shared.monitor.wait(state),
                }
            }
        };

        match cmd {
            Some(cmd) => execute(&shared, &mut ctx, cmd),
            None => break,
        }
    }

    CURRENT_CTX.with(|c| c.set(ptr::null_mut()));
    log::debug!("worker on cpu {} stopped", os_id);
}

fn execute(shared: &WorkerShared, ctx: &mut WorkerCtx, cmd: WorkerCommand) {
    match cmd {
        WorkerCommand::Service(svc) => execute_service(shared, svc),
        WorkerCommand::Exec(exec) => execute_exec(ctx, exec),
    }
}

fn execute_service(shared: &WorkerShared, cmd: ServiceCommand) {
    match cmd {
        ServiceCommand::RunConstructors { module, sync } => {
            for ctor in &module.constructors {
                ctor();
            }
            sync.signal();
        }
        ServiceCommand::RunDestructors { module, sync } => {
            for dtor in &module.destructors {
                dtor();
            }
            sync.signal();
        }
        ServiceCommand::Stop => {
            shared.monitor.lock().mode = WorkingMode::Stopped;
        }
    }
}

fn execute_exec(ctx: &mut WorkerCtx, mut cmd: ExecCommand) {
    let profiled = cmd.profiled();

    // Command started; the first part to get here owns the sample.
    if cmd.recorder.set_started() {
        cmd.event
            .mark_running(profiler().sample(profiled, SampleLabel::CommandRunning, None));
    }

    // Part of a split command: register the partial start too.
    if let Some(id) = cmd.sub_id {
        cmd.event
            .mark_sub_running(profiler().sample(profiled, SampleLabel::CommandRunning, Some(id)));
    }

    let exit_status = match &mut cmd.kind {
        ExecKind::ReadBuffer(copy) => execute_read(copy),
        ExecKind::WriteBuffer(copy) => execute_write(copy),
        ExecKind::NDRangeBlock(block) => execute_block(ctx, block),
        ExecKind::Native(call) => execute_native(call),
    };

    command::complete(cmd, exit_status);
}

fn execute_read(cmd: &CopyOut) -> i32 {
    unsafe { ptr::copy_nonoverlapping(cmd.src, cmd.dst, cmd.size) };
    command::NO_ERROR
}

fn execute_write(cmd: &CopyIn) -> i32 {
    unsafe { ptr::copy_nonoverlapping(cmd.data.as_ptr(), cmd.dst, cmd.data.len()) };
    command::NO_ERROR
}

fn execute_block(ctx: &mut WorkerCtx, block: &mut NDRangeBlock) -> i32 {
    // Carve this block's local buffers out of the worker arena.
    ctx.local.reset();
    for &(slot, size) in &block.locals {
        match ctx.local.alloc(size) {
            Some(addr) => block.slots[slot] = addr as *mut c_void,
            None => return Status::MemObjectAllocationFailure.as_i32(),
        }
    }

    let items = block.begin.info().local_items();

    ctx.block = Some(BlockCtx {
        cur: block.begin.clone(),
        begin: block.begin.clone(),
        end: block.end.clone(),
        entry: block.entry,
    });

    ctx.stack
        .reset(crate::cpu::engine::group_parallel_stub, block.slots.as_ptr(), items);
    ctx.stack.run();

    ctx.block = None;

    command::NO_ERROR
}

fn execute_native(cmd: &mut NativeCall) -> i32 {
    let func = cmd.func;
    unsafe { func(cmd.args.as_mut_ptr() as *mut c_void) };
    command::NO_ERROR
}

#[cfg(target_os = "linux")]
fn pin_to_cpu(os_id: usize) {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(os_id % libc::CPU_SETSIZE as usize, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_to_cpu(_os_id: usize) {}
