//! A command queue and its scheduler.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::cpu::command::NativeFn;
use crate::cpu::device::SubmitOutcome;
use crate::error::{err, Error, Result, Status};
use crate::profile::{profiler, SampleLabel};
use crate::standard::buffer::Buffer;
use crate::standard::command::{
    Command, CommandKind, KernelCmd, NativeKernelCmd, ReadBufferCmd, WriteBufferCmd,
};
use crate::standard::context::Context;
use crate::standard::device::Device;
use crate::standard::event::Event;
use crate::standard::kernel::Kernel;

bitflags::bitflags! {
    pub struct QueueProperties: u32 {
        const OUT_OF_ORDER_EXEC_MODE = 1 << 0;
        const PROFILING = 1 << 1;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueType {
    InOrder,
    OutOfOrder,
}

/// A command queue bound to one device of one context. Clones share the
/// queue; any thread may enqueue concurrently.
#[derive(Clone)]
pub struct Queue(pub(crate) Arc<QueueInner>);

pub(crate) struct QueueInner {
    ty: QueueType,
    ctx: Context,
    device: Device,
    profiling: bool,
    state: Mutex<QueueState>,
}

struct QueueState {
    commands: VecDeque<Command>,
    /// Events of enqueued-but-unfinished commands; each entry keeps its
    /// event (and through it this queue) alive until completion.
    events: Vec<Event>,
    /// Notify event of the last command handed to the device. In-order
    /// dispatch holds the next command until this one reaches a terminal
    /// status: one command in flight at a time, no skipping.
    in_flight: Option<Event>,
}

impl Queue {
    pub fn new(ctx: &Context, device: &Device, properties: QueueProperties) -> Result<Queue> {
        if !ctx.is_associated_with(device) {
            return err(
                Status::InvalidDevice,
                "device not associated with this context",
            );
        }

        let ty = if properties.contains(QueueProperties::OUT_OF_ORDER_EXEC_MODE) {
            QueueType::OutOfOrder
        } else {
            QueueType::InOrder
        };

        Ok(Queue(Arc::new(QueueInner {
            ty,
            ctx: ctx.clone(),
            device: device.clone(),
            profiling: properties.contains(QueueProperties::PROFILING),
            state: Mutex::new(QueueState {
                commands: VecDeque::new(),
                events: Vec::new(),
                in_flight: None,
            }),
        })))
    }

    pub fn queue_type(&self) -> QueueType {
        self.0.ty
    }

    pub fn context(&self) -> &Context {
        &self.0.ctx
    }

    pub fn device(&self) -> &Device {
        &self.0.device
    }

    pub fn profiling_enabled(&self) -> bool {
        self.0.profiling
    }

    // ---- command builders --------------------------------------------

    /// A blocking read of `buf` into `dst`.
    pub fn read_buffer<'d>(&self, buf: &Buffer, dst: &'d mut [u8]) -> ReadBufferCmd<'d> {
        ReadBufferCmd::new(self.clone(), buf, dst)
    }

    /// A read into raw memory, usable non-blocking.
    ///
    /// ## Safety
    ///
    /// `dst` must point to `size` writable bytes that stay valid and
    /// unaliased until the returned event completes.
    pub unsafe fn read_buffer_raw(
        &self,
        buf: &Buffer,
        dst: *mut u8,
        size: usize,
    ) -> ReadBufferCmd<'static> {
        ReadBufferCmd::new_raw(self.clone(), buf, dst, size)
    }

    /// A write of `src` into `buf`; the data is captured immediately.
    pub fn write_buffer(&self, buf: &Buffer, src: &[u8]) -> WriteBufferCmd {
        WriteBufferCmd::new(self.clone(), buf, src)
    }

    /// An ND-range launch of `kernel`.
    pub fn kernel(&self, kernel: &Kernel) -> KernelCmd {
        KernelCmd::new(self.clone(), kernel)
    }

    /// A native-function command.
    ///
    /// ## Safety
    ///
    /// `func` must tolerate being called on a worker thread with the
    /// (pointer-patched) copy of `args`, and every pointer it reads from
    /// the block must stay valid until the notify event completes.
    pub unsafe fn native_kernel(&self, func: NativeFn, args: &[u8]) -> NativeKernelCmd {
        NativeKernelCmd::new(self.clone(), func, args)
    }

    // ---- queue operations --------------------------------------------

    /// Drives the scheduler until every enqueued command was handed to
    /// the device.
    pub fn flush(&self) {
        self.0.flush();
    }

    /// Flushes, then blocks until every command previously enqueued has
    /// finished.
    pub fn finish(&self) {
        self.0.finish();
    }

    pub(crate) fn enqueue(
        &self,
        kind: CommandKind,
        wait_list: Vec<Event>,
        blocking: bool,
    ) -> Result<Event> {
        QueueInner::enqueue(&self.0, kind, wait_list, blocking)
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("type", &self.0.ty)
            .field("profiling", &self.0.profiling)
            .finish()
    }
}

impl QueueInner {
    pub(crate) fn context(&self) -> &Context {
        &self.ctx
    }

    fn lock_state(&self) -> MutexGuard<QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enqueue(
        this: &Arc<QueueInner>,
        kind: CommandKind,
        wait_list: Vec<Event>,
        blocking: bool,
    ) -> Result<Event> {
        for ev in &wait_list {
            if !ev.context().same_context(&this.ctx) {
                this.ctx
                    .report_diagnostic("cannot wait for events of a different context");
                return Err(Error::new(
                    Status::InvalidContext,
                    "cannot wait for events of a different context",
                ));
            }
        }

        if matches!(kind, CommandKind::NativeKernel { .. })
            && !this.device.supports_native_kernels()
        {
            this.ctx
                .report_diagnostic("device does not support native kernels");
            return Err(Error::new(
                Status::InvalidOperation,
                "device does not support native kernels",
            ));
        }

        let event = Event::new(Arc::clone(this), kind.command_type(), this.profiling);
        event.record_enqueued(profiler().sample(
            event.is_profiled(),
            SampleLabel::CommandEnqueued,
            None,
        ));

        {
            let mut state = this.lock_state();
            state.events.push(event.clone());
            state.commands.push_back(Command {
                kind,
                wait_list,
                blocking,
                event: event.clone(),
            });
        }

        this.run_scheduler();

        if blocking {
            event.wait();
        }

        Ok(event)
    }

    /// Completion hook: give the scheduler a chance to dispatch whatever
    /// the finished command unblocked, then drop the queue's hold on the
    /// event.
    pub(crate) fn command_done(&self, ev: &Event) {
        self.run_scheduler();

        self.lock_state().events.retain(|e| !e.same_event(ev));
    }

    /// One scheduling attempt. Returns whether undispatched commands
    /// remain.
    fn run_scheduler(&self) -> bool {
        match self.ty {
            QueueType::InOrder => self.run_in_order(),
            // Policy slot; nothing dispatches out of order yet.
            QueueType::OutOfOrder => false,
        }
    }

    fn run_in_order(&self) -> bool {
        // Popping and arming the in-flight gate are one atomic step; the
        // gate then keeps every other scheduling pass away from the deque
        // front until this command completes, so the submit itself can
        // happen without holding any queue lock.
        let cmd = {
            let mut state = self.lock_state();

            let predecessor_done = match &state.in_flight {
                None => true,
                Some(ev) if ev.is_complete() => {
                    state.in_flight = None;
                    true
                }
                Some(_) => false,
            };
            let front_ready =
                predecessor_done && state.commands.front().map_or(false, |c| c.can_run());

            if front_ready {
                let cmd = state.commands.pop_front().unwrap();
                state.in_flight = Some(cmd.event.clone());
                Some(cmd)
            } else {
                None
            }
        };

        if let Some(cmd) = cmd {
            let event = cmd.event.clone();
            match self.device.cpu().submit(cmd) {
                SubmitOutcome::Accepted => {}
                SubmitOutcome::Failed(e) => {
                    log::debug!("command submission failed: {}", e);
                    self.ctx.report_diagnostic(e.message());
                    event.mark_completed(e.api_status().as_i32(), None);
                }
            }
        }

        !self.lock_state().commands.is_empty()
    }

    fn flush(&self) {
        while self.run_scheduler() {
            std::thread::yield_now();
        }
    }

    fn finish(&self) {
        self.flush();

        // Wait outside the lock on a retained snapshot; events finishing
        // meanwhile stay valid through their handles.
        let events = self.lock_state().events.clone();
        for ev in events {
            ev.wait();
        }
    }
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        self.finish();
    }
}
