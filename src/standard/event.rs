//! Command events: status, waiting, profiling trace carrier.

use std::sync::Arc;

use num_traits::FromPrimitive;

use crate::error::{err, Result, Status};
use crate::profile::{profiler, ProfileSample, ProfileTrace};
use crate::standard::context::Context;
use crate::standard::queue::{Queue, QueueInner};
use crate::sys::Monitor;

/// Execution statuses, in the standard numeric ordering. An event moves
/// only towards smaller values; negative values are terminal errors.
pub mod status {
    pub const COMPLETE: i32 = 0;
    pub const RUNNING: i32 = 1;
    pub const SUBMITTED: i32 = 2;
    pub const QUEUED: i32 = 3;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandType {
    ReadBuffer,
    WriteBuffer,
    NDRangeKernel,
    NativeKernel,
}

impl CommandType {
    pub fn name(self) -> &'static str {
        match self {
            CommandType::ReadBuffer => "Read Buffer",
            CommandType::WriteBuffer => "Write Buffer",
            CommandType::NDRangeKernel => "ND-Range Kernel",
            CommandType::NativeKernel => "Native Kernel",
        }
    }
}

/// The non-error execution statuses, recoverable from the raw value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionStatus {
    Complete,
    Running,
    Submitted,
    Queued,
}

impl FromPrimitive for ExecutionStatus {
    fn from_i64(n: i64) -> Option<ExecutionStatus> {
        match n {
            0 => Some(ExecutionStatus::Complete),
            1 => Some(ExecutionStatus::Running),
            2 => Some(ExecutionStatus::Submitted),
            3 => Some(ExecutionStatus::Queued),
            _ => None,
        }
    }

    fn from_u64(n: u64) -> Option<ExecutionStatus> {
        ExecutionStatus::from_i64(n as i64)
    }
}

/// An event bound to one enqueued command.
///
/// Clones share the same underlying event. Waiting blocks the calling
/// thread on the event monitor until the command reaches `COMPLETE` or an
/// error status.
#[derive(Clone)]
pub struct Event(pub(crate) Arc<EventInner>);

pub(crate) struct EventInner {
    cmd_type: CommandType,
    queue: Arc<QueueInner>,
    monitor: Monitor<i32>,
    profile: ProfileTrace,
}

impl Event {
    pub(crate) fn new(queue: Arc<QueueInner>, cmd_type: CommandType, profiled: bool) -> Event {
        let enabled = profiled || profiler().forced_from_environment();

        Event(Arc::new(EventInner {
            cmd_type,
            queue,
            monitor: Monitor::new(status::QUEUED),
            profile: ProfileTrace::new(enabled),
        }))
    }

    /// The raw status value: 3..0 for the normal progression, negative for
    /// errors.
    pub fn raw_status(&self) -> i32 {
        *self.0.monitor.lock()
    }

    /// The current status, or the error it terminated with.
    pub fn status(&self) -> std::result::Result<ExecutionStatus, Status> {
        let raw = self.raw_status();
        match ExecutionStatus::from_i32(raw) {
            Some(st) => Ok(st),
            None => Err(Status::from_i32(raw).unwrap_or(Status::InvalidValue)),
        }
    }

    pub fn is_complete(&self) -> bool {
        let raw = self.raw_status();
        raw == status::COMPLETE || raw < 0
    }

    pub fn is_error(&self) -> bool {
        self.raw_status() < 0
    }

    pub fn command_type(&self) -> CommandType {
        self.0.cmd_type
    }

    pub fn queue(&self) -> Queue {
        Queue(Arc::clone(&self.0.queue))
    }

    pub fn context(&self) -> Context {
        self.0.queue.context().clone()
    }

    pub(crate) fn is_profiled(&self) -> bool {
        self.0.profile.is_enabled()
    }

    pub(crate) fn same_event(&self, other: &Event) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Blocks until the event reaches a terminal status; returns the raw
    /// terminal status.
    pub fn wait(&self) -> i32 {
        let mut st = self.0.monitor.lock();
        while *st != status::COMPLETE && *st >= 0 {
            st = self.0.monitor.wait(st);
        }
        *st
    }

    /// Publishes a status transition. Only strictly advancing transitions
    /// take effect; a delayed signal carrying an already-passed status is
    /// dropped.
    fn signal(&self, status_value: i32) {
        let mut st = self.0.monitor.lock();
        if status_value >= *st {
            return;
        }

        *st = status_value;

        if status_value == status::COMPLETE || status_value < 0 {
            self.0.monitor.notify_all();
        }
    }

    pub(crate) fn record_enqueued(&self, sample: Option<ProfileSample>) {
        self.0.profile.push(sample);
    }

    pub(crate) fn mark_submitted(&self, sample: Option<ProfileSample>) {
        self.0.profile.push(sample);
        self.signal(status::SUBMITTED);
    }

    pub(crate) fn mark_running(&self, sample: Option<ProfileSample>) {
        self.0.profile.push(sample);
        self.signal(status::RUNNING);
    }

    pub(crate) fn mark_sub_running(&self, sample: Option<ProfileSample>) {
        self.0.profile.push(sample);
    }

    pub(crate) fn mark_sub_completed(&self, sample: Option<ProfileSample>) {
        self.0.profile.push(sample);
    }

    pub(crate) fn mark_completed(&self, status_value: i32, sample: Option<ProfileSample>) {
        if status_value != status::COMPLETE && status_value >= 0 {
            self.context().report_diagnostic("invalid event status");
            return;
        }

        self.0.profile.push(sample);
        self.signal(status_value);

        self.0.queue.command_done(self);
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("command", &self.0.cmd_type)
            .field("status", &self.raw_status())
            .finish()
    }
}

impl Drop for EventInner {
    fn drop(&mut self) {
        profiler().dump_trace(self.cmd_type.name(), &self.profile);
    }
}

/// Waits on every listed event; fails if any of them terminated in error.
pub fn wait_for_events(events: &[Event]) -> Result<()> {
    if events.is_empty() {
        return err(Status::InvalidValue, "empty event list");
    }

    let mut failed = false;
    for ev in events {
        failed |= ev.wait() < 0;
    }

    if failed {
        return err(
            Status::ExecStatusErrorForEventsInWaitList,
            "an event in the list terminated with an error",
        );
    }

    Ok(())
}
