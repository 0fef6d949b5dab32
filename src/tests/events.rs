//! Event status machine and waiting.

use super::fixtures::{SRC_COPY_VAL, SRC_RECURSE};
use super::{built_kernel, harness};
use crate::error::Status;
use crate::standard::{status, wait_for_events, CommandType, ExecutionStatus};
use crate::util;

fn completed_event(h: &super::Harness) -> crate::Event {
    let buf = h.ctx.buffer_builder(4).build().unwrap();
    let data = [1u32];
    let ev = h
        .queue
        .write_buffer(&buf, util::slice_bytes(&data))
        .block(true)
        .enq()
        .unwrap();
    ev
}

fn errored_event(h: &super::Harness) -> crate::Event {
    let out = h.ctx.buffer_builder(4).build().unwrap();
    let kernel = built_kernel(h, SRC_RECURSE, "spiral");
    kernel.set_arg_buffer(0, Some(&out)).unwrap();

    let ev = h.queue.kernel(&kernel).global_work_size(1).enq().unwrap();
    ev.wait();
    ev
}

#[test]
fn events_progress_to_complete() {
    let h = harness();
    let ev = completed_event(&h);

    assert_eq!(ev.raw_status(), status::COMPLETE);
    assert_eq!(ev.status().unwrap(), ExecutionStatus::Complete);
    assert!(ev.is_complete());
    assert!(!ev.is_error());
    assert_eq!(ev.command_type(), CommandType::WriteBuffer);
}

/// A delayed signal carrying an already-passed status must not move the
/// event backwards.
#[test]
fn late_signals_are_dropped() {
    let h = harness();
    let ev = completed_event(&h);

    ev.mark_submitted(None);
    ev.mark_running(None);

    assert_eq!(ev.raw_status(), status::COMPLETE);
}

#[test]
fn waiting_returns_the_terminal_status() {
    let h = harness();

    let ev = completed_event(&h);
    assert_eq!(ev.wait(), status::COMPLETE);
    // Waiting again on a terminal event returns immediately.
    assert_eq!(ev.wait(), status::COMPLETE);
}

/// A kernel whose call graph is rejected surfaces a negative terminal
/// status on its event.
#[test]
fn failed_commands_end_in_an_error_status() {
    let h = harness();
    let ev = errored_event(&h);

    assert!(ev.is_error());
    assert!(ev.raw_status() < 0);
    assert_eq!(ev.status().unwrap_err(), Status::BuildProgramFailure);
}

#[test]
fn wait_for_events_succeeds_on_clean_lists() {
    let h = harness();
    let evs = vec![completed_event(&h), completed_event(&h)];

    wait_for_events(&evs).unwrap();
}

#[test]
fn wait_for_events_reports_errored_members() {
    let h = harness();
    let evs = vec![completed_event(&h), errored_event(&h)];

    let e = wait_for_events(&evs).unwrap_err();
    assert_eq!(
        e.api_status(),
        Status::ExecStatusErrorForEventsInWaitList
    );
}

#[test]
fn wait_for_events_rejects_an_empty_list() {
    let e = wait_for_events(&[]).unwrap_err();
    assert_eq!(e.api_status(), Status::InvalidValue);
}

/// A blocking command refuses a wait list containing an errored event.
#[test]
fn blocking_on_an_inconsistent_wait_list_fails() {
    let h = harness();
    let bad = errored_event(&h);

    let out = h.ctx.buffer_builder(4).build().unwrap();
    let kernel = built_kernel(&h, SRC_COPY_VAL, "copy");
    kernel.set_arg_buffer(0, Some(&out)).unwrap();
    kernel.set_arg_scalar(1, 3u32).unwrap();

    let mut dst = [0u32];
    let e = h
        .queue
        .read_buffer(&out, util::slice_bytes_mut(&mut dst))
        .ewait(&[bad])
        .enq()
        .unwrap_err();

    assert_eq!(
        e.api_status(),
        Status::ExecStatusErrorForEventsInWaitList
    );
}

#[test]
fn events_know_their_queue_and_context() {
    let h = harness();
    let ev = completed_event(&h);

    assert!(ev.context().same_context(&h.ctx));
    assert!(ev.queue().context().same_context(h.queue.context()));
}
