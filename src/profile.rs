//! Command profiling: timestamped samples, per-command traces, trace dump.
//!
//! A trace collects one sample per lifecycle step of a command
//! (`CommandEnqueued`, `CommandSubmitted`, `CommandRunning`,
//! `CommandCompleted`), plus sub-id labelled rows for commands split into
//! per-work-group parts. Traces are dumped to stderr as a `profile:`
//! prefixed table when the owning event dies, either because the queue had
//! profiling enabled or because `CLRUN_PROFILED_COUNTERS` forces it.

use std::fmt::Write as _;
use std::io::Write as _;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::sys;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SampleLabel {
    CommandEnqueued,
    CommandSubmitted,
    CommandRunning,
    CommandCompleted,
}

impl SampleLabel {
    fn as_str(self) -> &'static str {
        match self {
            SampleLabel::CommandEnqueued => "CommandEnqueued",
            SampleLabel::CommandSubmitted => "CommandSubmitted",
            SampleLabel::CommandRunning => "CommandRunning",
            SampleLabel::CommandCompleted => "CommandCompleted",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProfileSample {
    label: SampleLabel,
    sub_id: Option<u32>,
    time: Duration,
}

impl ProfileSample {
    pub fn label(&self) -> SampleLabel {
        self.label
    }

    pub fn sub_id(&self) -> Option<u32> {
        self.sub_id
    }

    pub fn time(&self) -> Duration {
        self.time
    }

    fn format_label(&self) -> String {
        match self.sub_id {
            Some(id) => format!("{}-{}", self.label.as_str(), id),
            None => self.label.as_str().to_string(),
        }
    }
}

/// An ordered collection of samples belonging to one command.
///
/// Samples may arrive out of order (a delayed submit sample can race the
/// first running sample); insertion keeps the trace sorted by label, with
/// same-label samples in arrival order.
#[derive(Debug, Default)]
pub struct ProfileTrace {
    enabled: bool,
    samples: Mutex<Vec<ProfileSample>>,
}

impl ProfileTrace {
    pub fn new(enabled: bool) -> ProfileTrace {
        ProfileTrace {
            enabled,
            samples: Mutex::new(Vec::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn push(&self, sample: Option<ProfileSample>) {
        let sample = match sample {
            Some(s) if self.enabled => s,
            _ => return,
        };

        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        let at = samples
            .iter()
            .position(|s| s.label > sample.label)
            .unwrap_or(samples.len());
        samples.insert(at, sample);
    }

    pub fn snapshot(&self) -> Vec<ProfileSample> {
        self.samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

pub struct Profiler {
    epoch: Instant,
    forced: bool,
}

impl Profiler {
    fn new() -> Profiler {
        let raw = sys::env("CLRUN_PROFILED_COUNTERS").unwrap_or_default();
        let forced = raw.split(':').any(|c| c == "time");

        Profiler {
            epoch: Instant::now(),
            forced,
        }
    }

    /// True when the environment forces time profiling for every command.
    pub fn forced_from_environment(&self) -> bool {
        self.forced
    }

    /// Takes a sample, or `None` when neither the command nor the
    /// environment asks for profiling.
    pub fn sample(
        &self,
        profiled: bool,
        label: SampleLabel,
        sub_id: Option<u32>,
    ) -> Option<ProfileSample> {
        if !profiled && !self.forced {
            return None;
        }

        Some(ProfileSample {
            label,
            sub_id,
            time: self.epoch.elapsed(),
        })
    }

    /// Dumps a completed command's trace as a plain-text table.
    pub fn dump_trace(&self, command_name: &str, trace: &ProfileTrace) {
        if !self.forced && !trace.is_enabled() {
            return;
        }

        let samples = trace.snapshot();
        if samples.is_empty() {
            return;
        }

        let mut table = String::new();
        let _ = writeln!(table, "profile: {}", command_name);
        let _ = writeln!(
            table,
            "profile: {:<24} {:>16} {:>16}",
            "Label", "Time", "Delta"
        );

        let mut last = Duration::default();
        for sample in &samples {
            let now = sample.time();
            let _ = writeln!(
                table,
                "profile: {:<24} {:>14}us {:>14}us",
                sample.format_label(),
                now.as_micros(),
                now.saturating_sub(last).as_micros()
            );
            last = now;
        }

        let stderr = std::io::stderr();
        let mut out = stderr.lock();
        let _ = out.write_all(table.as_bytes());
    }
}

lazy_static::lazy_static! {
    static ref PROFILER: Profiler = Profiler::new();
}

pub fn profiler() -> &'static Profiler {
    &PROFILER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_orders_samples_by_label() {
        let trace = ProfileTrace::new(true);
        let mk = |label| {
            Some(ProfileSample {
                label,
                sub_id: None,
                time: Duration::default(),
            })
        };

        trace.push(mk(SampleLabel::CommandRunning));
        trace.push(mk(SampleLabel::CommandEnqueued));
        trace.push(mk(SampleLabel::CommandCompleted));
        trace.push(mk(SampleLabel::CommandSubmitted));

        let labels: Vec<_> = trace.snapshot().iter().map(|s| s.label()).collect();
        assert_eq!(
            labels,
            vec![
                SampleLabel::CommandEnqueued,
                SampleLabel::CommandSubmitted,
                SampleLabel::CommandRunning,
                SampleLabel::CommandCompleted,
            ]
        );
    }

    #[test]
    fn disabled_trace_drops_samples() {
        let trace = ProfileTrace::new(false);
        trace.push(Some(ProfileSample {
            label: SampleLabel::CommandEnqueued,
            sub_id: None,
            time: Duration::default(),
        }));
        assert!(trace.snapshot().is_empty());
    }

    #[test]
    fn sub_id_rows_carry_the_suffix() {
        let sample = ProfileSample {
            label: SampleLabel::CommandCompleted,
            sub_id: Some(3),
            time: Duration::default(),
        };
        assert_eq!(sample.format_label(), "CommandCompleted-3");
    }
}
