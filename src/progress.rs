//! Per-attempt phase timings.
//!
//! [`ProgressTimer`] is a small state machine driven by [`LifecycleEvent`]s.
//! Each phase records the milliseconds elapsed since the attempt started.
//! Recorded values never decrease along the phase order, and phases the
//! transport never reported inherit the previous phase's value when the
//! attempt ends, so a finished [`Progress`] always satisfies
//! `name_lookup <= connect <= pre_transfer <= start_transfer <= total`.

use crate::LifecycleEvent;
use serde::Serialize;
use std::time::Instant;

/// Phase timings of one attempt, in milliseconds since the attempt started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    /// Host name resolved.
    #[serde(rename = "namelookup_time")]
    pub name_lookup: u64,
    /// Connection established.
    #[serde(rename = "connect_time")]
    pub connect: u64,
    /// Request fully written.
    #[serde(rename = "pretransfer_time")]
    pub pre_transfer: u64,
    /// First response byte received.
    #[serde(rename = "starttransfer_time")]
    pub start_transfer: u64,
    /// Attempt finished.
    #[serde(rename = "total_time")]
    pub total: u64,
}

impl Progress {
    /// Returns `true` if the phase order invariant holds.
    pub fn is_monotonic(&self) -> bool {
        self.name_lookup <= self.connect
            && self.connect <= self.pre_transfer
            && self.pre_transfer <= self.start_transfer
            && self.start_transfer <= self.total
    }

    fn slots(&mut self) -> [&mut u64; 5] {
        [
            &mut self.name_lookup,
            &mut self.connect,
            &mut self.pre_transfer,
            &mut self.start_transfer,
            &mut self.total,
        ]
    }
}

/// A measurable phase, in invariant order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    NameLookup,
    Connect,
    PreTransfer,
    StartTransfer,
    Total,
}

impl Phase {
    fn index(self) -> usize {
        self as usize
    }

    fn for_event(event: LifecycleEvent) -> Option<Phase> {
        match event {
            LifecycleEvent::DnsResolved => Some(Phase::NameLookup),
            LifecycleEvent::ConnectionOpened => Some(Phase::Connect),
            LifecycleEvent::HeadersWritten | LifecycleEvent::BodyWritten => Some(Phase::PreTransfer),
            LifecycleEvent::HeadersReceived => Some(Phase::StartTransfer),
            LifecycleEvent::Completed | LifecycleEvent::Failed => Some(Phase::Total),
            LifecycleEvent::Started => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    Running,
    Finished,
}

/// Records elapsed time at each lifecycle event of a single attempt.
#[derive(Debug, Clone)]
pub struct ProgressTimer {
    started_at: Instant,
    progress: Progress,
    state: TimerState,
}

impl ProgressTimer {
    /// Creates a running timer whose clock starts now.
    ///
    /// A later [`LifecycleEvent::Started`] restarts the clock.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            progress: Progress::default(),
            state: TimerState::Running,
        }
    }

    /// Applies one lifecycle event.
    ///
    /// Events after a terminal event are ignored until [`reset`](Self::reset).
    pub fn on_event(&mut self, event: LifecycleEvent) {
        if self.state == TimerState::Finished {
            tracing::debug!(?event, "Ignoring event after attempt finished");
            return;
        }
        if event == LifecycleEvent::Started {
            self.started_at = Instant::now();
            self.progress = Progress::default();
            return;
        }
        let Some(phase) = Phase::for_event(event) else {
            return;
        };
        let elapsed = u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.record(phase, elapsed);
        if event.is_terminal() {
            self.carry_forward();
            self.state = TimerState::Finished;
        }
    }

    /// Current timings.
    pub fn progress(&self) -> Progress {
        self.progress
    }

    /// Returns `true` once a terminal event was applied.
    pub fn is_finished(&self) -> bool {
        self.state == TimerState::Finished
    }

    /// Clears all timings and restarts the clock.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn record(&mut self, phase: Phase, elapsed: u64) {
        let mut slots = self.progress.slots();
        let floor = slots[..phase.index()]
            .iter()
            .map(|slot| **slot)
            .max()
            .unwrap_or(0);
        *slots[phase.index()] = elapsed.max(floor);
    }

    fn carry_forward(&mut self) {
        let mut previous = 0;
        for slot in self.progress.slots() {
            *slot = (*slot).max(previous);
            previous = *slot;
        }
    }
}

impl Default for ProgressTimer {
    fn default() -> Self {
        Self::new()
    }
}
