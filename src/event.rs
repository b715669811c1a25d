//! Notification fan-out and the user-visible rolling log.
//!
//! Downstream consumers key off each notification kind independently, so the
//! kinds are distinct variants of one broadcast event rather than a single
//! "something changed" signal. Slow subscribers lag rather than block the
//! link task (broadcast semantics).

use std::collections::VecDeque;

use tokio::sync::broadcast;

use crate::link::ConnectionState;
use crate::session::AcquisitionState;
use crate::store::{LineNode, ProjectInfo};

/// Rolling-log capacity; the oldest entry is evicted beyond this.
pub const LOG_CAPACITY: usize = 50;

/// Notifications published by the acquisition link.
#[derive(Clone, Debug)]
pub enum LinkEvent {
    ConnectionState(ConnectionState),
    Acquisition(AcquisitionState),
    /// Target measurement point changed.
    Point(String),
    /// Acquisition progress, percent in `0..=100`.
    Progress(u8),
    Telemetry(Telemetry),
    Waveform(WaveformUpdate),
    Log(LogEntry),
    Project(ProjectInfo),
    ProjectTree(Vec<LineNode>),
}

/// Device monitor values.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Telemetry {
    /// Battery voltage, volts.
    pub battery_voltage: f64,
    /// Internal temperature, °C.
    pub internal_temp: f64,
    /// Derived link-quality figure (receiver rate scaled down).
    pub signal_strength: f64,
}

/// Downsampled waveform preview pushed on every accepted sample frame.
#[derive(Clone, Debug, PartialEq)]
pub struct WaveformUpdate {
    pub recv: Vec<f64>,
    pub send: Vec<f64>,
}

/// One line of the user-visible rolling log.
#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    /// Local wall-clock time, `HH:MM:SS.mmm`.
    pub timestamp: String,
    pub message: String,
    /// Warnings are distinguished by this flag, not by a log-level taxonomy.
    pub warning: bool,
}

/// Append-only, capped-length log, most-recent first.
#[derive(Debug, Default)]
pub struct EventLog {
    entries: VecDeque<LogEntry>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a timestamped line, evicting the oldest beyond capacity.
    pub fn append(&mut self, message: impl Into<String>, warning: bool) -> LogEntry {
        let entry = LogEntry {
            timestamp: chrono::Local::now().format("%H:%M:%S%.3f").to_string(),
            message: message.into(),
            warning,
        };
        self.entries.push_front(entry.clone());
        self.entries.truncate(LOG_CAPACITY);
        entry
    }

    /// Entries, most-recent first.
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Broadcast fan-out shared by an engine and its subscribers.
#[derive(Debug)]
pub struct EventBus<E> {
    tx: broadcast::Sender<E>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<E: Clone> EventBus<E> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    /// Publish an event. Send failures mean "no subscribers" and are fine.
    pub fn emit(&self, event: E) {
        let _ = self.tx.send(event);
    }
}
