//! Live-acquisition state machine.
//!
//! [`AcquisitionSession`] is the synchronous core behind
//! [`DeviceLink`](crate::DeviceLink): it tracks the Idle/Acquiring state, counts accepted
//! sample frames into a progress percentage, mirrors device telemetry, and
//! prepares accepted data for persistence. It owns no I/O — operations that
//! must reach the instrument return the command frame to transmit, and the
//! link task does the sending. All command validation lives here, so
//! rejections are synchronous.

use tracing::debug;

use crate::codec::waveform::{base64_encode, encode_le_f32};
use crate::codec::{InboundMessage, SampleRecord};
use crate::downsample::{LIVE_PREVIEW_POINTS, downsample};
use crate::error::{LinkError, Result};
use crate::event::{EventBus, EventLog, LinkEvent, LogEntry, Telemetry, WaveformUpdate};
use crate::link::ConnectionState;
use crate::params::{AcquisitionParams, ParamUpdate};
use crate::store::{PersistedSample, SampleMetadata};

/// The instrument streams exactly three sample frames per acquisition.
const PROGRESS_PER_FRAME: u32 = 33;

/// Acquisition run state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Acquiring,
}

/// Point-in-time view of the session, mirrored through a watch channel.
#[derive(Clone, Debug, PartialEq)]
pub struct AcquisitionSnapshot {
    pub state: AcquisitionState,
    pub frame_count: u32,
    pub progress_percent: u8,
    pub target_point: String,
}

/// State machine for one live acquisition link.
pub struct AcquisitionSession {
    state: AcquisitionState,
    connection: ConnectionState,
    frame_count: u32,
    progress: u8,
    target_point: String,
    params: AcquisitionParams,
    latest: Option<SampleRecord>,
    telemetry: Telemetry,
    log: EventLog,
    events: EventBus<LinkEvent>,
}

impl AcquisitionSession {
    pub fn new(events: EventBus<LinkEvent>, target_point: impl Into<String>) -> Self {
        Self {
            state: AcquisitionState::Idle,
            connection: ConnectionState::Disconnected,
            frame_count: 0,
            progress: 0,
            target_point: target_point.into(),
            params: AcquisitionParams::default(),
            latest: None,
            telemetry: Telemetry { battery_voltage: 12.4, internal_temp: 35.0, signal_strength: 0.0 },
            log: EventLog::new(),
            events,
        }
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn progress_percent(&self) -> u8 {
        self.progress
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn target_point(&self) -> &str {
        &self.target_point
    }

    pub fn params(&self) -> &AcquisitionParams {
        &self.params
    }

    /// The most recently decoded sample frame, if any.
    pub fn latest_sample(&self) -> Option<&SampleRecord> {
        self.latest.as_ref()
    }

    pub fn telemetry(&self) -> Telemetry {
        self.telemetry
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn snapshot(&self) -> AcquisitionSnapshot {
        AcquisitionSnapshot {
            state: self.state,
            frame_count: self.frame_count,
            progress_percent: self.progress,
            target_point: self.target_point.clone(),
        }
    }

    /// Append a user-visible log line and publish it.
    pub fn note(&mut self, message: impl Into<String>, warning: bool) -> LogEntry {
        let entry = self.log.append(message, warning);
        self.events.emit(LinkEvent::Log(entry.clone()));
        entry
    }

    /// Mirror a transport state change. A session cannot outlive the
    /// connection: disconnecting while acquiring forces Idle.
    pub fn on_connection_state(&mut self, state: ConnectionState) {
        self.connection = state;
        if state == ConnectionState::Disconnected && self.state == AcquisitionState::Acquiring {
            self.state = AcquisitionState::Idle;
            self.events.emit(LinkEvent::Acquisition(self.state));
            self.note("Acquisition aborted: connection lost.", true);
        }
    }

    /// Begin an acquisition. Returns the `START_COLLECT` command frame to
    /// transmit.
    pub fn start(&mut self) -> Result<Vec<u8>> {
        if self.connection != ConnectionState::Connected {
            return Err(LinkError::rejected("start_acquisition", "device not connected"));
        }
        if self.state == AcquisitionState::Acquiring {
            return Err(LinkError::rejected("start_acquisition", "acquisition already in progress"));
        }

        self.state = AcquisitionState::Acquiring;
        self.frame_count = 0;
        self.progress = 0;
        self.latest = None;
        self.events.emit(LinkEvent::Acquisition(self.state));
        self.events.emit(LinkEvent::Progress(0));
        self.note(format!("Sent START_COLLECT for {}", self.target_point), false);
        Ok(b"START_COLLECT\n".to_vec())
    }

    /// Stop a running acquisition early, keeping accumulated progress.
    pub fn stop(&mut self) -> Result<()> {
        if self.state != AcquisitionState::Acquiring {
            return Err(LinkError::rejected("stop_acquisition", "no acquisition in progress"));
        }
        self.state = AcquisitionState::Idle;
        self.events.emit(LinkEvent::Acquisition(self.state));
        self.note("Acquisition stopped manually.", true);
        Ok(())
    }

    /// Feed one decoded inbound message into the session.
    pub fn on_message(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::Status(status) => {
                self.telemetry.battery_voltage = status.battery_voltage;
                self.telemetry.internal_temp = status.temperature;
                self.events.emit(LinkEvent::Telemetry(self.telemetry));
            }
            InboundMessage::Sample(sample) => self.on_sample(sample),
        }
    }

    fn on_sample(&mut self, sample: SampleRecord) {
        // Monitor fields ride on sample metadata: the receiver rate doubles
        // as a link-quality figure and becomes the current sample rate.
        self.telemetry.signal_strength = f64::from(sample.recv_rate_hz) / 10_000.0;
        self.params.sample_rate = sample.recv_rate_hz;
        self.events.emit(LinkEvent::Telemetry(self.telemetry));

        self.events.emit(LinkEvent::Waveform(WaveformUpdate {
            recv: downsample(&sample.recv, LIVE_PREVIEW_POINTS),
            send: downsample(&sample.send, LIVE_PREVIEW_POINTS),
        }));

        let payload_bytes = sample.recv_payload_bytes();
        self.latest = Some(sample);

        if self.state != AcquisitionState::Acquiring {
            debug!(payload_bytes, "sample frame outside acquisition, buffered only");
            return;
        }

        self.frame_count += 1;
        let raw = (self.frame_count * PROGRESS_PER_FRAME).min(100);
        self.note(format!("Received frame #{} ({payload_bytes} bytes)", self.frame_count), false);

        if raw >= 99 {
            self.progress = 100;
            self.events.emit(LinkEvent::Progress(self.progress));
            self.note("Acquisition complete", false);
            self.state = AcquisitionState::Idle;
            self.events.emit(LinkEvent::Acquisition(self.state));
        } else {
            self.progress = raw as u8;
            self.events.emit(LinkEvent::Progress(self.progress));
        }
    }

    /// Apply one parameter change. Returns the `SET_PARAMS` frame to
    /// transmit when the value changed while connected; changes made while
    /// disconnected are recorded locally and not retransmitted later.
    pub fn apply_param(&mut self, update: ParamUpdate) -> Option<Vec<u8>> {
        if !self.params.apply(update) {
            return None;
        }
        (self.connection == ConnectionState::Connected).then(|| self.params.to_command())
    }

    /// Apply several parameter changes with at most one sync frame.
    pub fn apply_params(
        &mut self,
        updates: impl IntoIterator<Item = ParamUpdate>,
    ) -> Option<Vec<u8>> {
        let mut changed = false;
        for update in updates {
            changed |= self.params.apply(update);
        }
        (changed && self.connection == ConnectionState::Connected).then(|| self.params.to_command())
    }

    pub fn set_target_point(&mut self, point: impl Into<String>) {
        let point = point.into();
        if point != self.target_point {
            self.target_point = point;
            self.events.emit(LinkEvent::Point(self.target_point.clone()));
        }
    }

    /// Abandon the current point and advance to the next one by name.
    pub fn skip_point(&mut self) {
        if self.state == AcquisitionState::Acquiring {
            let _ = self.stop();
        }
        match next_point_name(&self.target_point) {
            Some(next) => {
                self.note(format!("Skipped to next measurement point: {next}"), false);
                self.set_target_point(next);
            }
            None => {
                self.note(
                    format!("Cannot derive a next point from '{}'.", self.target_point),
                    true,
                );
            }
        }
    }

    /// Downcast the latest sample to `f32`, base64-encode it, and attach the
    /// current parameter metadata for persistence.
    pub fn prepare_save(&self, qualified: bool, remark: &str) -> Result<PersistedSample> {
        let latest = self
            .latest
            .as_ref()
            .filter(|sample| !sample.recv.is_empty())
            .ok_or_else(|| LinkError::rejected("save_sample", "no sample data buffered"))?;

        Ok(PersistedSample {
            point_id: latest.point_id,
            metadata: SampleMetadata {
                qualified,
                remark: remark.to_string(),
                send_current: self.params.send_current,
                sample_rate: self.params.sample_rate,
                stack_count: self.params.stack_count,
            },
            recv_b64: narrow_channel(&latest.recv),
            send_b64: narrow_channel(&latest.send),
            off_b64: narrow_channel(&latest.off),
            recv_rate_hz: latest.recv_rate_hz,
            send_rate_hz: latest.send_rate_hz,
        })
    }
}

fn narrow_channel(values: &[f64]) -> String {
    let narrowed: Vec<f32> = values.iter().map(|&v| v as f32).collect();
    base64_encode(&encode_le_f32(&narrowed))
}

/// `P004` → `P005`: increment the trailing integer, preserving zero padding.
fn next_point_name(name: &str) -> Option<String> {
    let trailing_digits = name.bytes().rev().take_while(u8::is_ascii_digit).count();
    let digits_start = name.len() - trailing_digits;
    let digits = &name[digits_start..];
    let value: u64 = digits.parse().ok()?;
    Some(format!("{}{:0width$}", &name[..digits_start], value + 1, width = digits.len()))
}
