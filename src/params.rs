//! Acquisition parameters and their wire encoding.
//!
//! The full parameter set is pushed to the instrument as one compact JSON
//! object (`SET_PARAMS:<json>`) whenever any field changes while the link is
//! connected. Changes made while disconnected are recorded locally only;
//! there is no queued resend on reconnect.

use serde::{Deserialize, Serialize};

/// The instrument's acquisition parameter set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionParams {
    /// Transmitter drive current, amperes.
    pub send_current: f64,
    /// Receiver sample rate, Hz.
    pub sample_rate: u32,
    /// Number of stacked repetitions per measurement.
    pub stack_count: u32,
    /// Per-sample record length.
    pub sample_time: u32,
    /// Free-form device-specific parameter text.
    pub custom: String,
}

impl Default for AcquisitionParams {
    fn default() -> Self {
        Self {
            send_current: 10.0,
            sample_rate: 51_200,
            stack_count: 16,
            sample_time: 2048,
            custom: String::new(),
        }
    }
}

impl AcquisitionParams {
    /// Encode the full parameter set as a `SET_PARAMS:<json>` command frame.
    pub fn to_command(&self) -> Vec<u8> {
        let json = serde_json::to_string(self).expect("parameter set serializes infallibly");
        format!("SET_PARAMS:{json}\n").into_bytes()
    }

    /// Apply a single-field update. Returns `true` if the value changed.
    pub fn apply(&mut self, update: ParamUpdate) -> bool {
        match update {
            ParamUpdate::SendCurrent(value) => replace(&mut self.send_current, value),
            ParamUpdate::SampleRate(value) => replace(&mut self.sample_rate, value),
            ParamUpdate::StackCount(value) => replace(&mut self.stack_count, value),
            ParamUpdate::SampleTime(value) => replace(&mut self.sample_time, value),
            ParamUpdate::Custom(value) => replace(&mut self.custom, value),
        }
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

/// A single-field parameter change.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamUpdate {
    SendCurrent(f64),
    SampleRate(u32),
    StackCount(u32),
    SampleTime(u32),
    Custom(String),
}
