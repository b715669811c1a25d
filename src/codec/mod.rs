//! Wire protocol codec: newline framing, JSON message classification, and the
//! binary waveform encodings.
//!
//! The pipeline is bytes → [`FrameSplitter`] → [`MessageDecoder`] →
//! [`InboundMessage`]. Both stages are pure with respect to I/O and are
//! driven by the link task; they are public because tests and tooling build
//! wire frames with the same primitives.

mod framing;
mod message;
pub mod waveform;

pub use framing::{FrameSplitter, FramingStats};
pub use message::{DecodeStats, InboundMessage, MessageDecoder, SampleRecord, StatusUpdate};
