//! Type-safe Rust library for transient-electromagnetic instrument links.
//!
//! Temlink drives a TEM measurement instrument (or its simulator) over TCP:
//! it manages the connection state machine, speaks the newline-delimited JSON
//! wire protocol, decodes base64-wrapped big-endian waveform payloads, tracks
//! live-acquisition progress, and persists accepted samples through an
//! injected store. A symmetric playback engine replays persisted float32
//! waveforms with scrub/seek control.
//!
//! # Features
//!
//! - **Live acquisition**: connection lifecycle with connect timeout, framed
//!   JSON protocol, three-frame progress tracking
//! - **Best-effort streaming**: malformed frames and truncated payloads
//!   degrade to dropped/shortened data, observable through counters
//! - **Playback**: load, scrub, fixed-rate replay, CSV export
//! - **Channel-based notifications**: every distinct state kind fans out
//!   through broadcast/watch channels
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use temlink::{LinkConfig, LinkEvent, MemoryStore, Temlink};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(MemoryStore::new());
//!     let link = Temlink::link(LinkConfig::new("192.168.1.100", 8888), store);
//!
//!     let mut events = link.events();
//!     link.connect();
//!     link.start_acquisition();
//!
//!     while let Ok(event) = events.recv().await {
//!         if let LinkEvent::Progress(percent) = event {
//!             println!("acquisition at {percent}%");
//!         }
//!     }
//! }
//! ```

// Core types and error handling
mod config;
mod error;
mod event;
mod params;

// Protocol and data plumbing
pub mod codec;
pub mod downsample;
pub mod store;

// Engines
mod link;
mod playback;
mod session;

// Core exports
pub use config::LinkConfig;
pub use error::{LinkError, Result};
pub use event::{EventBus, EventLog, LOG_CAPACITY, LinkEvent, LogEntry, Telemetry, WaveformUpdate};
pub use params::{AcquisitionParams, ParamUpdate};

// Engine exports
pub use link::{ConnectionState, DeviceLink};
pub use playback::{LoadedPoint, PlaybackEngine, PlaybackEvent, PlaybackSnapshot, RenderedPrefix};
pub use session::{AcquisitionSession, AcquisitionSnapshot, AcquisitionState};

// Store exports
pub use store::{
    LineNode, MemoryStore, PersistedSample, PointNode, ProjectInfo, SampleMetadata, SampleStore,
    StoredSample,
};

// Downsampler exports
pub use downsample::{CHART_SERIES_POINTS, ChartPoint, LIVE_PREVIEW_POINTS};

/// Unified entry point for temlink engines.
///
/// # Examples
///
/// ## Live acquisition
/// ```rust,no_run
/// use std::sync::Arc;
/// use temlink::{LinkConfig, MemoryStore, Temlink};
///
/// # #[tokio::main]
/// # async fn main() {
/// let store = Arc::new(MemoryStore::new());
/// let link = Temlink::link(LinkConfig::default(), store);
/// link.connect();
/// # }
/// ```
///
/// ## Playback
/// ```rust,no_run
/// use std::sync::Arc;
/// use temlink::{MemoryStore, Temlink};
///
/// # #[tokio::main]
/// # async fn main() {
/// let store = Arc::new(MemoryStore::new());
/// let playback = Temlink::playback(store);
/// playback.load(4);
/// playback.play();
/// # }
/// ```
pub struct Temlink;

impl Temlink {
    /// Spawn a live acquisition link against an instrument endpoint.
    ///
    /// The link starts Disconnected; call [`DeviceLink::connect`] to dial.
    /// Accepted samples are persisted through the given store.
    pub fn link(config: LinkConfig, store: std::sync::Arc<dyn SampleStore>) -> DeviceLink {
        DeviceLink::spawn(config, store)
    }

    /// Spawn a playback engine over previously persisted samples.
    pub fn playback(store: std::sync::Arc<dyn SampleStore>) -> PlaybackEngine {
        PlaybackEngine::spawn(store)
    }
}
