//! Live acquisition link: the connection state machine, the link task, and
//! the [`DeviceLink`] handle.
//!
//! ## Architecture
//!
//! A single spawned task owns the socket, the frame buffer, the decoder, and
//! the acquisition session; user commands travel to it over an mpsc channel
//! and are fire-and-forget. State flows back out three ways, and consumers
//! key off each kind independently:
//!
//! - `watch` channels mirror hot state (connection state, acquisition
//!   snapshot, latest decoded sample),
//! - a `broadcast` channel fans out every distinct notification kind
//!   ([`LinkEvent`](crate::LinkEvent)),
//! - the rolling user-visible log rides on the event channel as
//!   [`LinkEvent::Log`](crate::LinkEvent::Log) entries.

mod driver;
mod transport;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use self::transport::ConnectionState;

use crate::codec::SampleRecord;
use crate::config::LinkConfig;
use crate::downsample::{CHART_SERIES_POINTS, ChartPoint, series_points};
use crate::event::{EventBus, LinkEvent};
use crate::params::ParamUpdate;
use crate::session::AcquisitionSnapshot;
use crate::store::SampleStore;
use self::driver::{Command, LinkDriver};

/// Handle to a live acquisition link.
///
/// Commands are fire-and-forget: they enqueue onto the link task and take
/// effect in order. Rejections (start while disconnected, save without data)
/// surface as warning [`LinkEvent::Log`] entries; the state machines
/// themselves always fall back to a safe idle state.
///
/// Dropping the handle cancels the link task and closes the socket.
pub struct DeviceLink {
    commands: mpsc::UnboundedSender<Command>,
    connection: watch::Receiver<ConnectionState>,
    acquisition: watch::Receiver<AcquisitionSnapshot>,
    latest_sample: watch::Receiver<Option<Arc<SampleRecord>>>,
    events: EventBus<LinkEvent>,
    cancel: CancellationToken,
}

impl DeviceLink {
    /// Spawn the link task against the given endpoint and sample store.
    ///
    /// The link starts Disconnected; call [`connect`](Self::connect) to dial.
    pub fn spawn(config: LinkConfig, store: Arc<dyn SampleStore>) -> Self {
        let channels = LinkDriver::spawn(config, store);
        Self {
            commands: channels.commands,
            connection: channels.connection,
            acquisition: channels.acquisition,
            latest_sample: channels.latest_sample,
            events: channels.events,
            cancel: channels.cancel,
        }
    }

    /// Dial the configured endpoint. Rejected (with a warning log event) if a
    /// connect attempt is already in flight or the link is connected.
    pub fn connect(&self) {
        self.send(Command::Connect);
    }

    /// Close the connection gracefully; a no-op when already disconnected.
    /// Cancels an in-flight connect attempt.
    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    /// Start an acquisition at the current target point.
    pub fn start_acquisition(&self) {
        self.send(Command::StartAcquisition);
    }

    /// Stop a running acquisition early, keeping accumulated progress.
    pub fn stop_acquisition(&self) {
        self.send(Command::StopAcquisition);
    }

    /// Change one acquisition parameter. The full parameter set is synced to
    /// the device when connected; offline changes are recorded locally only.
    pub fn set_param(&self, update: ParamUpdate) {
        self.send(Command::SetParam(update));
    }

    /// Select the measurement point subsequent acquisitions belong to.
    pub fn set_target_point(&self, point: impl Into<String>) {
        self.send(Command::SetTargetPoint(point.into()));
    }

    /// Abandon the current point and advance to the next one by name.
    pub fn skip_point(&self) {
        self.send(Command::SkipPoint);
    }

    /// Re-apply the parameters recorded with another point's latest sample.
    pub fn copy_point_params(&self, point_id: i64) {
        self.send(Command::CopyPointParams { point_id });
    }

    /// Persist the latest accepted sample with operator metadata.
    pub fn save_sample(&self, qualified: bool, remark: impl Into<String>) {
        self.send(Command::SaveSample { qualified, remark: remark.into() });
    }

    /// Re-query the store's line → point tree and publish it.
    pub fn refresh_project_tree(&self) {
        self.send(Command::RefreshProjectTree);
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Current acquisition snapshot.
    pub fn acquisition(&self) -> AcquisitionSnapshot {
        self.acquisition.borrow().clone()
    }

    /// The most recently decoded sample frame, if any.
    pub fn latest_sample(&self) -> Option<Arc<SampleRecord>> {
        self.latest_sample.borrow().clone()
    }

    /// Subscribe to the notification fan-out.
    pub fn events(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// Notification fan-out as a `Stream`. Slow consumers skip over missed
    /// events rather than blocking the link.
    pub fn event_stream(&self) -> impl Stream<Item = LinkEvent> + 'static {
        BroadcastStream::new(self.events.subscribe()).filter_map(|item| async move { item.ok() })
    }

    /// Connection state changes as a `Stream`, current state first.
    pub fn state_updates(&self) -> impl Stream<Item = ConnectionState> + 'static {
        WatchStream::new(self.connection.clone())
    }

    /// Acquisition snapshot changes as a `Stream`, current snapshot first.
    pub fn acquisition_updates(&self) -> impl Stream<Item = AcquisitionSnapshot> + 'static {
        WatchStream::new(self.acquisition.clone())
    }

    /// Chart series for the latest sample's receiver channel.
    pub fn recv_series(&self) -> Vec<ChartPoint> {
        match self.latest_sample.borrow().as_ref() {
            Some(sample) => series_points(&sample.recv, sample.recv_rate_hz, CHART_SERIES_POINTS),
            None => Vec::new(),
        }
    }

    /// Chart series for the latest sample's transmitter channel.
    pub fn send_series(&self) -> Vec<ChartPoint> {
        match self.latest_sample.borrow().as_ref() {
            Some(sample) => series_points(&sample.send, sample.send_rate_hz, CHART_SERIES_POINTS),
            None => Vec::new(),
        }
    }

    /// Chart series for the latest sample's switch-off channel.
    pub fn off_series(&self) -> Vec<ChartPoint> {
        match self.latest_sample.borrow().as_ref() {
            Some(sample) => series_points(&sample.off, sample.off_rate_hz, CHART_SERIES_POINTS),
            None => Vec::new(),
        }
    }

    fn send(&self, command: Command) {
        // a closed channel means the task is gone; commands become no-ops
        let _ = self.commands.send(command);
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        debug!("dropping device link");
        self.cancel.cancel();
    }
}
