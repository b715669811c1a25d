//! The link task: one select loop that owns every piece of mutable state.
//!
//! Socket notifications, timer ticks, and user commands are serialized here,
//! so the frame buffer and the acquisition session never see concurrent
//! mutation. Nothing in the loop blocks: sends are fire-and-forget, and
//! decoding one frame is a single unit of work.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{Interval, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::transport::{Transport, TransportEvent};
use crate::codec::{FrameSplitter, InboundMessage, MessageDecoder, SampleRecord};
use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::event::{EventBus, LinkEvent};
use crate::link::ConnectionState;
use crate::params::ParamUpdate;
use crate::session::{AcquisitionSession, AcquisitionSnapshot};
use crate::store::SampleStore;

const GET_STATUS: &[u8] = b"GET_STATUS\n";

/// User-issued commands, applied on the link task.
#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Disconnect,
    StartAcquisition,
    StopAcquisition,
    SetParam(ParamUpdate),
    SetTargetPoint(String),
    SkipPoint,
    CopyPointParams { point_id: i64 },
    SaveSample { qualified: bool, remark: String },
    RefreshProjectTree,
}

/// Result of spawning the link task.
pub(crate) struct LinkChannels {
    pub commands: mpsc::UnboundedSender<Command>,
    pub connection: watch::Receiver<ConnectionState>,
    pub acquisition: watch::Receiver<AcquisitionSnapshot>,
    pub latest_sample: watch::Receiver<Option<Arc<SampleRecord>>>,
    pub events: EventBus<LinkEvent>,
    pub cancel: CancellationToken,
}

enum Step {
    Cancelled,
    Command(Option<Command>),
    Transport(TransportEvent),
    StatusPoll,
}

pub(crate) struct LinkDriver {
    config: LinkConfig,
    store: Arc<dyn SampleStore>,
    transport: Transport,
    splitter: FrameSplitter,
    decoder: MessageDecoder,
    session: AcquisitionSession,
    commands: mpsc::UnboundedReceiver<Command>,
    acquisition_tx: watch::Sender<AcquisitionSnapshot>,
    latest_tx: watch::Sender<Option<Arc<SampleRecord>>>,
    events: EventBus<LinkEvent>,
    status_poll: Interval,
    cancel: CancellationToken,
}

impl LinkDriver {
    /// Spawn the link task for the given endpoint and store.
    pub fn spawn(config: LinkConfig, store: Arc<dyn SampleStore>) -> LinkChannels {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let events = EventBus::new(256);
        let (transport, connection_rx) = Transport::new();
        let session = AcquisitionSession::new(events.clone(), "P001");
        let (acquisition_tx, acquisition_rx) = watch::channel(session.snapshot());
        let (latest_tx, latest_rx) = watch::channel(None);
        let cancel = CancellationToken::new();

        let mut status_poll = interval(config.status_poll_interval);
        status_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let driver = LinkDriver {
            config,
            store,
            transport,
            splitter: FrameSplitter::new(),
            decoder: MessageDecoder::new(),
            session,
            commands: command_rx,
            acquisition_tx,
            latest_tx,
            events: events.clone(),
            status_poll,
            cancel: cancel.clone(),
        };
        tokio::spawn(driver.run());

        LinkChannels {
            commands: command_tx,
            connection: connection_rx,
            acquisition: acquisition_rx,
            latest_sample: latest_rx,
            events,
            cancel,
        }
    }

    async fn run(mut self) {
        info!(host = %self.config.host, port = self.config.port, "link task started");

        // announce the injected project to subscribers
        self.events.emit(LinkEvent::Project(self.store.project()));
        self.refresh_project_tree().await;

        loop {
            let step = {
                let transport = &mut self.transport;
                let commands = &mut self.commands;
                let status_poll = &mut self.status_poll;
                let cancel = &self.cancel;
                tokio::select! {
                    _ = cancel.cancelled() => Step::Cancelled,
                    command = commands.recv() => Step::Command(command),
                    event = transport.next_event() => Step::Transport(event),
                    _ = status_poll.tick() => Step::StatusPoll,
                }
            };

            match step {
                Step::Cancelled => break,
                Step::Command(None) => {
                    debug!("all link handles dropped, shutting down");
                    break;
                }
                Step::Command(Some(command)) => self.handle_command(command).await,
                Step::Transport(event) => self.handle_transport(event).await,
                Step::StatusPoll => {
                    // the poll always ticks; it only speaks when connected
                    if self.transport.state() == ConnectionState::Connected {
                        self.send_frame(GET_STATUS).await;
                    }
                }
            }
            self.publish_snapshot();
        }

        info!("link task stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => {
                let result = self.transport.begin_connect(
                    &self.config.host,
                    self.config.port,
                    self.config.connect_timeout,
                );
                match result {
                    Ok(()) => self.sync_connection(),
                    Err(err) => self.reject(err),
                }
            }
            Command::Disconnect => {
                self.transport.disconnect();
                self.splitter.clear();
                self.sync_connection();
            }
            Command::StartAcquisition => match self.session.start() {
                Ok(frame) => {
                    // a fresh acquisition starts from a clean frame boundary
                    self.splitter.clear();
                    self.send_frame(&frame).await;
                }
                Err(err) => self.reject(err),
            },
            Command::StopAcquisition => {
                if let Err(err) = self.session.stop() {
                    self.reject(err);
                }
            }
            Command::SetParam(update) => {
                if let Some(frame) = self.session.apply_param(update) {
                    self.send_frame(&frame).await;
                }
            }
            Command::SetTargetPoint(point) => self.session.set_target_point(point),
            Command::SkipPoint => self.session.skip_point(),
            Command::CopyPointParams { point_id } => self.copy_point_params(point_id).await,
            Command::SaveSample { qualified, remark } => {
                self.save_sample(qualified, &remark).await;
            }
            Command::RefreshProjectTree => self.refresh_project_tree().await,
        }
    }

    async fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                self.sync_connection();
                // probe telemetry right away rather than waiting out the poll
                self.send_frame(GET_STATUS).await;
            }
            TransportEvent::ConnectFailed(err) => {
                warn!(%err, "connect attempt failed");
                self.session.note(format!("Connection failed: {err}"), true);
                self.sync_connection();
            }
            TransportEvent::Data(chunk) => {
                for frame in self.splitter.push(&chunk) {
                    if let Some(message) = self.decoder.decode(&frame) {
                        if let InboundMessage::Sample(sample) = &message {
                            let _ = self.latest_tx.send(Some(Arc::new(sample.clone())));
                        }
                        self.session.on_message(message);
                    }
                }
            }
            TransportEvent::Closed { error } => {
                if let Some(err) = error {
                    warn!(%err, "socket closed with error");
                    self.session.note(format!("Socket error: {err}"), true);
                }
                self.splitter.clear();
                self.sync_connection();
            }
        }
    }

    /// Mirror the transport state into the session and the event fan-out.
    fn sync_connection(&mut self) {
        let state = self.transport.state();
        if self.session.connection() == state {
            return;
        }
        self.session.on_connection_state(state);
        self.events.emit(LinkEvent::ConnectionState(state));
        match state {
            ConnectionState::Connected => {
                let line = format!("Connected to {}:{}", self.config.host, self.config.port);
                self.session.note(line, false);
            }
            ConnectionState::Disconnected => {
                self.session.note("Disconnected from device.", true);
            }
            ConnectionState::Connecting => {}
        }
    }

    async fn send_frame(&mut self, bytes: &[u8]) {
        if let Err(err) = self.transport.send(bytes).await {
            warn!(%err, "outbound frame failed");
            self.session.note(format!("Send failed: {err}"), true);
        }
    }

    async fn save_sample(&mut self, qualified: bool, remark: &str) {
        let prepared = match self.session.prepare_save(qualified, remark) {
            Ok(prepared) => prepared,
            Err(err) => return self.reject(err),
        };
        let point = self.session.target_point().to_string();
        match self.store.save_sample(prepared).await {
            Ok(record_id) => {
                debug!(record_id, "sample persisted");
                let qualified = if qualified { "yes" } else { "no" };
                self.session.note(format!("Saved data for {point} (qualified: {qualified})"), false);
            }
            Err(err) => {
                self.session.note(format!("Failed to save data: {err}"), true);
            }
        }
    }

    async fn copy_point_params(&mut self, point_id: i64) {
        match self.store.latest_sample(point_id).await {
            Ok(Some(row)) => {
                let updates = [
                    ParamUpdate::SendCurrent(row.metadata.send_current),
                    ParamUpdate::SampleRate(row.metadata.sample_rate),
                    ParamUpdate::StackCount(row.metadata.stack_count),
                ];
                if let Some(frame) = self.session.apply_params(updates) {
                    self.send_frame(&frame).await;
                }
                self.session.note(format!("Parameters copied from point {point_id}."), false);
            }
            Ok(None) => {
                let line = format!("No saved sample for point {point_id}; nothing to copy.");
                self.session.note(line, true);
            }
            Err(err) => {
                self.session.note(format!("Failed to read point {point_id}: {err}"), true);
            }
        }
    }

    async fn refresh_project_tree(&mut self) {
        match self.store.project_tree().await {
            Ok(tree) => self.events.emit(LinkEvent::ProjectTree(tree)),
            Err(err) => warn!(%err, "project tree query failed"),
        }
    }

    fn reject(&mut self, err: LinkError) {
        warn!(%err, "command rejected");
        self.session.note(err.to_string(), true);
    }

    fn publish_snapshot(&mut self) {
        let snapshot = self.session.snapshot();
        self.acquisition_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}
