//! Playback of persisted waveforms.
//!
//! The playback engine replays a point's saved float32 channels independently
//! of the live path, sharing only the downsampler. A scrub position in
//! `[0, 1]` selects the visible prefix of each channel; "playing" advances
//! that position on a fixed-rate tick until it reaches the end and stops
//! itself.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use std::io::Write as _;

use futures::{Stream, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::waveform::{base64_decode, decode_le_f32};
use crate::downsample::{CHART_SERIES_POINTS, ChartPoint, LIVE_PREVIEW_POINTS, downsample, series_points};
use crate::error::{LinkError, Result};
use crate::event::{EventBus, EventLog, LogEntry, WaveformUpdate};
use crate::store::{SampleStore, StoredSample};

/// Scrub advance per tick while playing.
const TICK_INCREMENT: f64 = 0.02;

/// Tick period while playing.
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Stored rates of zero fall back to this (legacy rows).
const FALLBACK_SAMPLE_RATE: u32 = 51_200;

/// Notifications published by the playback engine.
#[derive(Clone, Debug)]
pub enum PlaybackEvent {
    LoadedPoint(LoadedPoint),
    /// Playing state changed.
    Playing(bool),
    /// Scrub position in `[0, 1]`.
    Progress(f64),
    /// Downsampled preview of the visible prefix.
    Waveform(WaveformUpdate),
    Log(LogEntry),
}

/// Summary of the point currently loaded for playback.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadedPoint {
    pub point_id: i64,
    pub name: String,
    pub recv_samples: usize,
    pub sample_rate_hz: u32,
}

/// Point-in-time view of the engine, mirrored through a watch channel.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackSnapshot {
    pub loaded: Option<LoadedPoint>,
    pub playing: bool,
    pub progress: f64,
}

/// Visible channel prefixes at the current scrub position.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderedPrefix {
    pub recv: Vec<f32>,
    pub send: Vec<f32>,
    pub off: Vec<f32>,
    pub sample_rate_hz: u32,
}

/// Synchronous playback state machine behind [`PlaybackEngine`].
struct PlaybackState {
    full_recv: Vec<f32>,
    full_send: Vec<f32>,
    full_off: Vec<f32>,
    progress: f64,
    playing: bool,
    sample_rate_hz: u32,
    loaded: Option<LoadedPoint>,
    log: EventLog,
    events: EventBus<PlaybackEvent>,
    render_tx: watch::Sender<Arc<RenderedPrefix>>,
}

impl PlaybackState {
    fn new(events: EventBus<PlaybackEvent>, render_tx: watch::Sender<Arc<RenderedPrefix>>) -> Self {
        Self {
            full_recv: Vec::new(),
            full_send: Vec::new(),
            full_off: Vec::new(),
            progress: 0.0,
            playing: false,
            sample_rate_hz: 1,
            loaded: None,
            log: EventLog::new(),
            events,
            render_tx,
        }
    }

    fn note(&mut self, message: impl Into<String>, warning: bool) {
        let entry = self.log.append(message, warning);
        self.events.emit(PlaybackEvent::Log(entry));
    }

    fn has_data(&self) -> bool {
        !self.full_recv.is_empty()
    }

    fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot { loaded: self.loaded.clone(), playing: self.playing, progress: self.progress }
    }

    /// Replace the loaded channels from a stored row and rewind to zero.
    fn load_row(&mut self, name: String, row: &StoredSample) {
        self.full_recv = decode_blob(&row.recv_b64);
        self.full_send = decode_blob(&row.send_b64);
        self.full_off = decode_blob(&row.off_b64);

        let rate = row.metadata.sample_rate;
        self.sample_rate_hz = if rate == 0 { FALLBACK_SAMPLE_RATE } else { rate };

        let loaded = LoadedPoint {
            point_id: row.point_id,
            name,
            recv_samples: self.full_recv.len(),
            sample_rate_hz: self.sample_rate_hz,
        };
        self.loaded = Some(loaded.clone());
        self.playing = false;
        self.progress = 0.0;
        self.seek(0.0);
        let line = format!("Loaded point {} ({} bytes)", loaded.name, self.full_recv.len() * 4);
        self.events.emit(PlaybackEvent::LoadedPoint(loaded));
        self.note(line, false);
    }

    /// Clamp the ratio, set the scrub position, and recompute the visible
    /// prefix of every channel. Idempotent for a repeated ratio.
    fn seek(&mut self, ratio: f64) {
        self.progress = ratio.clamp(0.0, 1.0);

        let rendered = RenderedPrefix {
            recv: visible_prefix(&self.full_recv, self.progress),
            send: visible_prefix(&self.full_send, self.progress),
            off: visible_prefix(&self.full_off, self.progress),
            sample_rate_hz: self.sample_rate_hz,
        };
        let preview = WaveformUpdate {
            recv: downsample(&rendered.recv, LIVE_PREVIEW_POINTS).into_iter().map(f64::from).collect(),
            send: downsample(&rendered.send, LIVE_PREVIEW_POINTS).into_iter().map(f64::from).collect(),
        };
        // publish the prefix first so event observers see matching series
        self.render_tx.send_replace(Arc::new(rendered));
        self.events.emit(PlaybackEvent::Progress(self.progress));
        self.events.emit(PlaybackEvent::Waveform(preview));
    }

    /// Begin playing; restarts from zero when scrubbed past the end.
    /// Returns `false` (and stays stopped) when nothing is loaded.
    fn begin_play(&mut self) -> bool {
        if !self.has_data() {
            return false;
        }
        if self.progress >= 1.0 {
            self.seek(0.0);
        }
        if !self.playing {
            self.playing = true;
            self.events.emit(PlaybackEvent::Playing(true));
        }
        true
    }

    /// Stop the tick. Idempotent.
    fn pause(&mut self) {
        if self.playing {
            self.playing = false;
            self.events.emit(PlaybackEvent::Playing(false));
        }
    }

    /// One fixed-rate tick: advance the scrub position, stopping exactly at
    /// the end instead of overshooting.
    fn advance(&mut self) {
        let next = self.progress + TICK_INCREMENT;
        if next >= 1.0 {
            self.seek(1.0);
            self.pause();
        } else {
            self.seek(next);
        }
    }

    /// Write the *full* (not playback-limited) data as CSV into `dest_dir`.
    fn export_csv(&self, dest_dir: &Path) -> Result<PathBuf> {
        let loaded = self
            .loaded
            .as_ref()
            .filter(|_| self.has_data())
            .ok_or_else(|| LinkError::rejected("export_csv", "no point loaded"))?;

        let path = dest_dir.join(format!("{}_export.csv", loaded.name));
        let file = std::fs::File::create(&path).map_err(|err| LinkError::export(path.clone(), err))?;
        let mut out = std::io::BufWriter::new(file);

        let period_us = 1_000_000.0 / f64::from(self.sample_rate_hz.max(1));
        let write = |out: &mut std::io::BufWriter<std::fs::File>| -> std::io::Result<()> {
            writeln!(out, "Time(us),Recv(V),Send(A)")?;
            for (i, &recv) in self.full_recv.iter().enumerate() {
                let send = self.full_send.get(i).copied().unwrap_or(0.0);
                writeln!(out, "{},{recv},{send}", i as f64 * period_us)?;
            }
            out.flush()
        };
        write(&mut out).map_err(|err| LinkError::export(path.clone(), err))?;
        Ok(path)
    }
}

fn decode_blob(b64: &str) -> Vec<f32> {
    base64_decode(b64).map(|raw| decode_le_f32(&raw)).unwrap_or_default()
}

fn visible_prefix(full: &[f32], ratio: f64) -> Vec<f32> {
    if full.is_empty() {
        return Vec::new();
    }
    let limit = (full.len() as f64 * ratio).round() as usize;
    full[..limit.max(1).min(full.len())].to_vec()
}

#[derive(Debug)]
enum PlaybackCommand {
    Load(i64),
    Play,
    Pause,
    Seek(f64),
    ExportCsv(PathBuf),
}

/// Handle to a playback engine.
///
/// Commands are fire-and-forget, mirroring [`DeviceLink`](crate::DeviceLink);
/// failures (unknown point, unwritable export destination) surface as warning
/// [`PlaybackEvent::Log`] entries. Dropping the handle stops the engine.
pub struct PlaybackEngine {
    commands: mpsc::UnboundedSender<PlaybackCommand>,
    snapshot: watch::Receiver<PlaybackSnapshot>,
    rendered: watch::Receiver<Arc<RenderedPrefix>>,
    events: EventBus<PlaybackEvent>,
    cancel: CancellationToken,
}

impl PlaybackEngine {
    /// Spawn the playback task over the given store.
    pub fn spawn(store: Arc<dyn SampleStore>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let events: EventBus<PlaybackEvent> = EventBus::new(256);
        let (render_tx, render_rx) = watch::channel(Arc::new(RenderedPrefix::default()));
        let state = PlaybackState::new(events.clone(), render_tx);
        let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot());
        let cancel = CancellationToken::new();

        let task = PlaybackTask { store, state, commands: command_rx, snapshot_tx, cancel: cancel.clone() };
        tokio::spawn(task.run());

        Self { commands: command_tx, snapshot: snapshot_rx, rendered: render_rx, events, cancel }
    }

    /// Load the most recent saved sample for a point.
    pub fn load(&self, point_id: i64) {
        self.send(PlaybackCommand::Load(point_id));
    }

    /// Start the fixed-rate scrub; restarts from zero if already at the end.
    pub fn play(&self) {
        self.send(PlaybackCommand::Play);
    }

    /// Stop the scrub tick. Idempotent.
    pub fn pause(&self) {
        self.send(PlaybackCommand::Pause);
    }

    /// Jump to a position in `[0, 1]` (clamped) and recompute the visible
    /// prefix.
    pub fn seek(&self, ratio: f64) {
        self.send(PlaybackCommand::Seek(ratio));
    }

    /// Export the loaded point's full data as CSV into a directory.
    pub fn export_csv(&self, dest_dir: impl Into<PathBuf>) {
        self.send(PlaybackCommand::ExportCsv(dest_dir.into()));
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn events(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    /// Notification fan-out as a `Stream`.
    pub fn event_stream(&self) -> impl Stream<Item = PlaybackEvent> + 'static {
        tokio_stream::wrappers::BroadcastStream::new(self.events.subscribe())
            .filter_map(|item| async move { item.ok() })
    }

    /// Chart series over the visible receiver prefix.
    pub fn recv_series(&self) -> Vec<ChartPoint> {
        let rendered = self.rendered.borrow().clone();
        series_points(&rendered.recv, rendered.sample_rate_hz, CHART_SERIES_POINTS)
    }

    /// Chart series over the visible transmitter prefix.
    pub fn send_series(&self) -> Vec<ChartPoint> {
        let rendered = self.rendered.borrow().clone();
        series_points(&rendered.send, rendered.sample_rate_hz, CHART_SERIES_POINTS)
    }

    /// Chart series over the visible switch-off prefix.
    pub fn off_series(&self) -> Vec<ChartPoint> {
        let rendered = self.rendered.borrow().clone();
        series_points(&rendered.off, rendered.sample_rate_hz, CHART_SERIES_POINTS)
    }

    fn send(&self, command: PlaybackCommand) {
        let _ = self.commands.send(command);
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        debug!("dropping playback engine");
        self.cancel.cancel();
    }
}

struct PlaybackTask {
    store: Arc<dyn SampleStore>,
    state: PlaybackState,
    commands: mpsc::UnboundedReceiver<PlaybackCommand>,
    snapshot_tx: watch::Sender<PlaybackSnapshot>,
    cancel: CancellationToken,
}

enum Step {
    Cancelled,
    Command(Option<PlaybackCommand>),
    Tick,
}

impl PlaybackTask {
    async fn run(mut self) {
        info!("playback task started");
        let mut ticker = interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let step = {
                let commands = &mut self.commands;
                let cancel = &self.cancel;
                tokio::select! {
                    _ = cancel.cancelled() => Step::Cancelled,
                    command = commands.recv() => Step::Command(command),
                    _ = ticker.tick() => Step::Tick,
                }
            };

            match step {
                Step::Cancelled | Step::Command(None) => break,
                Step::Command(Some(command)) => self.handle_command(command).await,
                Step::Tick => {
                    // the ticker always runs; it only scrubs while playing
                    if self.state.playing {
                        self.state.advance();
                    }
                }
            }
            self.publish_snapshot();
        }

        info!("playback task stopped");
    }

    async fn handle_command(&mut self, command: PlaybackCommand) {
        match command {
            PlaybackCommand::Load(point_id) => self.load(point_id).await,
            PlaybackCommand::Play => {
                self.state.begin_play();
            }
            PlaybackCommand::Pause => self.state.pause(),
            PlaybackCommand::Seek(ratio) => self.state.seek(ratio),
            PlaybackCommand::ExportCsv(dest_dir) => match self.state.export_csv(&dest_dir) {
                Ok(path) => self.state.note(format!("Exported CSV to {}", path.display()), false),
                Err(err) => {
                    warn!(%err, "csv export failed");
                    self.state.note(format!("CSV export failed: {err}"), true);
                }
            },
        }
    }

    async fn load(&mut self, point_id: i64) {
        let row = match self.store.latest_sample(point_id).await {
            Ok(Some(row)) => row,
            Ok(None) => {
                self.state.note("No sample data found for this point.", true);
                return;
            }
            Err(err) => {
                warn!(%err, point_id, "sample lookup failed");
                self.state.note(format!("Failed to load point {point_id}: {err}"), true);
                return;
            }
        };

        let name = match self.store.point_name(point_id).await {
            Ok(Some(name)) => name,
            _ => format!("Point {point_id}"),
        };
        self.state.load_row(name, &row);
    }

    fn publish_snapshot(&mut self) {
        let snapshot = self.state.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}
