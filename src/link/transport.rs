//! TCP transport with a three-state connection lifecycle.
//!
//! The transport owns the socket and nothing else: it moves between
//! Disconnected, Connecting, and Connected, arms a single-shot timeout per
//! connect attempt, and hands raw in-order byte chunks upward. Framing is
//! the next layer's problem.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::error::{LinkError, Result};

/// Connection lifecycle state, owned exclusively by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

type ConnectFuture =
    Pin<Box<dyn Future<Output = Result<std::io::Result<TcpStream>, tokio::time::error::Elapsed>> + Send>>;

enum Phase {
    Idle,
    Connecting { attempt: ConnectFuture, timeout: Duration },
    Connected(TcpStream),
}

/// Transport-level notification delivered to the link task.
pub(crate) enum TransportEvent {
    /// Connect attempt succeeded; state is now Connected.
    Connected,
    /// Connect attempt failed or timed out; state is back to Disconnected.
    ConnectFailed(LinkError),
    /// In-order bytes from the peer.
    Data(Vec<u8>),
    /// The socket closed: peer close (`error: None`) or a fatal read error.
    Closed { error: Option<LinkError> },
}

pub(crate) struct Transport {
    phase: Phase,
    state_tx: watch::Sender<ConnectionState>,
}

impl Transport {
    pub fn new() -> (Self, watch::Receiver<ConnectionState>) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        (Self { phase: Phase::Idle, state_tx }, state_rx)
    }

    pub fn state(&self) -> ConnectionState {
        match self.phase {
            Phase::Idle => ConnectionState::Disconnected,
            Phase::Connecting { .. } => ConnectionState::Connecting,
            Phase::Connected(_) => ConnectionState::Connected,
        }
    }

    /// Begin a connect attempt with a single-shot timeout.
    ///
    /// Valid only from Disconnected; re-entrant attempts are rejected without
    /// changing state.
    pub fn begin_connect(&mut self, host: &str, port: u16, timeout: Duration) -> Result<()> {
        match self.phase {
            Phase::Idle => {}
            Phase::Connecting { .. } => {
                return Err(LinkError::rejected("connect", "connect attempt already in progress"));
            }
            Phase::Connected(_) => {
                return Err(LinkError::rejected("connect", "already connected; disconnect first"));
            }
        }

        let addr = format!("{host}:{port}");
        debug!(%addr, ?timeout, "starting connect attempt");
        let attempt = Box::pin(tokio::time::timeout(timeout, TcpStream::connect(addr)));
        self.set_phase(Phase::Connecting { attempt, timeout });
        Ok(())
    }

    /// Close the socket (or cancel an in-flight connect attempt). A no-op
    /// when already disconnected.
    pub fn disconnect(&mut self) {
        if !matches!(self.phase, Phase::Idle) {
            debug!("closing transport");
            self.set_phase(Phase::Idle);
        }
    }

    /// Write a command frame. Fails immediately when not connected — no
    /// buffering, no retry — and write failures do not change state.
    pub async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let Phase::Connected(stream) = &mut self.phase else {
            return Err(LinkError::rejected("send", "not connected"));
        };
        trace!(len = bytes.len(), "sending frame");
        stream
            .write_all(bytes)
            .await
            .map_err(|err| LinkError::transport_with_source("send failed", Box::new(err)))
    }

    /// Await the next transport event. Pends forever while disconnected, so
    /// it can sit in a select loop unconditionally.
    pub async fn next_event(&mut self) -> TransportEvent {
        match &mut self.phase {
            Phase::Idle => std::future::pending().await,
            Phase::Connecting { attempt, timeout } => {
                let timeout = *timeout;
                match attempt.as_mut().await {
                    Ok(Ok(stream)) => {
                        self.set_phase(Phase::Connected(stream));
                        TransportEvent::Connected
                    }
                    Ok(Err(err)) => {
                        self.set_phase(Phase::Idle);
                        TransportEvent::ConnectFailed(LinkError::transport_with_source(
                            format!("connect failed: {err}"),
                            Box::new(err),
                        ))
                    }
                    Err(_) => {
                        self.set_phase(Phase::Idle);
                        TransportEvent::ConnectFailed(LinkError::ConnectTimeout {
                            duration: timeout,
                        })
                    }
                }
            }
            Phase::Connected(stream) => {
                let mut chunk = vec![0u8; 8192];
                match stream.read(&mut chunk).await {
                    Ok(0) => {
                        self.set_phase(Phase::Idle);
                        TransportEvent::Closed { error: None }
                    }
                    Ok(n) => {
                        chunk.truncate(n);
                        TransportEvent::Data(chunk)
                    }
                    Err(err) => {
                        // a failed read means the socket is gone; treat it as
                        // the peer-close notification with a cause attached
                        self.set_phase(Phase::Idle);
                        TransportEvent::Closed {
                            error: Some(LinkError::transport_with_source(
                                format!("socket error: {err}"),
                                Box::new(err),
                            )),
                        }
                    }
                }
            }
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        let state = self.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}
