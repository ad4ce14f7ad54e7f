//! Session handling: one admitted client, one target, one pipe.
//!
//! Every accepted connection goes through [`SessionHandler::handle`]. The
//! handler claims the gate slot (rejecting the connection if a session is
//! already active), obtains the target, runs a [`Pipe`] to completion and
//! then closes what it owns before giving the slot back.
//!
//! # Target modes
//!
//! - [`TargetSource::Dial`]: a fresh target connection per session, closed
//!   when the session ends.
//! - [`TargetSource::Shared`]: one target connection dialed at startup and
//!   lent to each session in turn. It is never closed by a session; if the
//!   target itself went away during a session it is discarded and the next
//!   session dials a replacement.

use crate::endpoint::Labeled;
use crate::error::{RelayError, RelayResult};
use crate::gate::SessionGate;
use crate::pipe::{Pipe, PipeConfig, PipeOutcome};
use crate::transport::{self, TargetAddr};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// A target connection shared by consecutive sessions.
pub struct SharedTarget {
    addr: TargetAddr,
    slot: Mutex<Option<TcpStream>>,
}

impl SharedTarget {
    /// Dial the target once, up front.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Dial`] if the target is unreachable.
    pub async fn connect(addr: TargetAddr) -> RelayResult<Self> {
        let stream = transport::dial(&addr).await?;
        Ok(Self::from_stream(addr, stream))
    }

    /// Wrap an already connected target stream.
    pub fn from_stream(addr: TargetAddr, stream: TcpStream) -> Self {
        Self {
            addr,
            slot: Mutex::new(Some(stream)),
        }
    }

    pub fn addr(&self) -> &TargetAddr {
        &self.addr
    }

    /// Whether a live target connection is parked in the slot.
    pub async fn is_connected(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    async fn take(&self) -> RelayResult<TcpStream> {
        let parked = self.slot.lock().await.take();
        match parked {
            Some(stream) => Ok(stream),
            None => {
                info!(target_addr = %self.addr, "shared target not connected, dialing");
                transport::dial(&self.addr).await
            }
        }
    }

    async fn restore(&self, stream: TcpStream) {
        *self.slot.lock().await = Some(stream);
    }
}

/// Where a session's target connection comes from.
pub enum TargetSource {
    /// Dial a new connection for every session.
    Dial(TargetAddr),
    /// Reuse one connection across sessions.
    Shared(SharedTarget),
}

impl TargetSource {
    pub fn addr(&self) -> &TargetAddr {
        match self {
            Self::Dial(addr) => addr,
            Self::Shared(shared) => shared.addr(),
        }
    }
}

/// Result of handling one inbound connection.
#[derive(Debug)]
pub enum SessionOutcome {
    /// Another session was active; the connection was closed unforwarded.
    Rejected,
    /// The session could not be set up or its pipe failed.
    Failed(RelayError),
    /// The pipe ran and stopped.
    Completed(SessionSummary),
}

/// Traffic totals for a finished session.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    /// Address of the client.
    pub peer: SocketAddr,
    /// Bytes forwarded client → target.
    pub bytes_to_target: u64,
    /// Bytes forwarded target → client.
    pub bytes_to_client: u64,
    /// Time from admission to teardown.
    pub duration: Duration,
}

/// Wires admitted clients to the target through a new pipe per session.
pub struct SessionHandler {
    gate: SessionGate,
    target: TargetSource,
    pipe_config: PipeConfig,
}

impl SessionHandler {
    pub fn new(gate: SessionGate, target: TargetSource, pipe_config: PipeConfig) -> Self {
        Self {
            gate,
            target,
            pipe_config,
        }
    }

    pub fn gate(&self) -> &SessionGate {
        &self.gate
    }

    pub fn target(&self) -> &TargetSource {
        &self.target
    }

    /// Run the accept loop on `listener`, handling each connection in its
    /// own task.
    pub async fn run(self: Arc<Self>, listener: TcpListener) {
        transport::serve(listener, move |stream, peer| {
            let handler = self.clone();
            async move {
                handler.handle(stream, peer).await;
            }
        })
        .await
    }

    /// Handle one accepted connection from admission to teardown.
    ///
    /// The gate slot is held for the whole session and released on every
    /// exit path, after the client has been closed.
    pub async fn handle(&self, mut client: TcpStream, peer: SocketAddr) -> SessionOutcome {
        let Some(slot) = self.gate.try_claim() else {
            info!(peer = %peer, "connection already occupied, only supports one connection");
            let _ = client.shutdown().await;
            return SessionOutcome::Rejected;
        };

        info!(peer = %peer, target_addr = %self.target.addr(), "accept connection");
        let outcome = self.run_session(client, peer).await;

        drop(slot);
        debug!(peer = %peer, "connection closed");
        outcome
    }

    async fn run_session(&self, mut client: TcpStream, peer: SocketAddr) -> SessionOutcome {
        let started = Instant::now();

        let target = match self.acquire_target().await {
            Ok(target) => target,
            Err(e) => {
                warn!(peer = %peer, error = %e, "failed to connect target, closing client");
                let _ = client.shutdown().await;
                return SessionOutcome::Failed(e);
            }
        };
        let target_label = target
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| self.target.addr().to_string());

        let pipe = Pipe::new(
            Labeled::new(peer.to_string(), client),
            Labeled::new(target_label, target),
            self.pipe_config.clone(),
        )
        .start();

        let outcome = match pipe.wait().await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(peer = %peer, error = %e, "pipe failed");
                return SessionOutcome::Failed(e);
            }
        };
        debug!(peer = %peer, "pipe closed");

        let summary = SessionSummary {
            peer,
            bytes_to_target: outcome.client_to_target.bytes,
            bytes_to_client: outcome.target_to_client.bytes,
            duration: started.elapsed(),
        };
        let errored =
            outcome.client_to_target.end.is_error() || outcome.target_to_client.end.is_error();
        self.close_session(outcome).await;

        let duration_ms = summary.duration.as_millis() as u64;
        if errored {
            warn!(
                peer = %peer,
                bytes_to_target = summary.bytes_to_target,
                bytes_to_client = summary.bytes_to_client,
                duration_ms,
                "session ended on error"
            );
        } else {
            info!(
                peer = %peer,
                bytes_to_target = summary.bytes_to_target,
                bytes_to_client = summary.bytes_to_client,
                duration_ms,
                "session ended"
            );
        }
        SessionOutcome::Completed(summary)
    }

    async fn acquire_target(&self) -> RelayResult<TcpStream> {
        match &self.target {
            TargetSource::Dial(addr) => transport::dial(addr).await,
            TargetSource::Shared(shared) => shared.take().await,
        }
    }

    async fn close_session(&self, outcome: PipeOutcome<TcpStream, TcpStream>) {
        let healthy = outcome.target_healthy();
        let PipeOutcome { client, target, .. } = outcome;

        let mut client = client.into_inner();
        let _ = client.shutdown().await;
        drop(client);

        let mut target = target.into_inner();
        match &self.target {
            TargetSource::Dial(_) => {
                let _ = target.shutdown().await;
            }
            TargetSource::Shared(shared) if healthy => {
                shared.restore(target).await;
            }
            TargetSource::Shared(shared) => {
                warn!(target_addr = %shared.addr(), "shared target lost, will re-dial on next session");
            }
        }
    }
}
