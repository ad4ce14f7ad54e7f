//! Bidirectional pipe between a client endpoint and a target endpoint.
//!
//! A pipe runs two independent copy loops, one per direction, each in its
//! own task. The loops share nothing but an atomic *broken* flag: whichever
//! loop stops first sets it, and the other loop exits at its next check.
//!
//! A read on a direction with a deadline gives up after the deadline and
//! re-checks the flag, so a silent peer cannot pin the loop after the other
//! direction has gone away. By default only the target-reading direction
//! carries a deadline; a client disconnect shows up as EOF on its own.
//!
//! # Lifecycle
//!
//! ```text
//! Pipe::new   (idle)
//!   → Pipe::start        spawns both loops          (running)
//!     → RunningPipe::wait  joins both, returns ends  (stopped)
//! ```
//!
//! The pipe never closes its endpoints. [`RunningPipe::wait`] hands both
//! back, reunited, in the [`PipeOutcome`]; the caller decides what to close.

use crate::endpoint::{Endpoint, Labeled};
use crate::error::RelayResult;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Per-direction read buffer size.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Read deadline applied to the target-reading direction.
pub const DEFAULT_READ_DEADLINE: Duration = Duration::from_millis(50);

/// Tunables for a single pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeConfig {
    /// Maximum bytes moved per read.
    pub buffer_size: usize,
    /// Deadline for each read from the target. `None` blocks until data or EOF.
    pub target_read_deadline: Option<Duration>,
    /// Deadline for each read from the client. `None` blocks until data or EOF.
    pub client_read_deadline: Option<Duration>,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            target_read_deadline: Some(DEFAULT_READ_DEADLINE),
            client_read_deadline: None,
        }
    }
}

/// Why a copy loop stopped.
#[derive(Debug)]
pub enum DirectionEnd {
    /// The source returned EOF.
    SourceClosed,
    /// Reading from the source failed.
    ReadFailed(io::Error),
    /// Writing to the destination failed.
    WriteFailed(io::Error),
    /// The other direction stopped first.
    PeerBroken,
}

impl DirectionEnd {
    /// Whether the loop stopped on an I/O error rather than a clean close.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::ReadFailed(_) | Self::WriteFailed(_))
    }
}

impl fmt::Display for DirectionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceClosed => write!(f, "source closed"),
            Self::ReadFailed(e) => write!(f, "read failed: {e}"),
            Self::WriteFailed(e) => write!(f, "write failed: {e}"),
            Self::PeerBroken => write!(f, "peer direction stopped"),
        }
    }
}

/// Final state of one copy loop.
#[derive(Debug)]
pub struct DirectionReport {
    /// Why the loop stopped.
    pub end: DirectionEnd,
    /// Bytes written to the destination.
    pub bytes: u64,
}

/// A constructed, not yet started pipe.
pub struct Pipe<C, T> {
    client: Labeled<C>,
    target: Labeled<T>,
    config: PipeConfig,
}

impl<C: Endpoint, T: Endpoint> Pipe<C, T> {
    /// Build an idle pipe over a labeled client and target.
    pub fn new(client: Labeled<C>, target: Labeled<T>, config: PipeConfig) -> Self {
        Self {
            client,
            target,
            config,
        }
    }

    /// Spawn both copy loops.
    pub fn start(self) -> RunningPipe<C, T> {
        let broken = Arc::new(AtomicBool::new(false));
        let Labeled {
            label: client_label,
            stream: client,
        } = self.client;
        let Labeled {
            label: target_label,
            stream: target,
        } = self.target;

        let (client_read, client_write) = tokio::io::split(client);
        let (target_read, target_write) = tokio::io::split(target);

        let upstream = Direction {
            src: client_label.clone(),
            dst: target_label.clone(),
            deadline: self.config.client_read_deadline,
            buffer_size: self.config.buffer_size,
            broken: broken.clone(),
        };
        let downstream = Direction {
            src: target_label.clone(),
            dst: client_label.clone(),
            deadline: self.config.target_read_deadline,
            buffer_size: self.config.buffer_size,
            broken: broken.clone(),
        };

        RunningPipe {
            client_label,
            target_label,
            broken,
            client_to_target: tokio::spawn(upstream.run(client_read, target_write)),
            target_to_client: tokio::spawn(downstream.run(target_read, client_write)),
        }
    }
}

/// A pipe whose copy loops are running.
pub struct RunningPipe<C, T> {
    client_label: String,
    target_label: String,
    broken: Arc<AtomicBool>,
    client_to_target: JoinHandle<(ReadHalf<C>, WriteHalf<T>, DirectionReport)>,
    target_to_client: JoinHandle<(ReadHalf<T>, WriteHalf<C>, DirectionReport)>,
}

impl<C: Endpoint, T: Endpoint> RunningPipe<C, T> {
    /// Whether either direction has stopped.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    /// Block until both copy loops have exited.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Task`](crate::RelayError::Task) if a copy loop
    /// panicked. The endpoints are lost in that case.
    pub async fn wait(self) -> RelayResult<PipeOutcome<C, T>> {
        // Join both before looking at either result so no loop is left detached.
        let (upstream, downstream) = tokio::join!(self.client_to_target, self.target_to_client);
        let (client_read, target_write, client_to_target) = upstream?;
        let (target_read, client_write, target_to_client) = downstream?;

        Ok(PipeOutcome {
            client: Labeled::new(self.client_label, client_read.unsplit(client_write)),
            target: Labeled::new(self.target_label, target_read.unsplit(target_write)),
            client_to_target,
            target_to_client,
        })
    }
}

/// A stopped pipe: both endpoints handed back, plus how each direction ended.
pub struct PipeOutcome<C, T> {
    /// The client endpoint, still open.
    pub client: Labeled<C>,
    /// The target endpoint, still open.
    pub target: Labeled<T>,
    /// Report of the loop reading the client.
    pub client_to_target: DirectionReport,
    /// Report of the loop reading the target.
    pub target_to_client: DirectionReport,
}

impl<C, T> PipeOutcome<C, T> {
    /// Whether the target survived the session: it never hit EOF or a read
    /// error, and writes to it never failed.
    pub fn target_healthy(&self) -> bool {
        !matches!(
            self.target_to_client.end,
            DirectionEnd::SourceClosed | DirectionEnd::ReadFailed(_)
        ) && !matches!(self.client_to_target.end, DirectionEnd::WriteFailed(_))
    }
}

/// One copy loop: `src` → `dst`.
struct Direction {
    src: String,
    dst: String,
    deadline: Option<Duration>,
    buffer_size: usize,
    broken: Arc<AtomicBool>,
}

impl Direction {
    async fn run<R, W>(
        self,
        mut reader: ReadHalf<R>,
        mut writer: WriteHalf<W>,
    ) -> (ReadHalf<R>, WriteHalf<W>, DirectionReport)
    where
        R: Endpoint,
        W: Endpoint,
    {
        // Sets the flag even if this task unwinds.
        let _break_on_exit = BreakOnExit(self.broken.clone());
        info!(src = %self.src, dst = %self.dst, "pipe started");

        let mut buf = vec![0u8; self.buffer_size];
        let mut bytes: u64 = 0;

        let end = loop {
            if self.broken.load(Ordering::Acquire) {
                break DirectionEnd::PeerBroken;
            }

            debug!(src = %self.src, dst = %self.dst, "pipe running");
            let read = match self.deadline {
                Some(deadline) => match tokio::time::timeout(deadline, reader.read(&mut buf)).await {
                    Ok(result) => result,
                    Err(_elapsed) => continue,
                },
                None => reader.read(&mut buf).await,
            };

            let n = match read {
                Ok(0) => {
                    info!(src = %self.src, "source closed, exit");
                    break DirectionEnd::SourceClosed;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!(src = %self.src, error = %e, "failed to read, exit");
                    break DirectionEnd::ReadFailed(e);
                }
            };
            debug!(src = %self.src, n, "read");

            if let Err(e) = writer.write_all(&buf[..n]).await {
                warn!(dst = %self.dst, error = %e, "failed to write, exit");
                break DirectionEnd::WriteFailed(e);
            }
            bytes += n as u64;
            debug!(
                src = %self.src,
                dst = %self.dst,
                n,
                payload = %String::from_utf8_lossy(&buf[..n]),
                "forwarded"
            );
        };

        self.broken.store(true, Ordering::Release);
        info!(src = %self.src, dst = %self.dst, bytes, reason = %end, "pipe stopped");
        (reader, writer, DirectionReport { end, bytes })
    }
}

struct BreakOnExit(Arc<AtomicBool>);

impl Drop for BreakOnExit {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}
