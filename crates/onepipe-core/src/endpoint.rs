//! Byte-stream endpoints.
//!
//! An endpoint is anything the pipe can split into independent read and
//! write halves: a `TcpStream` in production, an in-memory duplex stream in
//! tests. Read deadlines are applied per read by the pipe, so the trait
//! itself carries no timeout state.

use tokio::io::{AsyncRead, AsyncWrite};

/// A connected, ordered, reliable, bidirectional byte channel.
pub trait Endpoint: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Endpoint for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// An endpoint paired with the label used for it in log lines
/// (normally the peer address).
#[derive(Debug)]
pub struct Labeled<E> {
    /// Name used in log lines.
    pub label: String,
    /// The underlying stream.
    pub stream: E,
}

impl<E: Endpoint> Labeled<E> {
    pub fn new(label: impl Into<String>, stream: E) -> Self {
        Self {
            label: label.into(),
            stream,
        }
    }

    pub fn into_inner(self) -> E {
        self.stream
    }
}
