//! TCP transport connector.
//!
//! [`bind`] and [`dial`] are the fatal-on-failure edges of the relay: their
//! errors propagate to the caller. [`serve`] runs the accept loop, handing
//! every accepted connection to its own task so the listener never waits on
//! a handler. Accept errors are logged and the loop keeps going.

use crate::error::{RelayError, RelayResult};
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Host and port of a TCP peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddr {
    pub host: String,
    pub port: u16,
}

impl TargetAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Bind a TCP listener on `host:port`.
///
/// # Errors
///
/// Returns [`RelayError::Bind`] if the address cannot be resolved or bound.
pub async fn bind(host: &str, port: u16) -> RelayResult<TcpListener> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| RelayError::Bind {
            addr: addr.clone(),
            source,
        })?;

    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or(addr);
    info!(addr = %local, "server is listening");
    Ok(listener)
}

/// Accept connections forever, spawning `on_accept` once per connection.
pub async fn serve<F, Fut>(listener: TcpListener, on_accept: F)
where
    F: Fn(TcpStream, SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "tcp connection accepted");
                tokio::spawn(on_accept(stream, peer));
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
            }
        }
    }
}

/// Bind `host:port` and run the accept loop.
///
/// Only returns on a bind failure.
pub async fn listen<F, Fut>(host: &str, port: u16, on_accept: F) -> RelayResult<()>
where
    F: Fn(TcpStream, SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = bind(host, port).await?;
    serve(listener, on_accept).await;
    Ok(())
}

/// Open an outbound TCP connection to `addr`.
///
/// # Errors
///
/// Returns [`RelayError::Dial`] if the connection cannot be established.
pub async fn dial(addr: &TargetAddr) -> RelayResult<TcpStream> {
    let stream = TcpStream::connect((addr.host.as_str(), addr.port))
        .await
        .map_err(|source| RelayError::Dial {
            addr: addr.to_string(),
            source,
        })?;
    debug!(target_addr = %addr, "connected to proxied tcp");
    Ok(stream)
}
