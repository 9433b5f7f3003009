//! Backend layer
//!
//! A backend hides how connections are obtained: the network backend keeps
//! its listener open and hands out one connection per client, the serial
//! backend opens the device and hands out the line itself as the only
//! connection, which has to be opened again after it is torn down.

mod serial;
mod tcp;

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use errors::MbuError;
use mbu_config::{TransportConfig, TransportKind};
use mbu_protocol::{FramedStream, Framing, ReadOutcome};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

pub use serial::SerialBackend;
pub use tcp::{NetworkBackend, DEFAULT_BACKLOG};

/// Backend error types
#[derive(Error, Debug)]
pub enum BackendError {
    /// Bind/listen or device open failed
    #[error("Listen failed on {endpoint}: {source}")]
    ListenFailed {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// Accepting a client failed; the listener stays usable
    #[error("Accept failed: {0}")]
    AcceptFailed(#[source] io::Error),

    /// `accept_next` before `listen`, or after shutdown
    #[error("Backend is not listening")]
    NotListening,
}

impl From<BackendError> for MbuError {
    fn from(err: BackendError) -> Self {
        MbuError::io(err.to_string())
    }
}

/// One accepted peer: a network client or the serial line
#[async_trait]
pub trait Connection: Send + 'static {
    /// Peer address or device path, for logs
    fn peer(&self) -> &str;

    fn framing(&self) -> Framing;

    /// Wait up to `idle_timeout` for the next frame
    async fn read_frame(&mut self, idle_timeout: Duration) -> io::Result<ReadOutcome>;

    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Forget partially received input
    fn discard_input(&mut self);

    /// Release the underlying resource; repeated calls do nothing
    async fn close(&mut self) -> io::Result<()>;
}

#[async_trait]
impl<S> Connection for FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn peer(&self) -> &str {
        FramedStream::peer(self)
    }

    fn framing(&self) -> Framing {
        FramedStream::framing(self)
    }

    async fn read_frame(&mut self, idle_timeout: Duration) -> io::Result<ReadOutcome> {
        FramedStream::read_frame(self, idle_timeout).await
    }

    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        FramedStream::write_frame(self, frame).await
    }

    fn discard_input(&mut self) {
        FramedStream::discard_input(self)
    }

    async fn close(&mut self) -> io::Result<()> {
        FramedStream::close(self).await
    }
}

/// Uniform contract over both transports
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    type Conn: Connection;

    fn transport(&self) -> TransportKind;

    /// Address or device, for logs
    fn endpoint(&self) -> String;

    /// Network: bind and listen. Serial: open the device.
    async fn listen(&self) -> Result<(), BackendError>;

    /// Network: wait for the next client. Serial: hand out the opened line.
    async fn accept_next(&self) -> Result<Self::Conn, BackendError>;

    /// Release one connection. Serial: the whole session, `listen` must
    /// be called again before the next `accept_next`.
    async fn teardown(&self, conn: Self::Conn);

    /// Release the listening handle; idempotent
    async fn shutdown(&self);

    fn stats(&self) -> &BackendStats;
}

/// Accept/teardown counters
#[derive(Debug, Default)]
pub struct BackendStats {
    listens: AtomicU64,
    accepted: AtomicU64,
    torn_down: AtomicU64,
}

impl BackendStats {
    pub fn record_listen(&self) {
        self.listens.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accept(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_teardown(&self) {
        self.torn_down.fetch_add(1, Ordering::Relaxed);
    }

    pub fn listens(&self) -> u64 {
        self.listens.load(Ordering::Relaxed)
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn torn_down(&self) -> u64 {
        self.torn_down.load(Ordering::Relaxed)
    }
}

/// A backend built from a transport config, not yet listening
#[derive(Debug)]
pub enum SessionContext {
    Network(NetworkBackend),
    Serial(SerialBackend),
}

/// Build the backend matching `config`
pub fn create_session(config: &TransportConfig) -> SessionContext {
    match config {
        TransportConfig::Network(network) => {
            SessionContext::Network(NetworkBackend::new(network.clone()))
        },
        TransportConfig::Serial(serial) => SessionContext::Serial(SerialBackend::new(serial.clone())),
    }
}
