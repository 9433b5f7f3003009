//! Serial backend
//!
//! The line itself is the only connection. `accept_next` moves the opened
//! port out of the backend, `teardown` closes it, and the next `listen`
//! opens the device again.

use std::time::Duration;

use async_trait::async_trait;
use mbu_config::{SerialConfig, TransportKind};
use mbu_protocol::stream::RTU_FRAME_GAP;
use mbu_protocol::{FramedStream, Framing, Role};
use tokio::sync::Mutex;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

use super::{Backend, BackendError, BackendStats, Connection};

/// Read timeout handed to the OS driver
const PORT_TIMEOUT: Duration = Duration::from_millis(100);

pub struct SerialBackend {
    config: SerialConfig,
    port: Mutex<Option<SerialStream>>,
    stats: BackendStats,
}

impl std::fmt::Debug for SerialBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialBackend")
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl SerialBackend {
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            port: Mutex::new(None),
            stats: BackendStats::default(),
        }
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    /// Silence that ends an RTU frame on this line.
    ///
    /// Never shorter than [`RTU_FRAME_GAP`]; slow lines get four character
    /// times instead.
    pub fn frame_gap(&self) -> Duration {
        self.config.char_time(4).max(RTU_FRAME_GAP)
    }

    fn open(&self) -> Result<SerialStream, BackendError> {
        #[allow(unused_mut)]
        let mut port = self
            .config
            .port_builder(PORT_TIMEOUT)
            .open_native_async()
            .map_err(|e| BackendError::ListenFailed {
                endpoint: self.config.device.clone(),
                source: e.into(),
            })?;

        #[cfg(unix)]
        if let Err(e) = port.set_exclusive(false) {
            warn!("Failed to clear exclusive mode on {}: {}", self.config.device, e);
        }

        Ok(port)
    }
}

#[async_trait]
impl Backend for SerialBackend {
    type Conn = FramedStream<SerialStream>;

    fn transport(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn endpoint(&self) -> String {
        self.config.device.clone()
    }

    async fn listen(&self) -> Result<(), BackendError> {
        let mut slot = self.port.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        *slot = Some(self.open()?);
        self.stats.record_listen();
        info!("Opened {}", self.config);
        Ok(())
    }

    async fn accept_next(&self) -> Result<Self::Conn, BackendError> {
        let port = self
            .port
            .lock()
            .await
            .take()
            .ok_or(BackendError::NotListening)?;
        self.stats.record_accept();
        Ok(
            FramedStream::new(port, Framing::Rtu, Role::Request, self.config.device.clone())
                .with_frame_timeout(self.frame_gap()),
        )
    }

    async fn teardown(&self, mut conn: Self::Conn) {
        if let Err(e) = conn.close().await {
            debug!("Closing {} reported: {}", Connection::peer(&conn), e);
        }
        self.stats.record_teardown();
        debug!("Serial session on {} torn down", self.config.device);
    }

    async fn shutdown(&self) {
        if self.port.lock().await.take().is_some() {
            info!("Closed {}", self.config.device);
        }
    }

    fn stats(&self) -> &BackendStats {
        &self.stats
    }
}
