//! Network backend

use std::net::SocketAddr;

use async_trait::async_trait;
use mbu_config::{NetworkConfig, TransportKind};
use mbu_protocol::{FramedStream, Framing, Role};
use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{Backend, BackendError, BackendStats, Connection};

/// Pending-connection queue length passed to `listen(2)`
pub const DEFAULT_BACKLOG: u32 = 16;

#[derive(Debug)]
pub struct NetworkBackend {
    config: NetworkConfig,
    backlog: u32,
    listener: Mutex<Option<TcpListener>>,
    local_addr: parking_lot::Mutex<Option<SocketAddr>>,
    stats: BackendStats,
}

impl NetworkBackend {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            backlog: DEFAULT_BACKLOG,
            listener: Mutex::new(None),
            local_addr: parking_lot::Mutex::new(None),
            stats: BackendStats::default(),
        }
    }

    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog.max(1);
        self
    }

    /// Bound address once listening; resolves port 0 to the real port
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    async fn bind(&self) -> Result<TcpListener, BackendError> {
        let endpoint = self.config.socket_addr_string();
        let listen_failed = |source| BackendError::ListenFailed {
            endpoint: endpoint.clone(),
            source,
        };

        let addr = lookup_host(&endpoint)
            .await
            .map_err(listen_failed)?
            .next()
            .ok_or_else(|| {
                listen_failed(std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    "address did not resolve",
                ))
            })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(listen_failed)?;
        socket.set_reuseaddr(true).map_err(listen_failed)?;
        socket.bind(addr).map_err(listen_failed)?;
        socket.listen(self.backlog).map_err(listen_failed)
    }
}

#[async_trait]
impl Backend for NetworkBackend {
    type Conn = FramedStream<TcpStream>;

    fn transport(&self) -> TransportKind {
        TransportKind::Network
    }

    fn endpoint(&self) -> String {
        self.config.socket_addr_string()
    }

    async fn listen(&self) -> Result<(), BackendError> {
        let mut slot = self.listener.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let listener = self.bind().await?;
        let local = listener.local_addr().ok();
        *self.local_addr.lock() = local;
        *slot = Some(listener);
        self.stats.record_listen();

        info!(
            "Listening on {} (backlog {})",
            local.map_or_else(|| self.endpoint(), |a| a.to_string()),
            self.backlog
        );
        Ok(())
    }

    async fn accept_next(&self) -> Result<Self::Conn, BackendError> {
        let slot = self.listener.lock().await;
        let listener = slot.as_ref().ok_or(BackendError::NotListening)?;
        let (stream, addr) = listener.accept().await.map_err(BackendError::AcceptFailed)?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }
        self.stats.record_accept();
        Ok(FramedStream::new(
            stream,
            Framing::Tcp,
            Role::Request,
            addr.to_string(),
        ))
    }

    async fn teardown(&self, mut conn: Self::Conn) {
        if let Err(e) = conn.close().await {
            debug!("Closing {} reported: {}", Connection::peer(&conn), e);
        }
        self.stats.record_teardown();
    }

    async fn shutdown(&self) {
        if self.listener.lock().await.take().is_some() {
            info!("Listener on {} closed", self.endpoint());
        }
    }

    fn stats(&self) -> &BackendStats {
        &self.stats
    }
}
