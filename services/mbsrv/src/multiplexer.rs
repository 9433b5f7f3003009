//! Connection multiplexer
//!
//! Owns the backend and the shared store and keeps sessions running until
//! shutdown. Network backends serve every accepted client on its own task;
//! the serial backend serves one session at a time and reopens the line
//! after each one ends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use errors::MbuResult;
use mbu_config::TransportKind;
use parking_lot::Mutex;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{Backend, BackendError, Connection};
use crate::session::{Session, SessionOptions, SessionSummary};
use crate::store::RegisterStore;

/// Delay before reopening a serial line that failed to open
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Pause after a failed accept so a persistent error does not spin
const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiplexerOptions {
    pub session: SessionOptions,
    /// Network only: clients beyond this count are closed right away
    pub max_connections: Option<usize>,
    pub retry_delay: Duration,
}

impl Default for MultiplexerOptions {
    fn default() -> Self {
        Self {
            session: SessionOptions::default(),
            max_connections: None,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Connections whose sessions are currently running
#[derive(Debug, Default)]
pub struct ActiveConnectionSet {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, String>>,
}

impl ActiveConnectionSet {
    pub fn insert(&self, peer: &str) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.entries.lock().insert(id, peer.to_string());
        id
    }

    pub fn remove(&self, id: u64) -> Option<String> {
        self.entries.lock().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// `(id, peer)` pairs ordered by id
    pub fn snapshot(&self) -> Vec<(u64, String)> {
        let mut entries: Vec<_> = self
            .entries
            .lock()
            .iter()
            .map(|(id, peer)| (*id, peer.clone()))
            .collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries
    }
}

/// Running session tasks and the active-set entry each one owns
#[derive(Default)]
struct SessionTasks {
    tasks: JoinSet<SessionSummary>,
    conn_ids: HashMap<Id, u64>,
}

pub struct Multiplexer<B> {
    backend: Arc<B>,
    store: Arc<RegisterStore>,
    options: MultiplexerOptions,
    active: Arc<ActiveConnectionSet>,
}

impl<B: Backend> Multiplexer<B> {
    pub fn new(backend: B, store: Arc<RegisterStore>, options: MultiplexerOptions) -> Self {
        Self {
            backend: Arc::new(backend),
            store,
            options,
            active: Arc::new(ActiveConnectionSet::default()),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn store(&self) -> &Arc<RegisterStore> {
        &self.store
    }

    /// Shared handle on the active set, usable while `run` is in progress
    pub fn active(&self) -> Arc<ActiveConnectionSet> {
        Arc::clone(&self.active)
    }

    pub fn active_connections(&self) -> Vec<(u64, String)> {
        self.active.snapshot()
    }

    /// Serve until `shutdown` is cancelled.
    ///
    /// Only a network listen failure is returned as an error; serial open
    /// failures are retried.
    pub async fn run(&self, shutdown: CancellationToken) -> MbuResult<()> {
        info!(
            transport = %self.backend.transport(),
            endpoint = %self.backend.endpoint(),
            "Multiplexer starting"
        );
        match self.backend.transport() {
            TransportKind::Network => self.run_network(shutdown).await,
            TransportKind::Serial => self.run_serial(shutdown).await,
        }
    }

    async fn run_network(&self, shutdown: CancellationToken) -> MbuResult<()> {
        self.backend.listen().await?;

        let mut sessions = SessionTasks::default();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.backend.accept_next() => match accepted {
                    Ok(conn) => self.admit(&mut sessions, conn, &shutdown).await,
                    Err(BackendError::NotListening) => {
                        warn!("Listener went away, stopping");
                        break;
                    },
                    Err(e) => {
                        warn!("{}", e);
                        tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
                    },
                },
                Some(joined) = sessions.tasks.join_next_with_id(),
                    if !sessions.tasks.is_empty() =>
                {
                    self.reap(&mut sessions, joined);
                },
            }
        }

        info!("Shutting down, {} active connection(s)", self.active.len());
        self.backend.shutdown().await;
        // Sessions hold child tokens of `shutdown` and stop on their own
        while let Some(joined) = sessions.tasks.join_next_with_id().await {
            self.reap(&mut sessions, joined);
        }
        info!("All connections closed");
        Ok(())
    }

    async fn admit(
        &self,
        sessions: &mut SessionTasks,
        conn: B::Conn,
        shutdown: &CancellationToken,
    ) {
        if let Some(max) = self.options.max_connections {
            if self.active.len() >= max {
                warn!(
                    "Rejecting {}: connection limit {} reached",
                    conn.peer(),
                    max
                );
                self.backend.teardown(conn).await;
                return;
            }
        }

        let id = self.active.insert(conn.peer());
        info!(conn_id = id, peer = %conn.peer(), "Client connected");

        let backend = Arc::clone(&self.backend);
        let store = Arc::clone(&self.store);
        let options = self.options.session;
        let token = shutdown.child_token();
        let task = sessions.tasks.spawn(async move {
            let (conn, summary) = Session::new(conn, store, options).run(token).await;
            backend.teardown(conn).await;
            summary
        });
        sessions.conn_ids.insert(task.id(), id);
    }

    /// Drop the active entry of a finished session task, panicked or not
    fn reap(
        &self,
        sessions: &mut SessionTasks,
        joined: Result<(Id, SessionSummary), JoinError>,
    ) {
        let task = match &joined {
            Ok((task, _)) => *task,
            Err(e) => e.id(),
        };
        if let Some(id) = sessions.conn_ids.remove(&task) {
            self.active.remove(id);
        }
        match joined {
            Ok((_, summary)) => info!(
                "Client {} disconnected ({} active)",
                summary.peer,
                self.active.len()
            ),
            Err(e) => error!("Session task failed: {}", e),
        }
    }

    async fn run_serial(&self, shutdown: CancellationToken) -> MbuResult<()> {
        while !shutdown.is_cancelled() {
            let opened = match self.backend.listen().await {
                Ok(()) => self.backend.accept_next().await,
                Err(e) => Err(e),
            };
            let conn = match opened {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("{}; retrying in {:?}", e, self.options.retry_delay);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.options.retry_delay) => continue,
                    }
                },
            };

            let id = self.active.insert(conn.peer());
            let session = Session::new(conn, Arc::clone(&self.store), self.options.session);
            let (conn, summary) = session.run(shutdown.child_token()).await;
            self.backend.teardown(conn).await;
            self.active.remove(id);
            debug!("Serial session {} ended: {}", id, summary.reason);
        }

        self.backend.shutdown().await;
        info!("Serial line released");
        Ok(())
    }
}
