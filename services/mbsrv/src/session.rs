//! Per-connection request/response loop

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use mbu_protocol::constants::BROADCAST_UNIT_ID;
use mbu_protocol::{decode_adu, encode_adu, Framing, ProtocolError, ReadOutcome};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::Connection;
use crate::dispatch::handle_pdu;
use crate::store::RegisterStore;

/// Default idle read timeout
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1000);

/// Loop phase; a session is closed once [`Session::run`] returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Reading,
    Dispatching,
    Writing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// How long one read waits for the first byte before polling shutdown again
    pub read_timeout: Duration,
    /// RTU only: answer just this unit id (broadcasts are still applied)
    pub unit_filter: Option<u8>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            unit_filter: None,
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    Shutdown,
    Io(String),
    Protocol(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "peer closed the connection"),
            Self::Shutdown => write!(f, "server shutdown"),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub peer: String,
    pub frames_in: u64,
    pub frames_out: u64,
    /// Phase the loop was in when it stopped
    pub ended_in: SessionState,
    pub reason: CloseReason,
}

/// Serves requests on one connection until it ends.
///
/// The session never releases the connection itself; [`Session::run`] hands
/// it back so the backend can tear it down.
pub struct Session<C> {
    conn: C,
    store: Arc<RegisterStore>,
    options: SessionOptions,
    state: SessionState,
    frames_in: u64,
    frames_out: u64,
}

impl<C: Connection> Session<C> {
    pub fn new(conn: C, store: Arc<RegisterStore>, options: SessionOptions) -> Self {
        Self {
            conn,
            store,
            options,
            state: SessionState::Idle,
            frames_in: 0,
            frames_out: 0,
        }
    }

    /// Run until the peer leaves, a fatal error occurs or `shutdown` fires
    pub async fn run(mut self, shutdown: CancellationToken) -> (C, SessionSummary) {
        debug!(peer = %self.conn.peer(), "Session started");

        let reason = loop {
            self.state = SessionState::Reading;
            let read = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                read = self.conn.read_frame(self.options.read_timeout) => Some(read),
            };

            let frame = match read {
                None => break CloseReason::Shutdown,
                Some(Ok(ReadOutcome::Frame(frame))) => frame,
                Some(Ok(ReadOutcome::Idle)) => {
                    self.state = SessionState::Idle;
                    continue;
                },
                Some(Ok(ReadOutcome::Closed)) => break CloseReason::PeerClosed,
                Some(Ok(ReadOutcome::Invalid(err))) => {
                    if err.is_fatal() {
                        break CloseReason::Protocol(err.to_string());
                    }
                    warn!(peer = %self.conn.peer(), "Discarding invalid frame: {}", err);
                    self.conn.discard_input();
                    continue;
                },
                Some(Err(e)) => break CloseReason::Io(e.to_string()),
            };
            self.frames_in += 1;

            self.state = SessionState::Dispatching;
            let reply = match self.process(&frame) {
                Ok(Some(reply)) => reply,
                Ok(None) => continue,
                Err(err) => break CloseReason::Protocol(err.to_string()),
            };

            // A peer that stops reading must not hold up shutdown
            self.state = SessionState::Writing;
            let written = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                written = self.conn.write_frame(&reply) => Some(written),
            };
            match written {
                None => break CloseReason::Shutdown,
                Some(Err(e)) => break CloseReason::Io(e.to_string()),
                Some(Ok(())) => self.frames_out += 1,
            }
        };

        let summary = SessionSummary {
            peer: self.conn.peer().to_string(),
            frames_in: self.frames_in,
            frames_out: self.frames_out,
            ended_in: self.state,
            reason,
        };
        info!(
            peer = %summary.peer,
            frames_in = summary.frames_in,
            frames_out = summary.frames_out,
            ended_in = ?summary.ended_in,
            "Session ended: {}",
            summary.reason
        );
        (self.conn, summary)
    }

    /// Turn one received frame into the reply frame, if any.
    ///
    /// `Err` only for errors after which the stream cannot be trusted.
    fn process(&mut self, frame: &[u8]) -> Result<Option<Vec<u8>>, ProtocolError> {
        let framing = self.conn.framing();
        let adu = match decode_adu(framing, frame) {
            Ok(adu) => adu,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(peer = %self.conn.peer(), "Dropping frame: {}", err);
                self.conn.discard_input();
                return Ok(None);
            },
        };

        let unit = adu.header.unit_id();
        let broadcast = framing == Framing::Rtu && unit == BROADCAST_UNIT_ID;
        if framing == Framing::Rtu && !broadcast {
            if let Some(filter) = self.options.unit_filter {
                if unit != filter {
                    debug!("Ignoring request for unit {}", unit);
                    return Ok(None);
                }
            }
        }

        let Some(reply_pdu) = handle_pdu(&adu.pdu, &self.store) else {
            return Ok(None);
        };
        if broadcast {
            debug!("Broadcast applied, no reply");
            return Ok(None);
        }
        Ok(Some(encode_adu(adu.header, &reply_pdu)))
    }
}
