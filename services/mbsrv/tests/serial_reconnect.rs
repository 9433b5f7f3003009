//! Serial session lifecycle against an in-memory line

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mbsrv::backend::BackendStats;
use mbsrv::{Backend, BackendError, BankSizes, Multiplexer, MultiplexerOptions, RegisterStore};
use mbu_config::TransportKind;
use mbu_protocol::{
    decode_adu, encode_adu, AduHeader, FramedStream, Framing, ReadOutcome, Request, Response, Role,
};
use parking_lot::Mutex;
use tokio::io::{duplex, DuplexStream};
use tokio_util::sync::CancellationToken;

/// Hands out one prepared duplex stream per successful `listen`
struct FakeLine {
    lines: Mutex<VecDeque<DuplexStream>>,
    opened: Mutex<Option<DuplexStream>>,
    failures_left: AtomicU32,
    stats: BackendStats,
}

impl FakeLine {
    fn new(lines: Vec<DuplexStream>, failures: u32) -> Self {
        Self {
            lines: Mutex::new(lines.into()),
            opened: Mutex::new(None),
            failures_left: AtomicU32::new(failures),
            stats: BackendStats::default(),
        }
    }

    fn open_failed(reason: &str) -> BackendError {
        BackendError::ListenFailed {
            endpoint: "fake".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, reason.to_string()),
        }
    }
}

#[async_trait]
impl Backend for FakeLine {
    type Conn = FramedStream<DuplexStream>;

    fn transport(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn endpoint(&self) -> String {
        "fake".to_string()
    }

    async fn listen(&self) -> Result<(), BackendError> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Self::open_failed("device busy"));
        }
        let line = self
            .lines
            .lock()
            .pop_front()
            .ok_or_else(|| Self::open_failed("no more lines"))?;
        *self.opened.lock() = Some(line);
        self.stats.record_listen();
        Ok(())
    }

    async fn accept_next(&self) -> Result<Self::Conn, BackendError> {
        let line = self.opened.lock().take().ok_or(BackendError::NotListening)?;
        self.stats.record_accept();
        Ok(FramedStream::new(line, Framing::Rtu, Role::Request, "fake"))
    }

    async fn teardown(&self, mut conn: Self::Conn) {
        let _ = mbsrv::Connection::close(&mut conn).await;
        self.stats.record_teardown();
    }

    async fn shutdown(&self) {
        self.opened.lock().take();
    }

    fn stats(&self) -> &BackendStats {
        &self.stats
    }
}

async fn call(line: &mut FramedStream<DuplexStream>, request: &Request) -> Response {
    let header = AduHeader::Rtu { unit_id: 1 };
    line.write_frame(&encode_adu(header, &request.encode()))
        .await
        .unwrap();
    match line.read_frame(Duration::from_secs(2)).await.unwrap() {
        ReadOutcome::Frame(frame) => {
            let adu = decode_adu(Framing::Rtu, &frame).unwrap();
            assert_eq!(adu.header, header);
            Response::decode(request, &adu.pdu).unwrap()
        },
        other => panic!("no reply: {:?}", other),
    }
}

#[tokio::test]
async fn test_reopens_line_after_session_ends() {
    let (first_client, first_server) = duplex(512);
    let (second_client, second_server) = duplex(512);
    let backend = FakeLine::new(vec![first_server, second_server], 1);

    let mut options = MultiplexerOptions::default();
    options.session.read_timeout = Duration::from_millis(20);
    options.retry_delay = Duration::from_millis(10);

    let store = Arc::new(RegisterStore::new(BankSizes::default()));
    let mux = Arc::new(Multiplexer::new(backend, store, options));
    let shutdown = CancellationToken::new();
    let handle = {
        let mux = Arc::clone(&mux);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { mux.run(shutdown).await })
    };

    let mut first = FramedStream::new(first_client, Framing::Rtu, Role::Response, "master");
    let reply = call(
        &mut first,
        &Request::WriteSingleRegister {
            address: 10,
            value: 0xBEEF,
        },
    )
    .await;
    assert_eq!(
        reply,
        Response::WriteSingleRegister {
            address: 10,
            value: 0xBEEF
        }
    );
    // Line drops: the session ends and the device is opened again
    drop(first);

    let mut second = FramedStream::new(second_client, Framing::Rtu, Role::Response, "master");
    let reply = call(
        &mut second,
        &Request::ReadHoldingRegisters {
            start: 10,
            count: 1,
        },
    )
    .await;
    assert_eq!(reply, Response::ReadHoldingRegisters(vec![0xBEEF]));

    shutdown.cancel();
    handle.await.unwrap().unwrap();

    let stats = mux.backend().stats();
    assert_eq!(stats.listens(), 2);
    assert_eq!(stats.accepted(), 2);
    assert_eq!(stats.torn_down(), 2);
    assert!(mux.active_connections().is_empty());
}

#[tokio::test]
async fn test_shutdown_while_retrying() {
    let backend = FakeLine::new(Vec::new(), 0);
    let mut options = MultiplexerOptions::default();
    options.retry_delay = Duration::from_secs(60);

    let mux = Multiplexer::new(
        backend,
        Arc::new(RegisterStore::new(BankSizes::default())),
        options,
    );
    let shutdown = CancellationToken::new();
    let cancel = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    tokio::time::timeout(Duration::from_secs(5), mux.run(shutdown))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mux.backend().stats().listens(), 0);
}
