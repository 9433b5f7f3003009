//! Frame-level reads and writes over any byte stream
//!
//! [`FramedStream`] buffers incoming bytes and hands out one complete frame
//! at a time. The idle timeout only covers the wait for the first byte of a
//! frame; once a frame has started the rest has to follow within the frame
//! timeout. On RTU that timeout is the inter-frame silence and a gap ends
//! the frame, whatever has arrived so far.

use std::io;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;

use crate::constants::{MAX_RTU_ADU_SIZE, MAX_TCP_ADU_SIZE};
use crate::error::ProtocolError;
use crate::frame::{frame_length, Framing, Role};

/// Time allowed for the remainder of a TCP frame once its first byte arrived
pub const TCP_FRAME_TIMEOUT: Duration = Duration::from_secs(1);

/// Silence that terminates an RTU frame
pub const RTU_FRAME_GAP: Duration = Duration::from_millis(50);

/// Result of waiting for one frame
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete frame
    Frame(Vec<u8>),
    /// Nothing arrived within the idle timeout
    Idle,
    /// The peer closed the stream
    Closed,
    /// Bytes that cannot be framed; fatal if the error says so
    Invalid(ProtocolError),
}

/// Byte stream with frame boundaries
#[derive(Debug)]
pub struct FramedStream<S> {
    stream: S,
    framing: Framing,
    role: Role,
    peer: String,
    buf: BytesMut,
    frame_timeout: Duration,
    closed: bool,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// `role` is the side whose frames this stream *reads*
    pub fn new(stream: S, framing: Framing, role: Role, peer: impl Into<String>) -> Self {
        let frame_timeout = match framing {
            Framing::Tcp => TCP_FRAME_TIMEOUT,
            Framing::Rtu => RTU_FRAME_GAP,
        };
        Self {
            stream,
            framing,
            role,
            peer: peer.into(),
            buf: BytesMut::with_capacity(MAX_TCP_ADU_SIZE),
            frame_timeout,
            closed: false,
        }
    }

    pub fn with_frame_timeout(mut self, frame_timeout: Duration) -> Self {
        self.frame_timeout = frame_timeout;
        self
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn take_frame(&mut self, len: usize) -> ReadOutcome {
        let frame = self.buf.split_to(len).to_vec();
        debug!(
            hex_data = %common::hex::encode_spaced(&frame),
            length = frame.len(),
            direction = "recv",
            peer = %self.peer,
            "Raw frame"
        );
        ReadOutcome::Frame(frame)
    }

    fn take_all(&mut self) -> ReadOutcome {
        let len = self.buf.len();
        self.take_frame(len)
    }

    /// Read more bytes within the frame timeout; `Ok(None)` on timeout
    async fn fill(&mut self) -> io::Result<Option<usize>> {
        match timeout(self.frame_timeout, self.stream.read_buf(&mut self.buf)).await {
            Err(_) => Ok(None),
            Ok(result) => result.map(Some),
        }
    }

    /// Wait for the next frame.
    pub async fn read_frame(&mut self, idle_timeout: Duration) -> io::Result<ReadOutcome> {
        if self.buf.is_empty() {
            match timeout(idle_timeout, self.stream.read_buf(&mut self.buf)).await {
                Err(_) => return Ok(ReadOutcome::Idle),
                Ok(Ok(0)) => return Ok(ReadOutcome::Closed),
                Ok(Ok(_)) => {},
                Ok(Err(e)) => return Err(e),
            }
        }

        loop {
            match frame_length(self.framing, self.role, &self.buf) {
                Ok(Some(len)) if self.buf.len() >= len => return Ok(self.take_frame(len)),
                Ok(_) => match self.fill().await? {
                    Some(0) => return Ok(ReadOutcome::Closed),
                    Some(_) => {},
                    None if self.framing == Framing::Rtu => return Ok(self.take_all()),
                    None => {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!(
                                "incomplete frame after {:?} ({} bytes buffered)",
                                self.frame_timeout,
                                self.buf.len()
                            ),
                        ))
                    },
                },
                Err(ProtocolError::UnknownLength(fc)) => {
                    debug!("Function 0x{:02X} has no known length, waiting for silence", fc);
                    loop {
                        match self.fill().await? {
                            Some(0) => return Ok(ReadOutcome::Closed),
                            Some(_) if self.buf.len() >= MAX_RTU_ADU_SIZE => {
                                return Ok(self.take_frame(MAX_RTU_ADU_SIZE))
                            },
                            Some(_) => {},
                            None => return Ok(self.take_all()),
                        }
                    }
                },
                Err(err) => {
                    // The buffered bytes cannot be trusted any more
                    self.buf.clear();
                    return Ok(ReadOutcome::Invalid(err));
                },
            }
        }
    }

    /// Write one complete frame
    pub async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.stream.write_all(frame).await?;
        self.stream.flush().await?;
        debug!(
            hex_data = %common::hex::encode_spaced(frame),
            length = frame.len(),
            direction = "send",
            peer = %self.peer,
            "Raw frame"
        );
        Ok(())
    }

    /// Drop any partial input, used after a frame was rejected on RTU
    pub fn discard_input(&mut self) {
        self.buf.clear();
    }

    /// Shut the stream down; later calls do nothing
    pub async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.buf.clear();
        self.stream.shutdown().await
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::frame::{encode_adu, AduHeader};
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_tcp_frame_split_across_writes() {
        let (client, server) = duplex(1024);
        let mut framed = FramedStream::new(server, Framing::Tcp, Role::Request, "test");
        let frame = encode_adu(
            AduHeader::Tcp {
                transaction_id: 1,
                unit_id: 1,
            },
            &[0x03, 0x00, 0x00, 0x00, 0x02],
        );

        let mut client = client;
        let head = frame[..4].to_vec();
        let tail = frame[4..].to_vec();
        let writer = tokio::spawn(async move {
            client.write_all(&head).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            client.write_all(&tail).await.unwrap();
            client
        });

        let outcome = framed.read_frame(Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcome, ReadOutcome::Frame(frame));
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_two_frames_in_one_write() {
        let (mut client, server) = duplex(1024);
        let mut framed = FramedStream::new(server, Framing::Rtu, Role::Request, "line");
        let first = encode_adu(AduHeader::Rtu { unit_id: 1 }, &[0x01, 0x00, 0x00, 0x00, 0x08]);
        let second = encode_adu(AduHeader::Rtu { unit_id: 1 }, &[0x06, 0x00, 0x01, 0x00, 0x07]);
        let mut both = first.clone();
        both.extend_from_slice(&second);
        client.write_all(&both).await.unwrap();

        let idle = Duration::from_millis(200);
        assert_eq!(framed.read_frame(idle).await.unwrap(), ReadOutcome::Frame(first));
        assert_eq!(framed.read_frame(idle).await.unwrap(), ReadOutcome::Frame(second));
    }

    #[tokio::test]
    async fn test_idle_and_closed() {
        let (client, server) = duplex(64);
        let mut framed = FramedStream::new(server, Framing::Tcp, Role::Request, "idle");
        assert_eq!(
            framed.read_frame(Duration::from_millis(20)).await.unwrap(),
            ReadOutcome::Idle
        );
        drop(client);
        assert_eq!(
            framed.read_frame(Duration::from_millis(20)).await.unwrap(),
            ReadOutcome::Closed
        );
    }

    #[tokio::test]
    async fn test_bad_mbap_header_is_invalid() {
        let (mut client, server) = duplex(64);
        let mut framed = FramedStream::new(server, Framing::Tcp, Role::Request, "bad");
        client
            .write_all(&[0x00, 0x01, 0x12, 0x34, 0x00, 0x06, 0x01, 0x03])
            .await
            .unwrap();
        match framed.read_frame(Duration::from_millis(200)).await.unwrap() {
            ReadOutcome::Invalid(err) => assert!(err.is_fatal()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rtu_unknown_function_ends_on_silence() {
        let (mut client, server) = duplex(64);
        let mut framed = FramedStream::new(server, Framing::Rtu, Role::Request, "line")
            .with_frame_timeout(Duration::from_millis(10));
        client.write_all(&[0x01, 0x2B, 0x0E, 0x01, 0x00]).await.unwrap();
        let outcome = framed.read_frame(Duration::from_millis(200)).await.unwrap();
        assert_eq!(outcome, ReadOutcome::Frame(vec![0x01, 0x2B, 0x0E, 0x01, 0x00]));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (_client, server) = duplex(64);
        let mut framed = FramedStream::new(server, Framing::Tcp, Role::Response, "peer");
        framed.close().await.unwrap();
        assert!(framed.is_closed());
        framed.close().await.unwrap();
    }
}
