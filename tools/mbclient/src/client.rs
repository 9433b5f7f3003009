//! Issues one request and waits for the matching reply

use std::time::Duration;

use errors::{ErrorExt, MbuError, MbuResult};
use mbu_config::TransportConfig;
use mbu_protocol::{
    decode_adu, encode_adu, exception_description, AduHeader, FramedStream, Framing,
    ProtocolError, ReadOutcome, Request, Response, Role, TransactionIds,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, warn};

use crate::request::RequestPlan;

fn protocol_error(err: ProtocolError) -> MbuError {
    match err {
        ProtocolError::Exception { function, code } => MbuError::Exception {
            function,
            code,
            description: exception_description(code).to_string(),
        },
        other => MbuError::protocol(other.to_string()),
    }
}

/// Client side of one link
pub struct Client<S> {
    stream: FramedStream<S>,
    unit_id: u8,
    ids: TransactionIds,
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, framing: Framing, unit_id: u8, peer: impl Into<String>) -> Self {
        Self {
            stream: FramedStream::new(stream, framing, Role::Response, peer),
            unit_id,
            ids: TransactionIds::default(),
        }
    }

    fn header(&mut self) -> AduHeader {
        match self.stream.framing() {
            Framing::Tcp => AduHeader::Tcp {
                transaction_id: self.ids.next_id(),
                unit_id: self.unit_id,
            },
            Framing::Rtu => AduHeader::Rtu {
                unit_id: self.unit_id,
            },
        }
    }

    /// Send `request` and decode the reply.
    ///
    /// TCP replies with a stale transaction id are skipped; the whole
    /// exchange must finish within `response_timeout`.
    pub async fn call(
        &mut self,
        request: &Request,
        response_timeout: Duration,
    ) -> MbuResult<Response> {
        let header = self.header();
        self.stream
            .write_frame(&encode_adu(header, &request.encode()))
            .await?;

        match timeout(response_timeout, self.exchange(header, request, response_timeout)).await {
            Ok(result) => result,
            Err(_) => Err(MbuError::timeout(format!(
                "no complete response within {} ms",
                response_timeout.as_millis()
            ))),
        }
    }

    async fn exchange(
        &mut self,
        header: AduHeader,
        request: &Request,
        response_timeout: Duration,
    ) -> MbuResult<Response> {
        loop {
            let frame = match self.stream.read_frame(response_timeout).await? {
                ReadOutcome::Frame(frame) => frame,
                ReadOutcome::Idle => {
                    return Err(MbuError::timeout(format!(
                        "no response within {} ms",
                        response_timeout.as_millis()
                    )))
                },
                ReadOutcome::Closed => return Err(MbuError::io("connection closed by peer")),
                ReadOutcome::Invalid(err) => return Err(protocol_error(err)),
            };

            let adu = decode_adu(self.stream.framing(), &frame).map_err(protocol_error)?;
            if adu.header == header {
                return Response::decode(request, &adu.pdu).map_err(protocol_error);
            }
            if matches!(header, AduHeader::Tcp { .. }) {
                warn!("Skipping reply for {:?}, waiting for {:?}", adu.header, header);
                continue;
            }
            return Err(MbuError::protocol(format!(
                "reply from unit {} to a request for unit {}",
                adu.header.unit_id(),
                header.unit_id()
            )));
        }
    }

    pub async fn close(mut self) {
        if let Err(e) = self.stream.close().await {
            debug!("Close reported: {}", e);
        }
    }
}

async fn execute<S>(mut client: Client<S>, plan: &RequestPlan) -> MbuResult<Response>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let result = client.call(&plan.request, plan.timeout).await;
    client.close().await;
    result
}

/// Open the link described by the plan, send the request, close the link
pub async fn run(plan: &RequestPlan) -> MbuResult<Response> {
    debug!("Sending {} over {}", plan.function.code, plan.transport);
    match &plan.transport {
        TransportConfig::Network(network) => {
            let endpoint = network.socket_addr_string();
            let stream = timeout(plan.timeout, TcpStream::connect(endpoint.as_str()))
                .await
                .map_err(|_| MbuError::timeout(format!("Connection to {} timed out", endpoint)))?
                .io_context(&format!("Connection to {} failed", endpoint))?;
            let _ = stream.set_nodelay(true);
            execute(Client::new(stream, Framing::Tcp, plan.unit_id, endpoint), plan).await
        },
        TransportConfig::Serial(serial) => {
            #[allow(unused_mut)]
            let mut port = serial
                .port_builder(plan.timeout)
                .open_native_async()
                .io_context(&format!("Cannot open {}", serial.device))?;
            #[cfg(unix)]
            if let Err(e) = port.set_exclusive(false) {
                warn!("Failed to clear exclusive mode on {}: {}", serial.device, e);
            }
            execute(Client::new(port, Framing::Rtu, plan.unit_id, serial.device.clone()), plan).await
        },
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    /// Minimal responder on the other end of a duplex pipe
    async fn reply_with(server: DuplexStream, framing: Framing, replies: Vec<Vec<u8>>) {
        let mut stream = FramedStream::new(server, framing, Role::Request, "server");
        let _ = stream.read_frame(Duration::from_secs(2)).await.unwrap();
        for reply in replies {
            stream.write_frame(&reply).await.unwrap();
        }
        // Keep the pipe open until the client is done
        let _ = stream.read_frame(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_tcp_call_skips_stale_transaction() {
        let (client_side, server_side) = duplex(512);
        let request = Request::ReadHoldingRegisters { start: 0, count: 1 };
        let pdu = Response::ReadHoldingRegisters(vec![0x2A]).encode();
        let stale = encode_adu(
            AduHeader::Tcp {
                transaction_id: 99,
                unit_id: 1,
            },
            &pdu,
        );
        let good = encode_adu(
            AduHeader::Tcp {
                transaction_id: 1,
                unit_id: 1,
            },
            &pdu,
        );
        let server = tokio::spawn(reply_with(server_side, Framing::Tcp, vec![stale, good]));

        let mut client = Client::new(client_side, Framing::Tcp, 1, "test");
        let response = client.call(&request, Duration::from_secs(1)).await.unwrap();
        assert_eq!(response, Response::ReadHoldingRegisters(vec![0x2A]));
        client.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_rtu_exception_maps_to_error() {
        let (client_side, server_side) = duplex(512);
        let reply = encode_adu(AduHeader::Rtu { unit_id: 3 }, &[0x81, 0x02]);
        let server = tokio::spawn(reply_with(server_side, Framing::Rtu, vec![reply]));

        let mut client = Client::new(client_side, Framing::Rtu, 3, "test");
        let err = client
            .call(&Request::ReadCoils { start: 95, count: 10 }, Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            MbuError::Exception { function, code, .. } => {
                assert_eq!(function, 0x01);
                assert_eq!(code, 0x02);
            },
            other => panic!("unexpected {:?}", other),
        }
        client.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_no_reply_times_out() {
        let (client_side, _server_side) = duplex(512);
        let mut client = Client::new(client_side, Framing::Tcp, 1, "test");
        let err = client
            .call(&Request::ReadCoils { start: 0, count: 1 }, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, MbuError::Timeout(_)));
    }
}
