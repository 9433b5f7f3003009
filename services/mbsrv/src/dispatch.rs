//! Applies decoded requests to the register store
//!
//! No I/O happens here; given the store's contents the result is fully
//! determined by the request.

use mbu_protocol::pdu::encode_exception;
use mbu_protocol::{ExceptionCode, ProtocolError, Request, Response};
use tracing::{debug, warn};

use crate::store::{Bank, RegisterStore, StoreError};

impl From<StoreError> for ExceptionCode {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Range { .. } => ExceptionCode::IllegalDataAddress,
            StoreError::NotPermitted { .. } => ExceptionCode::IllegalFunction,
        }
    }
}

/// Run one request against the store.
///
/// Store failures become the matching protocol exception.
pub fn apply(request: &Request, store: &RegisterStore) -> Result<Response, ExceptionCode> {
    let result = match request {
        Request::ReadCoils { start, count } => store
            .read_bits(Bank::Coils, usize::from(*start), usize::from(*count))
            .map(Response::ReadCoils),
        Request::ReadDiscreteInputs { start, count } => store
            .read_bits(Bank::DiscreteInputs, usize::from(*start), usize::from(*count))
            .map(Response::ReadDiscreteInputs),
        Request::ReadHoldingRegisters { start, count } => store
            .read_words(Bank::HoldingRegisters, usize::from(*start), usize::from(*count))
            .map(Response::ReadHoldingRegisters),
        Request::ReadInputRegisters { start, count } => store
            .read_words(Bank::InputRegisters, usize::from(*start), usize::from(*count))
            .map(Response::ReadInputRegisters),
        Request::WriteSingleCoil { address, value } => store
            .write_bits(Bank::Coils, usize::from(*address), &[*value])
            .map(|()| Response::WriteSingleCoil {
                address: *address,
                value: *value,
            }),
        Request::WriteSingleRegister { address, value } => store
            .write_words(Bank::HoldingRegisters, usize::from(*address), &[*value])
            .map(|()| Response::WriteSingleRegister {
                address: *address,
                value: *value,
            }),
        Request::WriteMultipleCoils { start, values } => store
            .write_bits(Bank::Coils, usize::from(*start), values)
            .map(|()| Response::WriteMultipleCoils {
                start: *start,
                count: values.len() as u16,
            }),
        Request::WriteMultipleRegisters { start, values } => store
            .write_words(Bank::HoldingRegisters, usize::from(*start), values)
            .map(|()| Response::WriteMultipleRegisters {
                start: *start,
                count: values.len() as u16,
            }),
    };

    result.map_err(|err| {
        debug!("Request rejected by store: {}", err);
        ExceptionCode::from(err)
    })
}

/// Decode a request PDU, apply it, encode the reply PDU.
///
/// `None` means the PDU was too damaged to answer.
pub fn handle_pdu(pdu: &[u8], store: &RegisterStore) -> Option<Vec<u8>> {
    let function = pdu.first().copied()?;

    match Request::decode(pdu) {
        Ok(request) => Some(match apply(&request, store) {
            Ok(response) => response.encode(),
            Err(code) => encode_exception(function, code),
        }),
        Err(ProtocolError::IllegalFunction(fc)) => {
            debug!("Unsupported function 0x{:02X}", fc);
            Some(encode_exception(function, ExceptionCode::IllegalFunction))
        },
        Err(ProtocolError::IllegalDataValue { reason, .. }) => {
            debug!("Illegal data value for 0x{:02X}: {}", function, reason);
            Some(encode_exception(function, ExceptionCode::IllegalDataValue))
        },
        Err(err) => {
            warn!("Dropping request 0x{:02X}: {}", function, err);
            None
        },
    }
}
