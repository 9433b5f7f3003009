//! Operator-facing result lines

use mbu_protocol::Response;

use crate::functions::Payload;
use crate::request::RequestPlan;

pub const FAILURE_LINE: &str = "ERROR occured!";

/// `--debug` echo of the values about to be written; `None` for reads
pub fn format_write_data(plan: &RequestPlan) -> Option<String> {
    if !plan.function.is_write {
        return None;
    }
    let values = match plan.function.payload {
        Payload::Single => plan
            .write_values
            .first()
            .map(|v| format!("0x{:x}", v))
            .unwrap_or_default(),
        Payload::Bits => plan
            .write_values
            .iter()
            .map(|v| format!("0x{:02x} ", u8::from(*v != 0)))
            .collect(),
        Payload::Words => plan
            .write_values
            .iter()
            .map(|v| format!("0x{:04x} ", v))
            .collect(),
    };
    Some(format!("Data to write: {}", values))
}

fn bit_list(values: &[bool]) -> String {
    values
        .iter()
        .map(|bit| format!("0x{:02x} ", u8::from(*bit)))
        .collect()
}

fn word_list(values: &[u16]) -> String {
    values.iter().map(|word| format!("0x{:04x} ", word)).collect()
}

/// Success text, or `None` when the reply carries the wrong element count
pub fn format_success(plan: &RequestPlan, response: &Response) -> Option<String> {
    let count = plan.expected_count();
    if response.count() != count {
        return None;
    }

    Some(match response {
        Response::ReadCoils(bits) | Response::ReadDiscreteInputs(bits) => {
            format!("SUCCESS: read {} of elements:\n\tData: {}", count, bit_list(bits))
        },
        Response::ReadHoldingRegisters(words) | Response::ReadInputRegisters(words) => {
            format!("SUCCESS: read {} of elements:\n\tData: {}", count, word_list(words))
        },
        Response::WriteSingleCoil { .. }
        | Response::WriteSingleRegister { .. }
        | Response::WriteMultipleCoils { .. }
        | Response::WriteMultipleRegisters { .. } => {
            format!("SUCCESS: written {} elements!", count)
        },
    })
}
