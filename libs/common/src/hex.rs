//! Hex encoding helpers for frame dumps

use std::fmt::Write;

/// Encode bytes as space separated uppercase pairs
/// Example: [0x01, 0x03, 0x00] -> "01 03 00"
pub fn encode_spaced(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            result.push(' ');
        }
        // Writing to String buffer is infallible
        let _ = write!(&mut result, "{:02X}", byte);
    }
    result
}
