// SPDX-License-Identifier: GPL-3.0-or-later

//! TLV (type-length-value) framing shared by every RPC this crate makes:
//! a 4-byte big-endian length prefix followed by the JSON payload.
//!
//! Grounded on the teacher's `intercept::tcp::EventWireSerializer`: "the
//! type is always 0, the length is a 4-byte big-endian integer, and the
//! value is the JSON representation of the event." We drop the constant
//! type tag (every connection here carries exactly one request and one
//! reply, so there is nothing left to discriminate) and generalize the
//! payload from a fixed `Event` to any `Serialize + DeserializeOwned`.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};
use thiserror::Error;

/// Errors reading or writing a framed message.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("I/O error on the wire: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Read one length-prefixed JSON payload.
pub fn read_frame<T: DeserializeOwned>(reader: &mut impl Read) -> Result<T, WireError> {
    let mut length_bytes = [0u8; 4];
    reader.read_exact(&mut length_bytes)?;
    let length = u32::from_be_bytes(length_bytes) as usize;
    let mut buffer = vec![0u8; length];
    reader.read_exact(&mut buffer)?;
    Ok(serde_json::from_slice(&buffer)?)
}

/// Write one length-prefixed JSON payload.
pub fn write_frame<T: Serialize>(writer: &mut impl Write, value: &T) -> Result<(), WireError> {
    let bytes = serde_json::to_vec(value)?;
    let length = u32::try_from(bytes.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "payload too large to frame"))?;
    writer.write_all(&length.to_be_bytes())?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn a_value_round_trips_through_a_frame() {
        let mut buffer = Cursor::new(Vec::new());
        write_frame(&mut buffer, &("hello".to_string(), 42i32)).unwrap();
        buffer.set_position(0);
        let (text, number): (String, i32) = read_frame(&mut buffer).unwrap();
        assert_eq!(text, "hello");
        assert_eq!(number, 42);
    }
}
