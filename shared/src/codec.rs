//! Line codec for the sensor's serial link
//!
//! The sensor speaks plain text, one reading per line:
//! ```text
//! 42\n
//! 57\r\n
//! ```
//!
//! Both `\n` and `\r` end a line, so `\r\n` yields a single line followed by
//! an empty one that the decoder drops.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::defaults::MAX_LINE_LEN;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug, PartialEq, Eq)]
pub enum LineError {
    #[error("Line too long: {len} bytes without terminator (max: {MAX_LINE_LEN})")]
    LineTooLong { len: usize },

    #[error("Outgoing text contains a line terminator")]
    EmbeddedTerminator,
}

fn is_terminator(b: u8) -> bool {
    b == b'\n' || b == b'\r'
}

/// Encode a single line, appending `\n`
pub fn encode_line(text: &str) -> Result<Bytes, LineError> {
    if text.bytes().any(is_terminator) {
        return Err(LineError::EmbeddedTerminator);
    }

    let mut buf = BytesMut::with_capacity(text.len() + 1);
    buf.put_slice(text.as_bytes());
    buf.put_u8(b'\n');
    Ok(buf.freeze())
}

/// Try to decode one line from a buffer
///
/// Returns:
/// - `Ok(Some(line))` if a complete, non-empty line was decoded
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if the pending data can never form a valid line
pub fn decode(buf: &mut BytesMut) -> Result<Option<String>, LineError> {
    loop {
        let Some(pos) = buf.iter().position(|&b| is_terminator(b)) else {
            if buf.len() > MAX_LINE_LEN {
                return Err(LineError::LineTooLong { len: buf.len() });
            }
            return Ok(None);
        };

        let line = buf.split_to(pos);
        buf.advance(1);

        if line.is_empty() {
            continue;
        }

        if line.len() > MAX_LINE_LEN {
            return Err(LineError::LineTooLong { len: line.len() });
        }

        return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
    }
}

/// Decoder state for streaming decoding
#[derive(Debug, Default)]
pub struct LineDecoder {
    /// Bytes received since the last complete line
    buffer: BytesMut,
}

impl LineDecoder {
    /// Create a new line decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next line from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete lines
    pub fn decode_next(&mut self) -> Result<Option<String>, LineError> {
        decode(&mut self.buffer)
    }

    /// Bytes waiting for a terminator
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
