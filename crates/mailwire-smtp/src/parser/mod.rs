//! Streaming SMTP command and reply parsers.
//!
//! The transport hands over arbitrary byte chunks, so both parsers work on
//! a growable [`BytesMut`] and only consume bytes once a complete line is
//! present. Calling `parse` again after `Ok(None)` with more data appended is
//! always safe.
//!
//! Lines end with LF; a preceding CR is stripped. The maximum line length
//! includes the line terminator.

mod command;
mod reply;

pub use command::CommandParser;
pub use reply::ReplyParser;

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};

/// RFC 5321 limit for a text line, CRLF included.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1000;

/// Splits the next complete line off `buf`, without its terminator.
///
/// Returns `Ok(None)` if no terminator has arrived yet. Fails once the
/// buffered bytes can no longer form a line within `max_line_length`.
pub(crate) fn take_line(buf: &mut BytesMut, max_line_length: usize) -> Result<Option<BytesMut>> {
    let Some(pos) = buf.iter().position(|&b| b == b'\n') else {
        if buf.len() >= max_line_length {
            return Err(Error::LineTooLong {
                limit: max_line_length,
            });
        }
        return Ok(None);
    };

    if pos + 1 > max_line_length {
        // Drop the offending line so the stream stays framed.
        let _ = buf.split_to(pos + 1);
        return Err(Error::LineTooLong {
            limit: max_line_length,
        });
    }

    let mut line = buf.split_to(pos + 1);
    line.truncate(pos);
    if line.last() == Some(&b'\r') {
        line.truncate(pos - 1);
    }
    Ok(Some(line))
}

/// Decodes ISO-8859-1 bytes; every byte maps to one `char`.
pub(crate) fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Encodes text as ISO-8859-1, replacing unrepresentable characters with `?`.
pub(crate) fn encode_latin1(text: &str, out: &mut BytesMut) {
    for c in text.chars() {
        out.put_u8(u8::try_from(u32::from(c)).unwrap_or(b'?'));
    }
}
