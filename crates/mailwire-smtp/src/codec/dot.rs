//! Dot-stuffing for message content (RFC 5321 section 4.5.2).
//!
//! On the wire a line consisting of a single `.` ends the message, so any
//! content line starting with `.` gets one extra `.` prepended. The receiver
//! removes it again.

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};

/// End-of-data marker.
pub const TERMINATOR: &[u8] = b".\r\n";

/// A received content line after unstuffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line<'a> {
    /// Content, without the line terminator.
    Content(&'a [u8]),
    /// The end-of-data marker.
    End,
}

/// Unstuffs one received line (terminator already stripped).
#[must_use]
pub fn unstuff_line(line: &[u8]) -> Line<'_> {
    match line {
        b"." => Line::End,
        [b'.', rest @ ..] => Line::Content(rest),
        _ => Line::Content(line),
    }
}

/// Appends one content line, stuffed and CRLF-terminated.
///
/// # Errors
///
/// Returns [`Error::LineTooLong`] if the stuffed line would exceed the limit.
pub fn stuff_line(line: &[u8], out: &mut BytesMut, max_line_length: usize) -> Result<()> {
    let stuffed = line.first() == Some(&b'.');
    if line.len() + usize::from(stuffed) + 2 > max_line_length {
        return Err(Error::LineTooLong {
            limit: max_line_length,
        });
    }
    if stuffed {
        out.put_u8(b'.');
    }
    out.extend_from_slice(line);
    out.extend_from_slice(b"\r\n");
    Ok(())
}

/// Incremental encoder for outgoing content.
///
/// Raw bytes are pushed as they are read from the source; complete lines
/// come out stuffed. Bare LF line endings are normalized to CRLF.
#[derive(Debug, Clone)]
pub struct Stuffer {
    pending: BytesMut,
    max_line_length: usize,
}

impl Stuffer {
    /// Creates an encoder enforcing the given maximum line length.
    #[must_use]
    pub fn new(max_line_length: usize) -> Self {
        Self {
            pending: BytesMut::new(),
            max_line_length,
        }
    }

    /// Discards buffered input.
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    /// Buffers raw content.
    pub fn push(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Returns `true` if no complete line is buffered.
    #[must_use]
    pub fn needs_input(&self) -> bool {
        !self.pending.contains(&b'\n')
    }

    /// Encodes complete lines into `out` until it holds `high_water` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LineTooLong`] for a line over the limit, including a
    /// partial line that has already grown past it.
    pub fn encode(&mut self, out: &mut BytesMut, high_water: usize) -> Result<()> {
        while out.len() < high_water {
            let Some(pos) = self.pending.iter().position(|&b| b == b'\n') else {
                if self.pending.len() > self.max_line_length {
                    return Err(Error::LineTooLong {
                        limit: self.max_line_length,
                    });
                }
                break;
            };
            let mut line = self.pending.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }
            stuff_line(&line, out, self.max_line_length)?;
        }
        Ok(())
    }

    /// Writes any trailing partial line and the end-of-data marker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LineTooLong`] as for [`Stuffer::encode`].
    pub fn finish(&mut self, out: &mut BytesMut) -> Result<()> {
        self.encode(out, usize::MAX)?;
        if !self.pending.is_empty() {
            let line = self.pending.split();
            stuff_line(&line, out, self.max_line_length)?;
        }
        out.extend_from_slice(TERMINATOR);
        Ok(())
    }
}

/// Stuffs a whole message and appends the end-of-data marker.
///
/// # Errors
///
/// Returns [`Error::LineTooLong`] for a line over the limit.
pub fn encode(content: &[u8], max_line_length: usize) -> Result<BytesMut> {
    let mut stuffer = Stuffer::new(max_line_length);
    let mut out = BytesMut::with_capacity(content.len() + TERMINATOR.len());
    stuffer.push(content);
    stuffer.finish(&mut out)?;
    Ok(out)
}

/// Unstuffs wire data up to the end-of-data marker.
///
/// Returns `None` if the marker is missing.
#[must_use]
pub fn decode(wire: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(wire.len());
    let mut rest = wire;
    while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
        let raw = &rest[..pos];
        rest = &rest[pos + 1..];
        let line = raw.strip_suffix(b"\r").unwrap_or(raw);
        match unstuff_line(line) {
            Line::End => return Some(out),
            Line::Content(content) => {
                out.extend_from_slice(content);
                out.extend_from_slice(b"\r\n");
            }
        }
    }
    None
}
