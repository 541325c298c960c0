//! Command line parser.

use bytes::BytesMut;

use super::{decode_latin1, take_line};
use crate::command::Command;
use crate::error::{Error, Result};

/// Streaming parser for command lines.
#[derive(Debug, Clone)]
pub struct CommandParser {
    max_line_length: usize,
}

impl CommandParser {
    /// Creates a parser enforcing the given maximum line length.
    #[must_use]
    pub const fn new(max_line_length: usize) -> Self {
        Self { max_line_length }
    }

    /// Parses the next command from `buf`.
    ///
    /// Blank lines before a command are skipped. Returns `Ok(None)` when
    /// more data is needed.
    ///
    /// # Errors
    ///
    /// - [`Error::Syntax`] for a whitespace-only line or an invalid verb;
    ///   the offending line is consumed so parsing can continue.
    /// - [`Error::LineTooLong`] when a line exceeds the limit.
    /// - [`Error::UnexpectedEof`] when `eof` is set and a partial line
    ///   remains.
    pub fn parse(&mut self, buf: &mut BytesMut, eof: bool) -> Result<Option<Command>> {
        loop {
            let Some(line) = take_line(buf, self.max_line_length)? else {
                if eof && !buf.is_empty() {
                    return Err(Error::UnexpectedEof);
                }
                return Ok(None);
            };

            if line.is_empty() {
                continue;
            }

            let line = decode_latin1(&line);
            tracing::trace!(line = %line, "C:");
            return parse_line(&line).map(Some);
        }
    }
}

fn parse_line(line: &str) -> Result<Command> {
    let mut tokens = line.split_whitespace();
    let Some(verb) = tokens.next() else {
        return Err(Error::Syntax("empty command".into()));
    };

    if !verb.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(Error::Syntax(format!("invalid command verb: {verb}")));
    }

    let mut cmd = Command::new(verb);
    cmd.argument = tokens.next().map(str::to_string);
    cmd.params = tokens.map(str::to_string).collect();
    Ok(cmd)
}
