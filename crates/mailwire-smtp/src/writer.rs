//! Command and reply serialization.
//!
//! Both writers check every line against the maximum line length before
//! touching the output buffer, so a failed write leaves `out` unchanged.

use bytes::BytesMut;

use crate::command::Command;
use crate::error::{Error, Result};
use crate::parser::encode_latin1;
use crate::types::Reply;

/// Appends a command line to `out`.
///
/// # Errors
///
/// Returns [`Error::LineTooLong`] if the line would exceed the limit and
/// [`Error::Syntax`] if any token contains a line break.
pub fn write_command(cmd: &Command, out: &mut BytesMut, max_line_length: usize) -> Result<()> {
    let line = cmd.to_string();
    check_line(&line, max_line_length)?;
    tracing::trace!(line = %line, ">>");
    encode_latin1(&line, out);
    out.extend_from_slice(b"\r\n");
    Ok(())
}

/// Appends one reply, one wire line per text line, to `out`.
///
/// The enhanced code is written only when `enhanced_codes` is set and the
/// reply class is 2, 4 or 5.
///
/// # Errors
///
/// Returns [`Error::LineTooLong`] if any line would exceed the limit and
/// [`Error::Syntax`] for text containing line breaks or an enhanced code
/// whose class differs from the reply class.
pub fn write_reply(
    reply: &Reply,
    out: &mut BytesMut,
    enhanced_codes: bool,
    max_line_length: usize,
) -> Result<()> {
    let enhanced = match reply.enhanced {
        Some(enhanced) if enhanced_codes && matches!(reply.code.class(), 2 | 4 | 5) => {
            if enhanced.class != reply.code.class() {
                return Err(Error::Syntax(format!(
                    "Enhanced status code {enhanced} does not match reply code {}",
                    reply.code
                )));
            }
            Some(enhanced)
        }
        _ => None,
    };

    let empty = [String::new()];
    let texts: &[String] = if reply.lines.is_empty() {
        &empty
    } else {
        &reply.lines
    };

    let mut lines = Vec::with_capacity(texts.len());
    for (i, text) in texts.iter().enumerate() {
        let delimiter = if i + 1 == texts.len() { ' ' } else { '-' };
        let line = match (enhanced, text.is_empty()) {
            (Some(enhanced), true) => format!("{}{delimiter}{enhanced}", reply.code),
            (Some(enhanced), false) => format!("{}{delimiter}{enhanced} {text}", reply.code),
            (None, _) => format!("{}{delimiter}{text}", reply.code),
        };
        check_line(&line, max_line_length)?;
        lines.push(line);
    }

    for line in lines {
        tracing::trace!(line = %line, "<<");
        encode_latin1(&line, out);
        out.extend_from_slice(b"\r\n");
    }
    Ok(())
}

fn check_line(line: &str, max_line_length: usize) -> Result<()> {
    if line.contains(['\r', '\n']) {
        return Err(Error::Syntax(format!("Line break inside line: {line:?}")));
    }
    if line.chars().count() + 2 > max_line_length {
        return Err(Error::LineTooLong {
            limit: max_line_length,
        });
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{EnhancedCode, ReplyCode};

    fn reply_bytes(reply: &Reply, enhanced: bool) -> Vec<u8> {
        let mut out = BytesMut::new();
        write_reply(reply, &mut out, enhanced, 1000).unwrap();
        out.to_vec()
    }

    #[test]
    fn writes_single_line_reply() {
        let reply = Reply::single(ReplyCode::OK, "OK");
        assert_eq!(reply_bytes(&reply, false), b"250 OK\r\n");
    }

    #[test]
    fn writes_multiline_reply_with_delimiters() {
        let reply = Reply::new(
            ReplyCode::OK,
            vec!["mx".to_string(), "PIPELINING".to_string(), "8BITMIME".to_string()],
        );
        assert_eq!(
            reply_bytes(&reply, false),
            b"250-mx\r\n250-PIPELINING\r\n250 8BITMIME\r\n"
        );
    }

    #[test]
    fn writes_enhanced_code_on_every_line() {
        let mut reply = Reply::enhanced(ReplyCode::OK, EnhancedCode::OK, "one");
        reply.lines.push("two".to_string());
        assert_eq!(
            reply_bytes(&reply, true),
            b"250-2.0.0 one\r\n250 2.0.0 two\r\n"
        );
        assert_eq!(reply_bytes(&reply, false), b"250-one\r\n250 two\r\n");
    }

    #[test]
    fn omits_enhanced_code_for_intermediate_replies() {
        let reply = Reply::enhanced(ReplyCode::START_DATA, EnhancedCode::OK, "go ahead");
        assert_eq!(reply_bytes(&reply, true), b"354 go ahead\r\n");
    }

    #[test]
    fn rejects_mismatched_enhanced_class() {
        let reply = Reply::enhanced(ReplyCode::OK, EnhancedCode::BAD_SENDER, "odd");
        let mut out = BytesMut::new();
        assert!(write_reply(&reply, &mut out, true, 1000).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn rejects_overlong_reply_without_partial_output() {
        let reply = Reply::new(ReplyCode::OK, vec!["short".to_string(), "x".repeat(20)]);
        let mut out = BytesMut::new();
        assert!(matches!(
            write_reply(&reply, &mut out, false, 16),
            Err(Error::LineTooLong { limit: 16 })
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn writes_command() {
        let mut out = BytesMut::new();
        write_command(&Command::data(), &mut out, 1000).unwrap();
        assert_eq!(&out[..], b"DATA\r\n");
    }

    #[test]
    fn rejects_overlong_command() {
        let mut out = BytesMut::new();
        let cmd = Command::ehlo(&"a".repeat(64));
        assert!(write_command(&cmd, &mut out, 32).is_err());
    }
}
