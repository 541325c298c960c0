//! Reply parser with multiline and enhanced status code support.

use bytes::BytesMut;

use super::{decode_latin1, take_line};
use crate::error::{Error, Result};
use crate::types::{EnhancedCode, Reply, ReplyCode};

/// One parsed wire line of a (possibly multiline) reply.
#[derive(Debug, Clone)]
struct ReplyLine {
    code: ReplyCode,
    enhanced: Option<EnhancedCode>,
    text: String,
}

/// Streaming parser for replies.
///
/// Continuation lines (`250-...`) are accumulated across calls until the
/// terminal line (`250 ...`) arrives.
#[derive(Debug, Clone)]
pub struct ReplyParser {
    max_line_length: usize,
    enhanced_codes: bool,
    pending: Vec<ReplyLine>,
}

impl ReplyParser {
    /// Creates a parser with enhanced status codes disabled.
    #[must_use]
    pub const fn new(max_line_length: usize) -> Self {
        Self {
            max_line_length,
            enhanced_codes: false,
            pending: Vec::new(),
        }
    }

    /// Enables or disables enhanced status code parsing.
    ///
    /// Only enable once both sides negotiated ENHANCEDSTATUSCODES.
    pub fn set_enhanced_codes(&mut self, enabled: bool) {
        self.enhanced_codes = enabled;
    }

    /// Returns `true` if enhanced status codes are parsed.
    #[must_use]
    pub const fn enhanced_codes(&self) -> bool {
        self.enhanced_codes
    }

    /// Returns `true` if continuation lines are buffered.
    #[must_use]
    pub fn in_progress(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Parses the next complete reply from `buf`.
    ///
    /// Returns `Ok(None)` until the terminal line of a reply has arrived.
    ///
    /// # Errors
    ///
    /// - [`Error::Syntax`] for a malformed line, a malformed enhanced code,
    ///   an enhanced class that differs from the reply class, or lines of
    ///   one reply disagreeing on code or enhanced code. Buffered lines are
    ///   discarded.
    /// - [`Error::LineTooLong`] when a line exceeds the limit.
    /// - [`Error::UnexpectedEof`] when `eof` is set in the middle of a reply.
    pub fn parse(&mut self, buf: &mut BytesMut, eof: bool) -> Result<Option<Reply>> {
        loop {
            let line = match take_line(buf, self.max_line_length) {
                Ok(Some(line)) => line,
                Ok(None) => {
                    if eof && (!buf.is_empty() || self.in_progress()) {
                        self.pending.clear();
                        return Err(Error::UnexpectedEof);
                    }
                    return Ok(None);
                }
                Err(e) => {
                    self.pending.clear();
                    return Err(e);
                }
            };

            if line.is_empty() && self.pending.is_empty() {
                continue;
            }

            let line = decode_latin1(&line);
            tracing::trace!(line = %line, "S:");

            let (parsed, last) = match self.parse_line(&line) {
                Ok(parsed) => parsed,
                Err(e) => {
                    self.pending.clear();
                    return Err(e);
                }
            };
            self.pending.push(parsed);

            if last {
                let lines = std::mem::take(&mut self.pending);
                return assemble(lines).map(Some);
            }
        }
    }

    fn parse_line(&self, line: &str) -> Result<(ReplyLine, bool)> {
        let bytes = line.as_bytes();
        if bytes.len() < 3 || !bytes[..3].iter().all(u8::is_ascii_digit) {
            return Err(Error::Syntax(format!("Invalid reply line: {line}")));
        }
        if !(b'1'..=b'5').contains(&bytes[0]) {
            return Err(Error::Syntax(format!("Invalid reply code: {}", &line[..3])));
        }

        let last = match bytes.get(3) {
            None | Some(b' ') => true,
            Some(b'-') => false,
            Some(_) => {
                return Err(Error::Syntax(format!("Invalid reply delimiter: {line}")));
            }
        };

        let code = ReplyCode::new(line[..3].parse().map_err(|_| {
            Error::Syntax(format!("Invalid reply code: {}", &line[..3]))
        })?);
        let text = line.get(4..).unwrap_or_default();

        let (enhanced, text) = if self.enhanced_codes
            && matches!(code.class(), 2 | 4 | 5)
            && text.starts_with(|c: char| c.is_ascii_digit())
        {
            let (token, rest) = text.split_once(' ').unwrap_or((text, ""));
            let enhanced = EnhancedCode::parse(token).ok_or_else(|| {
                Error::Syntax(format!("Malformed enhanced status code: {token}"))
            })?;
            if enhanced.class != code.class() {
                return Err(Error::Syntax(format!(
                    "Enhanced status code {enhanced} does not match reply code {code}"
                )));
            }
            (Some(enhanced), rest)
        } else {
            (None, text)
        };

        Ok((
            ReplyLine {
                code,
                enhanced,
                text: text.to_string(),
            },
            last,
        ))
    }
}

fn assemble(lines: Vec<ReplyLine>) -> Result<Reply> {
    let Some(first) = lines.first() else {
        return Err(Error::Syntax("Empty reply".into()));
    };
    let (code, enhanced) = (first.code, first.enhanced);

    if let Some(bad) = lines
        .iter()
        .find(|l| l.code != code || l.enhanced != enhanced)
    {
        return Err(Error::Syntax(format!(
            "Inconsistent multiline reply: {} vs {}",
            bad.code, code
        )));
    }

    Ok(Reply {
        code,
        enhanced,
        lines: lines.into_iter().map(|l| l.text).collect(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    fn parse(input: &[u8], enhanced: bool) -> Result<Option<Reply>> {
        let mut parser = ReplyParser::new(1000);
        parser.set_enhanced_codes(enhanced);
        let mut buf = BytesMut::from(input);
        parser.parse(&mut buf, false)
    }

    #[test]
    fn test_parse_single_line_reply() {
        let reply = parse(b"250 OK\r\n", false).unwrap().unwrap();
        assert_eq!(reply.code.as_u16(), 250);
        assert_eq!(reply.lines, vec!["OK"]);
        assert!(reply.enhanced.is_none());
    }

    #[test]
    fn test_parse_multi_line_reply() {
        let reply = parse(b"250-First line\r\n250-Second line\r\n250 Last line\r\n", false)
            .unwrap()
            .unwrap();
        assert_eq!(reply.lines, vec!["First line", "Second line", "Last line"]);
    }

    #[test]
    fn test_parse_bare_code() {
        let reply = parse(b"250\r\n", false).unwrap().unwrap();
        assert_eq!(reply.lines, vec![""]);
    }

    #[test]
    fn test_accumulates_across_calls() {
        let mut parser = ReplyParser::new(1000);
        let mut buf = BytesMut::from(&b"250-mx.example.com\r\n250-PIPEL"[..]);
        assert!(parser.parse(&mut buf, false).unwrap().is_none());
        assert!(parser.in_progress());

        buf.extend_from_slice(b"INING\r\n250 8BITMIME\r\n");
        let reply = parser.parse(&mut buf, false).unwrap().unwrap();
        assert_eq!(reply.lines, vec!["mx.example.com", "PIPELINING", "8BITMIME"]);
        assert!(!parser.in_progress());
    }

    #[test]
    fn test_enhanced_code_parsed_when_enabled() {
        let reply = parse(b"553 5.1.8 Sender rejected\r\n", true).unwrap().unwrap();
        assert_eq!(reply.enhanced, Some(EnhancedCode::BAD_SENDER));
        assert_eq!(reply.lines, vec!["Sender rejected"]);

        let reply = parse(b"553 5.1.8 Sender rejected\r\n", false).unwrap().unwrap();
        assert_eq!(reply.enhanced, None);
        assert_eq!(reply.lines, vec!["5.1.8 Sender rejected"]);
    }

    #[test]
    fn test_enhanced_code_ignored_for_other_classes() {
        let reply = parse(b"354 3.0.0 go\r\n", true).unwrap().unwrap();
        assert_eq!(reply.enhanced, None);
        assert_eq!(reply.lines, vec!["3.0.0 go"]);
    }

    #[test]
    fn test_enhanced_class_mismatch_fails() {
        assert!(matches!(
            parse(b"250 5.0.0 OK\r\n", true),
            Err(Error::Syntax(_))
        ));
    }

    #[test]
    fn test_malformed_enhanced_code_fails() {
        assert!(matches!(
            parse(b"250 2.0 OK\r\n", true),
            Err(Error::Syntax(_))
        ));
    }

    #[test]
    fn test_multiline_enhanced() {
        let reply = parse(b"250-2.0.0 first\r\n250 2.0.0 second\r\n", true)
            .unwrap()
            .unwrap();
        assert_eq!(reply.enhanced, Some(EnhancedCode::OK));
        assert_eq!(reply.lines, vec!["first", "second"]);
    }

    #[test]
    fn test_inconsistent_codes_fail() {
        assert!(matches!(
            parse(b"250-first\r\n251-second\r\n250 last\r\n", false),
            Err(Error::Syntax(_))
        ));
        assert!(matches!(
            parse(b"250-2.0.0 first\r\n250 2.1.0 last\r\n", true),
            Err(Error::Syntax(_))
        ));
    }

    #[test]
    fn test_state_reset_after_error() {
        let mut parser = ReplyParser::new(1000);
        let mut buf = BytesMut::from(&b"250-a\r\n251 b\r\n221 bye\r\n"[..]);
        assert!(parser.parse(&mut buf, false).is_err());
        let reply = parser.parse(&mut buf, false).unwrap().unwrap();
        assert_eq!(reply.code, ReplyCode::CLOSING);
    }

    #[test]
    fn test_parse_error_invalid_code() {
        assert!(parse(b"ABC OK\r\n", false).is_err());
        assert!(parse(b"25\r\n", false).is_err());
        assert!(parse(b"650 nope\r\n", false).is_err());
        assert!(parse(b"250+odd\r\n", false).is_err());
    }

    #[test]
    fn test_eof_mid_reply() {
        let mut parser = ReplyParser::new(1000);
        let mut buf = BytesMut::from(&b"250-first\r\n"[..]);
        assert!(matches!(
            parser.parse(&mut buf, true),
            Err(Error::UnexpectedEof)
        ));
    }
}
