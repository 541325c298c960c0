use bytes::BytesMut;

use crate::action::local_error;
use crate::codec::dot::{Line, unstuff_line};
use crate::codec::{CodecRegistry, PhaseCodec};
use crate::error::{Error, Result};
use crate::io::Channel;
use crate::parser::take_line;
use crate::session::ProtocolState;
use crate::types::{EnhancedCode, Reply, ReplyCode};

use super::{Action, ContentSink, Envelope, ServerContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Receiving,
    Delivering,
    Done,
}

/// Receives message content up to the lone `.` line and queues delivery.
///
/// Content is staged in memory and handed to the sink whenever the
/// staging buffer reaches the configured threshold. A message over the size
/// limit is read to the end but discarded.
#[derive(Default)]
pub struct DataCodec {
    state: State,
    envelope: Option<Envelope>,
    sink: Option<Box<dyn ContentSink>>,
    staging: BytesMut,
    size: usize,
    failure: Option<Reply>,
}

impl std::fmt::Debug for DataCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataCodec")
            .field("state", &self.state)
            .field("size", &self.size)
            .field("staged", &self.staging.len())
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

impl DataCodec {
    fn fail_sink(&mut self, error: &std::io::Error) {
        tracing::warn!(%error, "content sink failed");
        self.sink = None;
        self.staging.clear();
        if self.failure.is_none() {
            self.failure = Some(local_error());
        }
    }

    fn flush_sink(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.write(&self.staging) {
                self.fail_sink(&e);
                return;
            }
        }
        self.staging.clear();
    }

    fn accept(&mut self, line: &[u8], ctx: &ServerContext) {
        self.size += line.len() + 2;
        let max = ctx.session.config.max_message_size;
        if max > 0 && self.size > max {
            if self.failure.is_none() {
                tracing::warn!(max, "message exceeds size limit, discarding");
                self.failure = Some(Reply::enhanced(
                    ReplyCode::EXCEEDED_STORAGE,
                    EnhancedCode::MESSAGE_TOO_BIG,
                    "Message exceeds fixed maximum message size",
                ));
            }
            self.sink = None;
            self.staging.clear();
            return;
        }
        if self.sink.is_none() {
            return;
        }
        self.staging.extend_from_slice(line);
        self.staging.extend_from_slice(b"\r\n");
        if self.staging.len() >= ctx.session.config.sink_flush_threshold {
            self.flush_sink();
        }
    }

    fn finish(&mut self, ctx: &mut ServerContext) {
        self.flush_sink();
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.finalize() {
                self.fail_sink(&e);
            }
        }
        self.state = State::Delivering;
        let Some(envelope) = self.envelope.take() else {
            return;
        };
        tracing::debug!(size = self.size, "message content received");
        ctx.actions.push(Action::Deliver {
            envelope,
            failure: self.failure.take(),
        });
    }
}

impl PhaseCodec<ServerContext> for DataCodec {
    fn reset(&mut self, _: &mut Channel, ctx: &mut ServerContext) -> Result<()> {
        *self = Self::default();
        ctx.session.data_ready = false;

        let envelope = ctx.session.envelope();
        match ctx.session.handler.open_sink(&envelope) {
            Ok(sink) => self.sink = Some(sink),
            Err(e) => self.fail_sink(&e),
        }
        self.envelope = Some(envelope);
        Ok(())
    }

    fn consume(&mut self, channel: &mut Channel, ctx: &mut ServerContext) -> Result<()> {
        let max_line_length = ctx.session.config.max_line_length;
        while self.state == State::Receiving {
            let Some(line) = take_line(&mut channel.inbound, max_line_length)? else {
                if channel.is_eof() {
                    return Err(Error::UnexpectedEof);
                }
                return Ok(());
            };
            match unstuff_line(&line) {
                Line::End => self.finish(ctx),
                Line::Content(content) => self.accept(content, ctx),
            }
        }
        Ok(())
    }

    fn produce(&mut self, channel: &mut Channel, ctx: &mut ServerContext) -> Result<()> {
        ctx.drain(channel)?;
        if self.state == State::Delivering && ctx.actions.is_empty() && channel.outbound.is_empty() {
            self.state = State::Done;
        }
        Ok(())
    }

    fn is_completed(&self) -> bool {
        self.state == State::Done
    }

    fn next(&self, _: &CodecRegistry<ServerContext>, ctx: &ServerContext) -> Option<ProtocolState> {
        if ctx.session.state.is_terminated() {
            Some(ProtocolState::Quit)
        } else {
            Some(ProtocolState::Envelope)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::testing::{codes, exchange, session};
    use super::*;
    use crate::config::ServerConfig;
    use crate::session::SessionContext;

    const ENVELOPE: &[u8] = b"EHLO client\r\nMAIL FROM:<s@example.com>\r\n\
        RCPT TO:<a@example.com>\r\nRCPT TO:<b@example.com>\r\nDATA\r\n";

    #[test]
    fn unstuffs_and_delivers() {
        let (mut session, script, record) = session(ServerConfig::default());
        exchange(&mut session, &script, ENVELOPE);
        assert_eq!(session.phase(), Some(ProtocolState::Data));

        let out = exchange(
            &mut session,
            &script,
            b"Subject: x\r\n\r\n..leading dot\r\n.\r\nNOOP\r\n",
        );
        assert_eq!(
            out,
            "250 2.6.0 Message accepted for delivery\r\n250 2.0.0 OK\r\n"
        );
        assert_eq!(session.phase(), Some(ProtocolState::Envelope));

        let record = record.lock().unwrap();
        let (envelope, content) = &record.messages[0];
        assert_eq!(content, b"Subject: x\r\n\r\n.leading dot\r\n");
        assert_eq!(envelope.recipients.len(), 2);
        assert_eq!(envelope.client.as_deref(), Some("client"));
        assert!(session.context().state().sender.is_none());
    }

    #[test]
    fn content_in_same_read_as_data() {
        let (mut session, script, record) = session(ServerConfig::default());
        let mut input = ENVELOPE.to_vec();
        input.extend_from_slice(b"Subject: x\r\n\r\nRSET\r\n.\r\nNOOP\r\n");
        let out = exchange(&mut session, &script, &input);
        assert!(!out.contains("500"), "content parsed as commands: {out}");
        assert!(out.ends_with(
            "354 Start mail input; end with <CRLF>.<CRLF>\r\n\
             250 2.6.0 Message accepted for delivery\r\n\
             250 2.0.0 OK\r\n"
        ));
        assert_eq!(session.phase(), Some(ProtocolState::Envelope));

        let record = record.lock().unwrap();
        assert_eq!(record.messages.len(), 1);
        assert_eq!(record.messages[0].1, b"Subject: x\r\n\r\nRSET\r\n");
    }

    #[test]
    fn content_split_across_reads() {
        let (mut session, script, record) = session(ServerConfig::default());
        exchange(&mut session, &script, ENVELOPE);
        assert!(exchange(&mut session, &script, b"line one\r\nline t").is_empty());
        assert!(exchange(&mut session, &script, b"wo\r\n.").is_empty());
        let out = exchange(&mut session, &script, b"\r\n");
        assert_eq!(codes(&out), vec!["250"]);
        assert_eq!(record.lock().unwrap().messages[0].1, b"line one\r\nline two\r\n");
    }

    #[test]
    fn empty_message_is_valid() {
        let (mut session, script, record) = session(ServerConfig::default());
        exchange(&mut session, &script, ENVELOPE);
        let out = exchange(&mut session, &script, b".\r\n");
        assert_eq!(codes(&out), vec!["250"]);
        assert!(record.lock().unwrap().messages[0].1.is_empty());
    }

    #[test]
    fn oversized_message_is_refused() {
        let config = ServerConfig::builder().max_message_size(16).build();
        let (mut session, script, record) = session(config);
        exchange(&mut session, &script, ENVELOPE);
        let out = exchange(
            &mut session,
            &script,
            b"0123456789\r\n0123456789\r\n.\r\n",
        );
        assert_eq!(out, "552 5.3.4 Message exceeds fixed maximum message size\r\n");
        assert!(record.lock().unwrap().messages.is_empty());
        assert_eq!(session.phase(), Some(ProtocolState::Envelope));
    }

    #[test]
    fn small_flush_threshold_keeps_content_intact() {
        let config = ServerConfig::builder().sink_flush_threshold(4).build();
        let (mut session, script, record) = session(config);
        exchange(&mut session, &script, ENVELOPE);
        exchange(&mut session, &script, b"abcdef\r\nghijkl\r\n.\r\n");
        assert_eq!(record.lock().unwrap().messages[0].1, b"abcdef\r\nghijkl\r\n");
    }

    #[test]
    fn lmtp_replies_per_recipient() {
        let config = ServerConfig::builder().lmtp(true).build();
        let (mut session, script, _) = session(config);
        exchange(
            &mut session,
            &script,
            b"LHLO client\r\nMAIL FROM:<s@example.com>\r\n\
              RCPT TO:<a@example.com>\r\nRCPT TO:<b@example.com>\r\nDATA\r\n",
        );
        let out = exchange(&mut session, &script, b"hi\r\n.\r\n");
        assert_eq!(codes(&out), vec!["250", "250"]);
    }

    #[test]
    fn eof_before_terminator_is_fatal() {
        let (mut session, script, record) = session(ServerConfig::default());
        exchange(&mut session, &script, ENVELOPE);
        script.send(b"partial\r\n");
        script.close();
        assert!(matches!(session.on_readable(), Err(Error::UnexpectedEof)));
        assert!(session.is_closed());
        assert!(record.lock().unwrap().messages.is_empty());
    }

    #[test]
    fn terminated_during_data_quits_after_delivery() {
        let (mut session, script, _) = session(ServerConfig::default());
        exchange(&mut session, &script, ENVELOPE);
        session.handle().terminate();
        let out = exchange(&mut session, &script, b"body\r\n.\r\n");
        assert_eq!(codes(&out), vec!["250", "421"]);
        assert!(session.is_closed());
    }
}
