use std::collections::VecDeque;

use crate::codec::dot::TERMINATOR;
use crate::codec::{CodecRegistry, PhaseCodec};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::io::Channel;
use crate::session::{DataType, ProtocolState, SessionContext};
use crate::types::{Address, EnhancedCode, Reply, ReplyCode};

use super::ClientContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for a delivery request.
    Idle,
    MailReady,
    MailExpected,
    RcptReady,
    RcptExpected,
    DataReady,
    DataExpected,
    /// Server sent 354 for an envelope that already failed.
    AbortExpected,
    Done,
}

/// Sends MAIL, RCPT and DATA for the current request.
///
/// With PIPELINING all commands go out at once and each reply is matched to
/// the oldest outstanding command. Without it the codec alternates strictly
/// between command and reply.
#[derive(Debug)]
pub struct EnvelopeCodec {
    state: State,
    pipelining: bool,
    unsent: VecDeque<Address>,
    awaiting: VecDeque<Address>,
    mail_failure: Option<Reply>,
    next: Option<ProtocolState>,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self {
            state: State::Idle,
            pipelining: false,
            unsent: VecDeque::new(),
            awaiting: VecDeque::new(),
            mail_failure: None,
            next: None,
        }
    }
}

impl EnvelopeCodec {
    fn begin(&mut self, ctx: &mut ClientContext) {
        if ctx.state().is_terminated() {
            self.next = Some(ProtocolState::Quit);
            self.state = State::Done;
            return;
        }
        if !ctx.next_request() {
            self.state = State::Idle;
            return;
        }
        self.pipelining = ctx.state().extensions.pipelining();
        self.unsent = ctx
            .request()
            .map(|request| request.recipients.iter().cloned().collect())
            .unwrap_or_default();
        self.state = State::MailReady;
    }

    fn mail_command(ctx: &ClientContext) -> Result<Command> {
        let request = ctx
            .request()
            .ok_or_else(|| Error::Protocol("No delivery request in progress".into()))?;
        let extensions = &ctx.state().extensions;

        let mut params = Vec::new();
        if request.data_type == DataType::EightBitMime && extensions.eight_bit_mime() {
            params.push("BODY=8BITMIME".to_string());
        }
        if let Some(size) = request.size.filter(|_| extensions.has_size()) {
            params.push(format!("SIZE={size}"));
        }
        Ok(Command::mail_from(&request.sender, params))
    }

    fn send_rcpt(&mut self, ctx: &ClientContext, channel: &mut Channel) -> Result<()> {
        if let Some(recipient) = self.unsent.pop_front() {
            ctx.send(&Command::rcpt_to(&recipient), channel)?;
            self.awaiting.push_back(recipient);
        }
        Ok(())
    }

    /// Ends the request as failed and moves on to RSET.
    fn fail(&mut self, ctx: &mut ClientContext, data_reply: Option<Reply>) {
        let reply = data_reply
            .filter(|reply| !reply.is_success())
            .or_else(|| self.mail_failure.clone())
            .or_else(|| ctx.last_failure().cloned())
            .unwrap_or_else(|| {
                Reply::enhanced(
                    ReplyCode::TRANSACTION_FAILED,
                    EnhancedCode::INVALID_COMMAND,
                    "No valid recipients",
                )
            });
        ctx.finish(reply);
        self.next = Some(ProtocolState::Reset);
        self.state = State::Done;
    }

    fn on_reply(&mut self, reply: Reply, ctx: &mut ClientContext, channel: &mut Channel) -> Result<()> {
        match self.state {
            State::MailExpected => {
                if reply.is_success() {
                    self.state = if self.pipelining {
                        State::RcptExpected
                    } else {
                        State::RcptReady
                    };
                } else if self.pipelining {
                    tracing::debug!(code = %reply.code, "sender refused");
                    self.mail_failure = Some(reply);
                    self.state = State::RcptExpected;
                } else {
                    tracing::debug!(code = %reply.code, "sender refused");
                    for recipient in std::mem::take(&mut self.unsent) {
                        ctx.record_failure(recipient, reply.clone());
                    }
                    self.mail_failure = Some(reply);
                    self.fail(ctx, None);
                }
            }
            State::RcptExpected => {
                let recipient = self
                    .awaiting
                    .pop_front()
                    .ok_or_else(|| Error::Protocol("Reply without outstanding RCPT".into()))?;
                match &self.mail_failure {
                    Some(mail) if reply.is_success() => ctx.record_failure(recipient, mail.clone()),
                    None if reply.is_success() => ctx.state_mut().recipients.push(recipient),
                    _ => ctx.record_failure(recipient, reply),
                }

                if !self.awaiting.is_empty() {
                    return Ok(());
                }
                if self.pipelining {
                    self.state = State::DataExpected;
                } else if !self.unsent.is_empty() {
                    self.state = State::RcptReady;
                } else if ctx.state().recipients.is_empty() {
                    self.fail(ctx, None);
                } else {
                    self.state = State::DataReady;
                }
            }
            State::DataExpected => {
                if reply.code != ReplyCode::START_DATA {
                    self.fail(ctx, Some(reply));
                } else if self.mail_failure.is_none() && !ctx.state().recipients.is_empty() {
                    tracing::debug!(
                        recipients = ctx.state().recipients.len(),
                        "envelope accepted"
                    );
                    self.next = Some(ProtocolState::Data);
                    self.state = State::Done;
                } else {
                    tracing::debug!("ending data for a refused envelope");
                    channel.outbound.extend_from_slice(TERMINATOR);
                    self.state = State::AbortExpected;
                }
            }
            State::AbortExpected => self.fail(ctx, None),
            State::Idle
            | State::MailReady
            | State::RcptReady
            | State::DataReady
            | State::Done => {}
        }
        Ok(())
    }
}

impl PhaseCodec<ClientContext> for EnvelopeCodec {
    fn reset(&mut self, _: &mut Channel, ctx: &mut ClientContext) -> Result<()> {
        *self = Self::default();
        ctx.state_mut().reset_envelope();
        self.begin(ctx);
        Ok(())
    }

    fn consume(&mut self, channel: &mut Channel, ctx: &mut ClientContext) -> Result<()> {
        while matches!(
            self.state,
            State::MailExpected | State::RcptExpected | State::DataExpected | State::AbortExpected
        ) {
            let Some(reply) = ctx.read_reply(channel)? else {
                break;
            };
            self.on_reply(reply, ctx, channel)?;
        }
        Ok(())
    }

    fn produce(&mut self, channel: &mut Channel, ctx: &mut ClientContext) -> Result<()> {
        if self.state == State::Idle {
            self.begin(ctx);
        }
        if matches!(self.state, State::RcptReady | State::DataReady) && ctx.state().is_terminated()
        {
            // The request stays open and fails with the disconnect.
            tracing::debug!("terminated before DATA");
            self.next = Some(ProtocolState::Quit);
            self.state = State::Done;
            return Ok(());
        }
        match self.state {
            State::MailReady => {
                ctx.send(&Self::mail_command(ctx)?, channel)?;
                if self.pipelining {
                    while !self.unsent.is_empty() {
                        self.send_rcpt(ctx, channel)?;
                    }
                    ctx.send(&Command::data(), channel)?;
                }
                self.state = State::MailExpected;
            }
            State::RcptReady => {
                self.send_rcpt(ctx, channel)?;
                self.state = State::RcptExpected;
            }
            State::DataReady => {
                ctx.send(&Command::data(), channel)?;
                self.state = State::DataExpected;
            }
            _ => {}
        }
        Ok(())
    }

    fn is_completed(&self) -> bool {
        self.state == State::Done
    }

    /// Termination wins over everything but a 354: once the server reads
    /// content, the data phase runs first and quits afterwards.
    fn next(&self, _: &CodecRegistry<ClientContext>, ctx: &ClientContext) -> Option<ProtocolState> {
        match self.next {
            Some(ProtocolState::Data) => Some(ProtocolState::Data),
            _ if ctx.state().is_terminated() => Some(ProtocolState::Quit),
            next => next,
        }
    }

    fn is_idle(&self) -> bool {
        self.state == State::Idle
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::client::{DeliveryHandler, DeliveryRequest, DeliveryResult};
    use crate::config::ClientConfig;
    use crate::io::memory;
    use crate::types::{Extension, ReversePath};

    #[derive(Default)]
    struct Outcomes {
        completed: Vec<DeliveryResult>,
        failed: Vec<DeliveryResult>,
    }

    struct Handler {
        requests: Vec<DeliveryRequest>,
        outcomes: Arc<Mutex<Outcomes>>,
    }

    impl DeliveryHandler for Handler {
        fn submit_request(&mut self) -> Option<DeliveryRequest> {
            self.requests.pop()
        }
        fn completed(&mut self, _: DeliveryRequest, result: DeliveryResult) {
            self.outcomes.lock().unwrap().completed.push(result);
        }
        fn failed(&mut self, _: DeliveryRequest, result: DeliveryResult) {
            self.outcomes.lock().unwrap().failed.push(result);
        }
    }

    fn request(recipients: &[&str]) -> DeliveryRequest {
        DeliveryRequest::from_bytes(
            ReversePath::from_path("<sender@example.com>").unwrap(),
            recipients.iter().map(|r| Address::new(*r).unwrap()).collect(),
            "Subject: test\r\n\r\nbody\r\n",
        )
    }

    struct Fixture {
        codec: EnvelopeCodec,
        channel: Channel,
        ctx: ClientContext,
        script: memory::Script,
        outcomes: Arc<Mutex<Outcomes>>,
    }

    impl Fixture {
        fn new(recipients: &[&str], extensions: &[Extension]) -> Self {
            let (adapter, _peer) = memory::pair();
            let script = adapter.script();
            let mut channel = Channel::new(Box::new(adapter));
            let outcomes = Arc::new(Mutex::new(Outcomes::default()));
            let handler = Handler {
                requests: vec![request(recipients)],
                outcomes: Arc::clone(&outcomes),
            };
            let mut ctx = ClientContext::new(Arc::new(ClientConfig::default()), handler);
            for extension in extensions {
                ctx.state_mut().extensions.insert(extension.clone());
            }
            let mut codec = EnvelopeCodec::default();
            codec.reset(&mut channel, &mut ctx).unwrap();
            Self {
                codec,
                channel,
                ctx,
                script,
                outcomes,
            }
        }

        fn step(&mut self) -> String {
            self.channel.fill().unwrap();
            self.codec.consume(&mut self.channel, &mut self.ctx).unwrap();
            self.codec.produce(&mut self.channel, &mut self.ctx).unwrap();
            self.channel.flush().unwrap();
            self.script.take_string()
        }

        fn next(&self) -> Option<ProtocolState> {
            self.codec.next(&crate::client::codecs(), &self.ctx)
        }
    }

    #[test]
    fn pipelined_batch_and_success() {
        let mut f = Fixture::new(
            &["a@example.com", "b@example.com"],
            &[Extension::Pipelining, Extension::Size(Some(1000))],
        );
        assert_eq!(
            f.step(),
            "MAIL FROM:<sender@example.com> SIZE=23\r\n\
             RCPT TO:<a@example.com>\r\n\
             RCPT TO:<b@example.com>\r\n\
             DATA\r\n"
        );

        f.script.send(b"250 ok\r\n250 ok\r\n250 ok\r\n354 go\r\n");
        f.step();
        assert!(f.codec.is_completed());
        assert_eq!(f.next(), Some(ProtocolState::Data));
        assert_eq!(f.ctx.state().recipients.len(), 2);
    }

    #[test]
    fn pipelined_failure_attributed_in_order() {
        let mut f = Fixture::new(
            &["a@example.com", "b@example.com", "c@example.com"],
            &[Extension::Pipelining],
        );
        f.step();
        f.script
            .send(b"250 ok\r\n250 ok\r\n550 no such user\r\n250 ok\r\n354 go\r\n");
        f.step();
        assert_eq!(f.next(), Some(ProtocolState::Data));

        let accepted: Vec<_> = f.ctx.state().recipients.iter().map(Address::as_str).collect();
        assert_eq!(accepted, vec!["a@example.com", "c@example.com"]);
        let ctx_failures = &f.ctx.failures;
        assert_eq!(ctx_failures.len(), 1);
        assert_eq!(ctx_failures[0].recipient.as_str(), "b@example.com");
        assert_eq!(ctx_failures[0].reply.code, ReplyCode::MAILBOX_UNAVAILABLE);
    }

    #[test]
    fn all_recipients_refused_goes_to_reset() {
        let mut f = Fixture::new(&["a@example.com", "b@example.com"], &[Extension::Pipelining]);
        f.step();
        f.script
            .send(b"250 ok\r\n550 no\r\n550 no\r\n554 no valid recipients\r\n");
        f.step();
        assert!(f.codec.is_completed());
        assert_eq!(f.next(), Some(ProtocolState::Reset));

        let outcomes = f.outcomes.lock().unwrap();
        assert_eq!(outcomes.failed.len(), 1);
        assert_eq!(outcomes.failed[0].reply.code, ReplyCode::TRANSACTION_FAILED);
        assert_eq!(outcomes.failed[0].failures.len(), 2);
    }

    #[test]
    fn refused_envelope_with_go_ahead_is_aborted() {
        let mut f = Fixture::new(&["a@example.com"], &[Extension::Pipelining]);
        f.step();
        f.script.send(b"250 ok\r\n550 no\r\n354 go\r\n");
        assert_eq!(f.step(), ".\r\n");
        assert!(!f.codec.is_completed());

        f.script.send(b"554 empty message\r\n");
        f.step();
        assert_eq!(f.next(), Some(ProtocolState::Reset));
        let outcomes = f.outcomes.lock().unwrap();
        assert_eq!(outcomes.failed[0].reply.code, ReplyCode::MAILBOX_UNAVAILABLE);
    }

    #[test]
    fn sender_refused_fails_every_recipient() {
        let mut f = Fixture::new(&["a@example.com", "b@example.com"], &[Extension::Pipelining]);
        f.step();
        f.script.send(
            b"553 sender rejected\r\n503 need MAIL\r\n503 need MAIL\r\n503 need MAIL\r\n",
        );
        f.step();
        assert_eq!(f.next(), Some(ProtocolState::Reset));

        let outcomes = f.outcomes.lock().unwrap();
        let result = &outcomes.failed[0];
        assert_eq!(result.reply.code, ReplyCode::BAD_SEQUENCE);
        assert_eq!(result.failures.len(), 2);
        assert!(
            result
                .failures
                .iter()
                .all(|f| f.reply.code == ReplyCode::BAD_SEQUENCE)
        );
    }

    #[test]
    fn non_pipelined_alternates() {
        let mut f = Fixture::new(&["a@example.com", "b@example.com"], &[]);
        assert_eq!(f.step(), "MAIL FROM:<sender@example.com>\r\n");
        f.script.send(b"250 ok\r\n");
        assert_eq!(f.step(), "RCPT TO:<a@example.com>\r\n");
        f.script.send(b"550 no\r\n");
        assert_eq!(f.step(), "RCPT TO:<b@example.com>\r\n");
        f.script.send(b"250 ok\r\n");
        assert_eq!(f.step(), "DATA\r\n");
        f.script.send(b"354 go\r\n");
        f.step();
        assert_eq!(f.next(), Some(ProtocolState::Data));
        assert_eq!(f.ctx.failures.len(), 1);
    }

    #[test]
    fn non_pipelined_stops_after_mail_failure() {
        let mut f = Fixture::new(&["a@example.com"], &[]);
        f.step();
        f.script.send(b"451 try later\r\n");
        assert_eq!(f.step(), "");
        assert_eq!(f.next(), Some(ProtocolState::Reset));
        let outcomes = f.outcomes.lock().unwrap();
        assert_eq!(outcomes.failed[0].reply.code, ReplyCode::LOCAL_ERROR);
        assert_eq!(outcomes.failed[0].failures.len(), 1);
    }

    #[test]
    fn terminated_after_go_ahead_sends_content_first() {
        let mut f = Fixture::new(&["a@example.com"], &[Extension::Pipelining]);
        f.step();
        f.ctx.state().terminate();
        f.script.send(b"250 ok\r\n250 ok\r\n354 go\r\n");
        f.step();
        assert!(f.codec.is_completed());
        assert_eq!(f.next(), Some(ProtocolState::Data));
        assert_eq!(
            super::super::DataCodec::default().next(&crate::client::codecs(), &f.ctx),
            Some(ProtocolState::Quit)
        );
    }

    #[test]
    fn terminated_before_data_quits_without_sending_it() {
        let mut f = Fixture::new(&["a@example.com"], &[]);
        assert_eq!(f.step(), "MAIL FROM:<sender@example.com>\r\n");
        f.script.send(b"250 ok\r\n");
        assert_eq!(f.step(), "RCPT TO:<a@example.com>\r\n");

        f.ctx.state().terminate();
        f.script.send(b"250 ok\r\n");
        assert_eq!(f.step(), "");
        assert!(f.codec.is_completed());
        assert_eq!(f.next(), Some(ProtocolState::Quit));
        assert!(f.ctx.request().is_some());
        assert!(f.outcomes.lock().unwrap().failed.is_empty());
    }

    #[test]
    fn terminated_refused_envelope_quits_instead_of_reset() {
        let mut f = Fixture::new(&["a@example.com"], &[Extension::Pipelining]);
        f.step();
        f.ctx.state().terminate();
        f.script.send(b"250 ok\r\n550 no\r\n554 no valid recipients\r\n");
        f.step();
        assert_eq!(f.next(), Some(ProtocolState::Quit));
        assert_eq!(f.outcomes.lock().unwrap().failed.len(), 1);
    }

    #[test]
    fn idle_without_request() {
        let mut f = Fixture::new(&["a@example.com"], &[]);
        f.ctx.request = None;
        f.codec.reset(&mut f.channel, &mut f.ctx).unwrap();
        assert!(f.codec.is_idle());
        assert_eq!(f.step(), "");

        f.ctx.state().terminate();
        f.step();
        assert!(f.codec.is_completed());
        assert_eq!(f.next(), Some(ProtocolState::Quit));
    }
}
