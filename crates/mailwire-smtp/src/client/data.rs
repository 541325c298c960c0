use crate::codec::dot::Stuffer;
use crate::codec::{CodecRegistry, PhaseCodec};
use crate::error::Result;
use crate::io::Channel;
use crate::parser::DEFAULT_MAX_LINE_LENGTH;
use crate::session::{ClientType, ProtocolState, SessionContext};
use crate::types::Reply;

use super::ClientContext;

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Sending,
    AwaitingReply,
    Done,
}

/// Streams the message content, dot-stuffed, then reads the outcome.
///
/// Content is read from the source only while the outbound buffer is below
/// the configured capacity. Under LMTP one reply per accepted recipient is
/// expected.
#[derive(Debug)]
pub struct DataCodec {
    state: State,
    stuffer: Stuffer,
    chunk: Vec<u8>,
    source_done: bool,
    expected: usize,
    received: usize,
    delivered: Option<Reply>,
}

impl Default for DataCodec {
    fn default() -> Self {
        Self {
            state: State::Sending,
            stuffer: Stuffer::new(DEFAULT_MAX_LINE_LENGTH),
            chunk: vec![0; READ_CHUNK],
            source_done: false,
            expected: 1,
            received: 0,
            delivered: None,
        }
    }
}

impl DataCodec {
    fn on_reply(&mut self, reply: Reply, ctx: &mut ClientContext) {
        self.received += 1;
        let lmtp = ctx.state().client_type == Some(ClientType::Lmtp);

        if lmtp {
            if reply.is_success() {
                self.delivered = Some(reply.clone());
            } else if let Some(recipient) = ctx.state().recipients.get(self.received - 1).cloned() {
                ctx.record_failure(recipient, reply.clone());
            }
        }

        if self.received >= self.expected {
            let reply = if lmtp {
                self.delivered.take().unwrap_or(reply)
            } else {
                reply
            };
            ctx.finish(reply);
            self.state = State::Done;
        }
    }
}

impl PhaseCodec<ClientContext> for DataCodec {
    fn reset(&mut self, _: &mut Channel, ctx: &mut ClientContext) -> Result<()> {
        self.state = State::Sending;
        self.stuffer = Stuffer::new(ctx.config().max_line_length);
        self.source_done = false;
        self.received = 0;
        self.delivered = None;
        self.expected = if ctx.state().client_type == Some(ClientType::Lmtp) {
            ctx.state().recipients.len().max(1)
        } else {
            1
        };
        Ok(())
    }

    fn consume(&mut self, channel: &mut Channel, ctx: &mut ClientContext) -> Result<()> {
        while self.state == State::AwaitingReply {
            let Some(reply) = ctx.read_reply(channel)? else {
                break;
            };
            self.on_reply(reply, ctx);
        }
        Ok(())
    }

    fn produce(&mut self, channel: &mut Channel, ctx: &mut ClientContext) -> Result<()> {
        if self.state != State::Sending {
            return Ok(());
        }
        let high_water = ctx.config().buffer_capacity.max(1);
        let request = ctx.request_mut()?;

        loop {
            self.stuffer.encode(&mut channel.outbound, high_water)?;
            if channel.outbound.len() >= high_water {
                return Ok(());
            }
            if self.source_done {
                self.stuffer.finish(&mut channel.outbound)?;
                request.content.rewind()?;
                tracing::debug!("message content sent");
                self.state = State::AwaitingReply;
                return Ok(());
            }
            let n = request.content.read(&mut self.chunk)?;
            if n == 0 {
                self.source_done = true;
            } else {
                self.stuffer.push(&self.chunk[..n]);
            }
        }
    }

    fn is_completed(&self) -> bool {
        self.state == State::Done
    }

    fn next(&self, _: &CodecRegistry<ClientContext>, ctx: &ClientContext) -> Option<ProtocolState> {
        if ctx.state().is_terminated() {
            Some(ProtocolState::Quit)
        } else {
            Some(ProtocolState::Envelope)
        }
    }
}
