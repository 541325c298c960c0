use crate::codec::{CodecRegistry, PhaseCodec};
use crate::error::Result;
use crate::io::Channel;
use crate::session::ProtocolState;

use super::ServerContext;

/// Receives MAIL, RCPT and DATA, pipelined or not.
///
/// Parsing stops at DATA until its reply is out: after a 354 the following
/// bytes are message content, not commands.
#[derive(Debug, Default)]
pub struct EnvelopeCodec {
    idle: bool,
    next: Option<ProtocolState>,
}

impl PhaseCodec<ServerContext> for EnvelopeCodec {
    fn reset(&mut self, _: &mut Channel, ctx: &mut ServerContext) -> Result<()> {
        *self = Self::default();
        ctx.session.data_ready = false;
        Ok(())
    }

    fn consume(&mut self, channel: &mut Channel, ctx: &mut ServerContext) -> Result<()> {
        ctx.read_commands(channel)
    }

    fn produce(&mut self, channel: &mut Channel, ctx: &mut ServerContext) -> Result<()> {
        ctx.drain(channel)?;
        self.idle = ctx.is_idle(channel);

        if ctx.session.data_ready {
            if channel.outbound.is_empty() {
                self.next = Some(ProtocolState::Data);
            }
        } else if ctx.session.quit && ctx.actions.is_empty() {
            self.next = Some(ProtocolState::Quit);
        } else if self.idle && ctx.session.state.is_terminated() {
            tracing::debug!("terminated between transactions");
            self.next = Some(ProtocolState::Quit);
        }
        Ok(())
    }

    fn is_completed(&self) -> bool {
        self.next.is_some()
    }

    fn next(&self, _: &CodecRegistry<ServerContext>, _: &ServerContext) -> Option<ProtocolState> {
        self.next
    }

    fn is_idle(&self) -> bool {
        self.idle
    }
}
