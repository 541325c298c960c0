use crate::codec::{CodecRegistry, PhaseCodec};
use crate::command::Command;
use crate::error::Result;
use crate::io::Channel;
use crate::session::{ProtocolState, SessionContext};

use super::ClientContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ready,
    Expecting,
    Done,
}

/// Sends RSET after a failed envelope.
///
/// A refused RSET leaves the server in an unknown state, so the session
/// quits instead of starting another envelope.
#[derive(Debug)]
pub struct ResetCodec {
    state: State,
    accepted: bool,
}

impl Default for ResetCodec {
    fn default() -> Self {
        Self {
            state: State::Ready,
            accepted: false,
        }
    }
}

impl PhaseCodec<ClientContext> for ResetCodec {
    fn reset(&mut self, _: &mut Channel, ctx: &mut ClientContext) -> Result<()> {
        *self = Self::default();
        ctx.state_mut().reset_envelope();
        Ok(())
    }

    fn consume(&mut self, channel: &mut Channel, ctx: &mut ClientContext) -> Result<()> {
        if self.state != State::Expecting {
            return Ok(());
        }
        if let Some(reply) = ctx.read_reply(channel)? {
            self.accepted = reply.is_success();
            if !self.accepted {
                tracing::warn!(code = %reply.code, "RSET refused");
            }
            self.state = State::Done;
        }
        Ok(())
    }

    fn produce(&mut self, channel: &mut Channel, ctx: &mut ClientContext) -> Result<()> {
        if self.state == State::Ready {
            ctx.send(&Command::rset(), channel)?;
            self.state = State::Expecting;
        }
        Ok(())
    }

    fn is_completed(&self) -> bool {
        self.state == State::Done
    }

    fn next(&self, _: &CodecRegistry<ClientContext>, ctx: &ClientContext) -> Option<ProtocolState> {
        if self.accepted && !ctx.state().is_terminated() {
            Some(ProtocolState::Envelope)
        } else {
            Some(ProtocolState::Quit)
        }
    }
}
