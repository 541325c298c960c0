use crate::codec::{CodecRegistry, PhaseCodec};
use crate::command::Command;
use crate::error::Result;
use crate::io::Channel;
use crate::session::ProtocolState;

use super::ClientContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ready,
    Expecting,
    Done,
}

/// Sends QUIT and waits for the reply or for the server to hang up.
#[derive(Debug)]
pub struct QuitCodec {
    state: State,
}

impl Default for QuitCodec {
    fn default() -> Self {
        Self {
            state: State::Ready,
        }
    }
}

impl PhaseCodec<ClientContext> for QuitCodec {
    fn reset(&mut self, channel: &mut Channel, _: &mut ClientContext) -> Result<()> {
        // Nothing to say to a peer that already hung up.
        self.state = if channel.is_eof() {
            State::Done
        } else {
            State::Ready
        };
        Ok(())
    }

    fn consume(&mut self, channel: &mut Channel, ctx: &mut ClientContext) -> Result<()> {
        if self.state != State::Expecting {
            return Ok(());
        }
        match ctx.read_reply(channel) {
            Ok(Some(reply)) => {
                tracing::debug!(code = %reply.code, "QUIT acknowledged");
                self.state = State::Done;
            }
            Ok(None) => {}
            Err(error) => {
                tracing::debug!(%error, "connection ended during QUIT");
                self.state = State::Done;
            }
        }
        Ok(())
    }

    fn produce(&mut self, channel: &mut Channel, ctx: &mut ClientContext) -> Result<()> {
        if self.state == State::Ready {
            ctx.send(&Command::quit(), channel)?;
            self.state = State::Expecting;
        }
        Ok(())
    }

    fn is_completed(&self) -> bool {
        self.state == State::Done
    }

    fn next(&self, _: &CodecRegistry<ClientContext>, _: &ClientContext) -> Option<ProtocolState> {
        None
    }
}
