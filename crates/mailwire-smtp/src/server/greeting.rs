use crate::codec::{CodecRegistry, PhaseCodec};
use crate::error::Result;
use crate::io::Channel;
use crate::session::ProtocolState;
use crate::types::{Reply, ReplyCode};

use super::ServerContext;

/// Sends the banner and waits for EHLO, HELO or LHLO.
///
/// Other commands are answered as usual; MAIL, RCPT and DATA are refused
/// until a greeting succeeds.
#[derive(Debug, Default)]
pub struct GreetingCodec {
    idle: bool,
    next: Option<ProtocolState>,
}

impl PhaseCodec<ServerContext> for GreetingCodec {
    fn reset(&mut self, channel: &mut Channel, ctx: &mut ServerContext) -> Result<()> {
        *self = Self::default();
        let session = &mut ctx.session;
        session.state.extensions.clear();
        session.state.client_type = None;
        session.state.peer_name = None;
        session.state.reset_envelope();
        session.barrier = false;
        session.data_ready = false;
        session.quit = false;

        let config = &session.config;
        let protocol = if config.lmtp { "LMTP" } else { "ESMTP" };
        let banner = Reply::single(
            ReplyCode::SERVICE_READY,
            format!("{} {protocol} ready", config.hostname),
        );
        ctx.write_now(&banner, channel)
    }

    fn consume(&mut self, channel: &mut Channel, ctx: &mut ServerContext) -> Result<()> {
        ctx.read_commands(channel)
    }

    fn produce(&mut self, channel: &mut Channel, ctx: &mut ServerContext) -> Result<()> {
        ctx.drain(channel)?;
        self.idle = ctx.is_idle(channel);

        if ctx.session.quit && ctx.actions.is_empty() {
            self.next = Some(ProtocolState::Quit);
        } else if ctx.session.state.client_type.is_some() && ctx.actions.is_empty() {
            self.next = Some(ProtocolState::Envelope);
        } else if self.idle && ctx.session.state.is_terminated() {
            tracing::debug!("terminated before greeting");
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
