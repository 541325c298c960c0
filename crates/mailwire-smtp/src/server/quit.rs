use crate::codec::{CodecRegistry, PhaseCodec};
use crate::error::Result;
use crate::io::Channel;
use crate::session::ProtocolState;
use crate::types::{EnhancedCode, Reply, ReplyCode};

use super::ServerContext;

/// Closes the connection once the last reply is out.
///
/// Entered after a 221, or on termination and idle timeout, in which case
/// the client is told with a 421 first.
#[derive(Debug, Default)]
pub struct QuitCodec {
    done: bool,
}

impl PhaseCodec<ServerContext> for QuitCodec {
    fn reset(&mut self, channel: &mut Channel, ctx: &mut ServerContext) -> Result<()> {
        self.done = false;
        if ctx.session.quit {
            return Ok(());
        }

        let cancelled = ctx.actions.cancel_all();
        tracing::info!(cancelled, "closing transmission channel");
        let notice = Reply::enhanced(
            ReplyCode::SERVICE_UNAVAILABLE,
            EnhancedCode::BAD_CONNECTION,
            format!("{} closing transmission channel", ctx.session.config.hostname),
        );
        ctx.write_now(&notice, channel)
    }

    fn consume(&mut self, channel: &mut Channel, _: &mut ServerContext) -> Result<()> {
        channel.inbound.clear();
        Ok(())
    }

    fn produce(&mut self, channel: &mut Channel, _: &mut ServerContext) -> Result<()> {
        self.done = channel.outbound.is_empty();
        Ok(())
    }

    fn is_completed(&self) -> bool {
        self.done
    }

    fn next(&self, _: &CodecRegistry<ServerContext>, _: &ServerContext) -> Option<ProtocolState> {
        None
    }

    fn is_idle(&self) -> bool {
        true
    }
}
