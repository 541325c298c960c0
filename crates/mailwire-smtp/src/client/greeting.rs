use crate::codec::{CodecRegistry, PhaseCodec};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::io::Channel;
use crate::session::{ClientType, ProtocolState, SessionContext};
use crate::types::{Extensions, Reply, ReplyCode};

use super::ClientContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hello {
    Ehlo,
    Helo,
    Lhlo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ServiceReady,
    Ready(Hello),
    Expecting(Hello),
    Done,
}

/// Waits for the banner, then negotiates with EHLO (HELO fallback) or LHLO.
#[derive(Debug)]
pub struct GreetingCodec {
    state: State,
    next: Option<ProtocolState>,
}

impl Default for GreetingCodec {
    fn default() -> Self {
        Self {
            state: State::ServiceReady,
            next: None,
        }
    }
}

impl GreetingCodec {
    fn give_up(&mut self, ctx: &mut ClientContext, reply: &Reply) {
        tracing::warn!(code = %reply.code, text = %reply.text(), "greeting refused");
        ctx.handler_mut()
            .exception(&Error::smtp_error(reply.code.as_u16(), reply.text()));
        self.next = Some(ProtocolState::Quit);
        self.state = State::Done;
    }

    fn on_hello_reply(&mut self, hello: Hello, reply: &Reply, ctx: &mut ClientContext) {
        if reply.is_success() {
            let (client_type, extensions) = match hello {
                Hello::Ehlo => (ClientType::Extended, Extensions::from_ehlo_lines(&reply.lines)),
                Hello::Lhlo => (ClientType::Lmtp, Extensions::from_ehlo_lines(&reply.lines)),
                Hello::Helo => (ClientType::Basic, Extensions::new()),
            };
            ctx.set_enhanced_codes(extensions.enhanced_status_codes());
            tracing::info!(?client_type, extensions = extensions.len(), "greeting accepted");

            let state = ctx.state_mut();
            state.client_type = Some(client_type);
            state.extensions = extensions;

            self.next = Some(if ctx.config().credentials.is_some() {
                ProtocolState::Auth
            } else {
                ProtocolState::Envelope
            });
            self.state = State::Done;
        } else if hello == Hello::Ehlo
            && matches!(
                reply.code,
                ReplyCode::SYNTAX_ERROR | ReplyCode::PARAMETER_ERROR | ReplyCode::NOT_IMPLEMENTED
            )
        {
            tracing::debug!(code = %reply.code, "EHLO refused, falling back to HELO");
            self.state = State::Ready(Hello::Helo);
        } else {
            self.give_up(ctx, reply);
        }
    }
}

impl PhaseCodec<ClientContext> for GreetingCodec {
    fn reset(&mut self, _: &mut Channel, ctx: &mut ClientContext) -> Result<()> {
        *self = Self::default();
        ctx.set_enhanced_codes(false);
        let state = ctx.state_mut();
        state.extensions.clear();
        state.client_type = None;
        Ok(())
    }

    fn consume(&mut self, channel: &mut Channel, ctx: &mut ClientContext) -> Result<()> {
        loop {
            match self.state {
                State::ServiceReady => {
                    let Some(reply) = ctx.read_reply(channel)? else {
                        return Ok(());
                    };
                    if reply.code == ReplyCode::SERVICE_READY {
                        let hello = if ctx.config().lmtp {
                            Hello::Lhlo
                        } else {
                            Hello::Ehlo
                        };
                        self.state = State::Ready(hello);
                    } else {
                        self.give_up(ctx, &reply);
                    }
                }
                State::Expecting(hello) => {
                    let Some(reply) = ctx.read_reply(channel)? else {
                        return Ok(());
                    };
                    self.on_hello_reply(hello, &reply, ctx);
                }
                State::Ready(_) | State::Done => return Ok(()),
            }
        }
    }

    fn produce(&mut self, channel: &mut Channel, ctx: &mut ClientContext) -> Result<()> {
        if let State::Ready(hello) = self.state {
            let hostname = &ctx.config().hostname;
            let command = match hello {
                Hello::Ehlo => Command::ehlo(hostname),
                Hello::Helo => Command::helo(hostname),
                Hello::Lhlo => Command::lhlo(hostname),
            };
            ctx.send(&command, channel)?;
            self.state = State::Expecting(hello);
        }
        Ok(())
    }

    fn is_completed(&self) -> bool {
        self.state == State::Done
    }

    fn next(&self, registry: &CodecRegistry<ClientContext>, ctx: &ClientContext) -> Option<ProtocolState> {
        match self.next? {
            ProtocolState::Quit => Some(ProtocolState::Quit),
            _ if ctx.state().is_terminated() => Some(ProtocolState::Quit),
            ProtocolState::Auth if !registry.contains(ProtocolState::Auth) => {
                Some(ProtocolState::Envelope)
            }
            next => Some(next),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::client::{DeliveryHandler, DeliveryRequest, DeliveryResult};
    use crate::config::ClientConfig;
    use crate::io::memory;

    struct Nothing;

    impl DeliveryHandler for Nothing {
        fn submit_request(&mut self) -> Option<DeliveryRequest> {
            None
        }
        fn completed(&mut self, _: DeliveryRequest, _: DeliveryResult) {}
        fn failed(&mut self, _: DeliveryRequest, _: DeliveryResult) {}
    }

    fn setup(config: ClientConfig) -> (GreetingCodec, Channel, ClientContext, memory::Script) {
        let (adapter, _peer) = memory::pair();
        let script = adapter.script();
        let mut channel = Channel::new(Box::new(adapter));
        let mut ctx = ClientContext::new(Arc::new(config), Nothing);
        let mut codec = GreetingCodec::default();
        codec.reset(&mut channel, &mut ctx).unwrap();
        (codec, channel, ctx, script)
    }

    fn step(codec: &mut GreetingCodec, channel: &mut Channel, ctx: &mut ClientContext) {
        channel.fill().unwrap();
        codec.consume(channel, ctx).unwrap();
        codec.produce(channel, ctx).unwrap();
        channel.flush().unwrap();
    }

    #[test]
    fn ehlo_negotiates_extensions() {
        let (mut codec, mut channel, mut ctx, script) = setup(ClientConfig::default());
        script.send(b"220 mx ready\r\n");
        step(&mut codec, &mut channel, &mut ctx);
        assert_eq!(script.take_string(), "EHLO localhost\r\n");

        script.send(b"250-mx\r\n250-PIPELINING\r\n250 ENHANCEDSTATUSCODES\r\n");
        step(&mut codec, &mut channel, &mut ctx);
        assert!(codec.is_completed());
        assert!(ctx.state().extensions.pipelining());
        assert_eq!(ctx.state().client_type, Some(ClientType::Extended));
        assert_eq!(
            codec.next(&crate::client::codecs(), &ctx),
            Some(ProtocolState::Envelope)
        );
    }

    #[test]
    fn falls_back_to_helo() {
        let (mut codec, mut channel, mut ctx, script) = setup(ClientConfig::default());
        script.send(b"220 old\r\n");
        step(&mut codec, &mut channel, &mut ctx);
        script.take();

        script.send(b"502 command not implemented\r\n");
        step(&mut codec, &mut channel, &mut ctx);
        assert_eq!(script.take_string(), "HELO localhost\r\n");

        script.send(b"250 old\r\n");
        step(&mut codec, &mut channel, &mut ctx);
        assert!(codec.is_completed());
        assert_eq!(ctx.state().client_type, Some(ClientType::Basic));
        assert!(ctx.state().extensions.is_empty());
    }

    #[test]
    fn lmtp_sends_lhlo_without_fallback() {
        let config = ClientConfig::builder().lmtp(true).build();
        let (mut codec, mut channel, mut ctx, script) = setup(config);
        script.send(b"220 lmtp\r\n");
        step(&mut codec, &mut channel, &mut ctx);
        assert_eq!(script.take_string(), "LHLO localhost\r\n");

        script.send(b"500 what\r\n");
        step(&mut codec, &mut channel, &mut ctx);
        assert!(codec.is_completed());
        assert_eq!(
            codec.next(&crate::client::codecs(), &ctx),
            Some(ProtocolState::Quit)
        );
        assert!(script.take().is_empty());
    }

    #[test]
    fn transient_banner_quits() {
        let (mut codec, mut channel, mut ctx, script) = setup(ClientConfig::default());
        script.send(b"421 too busy\r\n");
        step(&mut codec, &mut channel, &mut ctx);
        assert!(codec.is_completed());
        assert_eq!(
            codec.next(&crate::client::codecs(), &ctx),
            Some(ProtocolState::Quit)
        );
    }

    #[test]
    fn eof_before_banner_fails() {
        let (mut codec, mut channel, mut ctx, script) = setup(ClientConfig::default());
        script.close();
        channel.fill().unwrap();
        assert!(matches!(
            codec.consume(&mut channel, &mut ctx),
            Err(Error::UnexpectedEof)
        ));
    }
}
