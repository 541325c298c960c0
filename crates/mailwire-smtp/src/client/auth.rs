//! SASL PLAIN and LOGIN (RFC 4954).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::codec::{CodecRegistry, PhaseCodec};
use crate::command::Command;
use crate::config::Credentials;
use crate::error::{Error, Result};
use crate::io::Channel;
use crate::session::{ProtocolState, SessionContext};
use crate::types::{AuthMechanism, Reply, ReplyCode};

use super::ClientContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Username,
    Password,
    Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Start,
    Awaiting(Expect),
    Respond(String, Expect),
    Done,
}

/// Authenticates with the configured credentials.
///
/// Entering this phase with a mechanism the server did not advertise is a
/// configuration error and ends the session.
#[derive(Debug)]
pub struct AuthCodec {
    state: State,
    credentials: Option<Credentials>,
    next: Option<ProtocolState>,
}

impl Default for AuthCodec {
    fn default() -> Self {
        Self {
            state: State::Start,
            credentials: None,
            next: None,
        }
    }
}

impl AuthCodec {
    fn credentials(&self) -> Result<&Credentials> {
        self.credentials
            .as_ref()
            .ok_or_else(|| Error::Configuration("No credentials configured".into()))
    }

    fn refused(&mut self, ctx: &mut ClientContext, reply: &Reply) {
        tracing::warn!(code = %reply.code, text = %reply.text(), "authentication failed");
        ctx.handler_mut()
            .exception(&Error::smtp_error(reply.code.as_u16(), reply.text()));
        self.next = Some(ProtocolState::Quit);
        self.state = State::Done;
    }

    fn on_reply(&mut self, expect: Expect, reply: &Reply, ctx: &mut ClientContext) -> Result<()> {
        match expect {
            Expect::Outcome if reply.code == ReplyCode::AUTH_SUCCESS => {
                tracing::info!("authenticated");
                self.next = Some(ProtocolState::Envelope);
                self.state = State::Done;
            }
            Expect::Username if reply.code == ReplyCode::AUTH_CONTINUE => {
                let username = STANDARD.encode(&self.credentials()?.username);
                self.state = State::Respond(username, Expect::Password);
            }
            Expect::Password if reply.code == ReplyCode::AUTH_CONTINUE => {
                let password = STANDARD.encode(&self.credentials()?.password);
                self.state = State::Respond(password, Expect::Outcome);
            }
            _ => self.refused(ctx, reply),
        }
        Ok(())
    }
}

impl PhaseCodec<ClientContext> for AuthCodec {
    fn reset(&mut self, _: &mut Channel, ctx: &mut ClientContext) -> Result<()> {
        *self = Self::default();
        let credentials = ctx
            .config()
            .credentials
            .clone()
            .ok_or_else(|| Error::Configuration("No credentials configured".into()))?;

        let advertised = ctx.state().extensions.auth_mechanisms();
        if !advertised.contains(&credentials.mechanism) {
            return Err(Error::Configuration(format!(
                "Server does not offer AUTH {}",
                credentials.mechanism.as_str()
            )));
        }
        self.credentials = Some(credentials);
        Ok(())
    }

    fn consume(&mut self, channel: &mut Channel, ctx: &mut ClientContext) -> Result<()> {
        while let State::Awaiting(expect) = self.state {
            let Some(reply) = ctx.read_reply(channel)? else {
                break;
            };
            self.on_reply(expect, &reply, ctx)?;
        }
        Ok(())
    }

    fn produce(&mut self, channel: &mut Channel, ctx: &mut ClientContext) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Done) {
            State::Start => {
                let credentials = self.credentials()?;
                let command = match credentials.mechanism {
                    AuthMechanism::Plain => {
                        let token = format!("\0{}\0{}", credentials.username, credentials.password);
                        Command::auth(AuthMechanism::Plain, Some(STANDARD.encode(token)))
                    }
                    AuthMechanism::Login => Command::auth(AuthMechanism::Login, None),
                };
                let expect = match credentials.mechanism {
                    AuthMechanism::Plain => Expect::Outcome,
                    AuthMechanism::Login => Expect::Username,
                };
                ctx.send(&command, channel)?;
                self.state = State::Awaiting(expect);
            }
            State::Respond(line, expect) => {
                channel.outbound.extend_from_slice(line.as_bytes());
                channel.outbound.extend_from_slice(b"\r\n");
                self.state = State::Awaiting(expect);
            }
            state => self.state = state,
        }
        Ok(())
    }

    fn is_completed(&self) -> bool {
        self.state == State::Done
    }

    fn next(&self, _: &CodecRegistry<ClientContext>, ctx: &ClientContext) -> Option<ProtocolState> {
        if ctx.state().is_terminated() {
            return Some(ProtocolState::Quit);
        }
        self.next
    }
}
