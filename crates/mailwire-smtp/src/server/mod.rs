//! Server role: receives mail over SMTP or LMTP.
//!
//! Every parsed command becomes an [`Action`] on the connection's queue.
//! Sender and recipient checks are delegated to a [`MailHandler`] and may
//! finish at any time; replies still leave in command order. Message
//! content is streamed into a [`ContentSink`] opened per message.

mod data;
mod envelope;
mod greeting;
mod handlers;
mod quit;

pub use data::DataCodec;
pub use envelope::EnvelopeCodec;
pub use greeting::GreetingCodec;
pub use handlers::{Action, CommandRegistry, Effect, Handler};
pub use quit::QuitCodec;

use std::fmt;
use std::io;
use std::sync::Arc;

use crate::action::{ActionQueue, Drain, ReplyFuture};
use crate::codec::CodecRegistry;
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::io::Channel;
use crate::parser::CommandParser;
use crate::session::{DataType, ProtocolState, SessionContext, SessionHandle, SessionState};
use crate::types::{Address, EnhancedCode, Extension, Reply, ReplyCode, ReversePath};
use crate::writer::write_reply;

/// A received envelope, handed to the [`MailHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Envelope sender.
    pub sender: ReversePath,
    /// Accepted recipients, in order.
    pub recipients: Vec<Address>,
    /// Declared body type.
    pub data_type: DataType,
    /// Domain the client announced in its greeting.
    pub client: Option<String>,
}

/// Destination for received message content.
///
/// Content arrives unstuffed, with CRLF line endings, in order.
pub trait ContentSink: Send {
    /// Appends content.
    ///
    /// # Errors
    ///
    /// A failed write makes the delivery fail with a local error.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Called once after the last write.
    ///
    /// # Errors
    ///
    /// A failed finalize makes the delivery fail with a local error.
    fn finalize(&mut self) -> io::Result<()>;
}

impl<T: io::Write + Send> ContentSink for T {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.write_all(data)
    }

    fn finalize(&mut self) -> io::Result<()> {
        self.flush()
    }
}

/// Application side of a server session.
///
/// Shared by every connection of a server.
pub trait MailHandler: Send + Sync {
    /// Checks the envelope sender. A 2xx reply accepts it.
    fn validate_sender(&self, sender: &ReversePath) -> ReplyFuture {
        let _ = sender;
        ReplyFuture::ready(Reply::enhanced(ReplyCode::OK, EnhancedCode::SENDER_OK, "Sender OK"))
    }

    /// Checks one recipient. A 2xx reply accepts it.
    fn validate_recipient(&self, recipient: &Address) -> ReplyFuture {
        let _ = recipient;
        ReplyFuture::ready(Reply::enhanced(
            ReplyCode::OK,
            EnhancedCode::RECIPIENT_OK,
            "Recipient OK",
        ))
    }

    /// Opens the sink for the message about to be received.
    ///
    /// # Errors
    ///
    /// The content is then discarded and the delivery fails with a local
    /// error.
    fn open_sink(&self, envelope: &Envelope) -> io::Result<Box<dyn ContentSink>>;

    /// Delivers a fully received message. Under LMTP the reply is sent once
    /// per recipient.
    fn deliver(&self, envelope: &Envelope) -> ReplyFuture;
}

/// Reply for a message accepted for delivery.
#[must_use]
pub fn message_accepted() -> Reply {
    Reply::enhanced(
        ReplyCode::OK,
        EnhancedCode::MESSAGE_ACCEPTED,
        "Message accepted for delivery",
    )
}

/// Session data the actions operate on.
pub struct ServerSession {
    state: SessionState,
    config: Arc<ServerConfig>,
    advertised: Vec<Extension>,
    handler: Arc<dyn MailHandler>,
    /// A queued greeting, DATA or QUIT stops command parsing until it is
    /// answered.
    barrier: bool,
    /// DATA was answered with 354.
    data_ready: bool,
    /// QUIT was answered with 221.
    quit: bool,
}

impl fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSession")
            .field("state", &self.state)
            .field("barrier", &self.barrier)
            .field("data_ready", &self.data_ready)
            .field("quit", &self.quit)
            .finish_non_exhaustive()
    }
}

impl ServerSession {
    /// Per-connection state.
    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn envelope(&self) -> Envelope {
        Envelope {
            sender: self.state.sender.clone().unwrap_or(ReversePath::Null),
            recipients: self.state.recipients.clone(),
            data_type: self.state.data_type,
            client: self.state.peer_name.clone(),
        }
    }
}

/// Per-connection context of a server session.
#[derive(Debug)]
pub struct ServerContext {
    session: ServerSession,
    actions: ActionQueue<Action>,
    commands: Arc<CommandRegistry>,
    parser: CommandParser,
}

impl ServerContext {
    /// Creates a context for one connection.
    pub fn new(config: Arc<ServerConfig>, handler: Arc<dyn MailHandler>) -> Self {
        let parser = CommandParser::new(config.max_line_length);
        let advertised = config.advertised_extensions();
        Self {
            session: ServerSession {
                state: SessionState::default(),
                config,
                advertised,
                handler,
                barrier: false,
                data_ready: false,
                quit: false,
            },
            actions: ActionQueue::new(),
            commands: Arc::new(CommandRegistry::default()),
            parser,
        }
    }

    /// Uses `handle` for this connection, e.g. one from a tracker.
    #[must_use]
    pub fn with_handle(mut self, handle: SessionHandle) -> Self {
        self.session.state = SessionState::new(handle);
        self
    }

    /// Uses a customized command table.
    #[must_use]
    pub fn with_commands(mut self, commands: Arc<CommandRegistry>) -> Self {
        self.commands = commands;
        self
    }

    /// Session data.
    #[must_use]
    pub const fn session(&self) -> &ServerSession {
        &self.session
    }

    /// Number of actions not yet answered.
    #[must_use]
    pub fn pending_actions(&self) -> usize {
        self.actions.len()
    }

    /// Parses buffered commands into actions until a barrier is queued.
    ///
    /// Nothing is parsed once DATA was answered with 354: the rest of the
    /// buffer is message content for the data phase.
    fn read_commands(&mut self, channel: &mut Channel) -> Result<()> {
        while !self.session.barrier && !self.session.data_ready && !self.session.quit {
            let eof = channel.is_eof();
            let action = match self.parser.parse(&mut channel.inbound, eof) {
                Ok(Some(command)) => {
                    tracing::debug!(verb = %command.verb, "command received");
                    self.commands
                        .resolve(&command.verb)
                        .action(command, &self.session.config)
                }
                Ok(None) => return Ok(()),
                Err(Error::Syntax(message)) => {
                    tracing::debug!(%message, "malformed command");
                    Action::Reply(Reply::enhanced(
                        ReplyCode::SYNTAX_ERROR,
                        EnhancedCode::SYNTAX_ERROR,
                        "Syntax error, command unrecognized",
                    ))
                }
                Err(e) => return Err(e),
            };
            if action.is_barrier() {
                self.session.barrier = true;
            }
            self.actions.push(action);
        }
        Ok(())
    }

    /// Runs queued actions and writes their replies.
    fn drain(&mut self, channel: &mut Channel) -> Result<Drain> {
        let waker = channel.waker().clone();
        let outbound = &mut channel.outbound;
        self.actions.drain(&mut self.session, &waker, |reply, session| {
            write_reply(
                reply,
                outbound,
                session.state.enhanced_codes(),
                session.config.max_line_length,
            )
        })
    }

    /// Writes a reply outside the action queue (banner, shutdown notice).
    fn write_now(&mut self, reply: &Reply, channel: &mut Channel) -> Result<()> {
        write_reply(
            reply,
            &mut channel.outbound,
            self.session.state.enhanced_codes(),
            self.session.config.max_line_length,
        )?;
        self.session.state.reply = Some(reply.clone());
        Ok(())
    }

    /// Nothing queued, nothing buffered, nothing blocking the parser.
    fn is_idle(&self, channel: &Channel) -> bool {
        self.actions.is_empty() && channel.inbound.is_empty() && !self.session.barrier
    }
}

impl SessionContext for ServerContext {
    fn state(&self) -> &SessionState {
        &self.session.state
    }

    fn state_mut(&mut self) -> &mut SessionState {
        &mut self.session.state
    }

    fn connected(&mut self) {
        tracing::info!(hostname = %self.session.config.hostname, "connection accepted");
    }

    fn disconnected(&mut self) {
        self.actions.cancel_all();
        tracing::info!(peer = ?self.session.state.peer_name, "connection closed");
    }
}

/// Codecs for a server session.
#[must_use]
pub fn codecs() -> CodecRegistry<ServerContext> {
    CodecRegistry::new()
        .with(ProtocolState::Greeting, GreetingCodec::default())
        .with(ProtocolState::Envelope, EnvelopeCodec::default())
        .with(ProtocolState::Data, DataCodec::default())
        .with(ProtocolState::Quit, QuitCodec::default())
}
