//! Command dispatch and the actions commands turn into.

use std::collections::HashMap;

use crate::action::{self, Execution, ReplyFuture};
use crate::command::Command;
use crate::config::ServerConfig;
use crate::session::{ClientType, DataType};
use crate::types::{Address, EnhancedCode, Extensions, Reply, ReplyCode, ReversePath};

use super::{Envelope, ServerSession};

/// What a verb does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    /// EHLO, HELO or LHLO.
    Greeting(ClientType),
    /// MAIL FROM.
    Mail,
    /// RCPT TO.
    Rcpt,
    /// DATA.
    Data,
    /// RSET.
    Rset,
    /// NOOP.
    Noop,
    /// VRFY.
    Vrfy,
    /// QUIT.
    Quit,
    /// HELP.
    Help,
    /// Any verb not in the registry.
    Unrecognized,
}

/// Verb table of a server.
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    handlers: HashMap<String, Handler>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::empty()
            .with("EHLO", Handler::Greeting(ClientType::Extended))
            .with("HELO", Handler::Greeting(ClientType::Basic))
            .with("LHLO", Handler::Greeting(ClientType::Lmtp))
            .with("MAIL", Handler::Mail)
            .with("RCPT", Handler::Rcpt)
            .with("DATA", Handler::Data)
            .with("RSET", Handler::Rset)
            .with("NOOP", Handler::Noop)
            .with("VRFY", Handler::Vrfy)
            .with("QUIT", Handler::Quit)
            .with("HELP", Handler::Help)
    }
}

impl CommandRegistry {
    /// Creates a registry that recognizes nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Maps `verb` to `handler`.
    #[must_use]
    pub fn with(mut self, verb: &str, handler: Handler) -> Self {
        self.handlers.insert(verb.to_ascii_uppercase(), handler);
        self
    }

    /// Removes `verb`; it then answers as unrecognized.
    #[must_use]
    pub fn without(mut self, verb: &str) -> Self {
        self.handlers.remove(&verb.to_ascii_uppercase());
        self
    }

    /// Looks up a verb, ignoring case.
    #[must_use]
    pub fn resolve(&self, verb: &str) -> Handler {
        self.handlers
            .get(&verb.to_ascii_uppercase())
            .copied()
            .unwrap_or(Handler::Unrecognized)
    }
}

fn reply(code: ReplyCode, enhanced: EnhancedCode, text: &str) -> Action {
    Action::Reply(Reply::enhanced(code, enhanced, text))
}

fn bad_arguments(text: &str) -> Action {
    reply(ReplyCode::PARAMETER_ERROR, EnhancedCode::INVALID_ARGUMENTS, text)
}

/// Splits `FROM:<path> PARAM...` into the path and its parameters,
/// tolerating a space after the colon.
fn split_path<'a>(command: &'a Command, prefix: &str) -> Option<(&'a str, &'a [String])> {
    let argument = command.argument.as_deref()?;
    let head = argument.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    match &argument[prefix.len()..] {
        "" => command
            .params
            .split_first()
            .map(|(path, params)| (path.as_str(), params)),
        path => Some((path, &command.params)),
    }
}

impl Handler {
    /// Turns a parsed command into the action that answers it.
    ///
    /// Argument errors become immediate replies, so they keep their place
    /// among pipelined commands.
    #[must_use]
    pub fn action(self, command: Command, config: &ServerConfig) -> Action {
        match self {
            Self::Greeting(kind) => match command.argument {
                Some(domain) => Action::Greeting { kind, domain },
                None => bad_arguments(&format!("Syntax: {} domain", command.verb)),
            },
            Self::Mail => mail(&command, config),
            Self::Rcpt => rcpt(&command),
            Self::Data if command.argument.is_some() => bad_arguments("Syntax: DATA"),
            Self::Data => Action::Data,
            Self::Rset => Action::Rset,
            Self::Quit => Action::Quit,
            Self::Noop => reply(ReplyCode::OK, EnhancedCode::OK, "OK"),
            Self::Vrfy => reply(
                ReplyCode::CANNOT_VERIFY,
                EnhancedCode::CANNOT_VERIFY,
                "Cannot VRFY user, but will accept message and attempt delivery",
            ),
            Self::Help => reply(
                ReplyCode::HELP,
                EnhancedCode::OK,
                "Supported commands: EHLO HELO LHLO MAIL RCPT DATA RSET NOOP VRFY QUIT HELP",
            ),
            Self::Unrecognized => {
                tracing::debug!(verb = %command.verb, "unrecognized command");
                reply(
                    ReplyCode::SYNTAX_ERROR,
                    EnhancedCode::SYNTAX_ERROR,
                    "Command not recognized",
                )
            }
        }
    }
}

fn mail(command: &Command, config: &ServerConfig) -> Action {
    let Some((path, params)) = split_path(command, "FROM:") else {
        return reply(
            ReplyCode::PARAMETER_ERROR,
            EnhancedCode::BAD_SENDER_SYNTAX,
            "Syntax: MAIL FROM:<address>",
        );
    };
    let sender = match ReversePath::from_path(path) {
        Ok(sender) => sender,
        Err(e) => {
            return reply(
                ReplyCode::PARAMETER_ERROR,
                EnhancedCode::BAD_SENDER_SYNTAX,
                &e.to_string(),
            );
        }
    };

    let mut data_type = DataType::SevenBit;
    for param in params {
        let (key, value) = param.split_once('=').unwrap_or((param.as_str(), ""));
        match key.to_ascii_uppercase().as_str() {
            "BODY" => match DataType::parse(value) {
                Some(parsed) => data_type = parsed,
                None => return bad_arguments("Unsupported BODY type"),
            },
            "SIZE" => match value.parse::<usize>() {
                Ok(size) if config.max_message_size > 0 && size > config.max_message_size => {
                    return reply(
                        ReplyCode::EXCEEDED_STORAGE,
                        EnhancedCode::MESSAGE_TOO_BIG,
                        "Message size exceeds fixed maximum message size",
                    );
                }
                Ok(_) => {}
                Err(_) => return bad_arguments("Invalid SIZE value"),
            },
            _ => {
                return reply(
                    ReplyCode::PARAMETERS_NOT_RECOGNIZED,
                    EnhancedCode::INVALID_ARGUMENTS,
                    &format!("Unsupported parameter {key}"),
                );
            }
        }
    }
    Action::Mail { sender, data_type }
}

fn rcpt(command: &Command) -> Action {
    let Some((path, params)) = split_path(command, "TO:") else {
        return reply(
            ReplyCode::PARAMETER_ERROR,
            EnhancedCode::BAD_DESTINATION_SYNTAX,
            "Syntax: RCPT TO:<address>",
        );
    };
    if let Some(param) = params.first() {
        return reply(
            ReplyCode::PARAMETERS_NOT_RECOGNIZED,
            EnhancedCode::INVALID_ARGUMENTS,
            &format!("Unsupported parameter {param}"),
        );
    }
    match Address::from_path(path) {
        Ok(recipient) => Action::Rcpt { recipient },
        Err(e) => reply(
            ReplyCode::PARAMETER_ERROR,
            EnhancedCode::BAD_DESTINATION_SYNTAX,
            &e.to_string(),
        ),
    }
}

/// One queued unit of work on a server connection.
#[derive(Debug)]
pub enum Action {
    /// A reply known at parse time.
    Reply(Reply),
    /// EHLO, HELO or LHLO.
    Greeting {
        /// Verb used.
        kind: ClientType,
        /// Announced domain.
        domain: String,
    },
    /// MAIL FROM.
    Mail {
        /// Requested sender.
        sender: ReversePath,
        /// Requested body type.
        data_type: DataType,
    },
    /// RCPT TO.
    Rcpt {
        /// Requested recipient.
        recipient: Address,
    },
    /// DATA.
    Data,
    /// RSET.
    Rset,
    /// QUIT.
    Quit,
    /// End of message content.
    Deliver {
        /// Envelope of the received message.
        envelope: Envelope,
        /// Set when the message cannot be delivered, e.g. it was too big.
        failure: Option<Reply>,
    },
}

impl Action {
    /// Returns `true` if later input must not be parsed as commands until
    /// this action is answered.
    #[must_use]
    pub const fn is_barrier(&self) -> bool {
        matches!(self, Self::Greeting { .. } | Self::Data | Self::Quit)
    }
}

/// State change applied once an action's reply is known.
#[derive(Debug)]
pub enum Effect {
    /// Nothing to apply.
    None,
    /// Refused greeting; command parsing resumes.
    Release,
    /// Greeting answered.
    Greeted {
        /// Verb used.
        kind: ClientType,
        /// Announced domain.
        domain: String,
    },
    /// MAIL answered.
    SetSender {
        /// Requested sender.
        sender: ReversePath,
        /// Requested body type.
        data_type: DataType,
    },
    /// RCPT answered.
    AddRecipient(Address),
    /// DATA answered.
    StartData,
    /// RSET answered.
    Reset,
    /// QUIT answered.
    Quit,
    /// Delivery answered.
    Delivered,
}

fn ready(reply: Reply, effect: Effect) -> Execution<Effect> {
    Execution::new(ReplyFuture::ready(reply), effect)
}

fn bad_sequence(text: &str) -> Reply {
    Reply::enhanced(ReplyCode::BAD_SEQUENCE, EnhancedCode::INVALID_COMMAND, text)
}

fn greet(kind: ClientType, domain: String, session: &ServerSession) -> Execution<Effect> {
    let config = &session.config;
    if config.lmtp != (kind == ClientType::Lmtp) {
        let text = if config.lmtp {
            "This is an LMTP server, use LHLO"
        } else {
            "LHLO is only valid for LMTP"
        };
        return ready(
            Reply::enhanced(ReplyCode::SYNTAX_ERROR, EnhancedCode::SYNTAX_ERROR, text),
            Effect::Release,
        );
    }

    let first = format!("{} greets {domain}", config.hostname);
    let reply = match kind {
        ClientType::Basic => Reply::single(ReplyCode::OK, first),
        ClientType::Extended | ClientType::Lmtp => {
            let mut lines = vec![first];
            lines.extend(session.advertised.iter().map(ToString::to_string));
            Reply::new(ReplyCode::OK, lines)
        }
    };
    ready(reply, Effect::Greeted { kind, domain })
}

impl action::Action for Action {
    type Session = ServerSession;
    type Effect = Effect;

    fn execute(self, session: &mut ServerSession) -> Execution<Effect> {
        let state = &session.state;
        match self {
            Self::Reply(reply) => ready(reply, Effect::None),
            Self::Greeting { kind, domain } => greet(kind, domain, session),
            Self::Mail { .. } if state.client_type.is_none() => {
                ready(bad_sequence("Send HELO/EHLO first"), Effect::None)
            }
            Self::Mail { .. } if state.sender.is_some() => {
                ready(bad_sequence("Sender already specified"), Effect::None)
            }
            Self::Mail { sender, data_type } => Execution::new(
                session.handler.validate_sender(&sender),
                Effect::SetSender { sender, data_type },
            ),
            Self::Rcpt { .. } if state.sender.is_none() => {
                ready(bad_sequence("Need MAIL before RCPT"), Effect::None)
            }
            Self::Rcpt { recipient } => Execution::new(
                session.handler.validate_recipient(&recipient),
                Effect::AddRecipient(recipient),
            ),
            Self::Data if state.sender.is_none() => {
                ready(bad_sequence("Need MAIL before DATA"), Effect::StartData)
            }
            Self::Data if state.recipients.is_empty() => ready(
                Reply::enhanced(
                    ReplyCode::TRANSACTION_FAILED,
                    EnhancedCode::INVALID_COMMAND,
                    "No valid recipients",
                ),
                Effect::StartData,
            ),
            Self::Data => ready(
                Reply::single(ReplyCode::START_DATA, "Start mail input; end with <CRLF>.<CRLF>"),
                Effect::StartData,
            ),
            Self::Rset => ready(Reply::enhanced(ReplyCode::OK, EnhancedCode::OK, "OK"), Effect::Reset),
            Self::Quit => ready(
                Reply::enhanced(
                    ReplyCode::CLOSING,
                    EnhancedCode::OK,
                    format!("{} closing connection", session.config.hostname),
                ),
                Effect::Quit,
            ),
            Self::Deliver { envelope, failure } => {
                let repeat = if state.client_type == Some(ClientType::Lmtp) {
                    envelope.recipients.len()
                } else {
                    1
                };
                let future = match failure {
                    Some(reply) => ReplyFuture::ready(reply),
                    None => session.handler.deliver(&envelope),
                };
                Execution::new(future, Effect::Delivered).repeat(repeat)
            }
        }
    }

    fn complete(effect: Effect, reply: &Reply, session: &mut ServerSession) {
        session.state.reply = Some(reply.clone());
        let accepted = reply.is_success();
        match effect {
            Effect::None => {}
            Effect::Release => session.barrier = false,
            Effect::Greeted { kind, domain } => {
                session.barrier = false;
                if accepted {
                    let state = &mut session.state;
                    state.reset_envelope();
                    state.client_type = Some(kind);
                    state.peer_name = Some(domain);
                    state.extensions = Extensions::new();
                    if kind != ClientType::Basic {
                        for extension in &session.advertised {
                            state.extensions.insert(extension.clone());
                        }
                    }
                    tracing::info!(peer = ?state.peer_name, ?kind, "client greeted");
                }
            }
            Effect::SetSender { sender, data_type } => {
                if accepted {
                    tracing::debug!(%sender, "sender accepted");
                    session.state.sender = Some(sender);
                    session.state.data_type = data_type;
                } else {
                    tracing::debug!(%sender, code = %reply.code, "sender rejected");
                }
            }
            Effect::AddRecipient(recipient) => {
                if accepted {
                    tracing::debug!(%recipient, "recipient accepted");
                    session.state.recipients.push(recipient);
                } else {
                    tracing::debug!(%recipient, code = %reply.code, "recipient rejected");
                }
            }
            Effect::StartData => {
                session.barrier = false;
                session.data_ready = reply.code == ReplyCode::START_DATA;
            }
            Effect::Reset => session.state.reset_envelope(),
            Effect::Quit => session.quit = true,
            Effect::Delivered => {
                tracing::info!(
                    code = %reply.code,
                    recipients = session.state.recipients.len(),
                    "message delivered"
                );
                session.state.reset_envelope();
            }
        }
    }
}
