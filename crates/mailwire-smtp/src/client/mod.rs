//! Client role: delivers queued messages to an SMTP or LMTP server.
//!
//! The application supplies messages through a [`DeliveryHandler`]. The
//! session pulls one [`DeliveryRequest`] at a time, runs the envelope and
//! data exchange, and reports the outcome through the same handler. With
//! PIPELINING negotiated, MAIL, every RCPT and DATA go out in one batch and
//! the replies are matched back to recipients in order.

mod auth;
mod data;
mod envelope;
mod greeting;
mod quit;
mod reset;

pub use auth::AuthCodec;
pub use data::DataCodec;
pub use envelope::EnvelopeCodec;
pub use greeting::GreetingCodec;
pub use quit::QuitCodec;
pub use reset::ResetCodec;

use std::fmt;
use std::io;
use std::sync::Arc;

use crate::codec::CodecRegistry;
use crate::command::Command;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::io::Channel;
use crate::parser::ReplyParser;
use crate::session::{DataType, ProtocolState, SessionContext, SessionHandle, SessionState};
use crate::types::{Address, EnhancedCode, Reply, ReplyCode, ReversePath};
use crate::writer::write_command;

/// Readable, rewindable message content.
pub trait ContentSource: Send {
    /// Reads up to `buf.len()` bytes; 0 means end of content.
    ///
    /// # Errors
    ///
    /// Returns any underlying read error.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Rewinds to the start, so a failed delivery can be retried.
    ///
    /// # Errors
    ///
    /// Returns any underlying seek error.
    fn rewind(&mut self) -> io::Result<()>;
}

impl<T: io::Read + io::Seek + Send> ContentSource for T {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(self, buf)
    }

    fn rewind(&mut self) -> io::Result<()> {
        io::Seek::rewind(self)
    }
}

/// One message to deliver.
pub struct DeliveryRequest {
    /// Envelope sender.
    pub sender: ReversePath,
    /// Envelope recipients, in order.
    pub recipients: Vec<Address>,
    /// Body type to declare if the server supports 8BITMIME.
    pub data_type: DataType,
    /// Size to declare if the server supports SIZE.
    pub size: Option<u64>,
    /// Message content.
    pub content: Box<dyn ContentSource>,
}

impl fmt::Debug for DeliveryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryRequest")
            .field("sender", &self.sender)
            .field("recipients", &self.recipients)
            .field("data_type", &self.data_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl DeliveryRequest {
    /// Creates a request reading content from `content`.
    pub fn new(
        sender: ReversePath,
        recipients: Vec<Address>,
        content: impl ContentSource + 'static,
    ) -> Self {
        Self {
            sender,
            recipients,
            data_type: DataType::SevenBit,
            size: None,
            content: Box::new(content),
        }
    }

    /// Creates a request for an in-memory message; its size is known.
    pub fn from_bytes(
        sender: ReversePath,
        recipients: Vec<Address>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        let content = content.into();
        let size = content.len() as u64;
        Self {
            size: Some(size),
            ..Self::new(sender, recipients, io::Cursor::new(content))
        }
    }

    /// Sets the body type.
    #[must_use]
    pub const fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    /// Sets the declared size.
    #[must_use]
    pub const fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

/// A recipient the server refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientFailure {
    /// The refused recipient.
    pub recipient: Address,
    /// The server's reply for it.
    pub reply: Reply,
}

/// Outcome of one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    /// Final reply: the end-of-data reply, or the reply that ended the
    /// envelope.
    pub reply: Reply,
    /// Refused recipients, in request order.
    pub failures: Vec<RecipientFailure>,
}

impl DeliveryResult {
    /// Returns `true` if the message was accepted for at least one recipient.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.reply.is_success()
    }
}

/// Application side of a client session.
pub trait DeliveryHandler: Send {
    /// Returns the next message to deliver, if any.
    fn submit_request(&mut self) -> Option<DeliveryRequest>;

    /// Called when a message was accepted.
    fn completed(&mut self, request: DeliveryRequest, result: DeliveryResult);

    /// Called when a message was refused or could not be sent.
    fn failed(&mut self, request: DeliveryRequest, result: DeliveryResult);

    /// Called with the error that ended the session.
    fn exception(&mut self, error: &Error) {
        let _ = error;
    }

    /// Called once the connection is established.
    fn connected(&mut self) {}

    /// Called once the connection is closed.
    fn disconnected(&mut self) {}
}

/// Per-connection context of a client session.
pub struct ClientContext {
    state: SessionState,
    config: Arc<ClientConfig>,
    handler: Box<dyn DeliveryHandler>,
    replies: ReplyParser,
    request: Option<DeliveryRequest>,
    failures: Vec<RecipientFailure>,
}

impl fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientContext")
            .field("state", &self.state)
            .field("request", &self.request)
            .field("failures", &self.failures)
            .finish_non_exhaustive()
    }
}

impl ClientContext {
    /// Creates a context for one connection.
    pub fn new(config: Arc<ClientConfig>, handler: impl DeliveryHandler + 'static) -> Self {
        let replies = ReplyParser::new(config.max_line_length);
        Self {
            state: SessionState::default(),
            config,
            handler: Box::new(handler),
            replies,
            request: None,
            failures: Vec::new(),
        }
    }

    /// Uses `handle` for this connection, e.g. one from a tracker.
    #[must_use]
    pub fn with_handle(mut self, handle: SessionHandle) -> Self {
        self.state = SessionState::new(handle);
        self
    }

    /// Session configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The request in progress.
    #[must_use]
    pub const fn request(&self) -> Option<&DeliveryRequest> {
        self.request.as_ref()
    }

    pub(crate) fn handler_mut(&mut self) -> &mut dyn DeliveryHandler {
        self.handler.as_mut()
    }

    /// Makes a request current, pulling one from the handler if needed.
    ///
    /// Returns `false` if none is available.
    pub(crate) fn next_request(&mut self) -> bool {
        if self.request.is_some() {
            return true;
        }
        while let Some(request) = self.handler.submit_request() {
            if request.recipients.is_empty() {
                tracing::warn!(sender = %request.sender, "delivery request without recipients");
                let reply = Reply::enhanced(
                    ReplyCode::TRANSACTION_FAILED,
                    EnhancedCode::INVALID_COMMAND,
                    "No recipients",
                );
                self.handler.failed(
                    request,
                    DeliveryResult {
                        reply,
                        failures: Vec::new(),
                    },
                );
                continue;
            }
            tracing::debug!(
                sender = %request.sender,
                recipients = request.recipients.len(),
                "delivery started"
            );
            self.state.reset_envelope();
            self.failures.clear();
            self.request = Some(request);
            return true;
        }
        false
    }

    pub(crate) fn request_mut(&mut self) -> Result<&mut DeliveryRequest> {
        self.request
            .as_mut()
            .ok_or_else(|| Error::Protocol("No delivery request in progress".into()))
    }

    pub(crate) fn record_failure(&mut self, recipient: Address, reply: Reply) {
        tracing::debug!(recipient = %recipient, code = %reply.code, "recipient refused");
        self.failures.push(RecipientFailure { recipient, reply });
    }

    pub(crate) fn last_failure(&self) -> Option<&Reply> {
        self.failures.last().map(|f| &f.reply)
    }

    /// Ends the current request with `reply` as its final reply.
    pub(crate) fn finish(&mut self, reply: Reply) {
        self.state.reset_envelope();
        let Some(request) = self.request.take() else {
            return;
        };
        let result = DeliveryResult {
            reply,
            failures: std::mem::take(&mut self.failures),
        };
        if result.is_success() {
            tracing::info!(
                code = %result.reply.code,
                refused = result.failures.len(),
                "delivery completed"
            );
            self.handler.completed(request, result);
        } else {
            tracing::info!(code = %result.reply.code, "delivery failed");
            self.handler.failed(request, result);
        }
    }

    pub(crate) fn read_reply(&mut self, channel: &mut Channel) -> Result<Option<Reply>> {
        let eof = channel.is_eof();
        match self.replies.parse(&mut channel.inbound, eof)? {
            Some(reply) => {
                tracing::debug!(code = %reply.code, "reply received");
                self.state.reply = Some(reply.clone());
                Ok(Some(reply))
            }
            None if eof => Err(Error::UnexpectedEof),
            None => Ok(None),
        }
    }

    pub(crate) fn send(&self, command: &Command, channel: &mut Channel) -> Result<()> {
        tracing::debug!(verb = %command.verb, "sending command");
        write_command(command, &mut channel.outbound, self.config.max_line_length)
    }

    pub(crate) fn set_enhanced_codes(&mut self, enabled: bool) {
        self.replies.set_enhanced_codes(enabled);
    }
}

impl SessionContext for ClientContext {
    fn state(&self) -> &SessionState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    fn connected(&mut self) {
        self.handler.connected();
    }

    fn disconnected(&mut self) {
        if let Some(request) = self.request.take() {
            let result = DeliveryResult {
                reply: Reply::enhanced(
                    ReplyCode::SERVICE_UNAVAILABLE,
                    EnhancedCode::BAD_CONNECTION,
                    "Connection closed",
                ),
                failures: std::mem::take(&mut self.failures),
            };
            tracing::debug!("delivery cancelled by disconnect");
            self.handler.failed(request, result);
        }
        self.handler.disconnected();
    }

    fn exception(&mut self, error: &Error) {
        self.handler.exception(error);
    }
}

/// Codecs for a client session.
#[must_use]
pub fn codecs() -> CodecRegistry<ClientContext> {
    CodecRegistry::new()
        .with(ProtocolState::Greeting, GreetingCodec::default())
        .with(ProtocolState::Auth, AuthCodec::default())
        .with(ProtocolState::Envelope, EnvelopeCodec::default())
        .with(ProtocolState::Data, DataCodec::default())
        .with(ProtocolState::Reset, ResetCodec::default())
        .with(ProtocolState::Quit, QuitCodec::default())
}
