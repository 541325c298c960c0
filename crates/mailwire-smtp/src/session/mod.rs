//! Per-connection session state and the driver that runs phase codecs.

mod driver;
mod tracker;

pub use driver::{Session, SessionContext};
pub use tracker::{SessionGuard, SessionTracker};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::Waker;

use crate::types::{Address, Extensions, Reply, ReversePath};

/// Protocol phase of a connection. Exactly one is current.
///
/// Transitions are chosen by the active phase codec, never by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolState {
    /// Connection accepted, nothing exchanged yet.
    #[default]
    Init,
    /// Service-ready banner and EHLO/HELO/LHLO negotiation.
    Greeting,
    /// SASL authentication.
    Auth,
    /// MAIL/RCPT/DATA exchange.
    Envelope,
    /// Message content transfer.
    Data,
    /// RSET after a failed envelope.
    Reset,
    /// QUIT or shutdown notice, then close.
    Quit,
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "INIT",
            Self::Greeting => "GREETING",
            Self::Auth => "AUTH",
            Self::Envelope => "ENVELOPE",
            Self::Data => "DATA",
            Self::Reset => "RESET",
            Self::Quit => "QUIT",
        })
    }
}

/// Which greeting the client used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientType {
    /// HELO.
    Basic,
    /// EHLO.
    Extended,
    /// LHLO (LMTP).
    Lmtp,
}

/// Body type declared with `MAIL FROM ... BODY=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataType {
    /// 7-bit ASCII content.
    #[default]
    SevenBit,
    /// 8-bit MIME content.
    EightBitMime,
}

impl DataType {
    /// Parses a `BODY=` value.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "7BIT" => Some(Self::SevenBit),
            "8BITMIME" => Some(Self::EightBitMime),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct HandleInner {
    terminate: AtomicBool,
    waker: Mutex<Option<Waker>>,
}

/// Cross-thread handle onto one connection.
///
/// Used to request termination (graceful shutdown) or to wake an idle
/// client session after a new delivery request became available.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle(Arc<HandleInner>);

impl SessionHandle {
    /// Creates a handle not yet bound to a connection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the session to finish its current exchange and quit.
    pub fn terminate(&self) {
        self.0.terminate.store(true, Ordering::Release);
        self.wake();
    }

    /// Returns `true` once termination was requested.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.0.terminate.load(Ordering::Acquire)
    }

    /// Re-arms the connection so its codec gets to produce again.
    pub fn wake(&self) {
        let waker = self
            .0
            .waker
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    pub(crate) fn bind(&self, waker: &Waker) {
        *self
            .0
            .waker
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(waker.clone());
    }
}

/// Mutable per-connection record. Owned by exactly one connection.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Current phase.
    pub protocol_state: ProtocolState,
    /// Negotiated extensions.
    pub extensions: Extensions,
    /// Greeting used, once negotiated.
    pub client_type: Option<ClientType>,
    /// Domain the client announced in its greeting (server role).
    pub peer_name: Option<String>,
    /// Current sender.
    pub sender: Option<ReversePath>,
    /// Accepted recipients, in order.
    pub recipients: Vec<Address>,
    /// Declared body type.
    pub data_type: DataType,
    /// Last reply sent or received.
    pub reply: Option<Reply>,
    handle: SessionHandle,
}

impl SessionState {
    /// Creates the state for a new connection.
    #[must_use]
    pub fn new(handle: SessionHandle) -> Self {
        Self {
            protocol_state: ProtocolState::Init,
            extensions: Extensions::new(),
            client_type: None,
            peer_name: None,
            sender: None,
            recipients: Vec::new(),
            data_type: DataType::default(),
            reply: None,
            handle,
        }
    }

    /// Clears sender, recipients and data type.
    pub fn reset_envelope(&mut self) {
        self.sender = None;
        self.recipients.clear();
        self.data_type = DataType::default();
    }

    /// Returns `true` if both sides negotiated enhanced status codes.
    #[must_use]
    pub fn enhanced_codes(&self) -> bool {
        self.extensions.enhanced_status_codes()
    }

    /// Returns `true` once termination was requested.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.handle.is_terminated()
    }

    /// Marks the session for termination.
    pub fn terminate(&self) {
        self.handle.terminate();
    }

    /// Handle onto this connection.
    #[must_use]
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(SessionHandle::new())
    }
}
