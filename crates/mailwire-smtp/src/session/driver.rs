//! Event-driven session driver.

use crate::codec::CodecRegistry;
use crate::error::{Error, Result};
use crate::io::{Channel, IoAdapter};

use super::{ProtocolState, SessionHandle, SessionState};

/// Upper bound on codec rounds per event, so one busy connection cannot
/// starve the event loop.
const MAX_ROUNDS: usize = 64;

/// Role-specific session context, shared by all codecs of a connection.
pub trait SessionContext: Send {
    /// Per-connection state.
    fn state(&self) -> &SessionState;

    /// Per-connection state, mutably.
    fn state_mut(&mut self) -> &mut SessionState;

    /// Called once the connection is established.
    fn connected(&mut self) {}

    /// Called once the connection is closed, gracefully or not.
    fn disconnected(&mut self) {}

    /// Called with the error that ended the connection.
    fn exception(&mut self, error: &Error) {
        let _ = error;
    }
}

/// Drives one connection through its phase codecs.
///
/// The surrounding runtime reports readiness with [`Session::on_readable`],
/// [`Session::on_writable`] and [`Session::on_timeout`]. Any error returned
/// from a codec ends the connection; it is reported to the context and
/// returned to the caller.
pub struct Session<C> {
    channel: Channel,
    context: C,
    registry: CodecRegistry<C>,
    active: Option<ProtocolState>,
    closed: bool,
}

impl<C> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("channel", &self.channel)
            .field("phase", &self.active)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<C: SessionContext> Session<C> {
    /// Creates a session over `adapter`.
    #[must_use]
    pub fn new(adapter: Box<dyn IoAdapter>, context: C, registry: CodecRegistry<C>) -> Self {
        Self {
            channel: Channel::new(adapter),
            context,
            registry,
            active: None,
            closed: false,
        }
    }

    /// Starts the session: enters the greeting phase.
    ///
    /// # Errors
    ///
    /// Returns the error that closed the connection.
    pub fn connect(&mut self) -> Result<()> {
        self.context.state().handle().bind(self.channel.waker());
        self.context.state_mut().protocol_state = ProtocolState::Init;
        self.context.connected();
        tracing::debug!("session connected");
        self.guard(|session| {
            session.transition(ProtocolState::Greeting)?;
            session.pump()
        })
    }

    /// Handles read readiness.
    ///
    /// # Errors
    ///
    /// Returns the error that closed the connection.
    pub fn on_readable(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.guard(|session| {
            session.channel.fill()?;
            session.pump()
        })
    }

    /// Handles write readiness, including wake-ups from resolved replies.
    ///
    /// # Errors
    ///
    /// Returns the error that closed the connection.
    pub fn on_writable(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.guard(Self::pump)
    }

    /// Handles an I/O timeout.
    ///
    /// Between exchanges the session moves to QUIT; in the middle of one the
    /// connection is closed at once and outstanding work is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] for a mid-exchange timeout.
    pub fn on_timeout(&mut self) -> Result<()> {
        let Some(phase) = self.active else {
            return Ok(());
        };
        if self.closed {
            return Ok(());
        }

        let idle = self.registry.get(phase).is_some_and(|codec| codec.is_idle());
        if idle && phase != ProtocolState::Quit && self.registry.contains(ProtocolState::Quit) {
            tracing::info!(%phase, "idle timeout, quitting");
            self.guard(|session| {
                session.transition(ProtocolState::Quit)?;
                session.pump()
            })
        } else {
            tracing::warn!(%phase, "timeout in the middle of an exchange");
            self.fail(Error::Timeout)
        }
    }

    /// Flushes what it can and closes the connection.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.channel.flush() {
            tracing::debug!(error = %e, "flush on close failed");
        }
        self.shutdown();
    }

    /// Returns `true` once the connection is closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Returns `true` once the peer closed its side.
    #[must_use]
    pub const fn is_eof(&self) -> bool {
        self.channel.is_eof()
    }

    /// Current phase, `None` before [`Session::connect`].
    #[must_use]
    pub const fn phase(&self) -> Option<ProtocolState> {
        self.active
    }

    /// Handle for terminating or waking this session from elsewhere.
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        self.context.state().handle().clone()
    }

    /// The session context.
    #[must_use]
    pub const fn context(&self) -> &C {
        &self.context
    }

    /// The session context, mutably.
    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    /// Consumes the session, returning its context.
    #[must_use]
    pub fn into_context(self) -> C {
        self.context
    }

    fn guard(&mut self, f: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        match f(self) {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e),
        }
    }

    fn fail(&mut self, error: Error) -> Result<()> {
        tracing::error!(error = %error, phase = ?self.active, "session failed");
        self.context.exception(&error);
        self.shutdown();
        Err(error)
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.channel.close();
        self.context.disconnected();
        tracing::debug!(phase = ?self.active, "session closed");
    }

    fn transition(&mut self, next: ProtocolState) -> Result<()> {
        let from = self.active;
        let codec = self
            .registry
            .get_mut(next)
            .ok_or_else(|| Error::Protocol(format!("No codec registered for {next}")))?;
        self.active = Some(next);
        self.context.state_mut().protocol_state = next;
        tracing::debug!(from = ?from, to = %next, "phase transition");
        codec.reset(&mut self.channel, &mut self.context)
    }

    fn progress(&self) -> (Option<ProtocolState>, usize, usize, u64) {
        (
            self.active,
            self.channel.inbound.len(),
            self.channel.outbound.len(),
            self.channel.written(),
        )
    }

    /// Runs the active codec until it stops making progress, following
    /// phase transitions as they happen.
    fn pump(&mut self) -> Result<()> {
        let mut rounds = 0;
        loop {
            let Some(phase) = self.active else {
                return Ok(());
            };
            if self.closed {
                return Ok(());
            }
            if rounds == MAX_ROUNDS {
                self.channel.request_write();
                return Ok(());
            }
            rounds += 1;

            let before = self.progress();
            let codec = self
                .registry
                .get_mut(phase)
                .ok_or_else(|| Error::Protocol(format!("No codec registered for {phase}")))?;
            codec.consume(&mut self.channel, &mut self.context)?;
            codec.produce(&mut self.channel, &mut self.context)?;
            self.channel.flush()?;

            let (completed, idle, next) = match self.registry.get(phase) {
                Some(codec) if codec.is_completed() => {
                    (true, false, codec.next(&self.registry, &self.context))
                }
                Some(codec) => (false, codec.is_idle(), None),
                None => (false, false, None),
            };

            if completed {
                match next {
                    Some(next) => self.transition(next)?,
                    None => {
                        self.close();
                        return Ok(());
                    }
                }
                continue;
            }

            if self.progress() == before {
                if self.channel.is_eof() && idle {
                    tracing::debug!(%phase, "peer closed idle connection");
                    self.close();
                } else if !self.channel.is_eof() {
                    self.channel.request_read();
                }
                return Ok(());
            }
        }
    }
}
