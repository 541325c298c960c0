//! Phase codecs.
//!
//! A session runs exactly one codec at a time, the one registered for its
//! current [`ProtocolState`]. The driver feeds it readiness events; the
//! codec reads from and writes to the connection's [`Channel`] and decides
//! which phase follows once it is done.

pub mod dot;

use std::collections::HashMap;
use std::fmt;

use crate::error::Result;
use crate::io::Channel;
use crate::session::ProtocolState;

/// Handles one protocol phase.
///
/// `C` is the role-specific session context.
pub trait PhaseCodec<C>: Send {
    /// Prepares the codec on entry to its phase.
    ///
    /// # Errors
    ///
    /// Any error is fatal to the connection.
    fn reset(&mut self, channel: &mut Channel, ctx: &mut C) -> Result<()>;

    /// Processes buffered input.
    ///
    /// # Errors
    ///
    /// Any error is fatal to the connection.
    fn consume(&mut self, channel: &mut Channel, ctx: &mut C) -> Result<()>;

    /// Writes pending output.
    ///
    /// # Errors
    ///
    /// Any error is fatal to the connection.
    fn produce(&mut self, channel: &mut Channel, ctx: &mut C) -> Result<()>;

    /// Returns `true` once the phase is finished.
    fn is_completed(&self) -> bool;

    /// Phase to enter next, or `None` to close the connection.
    fn next(&self, registry: &CodecRegistry<C>, ctx: &C) -> Option<ProtocolState>;

    /// Returns `true` between exchanges, when a timeout may end the session
    /// gracefully.
    fn is_idle(&self) -> bool {
        false
    }
}

/// Codecs keyed by the phase they handle.
pub struct CodecRegistry<C> {
    codecs: HashMap<ProtocolState, Box<dyn PhaseCodec<C>>>,
}

impl<C> fmt::Debug for CodecRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.codecs.keys()).finish()
    }
}

impl<C> Default for CodecRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> CodecRegistry<C> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Registers `codec` for `phase`, replacing any previous one.
    #[must_use]
    pub fn with(mut self, phase: ProtocolState, codec: impl PhaseCodec<C> + 'static) -> Self {
        self.register(phase, codec);
        self
    }

    /// Registers `codec` for `phase`, replacing any previous one.
    pub fn register(&mut self, phase: ProtocolState, codec: impl PhaseCodec<C> + 'static) {
        self.codecs.insert(phase, Box::new(codec));
    }

    /// Returns `true` if a codec handles `phase`.
    #[must_use]
    pub fn contains(&self, phase: ProtocolState) -> bool {
        self.codecs.contains_key(&phase)
    }

    pub(crate) fn get(&self, phase: ProtocolState) -> Option<&dyn PhaseCodec<C>> {
        self.codecs.get(&phase).map(AsRef::as_ref)
    }

    pub(crate) fn get_mut(&mut self, phase: ProtocolState) -> Option<&mut (dyn PhaseCodec<C> + 'static)> {
        self.codecs.get_mut(&phase).map(AsMut::as_mut)
    }
}
