//! Non-blocking transport abstraction.
//!
//! The engine never touches sockets. An [`IoAdapter`] moves bytes between
//! the peer and a pair of buffers owned by a [`Channel`]; phase codecs parse
//! from [`Channel::inbound`] and write to [`Channel::outbound`].

pub mod memory;

use std::io;
use std::task::Waker;

use bytes::{Buf, BytesMut};

use crate::error::{Error, Result};

/// Upper bound on buffered inbound bytes before `fill` yields to the codec.
const MAX_INBOUND_BUFFER: usize = 64 * 1024;

/// Outcome of a single non-blocking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// This many bytes were appended; zero means the read would block.
    Read(usize),
    /// The peer closed its side of the stream.
    Eof,
}

/// Non-blocking byte channel to the peer.
pub trait IoAdapter: Send {
    /// Appends whatever is available without blocking.
    ///
    /// # Errors
    ///
    /// Returns any I/O error other than "would block".
    fn fill(&mut self, buf: &mut BytesMut) -> io::Result<Fill>;

    /// Writes as much of `buf` as possible without blocking.
    ///
    /// # Errors
    ///
    /// Returns any I/O error other than "would block".
    fn flush(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Asks to be told when the peer sent more data.
    fn request_read_interest(&mut self);

    /// Asks to be told when more data can be written.
    fn request_write_interest(&mut self);

    /// Closes the channel.
    fn close(&mut self);

    /// Waker that re-arms write interest on this connection.
    ///
    /// Asynchronous validators resolve through it, which is how a pending
    /// action gets the connection to produce again.
    fn waker(&self) -> Waker {
        Waker::noop().clone()
    }
}

/// An adapter plus the connection's inbound and outbound buffers.
pub struct Channel {
    adapter: Box<dyn IoAdapter>,
    /// Bytes received but not yet consumed by a codec.
    pub inbound: BytesMut,
    /// Bytes produced by a codec but not yet written.
    pub outbound: BytesMut,
    waker: Waker,
    written: u64,
    eof: bool,
    closed: bool,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("inbound", &self.inbound.len())
            .field("outbound", &self.outbound.len())
            .field("eof", &self.eof)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Channel {
    /// Wraps an adapter.
    #[must_use]
    pub fn new(adapter: Box<dyn IoAdapter>) -> Self {
        let waker = adapter.waker();
        Self {
            adapter,
            inbound: BytesMut::with_capacity(8192),
            outbound: BytesMut::with_capacity(8192),
            waker,
            written: 0,
            eof: false,
            closed: false,
        }
    }

    /// Reads until the adapter would block, the peer closes, or the inbound
    /// buffer is large enough to hand to the codec.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter fails.
    pub fn fill(&mut self) -> Result<usize> {
        let mut total = 0;
        while !self.eof && self.inbound.len() < MAX_INBOUND_BUFFER {
            match self.adapter.fill(&mut self.inbound)? {
                Fill::Read(0) => break,
                Fill::Read(n) => total += n,
                Fill::Eof => {
                    tracing::debug!("peer closed stream");
                    self.eof = true;
                }
            }
        }
        Ok(total)
    }

    /// Writes buffered output.
    ///
    /// Returns `true` once the outbound buffer is empty; otherwise write
    /// interest is requested.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter fails or the channel is closed.
    pub fn flush(&mut self) -> Result<bool> {
        if self.closed {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "channel closed",
            )));
        }
        while !self.outbound.is_empty() {
            let n = self.adapter.flush(&self.outbound)?;
            if n == 0 {
                self.adapter.request_write_interest();
                return Ok(false);
            }
            self.outbound.advance(n);
            self.written += n as u64;
        }
        Ok(true)
    }

    /// Total bytes written to the adapter so far.
    #[must_use]
    pub const fn written(&self) -> u64 {
        self.written
    }

    /// Returns `true` once the peer closed its side.
    #[must_use]
    pub const fn is_eof(&self) -> bool {
        self.eof
    }

    /// Returns `true` once [`Channel::close`] was called.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Waker that re-arms this connection.
    #[must_use]
    pub const fn waker(&self) -> &Waker {
        &self.waker
    }

    /// Requests read readiness notification.
    pub fn request_read(&mut self) {
        self.adapter.request_read_interest();
    }

    /// Requests write readiness notification.
    pub fn request_write(&mut self) {
        self.adapter.request_write_interest();
    }

    /// Closes the adapter; further flushes fail.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.adapter.close();
        }
    }
}
