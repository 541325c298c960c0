//! In-memory transport.
//!
//! [`pair`] returns two connected adapters, so a client session and a
//! server session can talk to each other without sockets. Reads can be
//! limited to small chunks to exercise partial-line handling.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Wake, Waker};

use bytes::BytesMut;

use super::{Fill, IoAdapter};

#[derive(Debug, Default)]
struct Pipe {
    data: VecDeque<u8>,
    closed: bool,
}

type SharedPipe = Arc<Mutex<Pipe>>;

fn lock(pipe: &SharedPipe) -> MutexGuard<'_, Pipe> {
    pipe.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Readiness flags recorded by a [`MemoryAdapter`].
#[derive(Debug, Default)]
pub struct Interest {
    read: AtomicBool,
    write: AtomicBool,
    wakes: AtomicUsize,
}

impl Interest {
    /// Returns and clears the read-interest flag.
    pub fn take_read(&self) -> bool {
        self.read.swap(false, Ordering::AcqRel)
    }

    /// Returns and clears the write-interest flag.
    pub fn take_write(&self) -> bool {
        self.write.swap(false, Ordering::AcqRel)
    }

    /// Number of times the connection waker fired.
    pub fn wakes(&self) -> usize {
        self.wakes.load(Ordering::Acquire)
    }
}

impl Wake for Interest {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.wakes.fetch_add(1, Ordering::AcqRel);
        self.write.store(true, Ordering::Release);
    }
}

/// One end of an in-memory connection.
#[derive(Debug)]
pub struct MemoryAdapter {
    rx: SharedPipe,
    tx: SharedPipe,
    chunk_size: usize,
    interest: Arc<Interest>,
}

/// Creates two connected adapters.
#[must_use]
pub fn pair() -> (MemoryAdapter, MemoryAdapter) {
    let a_to_b = SharedPipe::default();
    let b_to_a = SharedPipe::default();
    (
        MemoryAdapter::new(Arc::clone(&b_to_a), Arc::clone(&a_to_b)),
        MemoryAdapter::new(a_to_b, b_to_a),
    )
}

impl MemoryAdapter {
    fn new(rx: SharedPipe, tx: SharedPipe) -> Self {
        Self {
            rx,
            tx,
            chunk_size: usize::MAX,
            interest: Arc::default(),
        }
    }

    /// Limits every read to at most `chunk_size` bytes.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Shared readiness flags, for the code driving the session.
    #[must_use]
    pub fn interest(&self) -> Arc<Interest> {
        Arc::clone(&self.interest)
    }

    /// Returns a handle that writes to and reads from this adapter's peer
    /// directly, for scripting one side of a conversation.
    #[must_use]
    pub fn script(&self) -> Script {
        Script {
            to_adapter: Arc::clone(&self.rx),
            from_adapter: Arc::clone(&self.tx),
        }
    }
}

impl IoAdapter for MemoryAdapter {
    fn fill(&mut self, buf: &mut BytesMut) -> io::Result<Fill> {
        let mut pipe = lock(&self.rx);
        if pipe.data.is_empty() {
            return Ok(if pipe.closed { Fill::Eof } else { Fill::Read(0) });
        }
        let n = pipe.data.len().min(self.chunk_size);
        buf.extend(pipe.data.drain(..n));
        Ok(Fill::Read(n))
    }

    fn flush(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut pipe = lock(&self.tx);
        if pipe.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"));
        }
        pipe.data.extend(buf);
        Ok(buf.len())
    }

    fn request_read_interest(&mut self) {
        self.interest.read.store(true, Ordering::Release);
    }

    fn request_write_interest(&mut self) {
        self.interest.write.store(true, Ordering::Release);
    }

    fn close(&mut self) {
        lock(&self.tx).closed = true;
        lock(&self.rx).closed = true;
    }

    fn waker(&self) -> Waker {
        Waker::from(Arc::clone(&self.interest))
    }
}

/// Peer-side handle onto a [`MemoryAdapter`].
#[derive(Debug, Clone)]
pub struct Script {
    to_adapter: SharedPipe,
    from_adapter: SharedPipe,
}

impl Script {
    /// Sends bytes to the adapter.
    pub fn send(&self, data: &[u8]) {
        lock(&self.to_adapter).data.extend(data);
    }

    /// Takes everything the adapter wrote so far.
    #[must_use]
    pub fn take(&self) -> Vec<u8> {
        lock(&self.from_adapter).data.drain(..).collect()
    }

    /// Takes everything written so far as text.
    #[must_use]
    pub fn take_string(&self) -> String {
        String::from_utf8_lossy(&self.take()).into_owned()
    }

    /// Closes the peer's sending side; the adapter then sees end of stream.
    pub fn close(&self) {
        lock(&self.to_adapter).closed = true;
    }

    /// Returns `true` once the adapter closed the connection.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.from_adapter).closed
    }
}
