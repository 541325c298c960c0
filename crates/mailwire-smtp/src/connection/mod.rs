//! Tokio transport.
//!
//! Drives a [`Session`] over a [`TcpStream`]: socket readiness, wake-ups
//! from resolved replies and the inactivity timeout are turned into
//! [`Session::on_readable`], [`Session::on_writable`] and
//! [`Session::on_timeout`] calls. One task per connection.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Wake, Waker};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{Interest, Ready};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::client::{self, ClientContext, DeliveryHandler};
use crate::codec::CodecRegistry;
use crate::config::{ClientConfig, ServerConfig};
use crate::error::Result;
use crate::io::{Fill, IoAdapter};
use crate::server::{self, MailHandler, ServerContext};
use crate::session::{Session, SessionContext, SessionHandle, SessionTracker};

/// Bytes reserved in the inbound buffer before each read.
const READ_RESERVE: usize = 8 * 1024;

#[derive(Debug, Default)]
struct Readiness {
    read: AtomicBool,
    write: AtomicBool,
    notify: Notify,
}

impl Wake for Readiness {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.write.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

/// [`IoAdapter`] over a tokio TCP stream.
#[derive(Debug)]
pub struct TcpAdapter {
    stream: Arc<TcpStream>,
    readiness: Arc<Readiness>,
}

impl IoAdapter for TcpAdapter {
    fn fill(&mut self, buf: &mut BytesMut) -> io::Result<Fill> {
        buf.reserve(READ_RESERVE);
        match self.stream.try_read_buf(buf) {
            Ok(0) => Ok(Fill::Eof),
            Ok(n) => Ok(Fill::Read(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Fill::Read(0)),
            Err(e) => Err(e),
        }
    }

    fn flush(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.stream.try_write(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn request_read_interest(&mut self) {
        self.readiness.read.store(true, Ordering::Release);
    }

    fn request_write_interest(&mut self) {
        self.readiness.write.store(true, Ordering::Release);
    }

    fn close(&mut self) {
        self.readiness.read.store(false, Ordering::Release);
        self.readiness.write.store(false, Ordering::Release);
    }

    fn waker(&self) -> Waker {
        Waker::from(Arc::clone(&self.readiness))
    }
}

async fn ready(stream: &TcpStream, interest: Option<Interest>) -> io::Result<Ready> {
    match interest {
        Some(interest) => stream.ready(interest).await,
        None => std::future::pending().await,
    }
}

/// Runs a session over `stream` until it closes.
///
/// The stream is shut down when this returns.
///
/// # Errors
///
/// Returns the error that ended the session. The context has already been
/// told through [`SessionContext::exception`].
pub async fn run<C: SessionContext>(
    stream: TcpStream,
    context: C,
    registry: CodecRegistry<C>,
    io_timeout: Duration,
) -> Result<C> {
    let stream = Arc::new(stream);
    let readiness = Arc::new(Readiness::default());
    let adapter = TcpAdapter {
        stream: Arc::clone(&stream),
        readiness: Arc::clone(&readiness),
    };
    let mut session = Session::new(Box::new(adapter), context, registry);
    session.connect()?;

    let mut deadline = Instant::now() + io_timeout;
    while !session.is_closed() {
        let read = readiness.read.load(Ordering::Acquire);
        let write = readiness.write.load(Ordering::Acquire);
        let interest = match (read, write) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        };

        tokio::select! {
            ready = ready(&stream, interest) => {
                let ready = ready?;
                if ready.is_readable() && readiness.read.swap(false, Ordering::AcqRel) {
                    session.on_readable()?;
                }
                if ready.is_writable() && readiness.write.swap(false, Ordering::AcqRel) {
                    session.on_writable()?;
                }
                deadline = Instant::now() + io_timeout;
            }
            () = readiness.notify.notified() => {
                if readiness.write.swap(false, Ordering::AcqRel) {
                    session.on_writable()?;
                }
            }
            () = tokio::time::sleep_until(deadline) => {
                session.on_timeout()?;
                deadline = Instant::now() + io_timeout;
            }
        }
    }
    Ok(session.into_context())
}

/// Accepts connections and serves each on its own task until `shutdown`
/// completes.
///
/// On shutdown the listener stops accepting and every session is asked to
/// terminate; this returns once all of them closed.
///
/// # Errors
///
/// Returns an error if accepting a connection fails.
pub async fn serve(
    listener: TcpListener,
    config: Arc<ServerConfig>,
    handler: Arc<dyn MailHandler>,
    tracker: SessionTracker,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => {
                tracing::info!(active = tracker.active(), "shutting down listener");
                tracker.shutdown().await;
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                tracing::debug!(%peer, "connection received");

                let (handle, guard) = tracker.register();
                let context = ServerContext::new(Arc::clone(&config), Arc::clone(&handler))
                    .with_handle(handle);
                let io_timeout = config.io_timeout;
                tokio::spawn(async move {
                    let _guard = guard;
                    if let Err(error) = run(stream, context, server::codecs(), io_timeout).await {
                        tracing::warn!(%peer, %error, "session ended with error");
                    }
                });
            }
        }
    }
}

/// Connects to `addr` and delivers every request `handler` submits.
///
/// Once the handler runs out of requests the session idles; it quits when
/// `handle` is terminated or the inactivity timeout fires.
///
/// # Errors
///
/// Returns an error if the connection cannot be established or the session
/// fails.
pub async fn deliver(
    addr: impl ToSocketAddrs,
    config: Arc<ClientConfig>,
    handler: impl DeliveryHandler + 'static,
    handle: SessionHandle,
) -> Result<ClientContext> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let io_timeout = config.io_timeout;
    let context = ClientContext::new(config, handler).with_handle(handle);
    run(stream, context, client::codecs(), io_timeout).await
}
