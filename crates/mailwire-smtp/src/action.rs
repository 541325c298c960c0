//! Deferred replies and the per-connection action queue.
//!
//! A server session turns every command into an action. Actions run one at
//! a time, in arrival order; each one yields a [`ReplyFuture`] that may
//! resolve immediately or later from another task. Replies therefore leave
//! the connection in exactly the order the commands arrived, no matter how
//! long an individual validator takes.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use tokio::sync::oneshot;

use crate::error::Result;
use crate::types::{EnhancedCode, Reply, ReplyCode};

/// Final state of a [`ReplyFuture`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A reply is available.
    Completed(Reply),
    /// The producer gave up with a reason.
    Failed(String),
    /// The producer went away without answering.
    Cancelled,
}

enum Inner {
    Ready(Option<Reply>),
    Waiting(oneshot::Receiver<std::result::Result<Reply, String>>),
    Boxed(Pin<Box<dyn Future<Output = Resolution> + Send>>),
}

/// A reply that may not be known yet.
///
/// Polling registers the caller's waker; for a session that is the
/// connection waker, so resolution re-arms write interest.
pub struct ReplyFuture(Inner);

impl fmt::Debug for ReplyFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.0 {
            Inner::Ready(_) => "Ready",
            Inner::Waiting(_) => "Waiting",
            Inner::Boxed(_) => "Boxed",
        };
        f.debug_tuple("ReplyFuture").field(&kind).finish()
    }
}

impl ReplyFuture {
    /// An already-resolved reply.
    #[must_use]
    pub const fn ready(reply: Reply) -> Self {
        Self(Inner::Ready(Some(reply)))
    }

    /// A reply to be supplied later through the returned promise.
    #[must_use]
    pub fn pending() -> (Self, ReplyPromise) {
        let (tx, rx) = oneshot::channel();
        (Self(Inner::Waiting(rx)), ReplyPromise(tx))
    }

    /// Wraps any future producing a reply.
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Reply> + Send + 'static,
    {
        Self(Inner::Boxed(Box::pin(async move {
            Resolution::Completed(future.await)
        })))
    }
}

impl Future for ReplyFuture {
    type Output = Resolution;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().0 {
            Inner::Ready(reply) => Poll::Ready(
                reply
                    .take()
                    .map_or(Resolution::Cancelled, Resolution::Completed),
            ),
            Inner::Waiting(rx) => Pin::new(rx).poll(cx).map(|res| match res {
                Ok(Ok(reply)) => Resolution::Completed(reply),
                Ok(Err(reason)) => Resolution::Failed(reason),
                Err(_) => Resolution::Cancelled,
            }),
            Inner::Boxed(future) => future.as_mut().poll(cx),
        }
    }
}

/// Producer side of [`ReplyFuture::pending`].
///
/// Dropping it without answering cancels the future.
#[derive(Debug)]
pub struct ReplyPromise(oneshot::Sender<std::result::Result<Reply, String>>);

impl ReplyPromise {
    /// Resolves the future with a reply.
    pub fn complete(self, reply: Reply) {
        if self.0.send(Ok(reply)).is_err() {
            tracing::debug!("reply dropped, session already gone");
        }
    }

    /// Resolves the future with a failure.
    pub fn fail(self, reason: impl Into<String>) {
        if self.0.send(Err(reason.into())).is_err() {
            tracing::debug!("failure dropped, session already gone");
        }
    }

    /// Returns `true` if the future side was dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// Reply sent in place of a failed or cancelled action.
#[must_use]
pub fn local_error() -> Reply {
    Reply::enhanced(
        ReplyCode::LOCAL_ERROR,
        EnhancedCode::SYSTEM_ERROR,
        "Requested action aborted: local error in processing",
    )
}

/// A started action: its reply and what to do once the reply is known.
#[derive(Debug)]
pub struct Execution<E> {
    future: ReplyFuture,
    effect: E,
    repeat: usize,
}

impl<E> Execution<E> {
    /// Creates an execution whose reply is emitted once.
    pub const fn new(future: ReplyFuture, effect: E) -> Self {
        Self {
            future,
            effect,
            repeat: 1,
        }
    }

    /// Emits the reply `times` times (LMTP: once per recipient).
    #[must_use]
    pub fn repeat(mut self, times: usize) -> Self {
        self.repeat = times.max(1);
        self
    }
}

/// A unit of work queued on a session.
pub trait Action: Sized {
    /// State the action reads and mutates.
    type Session;
    /// Deferred state change, applied with the reply.
    type Effect;

    /// Starts the action. Called when it reaches the head of the queue.
    fn execute(self, session: &mut Self::Session) -> Execution<Self::Effect>;

    /// Applies the effect. Called with the final reply, before it is sent.
    fn complete(effect: Self::Effect, reply: &Reply, session: &mut Self::Session);
}

/// Outcome of [`ActionQueue::drain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// Nothing queued or in flight.
    Idle,
    /// The head action is waiting on its reply.
    Pending,
}

struct InFlight<E> {
    future: ReplyFuture,
    effect: E,
    repeat: usize,
}

/// FIFO of actions with at most one in flight.
pub struct ActionQueue<A: Action> {
    queue: VecDeque<A>,
    in_flight: Option<InFlight<A::Effect>>,
}

impl<A: Action> fmt::Debug for ActionQueue<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionQueue")
            .field("queued", &self.queue.len())
            .field("in_flight", &self.in_flight.is_some())
            .finish()
    }
}

impl<A: Action> Default for ActionQueue<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Action> ActionQueue<A> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            in_flight: None,
        }
    }

    /// Appends an action. It does not run until [`drain`](Self::drain).
    pub fn push(&mut self, action: A) {
        self.queue.push_back(action);
    }

    /// Number of actions not yet finished, including the one in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len() + usize::from(self.in_flight.is_some())
    }

    /// Returns `true` if nothing is queued or in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs actions in order until one is still pending or the queue is empty.
    ///
    /// Each resolved reply is handed to `emit`, after the action's effect has
    /// been applied. Failed and cancelled replies become a 451 local error.
    ///
    /// # Errors
    ///
    /// Returns the first error from `emit`.
    pub fn drain<F>(&mut self, session: &mut A::Session, waker: &Waker, mut emit: F) -> Result<Drain>
    where
        F: FnMut(&Reply, &A::Session) -> Result<()>,
    {
        let mut cx = Context::from_waker(waker);
        loop {
            if self.in_flight.is_none() {
                let Some(action) = self.queue.pop_front() else {
                    return Ok(Drain::Idle);
                };
                let Execution {
                    future,
                    effect,
                    repeat,
                } = action.execute(session);
                self.in_flight = Some(InFlight {
                    future,
                    effect,
                    repeat,
                });
            }
            let Some(flight) = self.in_flight.as_mut() else {
                return Ok(Drain::Idle);
            };

            let Poll::Ready(resolution) = Pin::new(&mut flight.future).poll(&mut cx) else {
                return Ok(Drain::Pending);
            };
            let Some(InFlight { effect, repeat, .. }) = self.in_flight.take() else {
                return Ok(Drain::Idle);
            };

            let reply = match resolution {
                Resolution::Completed(reply) => reply,
                Resolution::Failed(reason) => {
                    tracing::warn!(reason = %reason, "action failed");
                    local_error()
                }
                Resolution::Cancelled => {
                    tracing::debug!("action cancelled");
                    local_error()
                }
            };

            A::complete(effect, &reply, session);
            for _ in 0..repeat {
                emit(&reply, session)?;
            }
        }
    }

    /// Drops every queued action and the one in flight.
    ///
    /// Returns the number of actions discarded.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.len();
        self.queue.clear();
        self.in_flight = None;
        if count > 0 {
            tracing::debug!(count, "cancelled outstanding actions");
        }
        count
    }
}
