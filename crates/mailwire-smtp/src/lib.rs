//! # mailwire-smtp
//!
//! A non-blocking SMTP/LMTP protocol engine implementing RFC 5321, with
//! command pipelining (RFC 2920) on both the client and the server side.
//!
//! ## Features
//!
//! - **Sans-I/O core**: sessions are driven by readiness events and never
//!   touch sockets; any transport plugs in through [`io::IoAdapter`]
//! - **Pipelining**: MAIL, RCPT and DATA go out in one batch; replies are
//!   matched back to commands strictly in order
//! - **Asynchronous validation**: server-side checks return a
//!   [`ReplyFuture`] that may resolve later without reordering replies
//! - **Streaming content**: dot-stuffing and unstuffing without holding the
//!   whole message in memory
//! - **LMTP**: LHLO and per-recipient delivery replies
//! - **Extensions**: PIPELINING, ENHANCEDSTATUSCODES, 8BITMIME, SIZE, AUTH
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use mailwire_smtp::client::{DeliveryHandler, DeliveryRequest, DeliveryResult};
//! use mailwire_smtp::{Address, ClientConfig, ReversePath, SessionHandle};
//!
//! struct Outbox(Vec<DeliveryRequest>);
//!
//! impl DeliveryHandler for Outbox {
//!     fn submit_request(&mut self) -> Option<DeliveryRequest> {
//!         self.0.pop()
//!     }
//!     fn completed(&mut self, _: DeliveryRequest, result: DeliveryResult) {
//!         println!("sent: {}", result.reply);
//!     }
//!     fn failed(&mut self, _: DeliveryRequest, result: DeliveryResult) {
//!         println!("refused: {}", result.reply);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> mailwire_smtp::Result<()> {
//!     let request = DeliveryRequest::from_bytes(
//!         ReversePath::Mailbox(Address::new("sender@example.com")?),
//!         vec![Address::new("recipient@example.com")?],
//!         b"Subject: Test\r\n\r\nHello, World!\r\n".to_vec(),
//!     );
//!     let config = Arc::new(ClientConfig::builder().hostname("client.example.com").build());
//!     let handle = SessionHandle::new();
//!     let outbox = Outbox(vec![request]);
//!     // Quits after the idle timeout; call `handle.terminate()` to quit sooner.
//!     mailwire_smtp::connection::deliver("mx.example.com:25", config, outbox, handle).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Session Phases
//!
//! ```text
//! ┌──────────┐    ┌──────┐    ┌──────────┐    ┌──────┐
//! │ Greeting │ ─→ │ Auth │ ─→ │ Envelope │ ─→ │ Data │ ─→ Envelope ...
//! └──────────┘    └──────┘    └──────────┘    └──────┘
//!                                  │  ↑
//!                                  ↓  │
//!                                 Reset              any ─→ Quit
//! ```
//!
//! ## Modules
//!
//! - [`session`]: event-driven driver, session state and shutdown tracking
//! - [`codec`]: phase codec contract and dot-stuffing
//! - [`client`]: client-role codecs and the delivery handler
//! - [`server`]: server-role codecs, command handlers and the mail handler
//! - [`action`]: deferred replies and the ordered action queue
//! - [`connection`]: tokio transport
//! - [`parser`] / [`writer`]: wire format
//! - [`types`]: addresses, extensions, replies

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod action;
pub mod client;
pub mod codec;
pub mod command;
pub mod config;
pub mod connection;
mod error;
pub mod io;
pub mod parser;
pub mod server;
pub mod session;
pub mod types;
pub mod writer;

pub use action::{ReplyFuture, ReplyPromise};
pub use config::{ClientConfig, Credentials, ServerConfig};
pub use error::{Error, Result};
pub use session::{ProtocolState, Session, SessionHandle, SessionTracker};
pub use types::{Address, AuthMechanism, EnhancedCode, Extension, Reply, ReplyCode, ReversePath};

/// Protocol versions supported.
pub const SMTP_VERSION: &str = "SMTP/ESMTP (RFC 5321), LMTP (RFC 2033)";
