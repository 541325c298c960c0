//! Core SMTP types.

mod address;
mod extension;
mod reply;

pub use address::{Address, ReversePath};
pub use extension::{AuthMechanism, Extension, Extensions};
pub use reply::{EnhancedCode, Reply, ReplyCode};
