//! Envelope address types.

use std::fmt;

use crate::error::{Error, Result};

/// Mailbox address used in the SMTP envelope.
///
/// Local-only addresses (`postmaster`, `root`) are accepted, since MAIL and
/// RCPT paths inside a site are frequently unqualified.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Creates a new address from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        Self::validate(&addr)?;
        Ok(Self(addr))
    }

    /// Parses an angle-bracketed path (`<user@example.com>`).
    ///
    /// Brackets are optional, since some clients omit them.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is empty, unbalanced or invalid.
    pub fn from_path(path: &str) -> Result<Self> {
        Self::new(strip_brackets(path)?)
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the domain part, if the address is qualified.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.0.rsplit_once('@').map(|(_, domain)| domain)
    }

    fn validate(addr: &str) -> Result<()> {
        if addr.is_empty() {
            return Err(Error::InvalidAddress("Address cannot be empty".into()));
        }

        if addr
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '<' || c == '>')
        {
            return Err(Error::InvalidAddress(format!(
                "Address contains invalid characters: {addr}"
            )));
        }

        if addr.contains('@') {
            let parts: Vec<&str> = addr.split('@').collect();
            if parts.len() != 2 {
                return Err(Error::InvalidAddress(
                    "Address must have at most one @".into(),
                ));
            }
            if parts[0].is_empty() || parts[1].is_empty() {
                return Err(Error::InvalidAddress(
                    "Local and domain parts cannot be empty".into(),
                ));
            }
        }

        Ok(())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reverse path of a MAIL command: a mailbox or the null sender `<>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReversePath {
    /// Null reverse path, used for bounces.
    Null,
    /// Sender mailbox.
    Mailbox(Address),
}

impl ReversePath {
    /// Parses a MAIL FROM path, accepting `<>` as the null sender.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is malformed.
    pub fn from_path(path: &str) -> Result<Self> {
        if path.trim() == "<>" {
            return Ok(Self::Null);
        }
        Address::from_path(path).map(Self::Mailbox)
    }

    /// Returns the mailbox, if this is not the null sender.
    #[must_use]
    pub const fn address(&self) -> Option<&Address> {
        match self {
            Self::Null => None,
            Self::Mailbox(addr) => Some(addr),
        }
    }
}

impl From<Address> for ReversePath {
    fn from(addr: Address) -> Self {
        Self::Mailbox(addr)
    }
}

impl fmt::Display for ReversePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Mailbox(addr) => addr.fmt(f),
        }
    }
}

fn strip_brackets(path: &str) -> Result<&str> {
    let path = path.trim();
    match (path.strip_prefix('<'), path.ends_with('>')) {
        (Some(inner), true) => Ok(&inner[..inner.len() - 1]),
        (None, false) => Ok(path),
        _ => Err(Error::InvalidAddress(format!("Unbalanced path: {path}"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_address() {
        let addr = Address::new("user@example.com").unwrap();
        assert_eq!(addr.as_str(), "user@example.com");
        assert_eq!(addr.domain(), Some("example.com"));
    }

    #[test]
    fn test_local_only_address() {
        let addr = Address::new("root").unwrap();
        assert_eq!(addr.domain(), None);
    }

    #[test]
    fn test_invalid_address_empty() {
        assert!(Address::new("").is_err());
    }

    #[test]
    fn test_invalid_address_empty_parts() {
        assert!(Address::new("@example.com").is_err());
        assert!(Address::new("user@").is_err());
        assert!(Address::new("a@b@c").is_err());
    }

    #[test]
    fn test_invalid_address_whitespace() {
        assert!(Address::new("us er@example.com").is_err());
    }

    #[test]
    fn test_from_path() {
        assert_eq!(
            Address::from_path("<user@example.com>").unwrap().as_str(),
            "user@example.com"
        );
        assert_eq!(Address::from_path("testuser1").unwrap().as_str(), "testuser1");
        assert!(Address::from_path("<user@example.com").is_err());
        assert!(Address::from_path("<>").is_err());
    }

    #[test]
    fn test_reverse_path() {
        assert_eq!(ReversePath::from_path("<>").unwrap(), ReversePath::Null);
        let path = ReversePath::from_path("<root>").unwrap();
        assert_eq!(path.address().unwrap().as_str(), "root");
        assert_eq!(ReversePath::Null.to_string(), "");
    }
}
