//! SMTP service extension types.

use std::collections::HashSet;
use std::fmt;

use serde::Deserialize;

/// SMTP service extension, as advertised in an EHLO/LHLO response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum Extension {
    /// STARTTLS - TLS upgrade
    StartTls,
    /// AUTH - Authentication
    Auth(Vec<AuthMechanism>),
    /// SIZE - Maximum message size
    Size(Option<usize>),
    /// 8BITMIME - 8-bit MIME transport
    EightBitMime,
    /// PIPELINING - Command pipelining
    Pipelining,
    /// ENHANCEDSTATUSCODES - RFC 3463 status codes in replies
    EnhancedStatusCodes,
    /// CHUNKING - Chunked message transfer
    Chunking,
    /// SMTPUTF8 - UTF-8 email addresses
    SmtpUtf8,
    /// DSN - Delivery status notifications
    Dsn,
    /// Unknown extension
    Unknown(String),
}

impl Extension {
    /// Parses an extension line from an EHLO response.
    ///
    /// Keywords are matched case-insensitively.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            return Self::Unknown(line.to_string());
        }

        let keyword = parts[0].to_uppercase();
        match keyword.as_str() {
            "STARTTLS" => Self::StartTls,
            "AUTH" => {
                let mechanisms = parts[1..]
                    .iter()
                    .filter_map(|m| AuthMechanism::parse(m))
                    .collect();
                Self::Auth(mechanisms)
            }
            "SIZE" => {
                let size = parts.get(1).and_then(|s| s.parse().ok());
                Self::Size(size)
            }
            "8BITMIME" => Self::EightBitMime,
            "PIPELINING" => Self::Pipelining,
            "ENHANCEDSTATUSCODES" => Self::EnhancedStatusCodes,
            "CHUNKING" => Self::Chunking,
            "SMTPUTF8" => Self::SmtpUtf8,
            "DSN" => Self::Dsn,
            _ => Self::Unknown(line.to_uppercase()),
        }
    }
}

impl From<String> for Extension {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartTls => f.write_str("STARTTLS"),
            Self::Auth(mechanisms) => {
                f.write_str("AUTH")?;
                for mechanism in mechanisms {
                    write!(f, " {}", mechanism.as_str())?;
                }
                Ok(())
            }
            Self::Size(Some(size)) => write!(f, "SIZE {size}"),
            Self::Size(None) => f.write_str("SIZE"),
            Self::EightBitMime => f.write_str("8BITMIME"),
            Self::Pipelining => f.write_str("PIPELINING"),
            Self::EnhancedStatusCodes => f.write_str("ENHANCEDSTATUSCODES"),
            Self::Chunking => f.write_str("CHUNKING"),
            Self::SmtpUtf8 => f.write_str("SMTPUTF8"),
            Self::Dsn => f.write_str("DSN"),
            Self::Unknown(s) => f.write_str(s),
        }
    }
}

/// Negotiated (or advertised) set of extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extensions(HashSet<Extension>);

impl Extensions {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses every capability line of an EHLO reply.
    ///
    /// The first line carries the peer's domain and greeting text and is
    /// skipped.
    #[must_use]
    pub fn from_ehlo_lines(lines: &[String]) -> Self {
        lines.iter().skip(1).map(|l| Extension::parse(l)).collect()
    }

    /// Adds an extension.
    pub fn insert(&mut self, ext: Extension) {
        self.0.insert(ext);
    }

    /// Removes every extension.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Checks if the set contains an extension.
    #[must_use]
    pub fn contains(&self, ext: &Extension) -> bool {
        self.0.contains(ext)
    }

    /// Returns `true` if PIPELINING is present.
    #[must_use]
    pub fn pipelining(&self) -> bool {
        self.contains(&Extension::Pipelining)
    }

    /// Returns `true` if ENHANCEDSTATUSCODES is present.
    #[must_use]
    pub fn enhanced_status_codes(&self) -> bool {
        self.contains(&Extension::EnhancedStatusCodes)
    }

    /// Returns `true` if 8BITMIME is present.
    #[must_use]
    pub fn eight_bit_mime(&self) -> bool {
        self.contains(&Extension::EightBitMime)
    }

    /// Returns `true` if SIZE is present, with or without a limit.
    #[must_use]
    pub fn has_size(&self) -> bool {
        self.0.iter().any(|e| matches!(e, Extension::Size(_)))
    }

    /// Returns the maximum message size, if advertised.
    #[must_use]
    pub fn max_message_size(&self) -> Option<usize> {
        self.0.iter().find_map(|e| match e {
            Extension::Size(size) => *size,
            _ => None,
        })
    }

    /// Returns supported authentication mechanisms.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<AuthMechanism> {
        self.0
            .iter()
            .find_map(|e| match e {
                Extension::Auth(mechanisms) => Some(mechanisms.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Iterates over the extensions.
    pub fn iter(&self) -> impl Iterator<Item = &Extension> {
        self.0.iter()
    }

    /// Returns the number of extensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no extension is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Extension> for Extensions {
    fn from_iter<I: IntoIterator<Item = Extension>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// SASL authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum AuthMechanism {
    /// PLAIN - plaintext authentication
    Plain,
    /// LOGIN - legacy plaintext
    Login,
}

impl AuthMechanism {
    /// Parses an authentication mechanism name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            _ => None,
        }
    }

    /// Returns the mechanism name as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
    }
}

impl TryFrom<String> for AuthMechanism {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s).ok_or_else(|| format!("unsupported SASL mechanism: {s}"))
    }
}
