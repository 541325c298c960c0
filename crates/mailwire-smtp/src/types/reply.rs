//! SMTP reply types.

use std::fmt;

/// SMTP reply: a status code, an optional enhanced status code and one or
/// more text lines.
///
/// On the wire every line of a multiline reply repeats the same code and
/// enhanced code; only the text differs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply code (e.g., 250).
    pub code: ReplyCode,
    /// Enhanced status code (RFC 3463), if any.
    pub enhanced: Option<EnhancedCode>,
    /// Reply text, one entry per wire line.
    pub lines: Vec<String>,
}

impl Reply {
    /// Creates a new reply without an enhanced code.
    ///
    /// An empty line list is normalised to a single empty line, which is
    /// what the wire form of such a reply parses back to.
    #[must_use]
    pub fn new(code: ReplyCode, lines: Vec<String>) -> Self {
        let lines = if lines.is_empty() {
            vec![String::new()]
        } else {
            lines
        };
        Self {
            code,
            enhanced: None,
            lines,
        }
    }

    /// Creates a single-line reply with an enhanced status code.
    #[must_use]
    pub fn enhanced(code: ReplyCode, enhanced: EnhancedCode, text: impl Into<String>) -> Self {
        Self {
            code,
            enhanced: Some(enhanced),
            lines: vec![text.into()],
        }
    }

    /// Creates a single-line reply without an enhanced status code.
    #[must_use]
    pub fn single(code: ReplyCode, text: impl Into<String>) -> Self {
        Self::new(code, vec![text.into()])
    }

    /// Returns true if this is a success reply (2xx).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// Returns true if this is an intermediate reply (3xx).
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code.is_intermediate()
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient_error(&self) -> bool {
        self.code.is_transient()
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code.is_permanent()
    }

    /// Returns the full text as a single string.
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        if let Some(enhanced) = self.enhanced {
            write!(f, " {enhanced}")?;
        }
        write!(f, " {}", self.lines.join(" / "))
    }
}

/// SMTP reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// Creates a new reply code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns the first digit of the code.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn class(self) -> u8 {
        (self.0 / 100) as u8
    }

    /// Returns true if this is a success code (2xx).
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 >= 200 && self.0 < 300
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(self) -> bool {
        self.0 >= 400 && self.0 < 500
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        self.0 >= 500 && self.0 < 600
    }

    /// Returns true if this is an intermediate reply (3xx).
    #[must_use]
    pub const fn is_intermediate(self) -> bool {
        self.0 >= 300 && self.0 < 400
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Common reply codes
impl ReplyCode {
    /// 214 Help message
    pub const HELP: Self = Self(214);
    /// 220 Service ready
    pub const SERVICE_READY: Self = Self(220);
    /// 221 Service closing transmission channel
    pub const CLOSING: Self = Self(221);
    /// 235 Authentication succeeded
    pub const AUTH_SUCCESS: Self = Self(235);
    /// 250 Requested mail action okay, completed
    pub const OK: Self = Self(250);
    /// 251 User not local; will forward
    pub const FORWARD: Self = Self(251);
    /// 252 Cannot VRFY user, but will accept message
    pub const CANNOT_VERIFY: Self = Self(252);
    /// 334 Continue with authentication
    pub const AUTH_CONTINUE: Self = Self(334);
    /// 354 Start mail input
    pub const START_DATA: Self = Self(354);
    /// 421 Service not available, closing transmission channel
    pub const SERVICE_UNAVAILABLE: Self = Self(421);
    /// 450 Mailbox unavailable (busy)
    pub const MAILBOX_BUSY: Self = Self(450);
    /// 451 Local error in processing
    pub const LOCAL_ERROR: Self = Self(451);
    /// 452 Insufficient system storage
    pub const INSUFFICIENT_STORAGE: Self = Self(452);
    /// 500 Syntax error, command unrecognized
    pub const SYNTAX_ERROR: Self = Self(500);
    /// 501 Syntax error in parameters or arguments
    pub const PARAMETER_ERROR: Self = Self(501);
    /// 502 Command not implemented
    pub const NOT_IMPLEMENTED: Self = Self(502);
    /// 503 Bad sequence of commands
    pub const BAD_SEQUENCE: Self = Self(503);
    /// 504 Command parameter not implemented
    pub const PARAMETER_NOT_IMPLEMENTED: Self = Self(504);
    /// 535 Authentication credentials invalid
    pub const AUTH_FAILED: Self = Self(535);
    /// 550 Mailbox unavailable (not found, access denied)
    pub const MAILBOX_UNAVAILABLE: Self = Self(550);
    /// 551 User not local
    pub const USER_NOT_LOCAL: Self = Self(551);
    /// 552 Exceeded storage allocation
    pub const EXCEEDED_STORAGE: Self = Self(552);
    /// 553 Mailbox name not allowed
    pub const MAILBOX_NAME_INVALID: Self = Self(553);
    /// 554 Transaction failed
    pub const TRANSACTION_FAILED: Self = Self(554);
    /// 555 MAIL FROM/RCPT TO parameters not recognized.
    pub const PARAMETERS_NOT_RECOGNIZED: Self = Self(555);
}

/// Enhanced mail system status code (RFC 3463): `class.subject.detail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnhancedCode {
    /// 2 (success), 4 (persistent transient failure) or 5 (permanent failure).
    pub class: u8,
    /// Subject, 0-999.
    pub subject: u16,
    /// Detail, 0-999.
    pub detail: u16,
}

impl EnhancedCode {
    /// Creates a new enhanced code.
    #[must_use]
    pub const fn new(class: u8, subject: u16, detail: u16) -> Self {
        Self {
            class,
            subject,
            detail,
        }
    }

    /// Parses `class.subject.detail`.
    ///
    /// Returns `None` unless the class is 2, 4 or 5 and subject and detail
    /// are one to three digits each.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let class = parts.next()?;
        let subject = parts.next()?;
        let detail = parts.next()?;
        if parts.next().is_some() {
            return None;
        }

        let class = match class {
            "2" => 2,
            "4" => 4,
            "5" => 5,
            _ => return None,
        };
        Some(Self::new(class, parse_component(subject)?, parse_component(detail)?))
    }
}

fn parse_component(s: &str) -> Option<u16> {
    if s.is_empty() || s.len() > 3 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl fmt::Display for EnhancedCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

// Enhanced codes used by the engine
impl EnhancedCode {
    /// 2.0.0 Other undefined status (success)
    pub const OK: Self = Self::new(2, 0, 0);
    /// 2.1.0 Originator address valid
    pub const SENDER_OK: Self = Self::new(2, 1, 0);
    /// 2.1.5 Destination address valid
    pub const RECIPIENT_OK: Self = Self::new(2, 1, 5);
    /// 2.5.2 Cannot verify, will attempt delivery
    pub const CANNOT_VERIFY: Self = Self::new(2, 5, 2);
    /// 2.6.0 Message accepted
    pub const MESSAGE_ACCEPTED: Self = Self::new(2, 6, 0);
    /// 4.3.0 Other or undefined mail system status
    pub const SYSTEM_ERROR: Self = Self::new(4, 3, 0);
    /// 4.4.2 Bad connection (timeout/shutdown)
    pub const BAD_CONNECTION: Self = Self::new(4, 4, 2);
    /// 5.1.1 Bad destination mailbox address
    pub const BAD_DESTINATION: Self = Self::new(5, 1, 1);
    /// 5.1.3 Bad destination mailbox address syntax.
    pub const BAD_DESTINATION_SYNTAX: Self = Self::new(5, 1, 3);
    /// 5.1.7 Bad sender's mailbox address syntax
    pub const BAD_SENDER_SYNTAX: Self = Self::new(5, 1, 7);
    /// 5.1.8 Bad sender's system address
    pub const BAD_SENDER: Self = Self::new(5, 1, 8);
    /// 5.3.4 Message too big for system
    pub const MESSAGE_TOO_BIG: Self = Self::new(5, 3, 4);
    /// 5.5.1 Invalid command
    pub const INVALID_COMMAND: Self = Self::new(5, 5, 1);
    /// 5.5.2 Syntax error
    pub const SYNTAX_ERROR: Self = Self::new(5, 5, 2);
    /// 5.5.4 Invalid command arguments
    pub const INVALID_ARGUMENTS: Self = Self::new(5, 5, 4);
    /// 5.7.0 Other or undefined security status
    pub const SECURITY: Self = Self::new(5, 7, 0);
}
