//! SMTP command type and builders.

use std::fmt;

use crate::types::{Address, AuthMechanism, ReversePath};

/// SMTP/LMTP command: `VERB [ARGUMENT [PARAM...]]`.
///
/// The verb is stored uppercase. For `MAIL FROM:<a@b> BODY=8BITMIME` the
/// argument is `FROM:<a@b>` and the parameters are `["BODY=8BITMIME"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command verb, uppercase.
    pub verb: String,
    /// First whitespace-delimited token after the verb.
    pub argument: Option<String>,
    /// Remaining whitespace-delimited tokens.
    pub params: Vec<String>,
}

impl Command {
    /// Creates a command with the given verb and no argument.
    #[must_use]
    pub fn new(verb: impl Into<String>) -> Self {
        Self {
            verb: verb.into().to_ascii_uppercase(),
            argument: None,
            params: Vec::new(),
        }
    }

    /// Sets the argument.
    #[must_use]
    pub fn with_argument(mut self, argument: impl Into<String>) -> Self {
        self.argument = Some(argument.into());
        self
    }

    /// Appends a parameter.
    #[must_use]
    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.params.push(param.into());
        self
    }

    /// Returns `true` if the verb matches, ignoring case.
    #[must_use]
    pub fn is(&self, verb: &str) -> bool {
        self.verb.eq_ignore_ascii_case(verb)
    }

    /// HELO - basic greeting.
    #[must_use]
    pub fn helo(hostname: &str) -> Self {
        Self::new("HELO").with_argument(hostname)
    }

    /// EHLO - extended greeting.
    #[must_use]
    pub fn ehlo(hostname: &str) -> Self {
        Self::new("EHLO").with_argument(hostname)
    }

    /// LHLO - LMTP greeting.
    #[must_use]
    pub fn lhlo(hostname: &str) -> Self {
        Self::new("LHLO").with_argument(hostname)
    }

    /// MAIL FROM - start a mail transaction.
    #[must_use]
    pub fn mail_from(from: &ReversePath, params: Vec<String>) -> Self {
        Self {
            verb: "MAIL".to_string(),
            argument: Some(format!("FROM:<{from}>")),
            params,
        }
    }

    /// RCPT TO - add a recipient.
    #[must_use]
    pub fn rcpt_to(to: &Address) -> Self {
        Self::new("RCPT").with_argument(format!("TO:<{to}>"))
    }

    /// DATA - begin message content.
    #[must_use]
    pub fn data() -> Self {
        Self::new("DATA")
    }

    /// RSET - reset the transaction.
    #[must_use]
    pub fn rset() -> Self {
        Self::new("RSET")
    }

    /// NOOP - no operation.
    #[must_use]
    pub fn noop() -> Self {
        Self::new("NOOP")
    }

    /// QUIT - close the session.
    #[must_use]
    pub fn quit() -> Self {
        Self::new("QUIT")
    }

    /// AUTH - begin SASL authentication, optionally with an initial response.
    #[must_use]
    pub fn auth(mechanism: AuthMechanism, initial_response: Option<String>) -> Self {
        let cmd = Self::new("AUTH").with_argument(mechanism.as_str());
        match initial_response {
            Some(resp) => cmd.with_param(resp),
            None => cmd,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.verb)?;
        if let Some(argument) = &self.argument {
            write!(f, " {argument}")?;
        }
        for param in &self.params {
            write!(f, " {param}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::writer::write_command;

    fn wire(cmd: &Command) -> Vec<u8> {
        let mut out = BytesMut::new();
        write_command(cmd, &mut out, 1000).unwrap();
        out.to_vec()
    }

    #[test]
    fn test_verb_is_uppercased() {
        let cmd = Command::new("ehlo");
        assert_eq!(cmd.verb, "EHLO");
        assert!(cmd.is("Ehlo"));
    }

    #[test]
    fn test_ehlo_command() {
        assert_eq!(
            wire(&Command::ehlo("client.example.com")),
            b"EHLO client.example.com\r\n"
        );
    }

    #[test]
    fn test_lhlo_command() {
        assert_eq!(wire(&Command::lhlo("lmtp.local")), b"LHLO lmtp.local\r\n");
    }

    #[test]
    fn test_mail_from_simple() {
        let from = ReversePath::from(Address::new("sender@example.com").unwrap());
        assert_eq!(
            wire(&Command::mail_from(&from, vec![])),
            b"MAIL FROM:<sender@example.com>\r\n"
        );
    }

    #[test]
    fn test_mail_from_null_with_params() {
        let cmd = Command::mail_from(
            &ReversePath::Null,
            vec!["BODY=8BITMIME".to_string(), "SIZE=12345".to_string()],
        );
        assert_eq!(
            wire(&cmd),
            b"MAIL FROM:<> BODY=8BITMIME SIZE=12345\r\n"
        );
    }

    #[test]
    fn test_rcpt_to_command() {
        let cmd = Command::rcpt_to(&Address::new("recipient@example.com").unwrap());
        assert_eq!(wire(&cmd), b"RCPT TO:<recipient@example.com>\r\n");
    }

    #[test]
    fn test_bare_commands() {
        assert_eq!(wire(&Command::data()), b"DATA\r\n");
        assert_eq!(wire(&Command::rset()), b"RSET\r\n");
        assert_eq!(wire(&Command::noop()), b"NOOP\r\n");
        assert_eq!(wire(&Command::quit()), b"QUIT\r\n");
    }

    #[test]
    fn test_params_without_argument() {
        let cmd = Command::new("XTEST").with_param("A=1");
        assert_eq!(wire(&cmd), b"XTEST A=1\r\n");
    }

    #[test]
    fn test_auth_plain() {
        let cmd = Command::auth(AuthMechanism::Plain, Some("AHVzZXIAcGFzcw==".to_string()));
        assert_eq!(wire(&cmd), b"AUTH PLAIN AHVzZXIAcGFzcw==\r\n");
        assert_eq!(cmd.to_string(), "AUTH PLAIN AHVzZXIAcGFzcw==");
    }
}
