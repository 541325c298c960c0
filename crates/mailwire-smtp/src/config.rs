//! Session configuration.
//!
//! Both configs can be built in code through their builders or loaded from
//! any serde format; missing fields take their defaults. Durations are given
//! in seconds.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::parser::DEFAULT_MAX_LINE_LENGTH;
use crate::types::{AuthMechanism, Extension};

/// Default maximum accepted message size (10 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Default staging size before content is handed to the sink.
pub const DEFAULT_SINK_FLUSH_THRESHOLD: usize = 64 * 1024;

/// Default outbound buffer size for message content.
pub const DEFAULT_BUFFER_CAPACITY: usize = 16 * 1024;

/// Default inactivity timeout.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(300);

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Server-side session settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Name used in the banner and greeting replies.
    pub hostname: String,
    /// Speak LMTP instead of SMTP.
    pub lmtp: bool,
    /// Extensions advertised in the EHLO/LHLO reply.
    pub extensions: Vec<Extension>,
    /// Maximum line length, CRLF included.
    pub max_line_length: usize,
    /// Maximum message size in bytes; 0 disables the limit.
    pub max_message_size: usize,
    /// Content is staged until this many bytes, then written to the sink.
    pub sink_flush_threshold: usize,
    /// Inactivity timeout.
    #[serde(with = "seconds")]
    pub io_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            lmtp: false,
            extensions: vec![
                Extension::Pipelining,
                Extension::EnhancedStatusCodes,
                Extension::EightBitMime,
            ],
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            sink_flush_threshold: DEFAULT_SINK_FLUSH_THRESHOLD,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Extensions to list in the greeting reply.
    ///
    /// SIZE is added with the configured limit unless it is disabled or
    /// listed explicitly.
    #[must_use]
    pub fn advertised_extensions(&self) -> Vec<Extension> {
        let mut extensions = self.extensions.clone();
        let has_size = extensions.iter().any(|e| matches!(e, Extension::Size(_)));
        if self.max_message_size > 0 && !has_size {
            extensions.push(Extension::Size(Some(self.max_message_size)));
        }
        extensions
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Sets the host name.
    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.config.hostname = hostname.into();
        self
    }

    /// Switches to LMTP.
    #[must_use]
    pub const fn lmtp(mut self, lmtp: bool) -> Self {
        self.config.lmtp = lmtp;
        self
    }

    /// Replaces the advertised extensions.
    #[must_use]
    pub fn extensions(mut self, extensions: impl IntoIterator<Item = Extension>) -> Self {
        self.config.extensions = extensions.into_iter().collect();
        self
    }

    /// Sets the maximum line length.
    #[must_use]
    pub const fn max_line_length(mut self, max: usize) -> Self {
        self.config.max_line_length = max;
        self
    }

    /// Sets the maximum message size.
    #[must_use]
    pub const fn max_message_size(mut self, max: usize) -> Self {
        self.config.max_message_size = max;
        self
    }

    /// Sets the sink flush threshold.
    #[must_use]
    pub const fn sink_flush_threshold(mut self, threshold: usize) -> Self {
        self.config.sink_flush_threshold = threshold;
        self
    }

    /// Sets the inactivity timeout.
    #[must_use]
    pub const fn io_timeout(mut self, timeout: Duration) -> Self {
        self.config.io_timeout = timeout;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ServerConfig {
        self.config
    }
}

/// SASL credentials.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    /// Mechanism to use.
    pub mechanism: AuthMechanism,
    /// Authentication identity.
    pub username: String,
    /// Password.
    pub password: String,
}

impl Credentials {
    /// Creates credentials for the PLAIN mechanism.
    #[must_use]
    pub fn plain(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            mechanism: AuthMechanism::Plain,
            username: username.into(),
            password: password.into(),
        }
    }

    /// Creates credentials for the LOGIN mechanism.
    #[must_use]
    pub fn login(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            mechanism: AuthMechanism::Login,
            ..Self::plain(username, password)
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Client-side session settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Name sent with EHLO/HELO/LHLO.
    pub hostname: String,
    /// Speak LMTP instead of SMTP.
    pub lmtp: bool,
    /// Authenticate after the greeting.
    pub credentials: Option<Credentials>,
    /// Maximum line length, CRLF included.
    pub max_line_length: usize,
    /// Content is read ahead until this many bytes are waiting to be sent.
    pub buffer_capacity: usize,
    /// Inactivity timeout.
    #[serde(with = "seconds")]
    pub io_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            lmtp: false,
            credentials: None,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Sets the name announced in the greeting.
    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.config.hostname = hostname.into();
        self
    }

    /// Switches to LMTP.
    #[must_use]
    pub const fn lmtp(mut self, lmtp: bool) -> Self {
        self.config.lmtp = lmtp;
        self
    }

    /// Authenticates with these credentials.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.config.credentials = Some(credentials);
        self
    }

    /// Sets the maximum line length.
    #[must_use]
    pub const fn max_line_length(mut self, max: usize) -> Self {
        self.config.max_line_length = max;
        self
    }

    /// Sets the content buffer capacity.
    #[must_use]
    pub const fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity;
        self
    }

    /// Sets the inactivity timeout.
    #[must_use]
    pub const fn io_timeout(mut self, timeout: Duration) -> Self {
        self.config.io_timeout = timeout;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.max_line_length, 1000);
        assert_eq!(config.io_timeout, Duration::from_secs(300));
        assert!(!config.lmtp);
        assert!(
            config
                .advertised_extensions()
                .contains(&Extension::Size(Some(DEFAULT_MAX_MESSAGE_SIZE)))
        );
    }

    #[test]
    fn test_server_builder() {
        let config = ServerConfig::builder()
            .hostname("mx.example.com")
            .lmtp(true)
            .extensions([Extension::Pipelining])
            .max_message_size(0)
            .build();
        assert_eq!(config.hostname, "mx.example.com");
        assert!(config.lmtp);
        assert_eq!(config.advertised_extensions(), vec![Extension::Pipelining]);
    }

    #[test]
    fn test_explicit_size_is_kept() {
        let config = ServerConfig::builder()
            .extensions([Extension::Size(None)])
            .build();
        assert_eq!(config.advertised_extensions(), vec![Extension::Size(None)]);
    }

    #[test]
    fn test_server_from_json() {
        let config: ServerConfig = serde_json::from_str(
            r#"{"hostname": "mx", "extensions": ["PIPELINING", "SIZE 1024"], "io_timeout": 30}"#,
        )
        .unwrap();
        assert_eq!(config.hostname, "mx");
        assert_eq!(config.io_timeout, Duration::from_secs(30));
        assert_eq!(
            config.extensions,
            vec![Extension::Pipelining, Extension::Size(Some(1024))]
        );
        assert_eq!(config.max_line_length, 1000);
    }

    #[test]
    fn test_client_from_json() {
        let config: ClientConfig = serde_json::from_str(
            r#"{"hostname": "client", "credentials": {"mechanism": "LOGIN", "username": "u", "password": "p"}}"#,
        )
        .unwrap();
        let credentials = config.credentials.unwrap();
        assert_eq!(credentials.mechanism, AuthMechanism::Login);
        assert_eq!(config.buffer_capacity, DEFAULT_BUFFER_CAPACITY);
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let debug = format!("{:?}", Credentials::plain("user", "hunter2"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("user"));
    }
}
