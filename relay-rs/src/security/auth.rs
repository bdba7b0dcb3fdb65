//! SMTP AUTH for inbound clients
//!
//! Credentials are checked against the `auth.plain` table of the live
//! configuration snapshot, so adding or revoking a user only takes a config
//! reload.
//!
//! # Supported mechanisms
//! - PLAIN (RFC 4616)

use crate::config::ConfigStore;
use crate::error::{RelayError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::sync::Arc;
use tracing::debug;

/// SASL mechanisms accepted from inbound clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMechanism {
    /// PLAIN mechanism (RFC 4616)
    Plain,
}

impl AuthMechanism {
    /// Every mechanism advertised in the EHLO response
    pub const SUPPORTED: &'static [AuthMechanism] = &[AuthMechanism::Plain];

    /// Parse mechanism name, case-insensitive
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_uppercase().as_str() {
            "PLAIN" => Ok(Self::Plain),
            _ => Err(RelayError::UnsupportedMechanism(name.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
        }
    }
}

/// Decoded PLAIN response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainCredentials {
    /// Authorization identity, often empty
    pub identity: String,
    pub username: String,
    pub password: String,
}

impl PlainCredentials {
    /// Decode a base64 `identity\0username\0password` response
    pub fn decode(auth_data: &str) -> Result<Self> {
        let decoded = BASE64
            .decode(auth_data.trim())
            .map_err(|e| RelayError::SmtpProtocol(format!("Invalid base64: {}", e)))?;

        let text = String::from_utf8(decoded)
            .map_err(|e| RelayError::SmtpProtocol(format!("Invalid UTF-8: {}", e)))?;

        let mut parts = text.split('\0');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(identity), Some(username), Some(password), None) => Ok(Self {
                identity: identity.to_string(),
                username: username.to_string(),
                password: password.to_string(),
            }),
            _ => Err(RelayError::SmtpProtocol(
                "Invalid PLAIN auth format".to_string(),
            )),
        }
    }
}

/// Checks inbound credentials against the live configuration
#[derive(Clone)]
pub struct AuthStore {
    config: Arc<ConfigStore>,
}

impl AuthStore {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self { config }
    }

    /// Succeeds iff `username` is known and `password` matches exactly
    ///
    /// `identity` is only logged; a single flat table has nothing to
    /// authorize it against.
    pub fn authenticate(&self, identity: &str, username: &str, password: &str) -> Result<()> {
        debug!(identity, username, "Authentication attempt");

        let config = self.config.load();
        match config.auth.plain.get(username) {
            Some(secret) if secret.expose() == password => Ok(()),
            _ => Err(RelayError::AuthenticationFailed),
        }
    }
}

/// Base64 of a single LOGIN challenge answer
pub fn encode_login_credential(value: &str) -> String {
    BASE64.encode(value.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Secret};

    fn store_with_users(users: &[(&str, &str)]) -> AuthStore {
        let mut config = Config::default();
        for (user, password) in users {
            config
                .auth
                .plain
                .insert(user.to_string(), Secret::new(*password));
        }
        AuthStore::new(Arc::new(ConfigStore::from_config(config)))
    }

    #[test]
    fn test_authenticate_known_user() {
        let auth = store_with_users(&[("user@example.com", "password123")]);
        assert!(auth.authenticate("", "user@example.com", "password123").is_ok());
    }

    #[test]
    fn test_authenticate_rejects_bad_input() {
        let auth = store_with_users(&[("user@example.com", "password123")]);

        for (username, password) in [
            ("user@example.com", "wrong"),
            ("user@example.com", "PASSWORD123"),
            ("user@example.com", ""),
            ("other@example.com", "password123"),
            ("", ""),
        ] {
            assert!(
                matches!(
                    auth.authenticate("", username, password),
                    Err(RelayError::AuthenticationFailed)
                ),
                "{}/{} should be rejected",
                username,
                password
            );
        }
    }

    #[test]
    fn test_authorization_identity_is_not_checked() {
        let auth = store_with_users(&[("user", "pw")]);
        assert!(auth.authenticate("someone-else", "user", "pw").is_ok());
    }

    #[test]
    fn test_decode_plain_auth() {
        let auth_data = BASE64.encode(b"\0user@example.com\0password123");

        let creds = PlainCredentials::decode(&auth_data).unwrap();
        assert_eq!(creds.identity, "");
        assert_eq!(creds.username, "user@example.com");
        assert_eq!(creds.password, "password123");
    }

    #[test]
    fn test_decode_plain_auth_with_identity() {
        let auth_data = BASE64.encode(b"admin\0user\0pw");
        let creds = PlainCredentials::decode(&auth_data).unwrap();
        assert_eq!(creds.identity, "admin");
        assert_eq!(creds.username, "user");
    }

    #[test]
    fn test_decode_plain_auth_malformed() {
        assert!(PlainCredentials::decode("not base64!").is_err());
        assert!(PlainCredentials::decode(&BASE64.encode(b"user\0pw")).is_err());
        assert!(PlainCredentials::decode(&BASE64.encode(b"a\0b\0c\0d")).is_err());
    }

    #[test]
    fn test_auth_mechanism_parse() {
        assert_eq!(AuthMechanism::parse("PLAIN").unwrap(), AuthMechanism::Plain);
        assert_eq!(AuthMechanism::parse("plain").unwrap(), AuthMechanism::Plain);
        assert!(matches!(
            AuthMechanism::parse("LOGIN"),
            Err(RelayError::UnsupportedMechanism(_))
        ));
        assert!(matches!(
            AuthMechanism::parse("CRAM-MD5"),
            Err(RelayError::UnsupportedMechanism(_))
        ));
    }

    #[test]
    fn test_encode_login_credential() {
        assert_eq!(encode_login_credential("user"), "dXNlcg==");
    }
}
