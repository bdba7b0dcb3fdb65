use std::fmt;
use thiserror::Error;

/// Step of an upstream delivery that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStage {
    Connect,
    Greeting,
    Hello,
    StartTls,
    Auth,
    MailFrom,
    RcptTo,
    Data,
    Body,
    Quit,
}

impl fmt::Display for SendStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Greeting => "greeting",
            Self::Hello => "EHLO",
            Self::StartTls => "STARTTLS",
            Self::Auth => "AUTH",
            Self::MailFrom => "MAIL FROM",
            Self::RcptTo => "RCPT TO",
            Self::Data => "DATA",
            Self::Body => "message body",
            Self::Quit => "QUIT",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid filter pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid credential")]
    AuthenticationFailed,

    #[error("Unsupported auth mechanism: {0}")]
    UnsupportedMechanism(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Bad sequence of commands: {0}")]
    BadSequence(&'static str),

    #[error("Session closed")]
    SessionClosed,

    #[error("SMTP protocol error: {0}")]
    SmtpProtocol(String),

    #[error("Message too large (max {limit} bytes)")]
    MessageTooLarge { limit: usize },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Upstream rejected {stage}: {reason}")]
    Upstream { stage: SendStage, reason: String },

    #[error("TLS error: {0}")]
    Tls(String),
}

impl RelayError {
    pub(crate) fn upstream(stage: SendStage, reason: impl Into<String>) -> Self {
        Self::Upstream {
            stage,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
