//! Mail transaction data passed from the session to the relay pipeline

use crate::error::{RelayError, Result};
use bytes::Bytes;
use std::fmt;
use std::io::Cursor;
use tokio::io::AsyncRead;

/// ESMTP parameters given with MAIL FROM
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailOptions {
    /// Declared message size (RFC 1870)
    pub size: Option<usize>,
    /// BODY=7BIT / 8BITMIME (RFC 6152)
    pub body: Option<String>,
    /// Any other parameter, verbatim
    pub extra: Vec<String>,
}

impl MailOptions {
    pub fn parse(params: &[String]) -> Result<Self> {
        let mut options = Self::default();

        for param in params {
            let (key, value) = match param.split_once('=') {
                Some((key, value)) => (key.to_uppercase(), Some(value)),
                None => (param.to_uppercase(), None),
            };

            match (key.as_str(), value) {
                ("SIZE", Some(value)) => {
                    let size = value.parse().map_err(|_| {
                        RelayError::SmtpProtocol(format!("Invalid SIZE parameter: {}", value))
                    })?;
                    options.size = Some(size);
                }
                ("BODY", Some(value)) => options.body = Some(value.to_uppercase()),
                _ => options.extra.push(param.clone()),
            }
        }

        Ok(options)
    }
}

/// ESMTP parameters given with RCPT TO
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RcptOptions {
    pub params: Vec<String>,
}

/// Single-use message body stream
pub struct Body {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    truncated: bool,
}

impl Body {
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            truncated: false,
        }
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::new(Cursor::new(data.into()))
    }

    /// Mark a body the receiver had to cut short
    ///
    /// The relay treats it as oversized whatever limit is in effect when it
    /// gets to read it.
    pub fn truncated(mut self) -> Self {
        self.truncated = true;
        self
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn into_reader(self) -> Box<dyn AsyncRead + Send + Unpin> {
        self.reader
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body")
            .field("truncated", &self.truncated)
            .finish_non_exhaustive()
    }
}

/// One mail transaction as declared by the client
///
/// The body is only attached once the client submits it.
#[derive(Debug, Default)]
pub struct Envelope {
    pub from: String,
    pub to: String,
    pub mail_options: MailOptions,
    pub rcpt_options: RcptOptions,
    pub body: Option<Body>,
}

/// An envelope whose body has been read into memory
///
/// Every consumer gets its own reader from [`Message::reader`], so the same
/// bytes can be stored and then forwarded.
#[derive(Debug, Clone)]
pub struct Message {
    pub from: String,
    pub to: String,
    pub mail_options: MailOptions,
    pub rcpt_options: RcptOptions,
    pub body: Bytes,
}

impl Message {
    pub fn reader(&self) -> Cursor<Bytes> {
        Cursor::new(self.body.clone())
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}
