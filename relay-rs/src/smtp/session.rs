//! Per-connection SMTP session state
//!
//! The protocol engine drives a [`Session`] through one callback per client
//! command. The session enforces ordering (authentication before any mail
//! transaction) and hands finished envelopes to the relay pipeline.
//!
//! ```text
//! Greeted ─► Authenticated ─► SenderSet ─► RecipientSet ─► BodyReceived
//!                 ▲                                             │
//!                 └──────────────── reset / next MAIL ──────────┘
//! ```

use crate::error::{RelayError, Result};
use crate::relay::{Disposition, Relay};
use crate::security::{AuthMechanism, AuthStore};
use crate::smtp::envelope::{Body, Envelope, MailOptions, RcptOptions};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, field, info, info_span, warn, Instrument, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Greeted,
    Authenticated,
    SenderSet,
    RecipientSet,
    BodyReceived,
    Closed,
}

pub struct Session {
    state: SessionState,
    /// Authenticated username, kept across resets
    user: Option<String>,
    envelope: Envelope,
    auth: Arc<AuthStore>,
    relay: Arc<dyn Relay>,
    span: Span,
}

impl Session {
    pub fn new(auth: Arc<AuthStore>, relay: Arc<dyn Relay>, peer: impl fmt::Display) -> Self {
        let span = info_span!(
            "session",
            peer = %peer,
            user = field::Empty,
            from = field::Empty,
            to = field::Empty,
        );

        Self {
            state: SessionState::Greeted,
            user: None,
            envelope: Envelope::default(),
            auth,
            relay,
            span,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Span carrying peer, user and envelope addresses
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn authenticate(
        &mut self,
        mechanism: &str,
        identity: &str,
        username: &str,
        password: &str,
    ) -> Result<()> {
        let _enter = self.span.enter();
        self.ensure_open()?;

        match AuthMechanism::parse(mechanism)? {
            AuthMechanism::Plain => {}
        }

        if self.user.is_some() {
            return Err(RelayError::BadSequence("already authenticated"));
        }

        if let Err(e) = self.auth.authenticate(identity, username, password) {
            warn!(username, "Authentication failed");
            return Err(e);
        }

        info!(username, "Authenticated");
        self.span.record("user", username);
        self.user = Some(username.to_string());
        self.state = SessionState::Authenticated;
        Ok(())
    }

    /// MAIL FROM: starts a new transaction
    pub fn declare_sender(&mut self, from: &str, options: MailOptions) -> Result<()> {
        let _enter = self.span.enter();
        self.ensure_open()?;

        if self.user.is_none() {
            warn!(from, "Sender declared before authentication");
            return Err(RelayError::NotAuthenticated);
        }

        debug!(from, ?options, "MAIL FROM");
        self.span.record("from", from);
        self.envelope = Envelope {
            from: from.to_string(),
            mail_options: options,
            ..Envelope::default()
        };
        self.state = SessionState::SenderSet;
        Ok(())
    }

    /// RCPT TO: one recipient per envelope, the latest wins
    pub fn declare_recipient(&mut self, to: &str, options: RcptOptions) -> Result<()> {
        let _enter = self.span.enter();
        self.ensure_open()?;

        match self.state {
            SessionState::SenderSet | SessionState::RecipientSet => {}
            _ if self.user.is_none() => return Err(RelayError::NotAuthenticated),
            _ => return Err(RelayError::BadSequence("sender not declared")),
        }

        if !self.envelope.to.is_empty() {
            warn!(
                previous = %self.envelope.to,
                to,
                "Only one recipient per message is relayed, replacing previous"
            );
        }

        debug!(to, "RCPT TO");
        self.span.record("to", to);
        self.envelope.to = to.to_string();
        self.envelope.rcpt_options = options;
        self.state = SessionState::RecipientSet;
        Ok(())
    }

    /// DATA: runs the relay pipeline
    ///
    /// Pipeline failures are logged and absorbed. Once the body is accepted
    /// the client is told the message was taken care of.
    pub async fn submit_body(&mut self, body: Body) -> Result<()> {
        let span = self.span.clone();
        async {
            self.ensure_open()?;
            if self.state != SessionState::RecipientSet {
                return Err(if self.user.is_none() {
                    RelayError::NotAuthenticated
                } else {
                    RelayError::BadSequence("recipient not declared")
                });
            }

            let mut envelope = std::mem::take(&mut self.envelope);
            envelope.body = Some(body);
            let from = envelope.from.clone();
            let to = envelope.to.clone();
            self.state = SessionState::BodyReceived;

            match self.relay.relay(envelope).await {
                Ok(Disposition::Forwarded) => {
                    info!(%from, %to, "Message relayed");
                }
                Ok(Disposition::Dropped { rule }) => {
                    info!(%from, %to, %rule, "Message dropped by filter");
                }
                Err(e) => {
                    error!(
                        %from,
                        %to,
                        user = self.user.as_deref().unwrap_or("-"),
                        "Failed to relay message: {}",
                        e
                    );
                }
            }

            Ok(())
        }
        .instrument(span)
        .await
    }

    /// RSET: drop the transaction, keep authentication
    pub fn reset(&mut self) -> Result<()> {
        let _enter = self.span.enter();
        self.ensure_open()?;

        debug!("RSET");
        self.envelope = Envelope::default();
        self.state = if self.user.is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Greeted
        };
        Ok(())
    }

    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            let _enter = self.span.enter();
            debug!("Session closed");
            self.envelope = Envelope::default();
            self.state = SessionState::Closed;
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == SessionState::Closed {
            Err(RelayError::SessionClosed)
        } else {
            Ok(())
        }
    }
}
