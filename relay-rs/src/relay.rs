//! Relay decision pipeline
//!
//! Every submitted message goes through [`Proxy::relay`]:
//!
//! ```text
//! body ─► size policy ─► [Saver] ─► filter rules ─┬─► dropped (Ok)
//!                                                 └─► [Target] ─► forwarded
//! ```
//!
//! A filter match is a policy decision and reported as success. Storage and
//! forwarding failures are operational errors and reported to the caller.

use crate::config::{ConfigStore, OversizePolicy};
use crate::error::{RelayError, Result};
use crate::smtp::envelope::{Envelope, Message};
use crate::storage::message_file_name;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

/// Delivers a message to its next hop
#[async_trait]
pub trait Target: Send + Sync {
    async fn send(&self, message: &Message) -> Result<()>;
}

/// Keeps a local copy of a message
#[async_trait]
pub trait Saver: Send + Sync {
    async fn save(&self, message: &Message, name: &str) -> Result<()>;
}

/// Entry point used by sessions once a body has been submitted
#[async_trait]
pub trait Relay: Send + Sync {
    async fn relay(&self, envelope: Envelope) -> Result<Disposition>;
}

/// Outcome of a successful relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Forwarded,
    /// Matched a filter rule and was discarded
    Dropped { rule: String },
}

/// The policy gate between inbound sessions and the upstream target
pub struct Proxy {
    config: Arc<ConfigStore>,
    target: Arc<dyn Target>,
    saver: Option<Arc<dyn Saver>>,
}

impl Proxy {
    pub fn new(config: Arc<ConfigStore>, target: Arc<dyn Target>) -> Self {
        Self {
            config,
            target,
            saver: None,
        }
    }

    /// Persist every message before filtering
    pub fn with_saver(mut self, saver: Arc<dyn Saver>) -> Self {
        self.saver = Some(saver);
        self
    }
}

#[async_trait]
impl Relay for Proxy {
    async fn relay(&self, mut envelope: Envelope) -> Result<Disposition> {
        // One snapshot for the whole message
        let config = self.config.load();
        let from = envelope.from.clone();
        let to = envelope.to.clone();

        let body = envelope
            .body
            .take()
            .ok_or(RelayError::BadSequence("no message body submitted"))?;

        let limit = config.filters.max_message_size;
        let truncated = body.is_truncated();
        let mut buf = Vec::new();
        body.into_reader()
            .take(limit as u64 + 1)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| {
                error!(%from, %to, "Failed to read message: {}", e);
                e
            })?;

        if truncated || buf.len() > limit {
            match config.filters.oversize {
                OversizePolicy::Reject => {
                    warn!(%from, %to, "Rejecting message larger than {} bytes", limit);
                    return Err(RelayError::MessageTooLarge { limit });
                }
                OversizePolicy::Truncate => {
                    warn!(%from, %to, "Truncating message to {} bytes", limit.min(buf.len()));
                    buf.truncate(limit);
                }
            }
        }

        let message = Message {
            from: envelope.from,
            to: envelope.to,
            mail_options: envelope.mail_options,
            rcpt_options: envelope.rcpt_options,
            body: Bytes::from(buf),
        };

        if let Some(saver) = &self.saver {
            let name = message_file_name();
            debug!(%from, %to, "Saving message as {}", name);
            if let Err(e) = saver.save(&message, &name).await {
                error!(%from, %to, "Failed to save message: {}", e);
                return Err(e);
            }
        }

        debug!(%from, %to, "Filtering");
        if let Some(rule) = config.filters.to.iter().find(|rule| rule.is_match(&message.to)) {
            info!(%from, %to, %rule, "Dropping message");
            return Ok(Disposition::Dropped {
                rule: rule.to_string(),
            });
        }

        info!(%from, %to, size = message.len(), "Forwarding message");
        self.target.send(&message).await?;

        Ok(Disposition::Forwarded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Pattern};
    use crate::error::SendStage;
    use crate::smtp::envelope::Body;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTarget {
        sent: Mutex<Vec<Message>>,
        fail: bool,
    }

    #[async_trait]
    impl Target for RecordingTarget {
        async fn send(&self, message: &Message) -> Result<()> {
            if self.fail {
                return Err(RelayError::upstream(SendStage::RcptTo, "550 no such user"));
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSaver {
        saved: Mutex<Vec<(String, Vec<u8>)>>,
        fail: bool,
    }

    #[async_trait]
    impl Saver for RecordingSaver {
        async fn save(&self, message: &Message, name: &str) -> Result<()> {
            if self.fail {
                return Err(RelayError::Storage("disk full".to_string()));
            }
            let mut content = Vec::new();
            message.reader().read_to_end(&mut content).await?;
            self.saved.lock().unwrap().push((name.to_string(), content));
            Ok(())
        }
    }

    fn config(rules: &[&str], max_message_size: usize) -> Arc<ConfigStore> {
        let mut config = Config::default();
        config.filters.to = rules.iter().map(|r| Pattern::new(r).unwrap()).collect();
        config.filters.max_message_size = max_message_size;
        Arc::new(ConfigStore::from_config(config))
    }

    fn envelope(to: &str, body: &[u8]) -> Envelope {
        Envelope {
            from: "sender@example.com".to_string(),
            to: to.to_string(),
            body: Some(Body::from_bytes(body.to_vec())),
            ..Envelope::default()
        }
    }

    #[tokio::test]
    async fn test_matching_rule_drops_message() {
        let target = Arc::new(RecordingTarget::default());
        let proxy = Proxy::new(config(&["^spam@"], 100), target.clone());

        let outcome = proxy
            .relay(envelope("spam@example.com", &[b'x'; 50]))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Disposition::Dropped {
                rule: "^spam@".to_string()
            }
        );
        assert!(target.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unmatched_message_is_forwarded() {
        let target = Arc::new(RecordingTarget::default());
        let proxy = Proxy::new(config(&["^spam@"], 100), target.clone());

        let outcome = proxy
            .relay(envelope("ok@example.com", &[b'x'; 50]))
            .await
            .unwrap();

        assert_eq!(outcome, Disposition::Forwarded);
        let sent = target.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ok@example.com");
        assert_eq!(sent[0].from, "sender@example.com");
        assert_eq!(sent[0].body.len(), 50);
    }

    #[tokio::test]
    async fn test_first_matching_rule_wins() {
        let target = Arc::new(RecordingTarget::default());
        let proxy = Proxy::new(
            config(&["@nowhere\\.", "^spam@", "example\\.com$"], 100),
            target.clone(),
        );

        let outcome = proxy
            .relay(envelope("spam@example.com", b"body"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Disposition::Dropped {
                rule: "^spam@".to_string()
            }
        );
        assert!(target.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_forward_failure_is_reported() {
        let target = Arc::new(RecordingTarget {
            fail: true,
            ..Default::default()
        });
        let proxy = Proxy::new(config(&[], 100), target);

        let result = proxy.relay(envelope("ok@example.com", b"body")).await;
        assert!(matches!(
            result,
            Err(RelayError::Upstream {
                stage: SendStage::RcptTo,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_saved_and_forwarded_bodies_match() {
        let target = Arc::new(RecordingTarget::default());
        let saver = Arc::new(RecordingSaver::default());
        let proxy = Proxy::new(config(&[], 1024), target.clone()).with_saver(saver.clone());

        let body = b"Subject: hi\r\n\r\nHello there\r\n";
        proxy.relay(envelope("ok@example.com", body)).await.unwrap();

        let saved = saver.saved.lock().unwrap();
        let sent = target.sent.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].0.ends_with(".eml"));
        assert_eq!(saved[0].1, body.to_vec());
        assert_eq!(sent[0].body.as_ref(), &saved[0].1[..]);
    }

    #[tokio::test]
    async fn test_dropped_messages_are_still_saved() {
        let target = Arc::new(RecordingTarget::default());
        let saver = Arc::new(RecordingSaver::default());
        let proxy = Proxy::new(config(&["^spam@"], 1024), target.clone()).with_saver(saver.clone());

        proxy.relay(envelope("spam@example.com", b"body")).await.unwrap();

        assert_eq!(saver.saved.lock().unwrap().len(), 1);
        assert!(target.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_failure_aborts_before_forwarding() {
        let target = Arc::new(RecordingTarget::default());
        let saver = Arc::new(RecordingSaver {
            fail: true,
            ..Default::default()
        });
        let proxy = Proxy::new(config(&[], 1024), target.clone()).with_saver(saver);

        let result = proxy.relay(envelope("ok@example.com", b"body")).await;
        assert!(matches!(result, Err(RelayError::Storage(_))));
        assert!(target.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversize_rejected_by_default() {
        let target = Arc::new(RecordingTarget::default());
        let proxy = Proxy::new(config(&[], 10), target.clone());

        let result = proxy.relay(envelope("ok@example.com", &[b'x'; 11])).await;
        assert!(matches!(result, Err(RelayError::MessageTooLarge { limit: 10 })));
        assert!(target.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_body_at_limit_is_accepted() {
        let target = Arc::new(RecordingTarget::default());
        let proxy = Proxy::new(config(&[], 10), target.clone());

        let outcome = proxy.relay(envelope("ok@example.com", &[b'x'; 10])).await.unwrap();
        assert_eq!(outcome, Disposition::Forwarded);
        assert_eq!(target.sent.lock().unwrap()[0].body.len(), 10);
    }

    #[tokio::test]
    async fn test_oversize_truncated_when_configured() {
        let mut config = Config::default();
        config.filters.max_message_size = 10;
        config.filters.oversize = OversizePolicy::Truncate;
        let target = Arc::new(RecordingTarget::default());
        let proxy = Proxy::new(Arc::new(ConfigStore::from_config(config)), target.clone());

        proxy
            .relay(envelope("ok@example.com", b"0123456789abcdef"))
            .await
            .unwrap();

        assert_eq!(target.sent.lock().unwrap()[0].body.as_ref(), b"0123456789");
    }

    #[tokio::test]
    async fn test_cut_body_is_rejected_under_a_larger_limit() {
        let target = Arc::new(RecordingTarget::default());
        let saver = Arc::new(RecordingSaver::default());
        let proxy = Proxy::new(config(&[], 1000), target.clone()).with_saver(saver.clone());

        let envelope = Envelope {
            from: "sender@example.com".to_string(),
            to: "ok@example.com".to_string(),
            body: Some(Body::from_bytes(&b"0123456789"[..]).truncated()),
            ..Envelope::default()
        };

        let result = proxy.relay(envelope).await;
        assert!(matches!(result, Err(RelayError::MessageTooLarge { limit: 1000 })));
        assert!(saver.saved.lock().unwrap().is_empty());
        assert!(target.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cut_body_is_kept_when_truncation_is_allowed() {
        let mut config = Config::default();
        config.filters.max_message_size = 1000;
        config.filters.oversize = OversizePolicy::Truncate;
        let target = Arc::new(RecordingTarget::default());
        let proxy = Proxy::new(Arc::new(ConfigStore::from_config(config)), target.clone());

        let envelope = Envelope {
            from: "sender@example.com".to_string(),
            to: "ok@example.com".to_string(),
            body: Some(Body::from_bytes(&b"0123456789"[..]).truncated()),
            ..Envelope::default()
        };

        assert_eq!(proxy.relay(envelope).await.unwrap(), Disposition::Forwarded);
        assert_eq!(target.sent.lock().unwrap()[0].body.as_ref(), b"0123456789");
    }

    #[tokio::test]
    async fn test_missing_body_is_an_error() {
        let target = Arc::new(RecordingTarget::default());
        let proxy = Proxy::new(config(&[], 10), target);

        let envelope = Envelope {
            from: "a@example.com".to_string(),
            to: "b@example.com".to_string(),
            ..Envelope::default()
        };
        assert!(matches!(
            proxy.relay(envelope).await,
            Err(RelayError::BadSequence(_))
        ));
    }
}
