//! TLS towards the upstream relay
//!
//! The relay only ever acts as a TLS client: inbound encryption is expected
//! to be terminated in front of it. Server certificates are verified against
//! the Mozilla root set shipped by `webpki-roots`.

use crate::error::{RelayError, Result};
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// TLS client configuration shared by every outbound connection
#[derive(Clone)]
pub struct TlsConfig {
    client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// Client config trusting the webpki root certificates
    pub fn with_webpki_roots() -> Self {
        let mut roots = RootCertStore::empty();
        roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
            OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));

        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Self {
            client_config: Arc::new(config),
        }
    }

    /// Wrap an existing rustls client config (custom roots, tests)
    pub fn from_client_config(config: ClientConfig) -> Self {
        Self {
            client_config: Arc::new(config),
        }
    }

    pub fn connector(&self) -> TlsConnector {
        TlsConnector::from(self.client_config.clone())
    }

    /// Run the client handshake on `stream`, verifying `host`
    pub async fn connect(&self, host: &str, stream: TcpStream) -> Result<TlsStream<TcpStream>> {
        let server_name = ServerName::try_from(host)
            .map_err(|_| RelayError::Tls(format!("Invalid server name: {}", host)))?;

        debug!("TLS handshake with {}", host);
        self.connector()
            .connect(server_name, stream)
            .await
            .map_err(|e| RelayError::Tls(format!("TLS handshake with {} failed: {}", host, e)))
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self::with_webpki_roots()
    }
}
