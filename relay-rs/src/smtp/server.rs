use crate::config::ConfigStore;
use crate::error::Result;
use crate::relay::Relay;
use crate::security::AuthStore;
use crate::smtp::connection::SmtpConnection;
use crate::smtp::session::Session;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{error, info};

/// Accepts inbound clients, one task per connection
pub struct SmtpServer {
    listener: TcpListener,
    config: Arc<ConfigStore>,
    auth: Arc<AuthStore>,
    relay: Arc<dyn Relay>,
    hostname: String,
}

impl SmtpServer {
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        config: Arc<ConfigStore>,
        auth: Arc<AuthStore>,
        relay: Arc<dyn Relay>,
        hostname: String,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("SMTP server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            config,
            auth,
            relay,
            hostname,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((socket, addr)) => {
                    info!("New SMTP connection from {}", addr);

                    let session = Session::new(self.auth.clone(), self.relay.clone(), addr);
                    let connection = SmtpConnection::new(
                        socket,
                        session,
                        self.config.clone(),
                        self.hostname.clone(),
                    );

                    tokio::spawn(async move {
                        if let Err(e) = connection.run().await {
                            error!("Session error from {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}
