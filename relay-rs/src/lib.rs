//! relay-rs: authenticated SMTP relay with a hot-reloadable policy
//!
//! Clients authenticate with AUTH PLAIN, submit one message at a time, and
//! every message goes through the same pipeline: size policy, optional copy
//! on disk, recipient filters, then delivery to a single upstream relay.
//!
//! # Features
//!
//! - **Live configuration**: the TOML file is polled and swapped atomically
//! - **Filtering**: recipient regexes, the first match silently drops
//! - **Persistence**: one `.eml` file per accepted message
//! - **Upstream delivery**: STARTTLS or implicit TLS, optional AUTH LOGIN
//!
//! # Example
//!
//! ```no_run
//! use relay_rs::config::ConfigStore;
//! use relay_rs::relay::Proxy;
//! use relay_rs::security::AuthStore;
//! use relay_rs::smtp::{SmtpServer, SmtpTarget};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(ConfigStore::open("config.toml")?);
//!     let target = Arc::new(SmtpTarget::new(config.clone()));
//!     let proxy = Arc::new(Proxy::new(config.clone(), target));
//!     let auth = Arc::new(AuthStore::new(config.clone()));
//!
//!     let addr = config.load().server.listen_addr();
//!     let server = SmtpServer::bind(addr, config, auth, proxy, "relay.example.com".into()).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod relay;
pub mod security;
pub mod smtp;
pub mod storage;

pub use config::{Config, ConfigStore};
pub use error::{RelayError, Result, SendStage};
pub use relay::{Disposition, Proxy, Relay, Saver, Target};
