//! Security module
//!
//! - [`auth`]: inbound SMTP AUTH against the configured credential table
//! - [`tls`]: TLS client configuration for the upstream connection

pub mod auth;
pub mod tls;

pub use auth::{AuthMechanism, AuthStore, PlainCredentials};
pub use tls::TlsConfig;
