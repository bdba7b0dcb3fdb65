//! SMTP server and client implementation (RFC 5321)
//!
//! - [`server`]: listener accepting authenticated submission clients
//! - [`connection`]: per-client protocol engine
//! - [`session`]: session state machine driven by the engine
//! - [`commands`]: SMTP command parsing
//! - [`envelope`]: mail transaction data
//! - [`client`]: upstream delivery

pub mod client;
pub mod commands;
pub mod connection;
pub mod envelope;
pub mod server;
pub mod session;

pub use client::SmtpTarget;
pub use commands::SmtpCommand;
pub use connection::SmtpConnection;
pub use envelope::{Body, Envelope, MailOptions, Message, RcptOptions};
pub use server::SmtpServer;
pub use session::{Session, SessionState};
