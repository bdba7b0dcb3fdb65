//! Inbound SMTP protocol engine
//!
//! Reads commands from one client, translates them into [`Session`] calls and
//! writes the replies. Works over any byte stream so tests can drive it
//! through an in-memory pipe.
//!
//! # Limits
//! - Command lines longer than 1000 bytes are refused
//! - Idle clients are disconnected after 5 minutes (10 during DATA)
//! - Ten protocol errors close the connection

use crate::config::ConfigStore;
use crate::error::{RelayError, Result};
use crate::security::{AuthMechanism, PlainCredentials};
use crate::smtp::commands::SmtpCommand;
use crate::smtp::envelope::{Body, MailOptions, RcptOptions};
use crate::smtp::session::{Session, SessionState};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tracing::{debug, error, info, warn, Instrument};

/// Maximum line length in SMTP protocol (RFC 5321)
const MAX_LINE_LENGTH: usize = 1000;

/// Timeout for reading a command line
const COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Timeout for reading each DATA line
const DATA_TIMEOUT: Duration = Duration::from_secs(600);

/// Maximum number of errors before disconnecting
const MAX_ERRORS: usize = 10;

/// What the command loop does after a reply
enum Flow {
    Continue,
    Quit,
}

pub struct SmtpConnection<S> {
    stream: BufReader<S>,
    session: Session,
    config: Arc<ConfigStore>,
    hostname: String,
    /// Domain given in HELO/EHLO
    helo: Option<String>,
    error_count: usize,
    command_timeout: Duration,
    data_timeout: Duration,
}

impl<S> SmtpConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, session: Session, config: Arc<ConfigStore>, hostname: String) -> Self {
        Self {
            stream: BufReader::new(stream),
            session,
            config,
            hostname,
            helo: None,
            error_count: 0,
            command_timeout: COMMAND_TIMEOUT,
            data_timeout: DATA_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, command: Duration, data: Duration) -> Self {
        self.command_timeout = command;
        self.data_timeout = data;
        self
    }

    /// Serve the client until QUIT, disconnect or a fatal error
    pub async fn run(mut self) -> Result<()> {
        let span = self.session.span().clone();
        async move {
            let result = self.process_commands().await;
            self.session.close();
            result
        }
        .instrument(span)
        .await
    }

    async fn process_commands(&mut self) -> Result<()> {
        self.reply(&format!("220 {} ESMTP relay-rs ready", self.hostname))
            .await?;

        let mut line = Vec::new();

        loop {
            // Disconnect abusive clients
            if self.error_count >= MAX_ERRORS {
                warn!("Too many errors, disconnecting");
                self.reply("421 Too many errors, closing connection").await?;
                return Ok(());
            }

            line.clear();
            let read = timeout(
                self.command_timeout,
                read_line_bounded(&mut self.stream, &mut line, MAX_LINE_LENGTH),
            )
            .await;

            let n = match read {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    error!("IO error reading line: {}", e);
                    return Err(e.into());
                }
                Err(_) => {
                    warn!("Command timeout, disconnecting");
                    self.reply("421 Timeout, closing connection").await?;
                    return Ok(());
                }
            };

            if n == 0 {
                debug!("Client disconnected");
                return Ok(());
            }

            if n > MAX_LINE_LENGTH {
                warn!("Line too long: {} bytes", n);
                self.reply("500 Line too long").await?;
                self.error_count += 1;
                continue;
            }

            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end();
            debug!("Received: {}", redact_auth(text));

            let command = match SmtpCommand::parse(text) {
                Ok(command) => command,
                Err(e) => {
                    warn!("Command parse error: {}", e);
                    self.reply("500 Syntax error, command unrecognized").await?;
                    self.error_count += 1;
                    continue;
                }
            };

            if let Flow::Quit = self.handle_command(command).await? {
                return Ok(());
            }
        }
    }

    async fn handle_command(&mut self, command: SmtpCommand) -> Result<Flow> {
        match command {
            SmtpCommand::Helo(domain) => {
                self.greet(domain)?;
                let reply = format!("250 {} Hello {}", self.hostname, self.helo_name());
                self.reply(&reply).await?;
            }
            SmtpCommand::Ehlo(domain) => {
                self.greet(domain)?;
                let reply = self.ehlo_reply();
                self.reply(&reply).await?;
            }
            SmtpCommand::Auth(mechanism, initial) => {
                self.handle_auth(&mechanism, initial).await?;
            }
            SmtpCommand::MailFrom(from, params) => {
                self.handle_mail(&from, &params).await?;
            }
            SmtpCommand::RcptTo(to, params) => {
                if self.helo.is_none() {
                    return self.bad_sequence("Send HELO/EHLO first").await;
                }
                let result = self
                    .session
                    .declare_recipient(&to, RcptOptions { params });
                self.respond(result, "250 OK").await?;
            }
            SmtpCommand::Data => {
                self.handle_data().await?;
            }
            SmtpCommand::Rset => {
                let result = self.session.reset();
                self.respond(result, "250 OK").await?;
            }
            SmtpCommand::Noop => {
                self.reply("250 OK").await?;
            }
            SmtpCommand::Quit => {
                let reply = format!("221 {} closing connection", self.hostname);
                self.reply(&reply).await?;
                return Ok(Flow::Quit);
            }
            SmtpCommand::Unknown(command) => {
                warn!("Unknown command: {}", command);
                self.reply("502 Command not implemented").await?;
                self.error_count += 1;
            }
        }

        Ok(Flow::Continue)
    }

    /// HELO/EHLO also aborts any transaction in progress
    fn greet(&mut self, domain: String) -> Result<()> {
        info!("HELO/EHLO from {}", domain);
        if matches!(
            self.session.state(),
            SessionState::SenderSet | SessionState::RecipientSet
        ) {
            self.session.reset()?;
        }
        self.helo = Some(domain);
        Ok(())
    }

    fn helo_name(&self) -> &str {
        self.helo.as_deref().unwrap_or("")
    }

    fn ehlo_reply(&self) -> String {
        let max_size = self.config.load().filters.max_message_size;
        let mechanisms: Vec<&str> = AuthMechanism::SUPPORTED.iter().map(|m| m.as_str()).collect();

        let mut reply = format!("250-{} Hello {}\r\n", self.hostname, self.helo_name());
        reply.push_str(&format!("250-SIZE {}\r\n", max_size));
        reply.push_str("250-8BITMIME\r\n");
        reply.push_str(&format!("250-AUTH {}\r\n", mechanisms.join(" ")));
        reply.push_str("250 HELP");
        reply
    }

    async fn handle_auth(&mut self, mechanism: &str, initial: Option<String>) -> Result<()> {
        if self.helo.is_none() {
            self.bad_sequence("Send HELO/EHLO first").await?;
            return Ok(());
        }

        if self.session.is_authenticated() {
            self.reply("503 Already authenticated").await?;
            return Ok(());
        }

        if AuthMechanism::parse(mechanism).is_err() {
            warn!("Unsupported AUTH mechanism: {}", mechanism);
            self.reply("504 Authentication mechanism not supported").await?;
            self.error_count += 1;
            return Ok(());
        }

        // PLAIN: credentials in the command or after an empty challenge
        let auth_data = match initial {
            Some(data) => data,
            None => {
                self.reply("334 ").await?;
                let mut line = Vec::new();
                let n = timeout(
                    self.command_timeout,
                    read_line_bounded(&mut self.stream, &mut line, MAX_LINE_LENGTH),
                )
                .await
                .map_err(|_| RelayError::SmtpProtocol("AUTH timeout".to_string()))??;
                if n == 0 {
                    return Err(RelayError::SmtpProtocol(
                        "Connection closed during AUTH".to_string(),
                    ));
                }
                String::from_utf8_lossy(&line).trim().to_string()
            }
        };

        if auth_data == "*" {
            self.reply("501 Authentication cancelled").await?;
            return Ok(());
        }

        let credentials = match PlainCredentials::decode(&auth_data) {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!("Malformed AUTH PLAIN response: {}", e);
                self.reply("501 Malformed authentication response").await?;
                self.error_count += 1;
                return Ok(());
            }
        };

        let result = self.session.authenticate(
            mechanism,
            &credentials.identity,
            &credentials.username,
            &credentials.password,
        );
        self.respond(result, "235 Authentication successful").await
    }

    async fn handle_mail(&mut self, from: &str, params: &[String]) -> Result<()> {
        if self.helo.is_none() {
            self.bad_sequence("Send HELO/EHLO first").await?;
            return Ok(());
        }

        let options = match MailOptions::parse(params) {
            Ok(options) => options,
            Err(e) => {
                warn!("Invalid MAIL parameters: {}", e);
                self.reply("501 Syntax error in parameters").await?;
                self.error_count += 1;
                return Ok(());
            }
        };

        let limit = self.config.load().filters.max_message_size;
        if matches!(options.size, Some(size) if size > limit) {
            warn!("Declared size {:?} exceeds limit {}", options.size, limit);
            self.reply(&format!("552 Message size exceeds limit of {} bytes", limit))
                .await?;
            return Ok(());
        }

        let result = self.session.declare_sender(from, options);
        self.respond(result, "250 OK").await
    }

    async fn handle_data(&mut self) -> Result<()> {
        if self.session.state() != SessionState::RecipientSet {
            let reply = if self.session.is_authenticated() {
                "503 Bad sequence of commands"
            } else {
                "530 Authentication required"
            };
            self.reply(reply).await?;
            self.error_count += 1;
            return Ok(());
        }

        let cap = self.config.load().filters.max_message_size;
        self.reply("354 Start mail input; end with <CRLF>.<CRLF>")
            .await?;

        let (data, overflowed) = match self.receive_data(cap).await {
            Ok(received) => received,
            Err(e) => {
                error!("Error receiving data: {}", e);
                self.session.reset()?;
                return Err(e);
            }
        };

        info!("End of DATA received, {} bytes", data.len());
        let mut body = Body::from_bytes(data);
        if overflowed {
            warn!("Message body exceeded {} bytes, the rest was discarded", cap);
            body = body.truncated();
        }
        let result = self.session.submit_body(body).await;
        self.respond(result, "250 OK: Message accepted").await
    }

    /// Read the body up to the terminating `.` line, undoing dot-stuffing
    ///
    /// At most `cap` bytes are kept; the rest is read and discarded, and the
    /// returned flag is set.
    async fn receive_data(&mut self, cap: usize) -> Result<(Vec<u8>, bool)> {
        let mut data = Vec::new();
        let mut line = Vec::new();
        let mut overflowed = false;

        loop {
            line.clear();
            let read = timeout(
                self.data_timeout,
                read_line_bounded(&mut self.stream, &mut line, cap.saturating_add(2)),
            )
            .await;

            let n = match read {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    warn!("DATA timeout");
                    return Err(RelayError::SmtpProtocol("Timeout during DATA".to_string()));
                }
            };

            if n == 0 {
                return Err(RelayError::SmtpProtocol(
                    "Connection closed during DATA".to_string(),
                ));
            }

            if line == b".\r\n" || line == b".\n" {
                return Ok((data, overflowed));
            }

            let content = match line.first() {
                Some(b'.') => &line[1..],
                _ => &line[..],
            };

            let room = cap.saturating_sub(data.len());
            if content.len() > room {
                overflowed = true;
            }
            data.extend_from_slice(&content[..content.len().min(room)]);
        }
    }

    async fn respond(&mut self, result: Result<()>, success: &str) -> Result<()> {
        match result {
            Ok(()) => self.reply(success).await,
            Err(e) => {
                debug!("Command failed: {}", e);
                self.error_count += 1;
                self.reply(error_reply(&e)).await
            }
        }
    }

    async fn bad_sequence(&mut self, detail: &str) -> Result<Flow> {
        self.error_count += 1;
        self.reply(&format!("503 {}", detail)).await?;
        Ok(Flow::Continue)
    }

    async fn reply(&mut self, reply: &str) -> Result<()> {
        debug!("Sending: {}", reply);
        let stream = self.stream.get_mut();
        stream.write_all(reply.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await?;
        Ok(())
    }
}

/// SMTP reply for a failed session call
fn error_reply(error: &RelayError) -> &'static str {
    match error {
        RelayError::NotAuthenticated => "530 Authentication required",
        RelayError::AuthenticationFailed => "535 Authentication failed",
        RelayError::UnsupportedMechanism(_) => "504 Authentication mechanism not supported",
        RelayError::BadSequence(_) | RelayError::SessionClosed => "503 Bad sequence of commands",
        RelayError::SmtpProtocol(_) => "501 Syntax error in parameters",
        _ => "451 Local error in processing",
    }
}

/// Keep AUTH responses out of the trace log
fn redact_auth(line: &str) -> &str {
    let is_auth = line
        .get(..5)
        .map(|prefix| prefix.eq_ignore_ascii_case("AUTH "))
        .unwrap_or(false);
    if is_auth {
        line.get(..10).unwrap_or(line)
    } else {
        line
    }
}

/// Read one `\n`-terminated line, keeping at most `max` bytes of it
///
/// Returns the number of bytes consumed from the stream, which exceeds
/// `max` when the line was cut.
async fn read_line_bounded<R>(reader: &mut R, line: &mut Vec<u8>, max: usize) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut total = 0;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(total);
        }

        let (used, done) = match available.iter().position(|b| *b == b'\n') {
            Some(i) => (i + 1, true),
            None => (available.len(), false),
        };

        let room = max.saturating_sub(line.len());
        line.extend_from_slice(&available[..used.min(room)]);
        reader.consume(used);
        total += used;

        if done {
            return Ok(total);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Secret};
    use crate::relay::{Disposition, Relay};
    use crate::security::AuthStore;
    use crate::smtp::envelope::Envelope;
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, DuplexStream, ReadHalf, WriteHalf};

    #[derive(Default)]
    struct RecordingRelay {
        relayed: Mutex<Vec<(String, String, Vec<u8>, bool)>>,
    }

    #[async_trait]
    impl Relay for RecordingRelay {
        async fn relay(&self, mut envelope: Envelope) -> Result<Disposition> {
            let mut body = Vec::new();
            let mut truncated = false;
            if let Some(b) = envelope.body.take() {
                truncated = b.is_truncated();
                b.into_reader().read_to_end(&mut body).await?;
            }
            self.relayed
                .lock()
                .unwrap()
                .push((envelope.from, envelope.to, body, truncated));
            Ok(Disposition::Forwarded)
        }
    }

    struct Client {
        reader: BufReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl Client {
        async fn send(&mut self, line: &str) {
            self.writer
                .write_all(format!("{}\r\n", line).as_bytes())
                .await
                .unwrap();
        }

        /// Read one full reply and return its last line
        async fn read(&mut self) -> String {
            loop {
                let mut line = String::new();
                self.reader.read_line(&mut line).await.unwrap();
                if line.as_bytes().get(3) != Some(&b'-') {
                    return line.trim_end().to_string();
                }
            }
        }

        async fn cmd(&mut self, line: &str) -> String {
            self.send(line).await;
            self.read().await
        }

        async fn login(&mut self) {
            assert!(self.cmd("EHLO client.test").await.starts_with("250"));
            let creds = BASE64.encode(b"\0user@example.com\0secret");
            assert!(self
                .cmd(&format!("AUTH PLAIN {}", creds))
                .await
                .starts_with("235"));
        }
    }

    fn start(max_message_size: usize) -> (Client, Arc<RecordingRelay>, tokio::task::JoinHandle<Result<()>>) {
        let mut config = Config::default();
        config.filters.max_message_size = max_message_size;
        config
            .auth
            .plain
            .insert("user@example.com".to_string(), Secret::new("secret"));
        let store = Arc::new(ConfigStore::from_config(config));

        let relay = Arc::new(RecordingRelay::default());
        let session = Session::new(
            Arc::new(AuthStore::new(store.clone())),
            relay.clone(),
            "test-peer",
        );

        let (client, server) = tokio::io::duplex(64 * 1024);
        let connection = SmtpConnection::new(server, session, store, "relay.test".to_string())
            .with_timeouts(Duration::from_secs(5), Duration::from_secs(5));
        let handle = tokio::spawn(connection.run());

        let (reader, writer) = tokio::io::split(client);
        (
            Client {
                reader: BufReader::new(reader),
                writer,
            },
            relay,
            handle,
        )
    }

    #[tokio::test]
    async fn test_full_transaction() {
        let (mut client, relay, handle) = start(1024);
        assert!(client.read().await.starts_with("220 relay.test"));
        client.login().await;

        assert_eq!(client.cmd("MAIL FROM:<a@example.com>").await, "250 OK");
        assert_eq!(client.cmd("RCPT TO:<b@example.com>").await, "250 OK");
        assert!(client.cmd("DATA").await.starts_with("354"));
        client.send("Subject: test").await;
        client.send("").await;
        client.send("..leading dot").await;
        assert!(client.cmd(".").await.starts_with("250"));
        assert!(client.cmd("QUIT").await.starts_with("221"));

        handle.await.unwrap().unwrap();

        let relayed = relay.relayed.lock().unwrap();
        assert_eq!(relayed.len(), 1);
        assert_eq!(relayed[0].0, "a@example.com");
        assert_eq!(relayed[0].1, "b@example.com");
        assert_eq!(relayed[0].2, b"Subject: test\r\n\r\n.leading dot\r\n");
    }

    #[tokio::test]
    async fn test_ehlo_advertises_size_and_auth() {
        let (mut client, _relay, _handle) = start(4096);
        client.read().await;
        client.send("EHLO client.test").await;

        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            client.reader.read_line(&mut line).await.unwrap();
            let done = line.as_bytes().get(3) == Some(&b' ');
            lines.push(line.trim_end().to_string());
            if done {
                break;
            }
        }

        assert!(lines.contains(&"250-SIZE 4096".to_string()));
        assert!(lines.contains(&"250-AUTH PLAIN".to_string()));
    }

    #[tokio::test]
    async fn test_mail_before_auth_is_refused() {
        let (mut client, _relay, _handle) = start(1024);
        client.read().await;
        client.cmd("EHLO client.test").await;

        assert!(client.cmd("MAIL FROM:<a@example.com>").await.starts_with("530"));
        // Connection stays usable
        assert_eq!(client.cmd("NOOP").await, "250 OK");
    }

    #[tokio::test]
    async fn test_auth_plain_with_continuation() {
        let (mut client, _relay, _handle) = start(1024);
        client.read().await;
        client.cmd("EHLO client.test").await;

        assert!(client.cmd("AUTH PLAIN").await.starts_with("334"));
        let creds = BASE64.encode(b"\0user@example.com\0secret");
        assert!(client.cmd(&creds).await.starts_with("235"));
        assert_eq!(client.cmd("MAIL FROM:<a@example.com>").await, "250 OK");
    }

    #[tokio::test]
    async fn test_auth_failures() {
        let (mut client, _relay, _handle) = start(1024);
        client.read().await;
        client.cmd("EHLO client.test").await;

        let wrong = BASE64.encode(b"\0user@example.com\0nope");
        assert!(client
            .cmd(&format!("AUTH PLAIN {}", wrong))
            .await
            .starts_with("535"));
        assert!(client.cmd("AUTH LOGIN").await.starts_with("504"));
        assert!(client.cmd("AUTH PLAIN !!!").await.starts_with("501"));
    }

    #[tokio::test]
    async fn test_declared_size_over_limit() {
        let (mut client, _relay, _handle) = start(100);
        client.read().await;
        client.login().await;

        assert!(client
            .cmd("MAIL FROM:<a@example.com> SIZE=101")
            .await
            .starts_with("552"));
        assert_eq!(client.cmd("MAIL FROM:<a@example.com> SIZE=100").await, "250 OK");
    }

    #[tokio::test]
    async fn test_data_out_of_sequence() {
        let (mut client, _relay, _handle) = start(1024);
        client.read().await;
        client.login().await;

        assert!(client.cmd("DATA").await.starts_with("503"));
        assert!(client.cmd("RCPT TO:<b@example.com>").await.starts_with("503"));
    }

    #[tokio::test]
    async fn test_commands_require_helo() {
        let (mut client, _relay, _handle) = start(1024);
        client.read().await;

        assert!(client.cmd("MAIL FROM:<a@example.com>").await.starts_with("503"));
        assert!(client.cmd("AUTH PLAIN").await.starts_with("503"));
    }

    #[tokio::test]
    async fn test_rset_keeps_authentication() {
        let (mut client, _relay, _handle) = start(1024);
        client.read().await;
        client.login().await;

        assert_eq!(client.cmd("MAIL FROM:<a@example.com>").await, "250 OK");
        assert_eq!(client.cmd("RSET").await, "250 OK");
        assert_eq!(client.cmd("MAIL FROM:<a@example.com>").await, "250 OK");
    }

    #[tokio::test]
    async fn test_oversized_body_is_capped() {
        let (mut client, relay, _handle) = start(10);
        client.read().await;
        client.login().await;

        client.cmd("MAIL FROM:<a@example.com>").await;
        client.cmd("RCPT TO:<b@example.com>").await;
        client.cmd("DATA").await;
        client.send("0123456789abcdefghij").await;
        assert!(client.cmd(".").await.starts_with("250"));

        let relayed = relay.relayed.lock().unwrap();
        assert_eq!(relayed[0].2, b"0123456789");
        assert!(relayed[0].3);
    }

    #[tokio::test]
    async fn test_body_filling_the_limit_is_not_truncated() {
        let (mut client, relay, _handle) = start(10);
        client.read().await;
        client.login().await;

        client.cmd("MAIL FROM:<a@example.com>").await;
        client.cmd("RCPT TO:<b@example.com>").await;
        client.cmd("DATA").await;
        client.send("01234567").await;
        assert!(client.cmd(".").await.starts_with("250"));

        let relayed = relay.relayed.lock().unwrap();
        assert_eq!(relayed[0].2, b"01234567\r\n");
        assert!(!relayed[0].3);
    }

    #[tokio::test]
    async fn test_line_too_long() {
        let (mut client, _relay, _handle) = start(1024);
        client.read().await;

        let long = format!("NOOP {}", "x".repeat(MAX_LINE_LENGTH));
        assert!(client.cmd(&long).await.starts_with("500"));
        assert_eq!(client.cmd("NOOP").await, "250 OK");
    }

    #[tokio::test]
    async fn test_too_many_errors_disconnects() {
        let (mut client, _relay, handle) = start(1024);
        client.read().await;

        for _ in 0..MAX_ERRORS {
            assert!(client.cmd("BOGUS").await.starts_with("502"));
        }
        assert!(client.read().await.starts_with("421"));
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_read_line_bounded() {
        let data: &[u8] = b"short\r\nthis line is long\r\nrest";
        let mut reader = BufReader::new(data);
        let mut line = Vec::new();

        assert_eq!(read_line_bounded(&mut reader, &mut line, 10).await.unwrap(), 7);
        assert_eq!(line, b"short\r\n");

        line.clear();
        assert_eq!(read_line_bounded(&mut reader, &mut line, 10).await.unwrap(), 19);
        assert_eq!(line, b"this line ");

        line.clear();
        assert_eq!(read_line_bounded(&mut reader, &mut line, 10).await.unwrap(), 4);
        assert_eq!(line, b"rest");
    }

    #[test]
    fn test_redact_auth() {
        assert_eq!(redact_auth("AUTH PLAIN AHVzZXIAcGFzcw=="), "AUTH PLAIN");
        assert_eq!(redact_auth("MAIL FROM:<a@b>"), "MAIL FROM:<a@b>");
    }

    #[test]
    fn test_error_replies() {
        assert!(error_reply(&RelayError::NotAuthenticated).starts_with("530"));
        assert!(error_reply(&RelayError::AuthenticationFailed).starts_with("535"));
        assert!(error_reply(&RelayError::UnsupportedMechanism("LOGIN".into())).starts_with("504"));
        assert!(error_reply(&RelayError::BadSequence("no sender")).starts_with("503"));
        assert!(error_reply(&RelayError::SessionClosed).starts_with("503"));
        assert!(error_reply(&RelayError::SmtpProtocol("bad".into())).starts_with("501"));
        assert!(error_reply(&RelayError::Storage("disk full".into())).starts_with("451"));
    }
}
