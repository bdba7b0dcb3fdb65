//! SMTP client forwarding accepted messages to the upstream relay
//!
//! Each [`SmtpTarget::send`] call opens its own connection and walks the
//! whole transaction:
//!
//! ```text
//! connect ─► 220 ─► EHLO ─► [STARTTLS ─► EHLO] ─► [AUTH LOGIN]
//!         ─► MAIL FROM ─► RCPT TO ─► DATA ─► body ─► . ─► QUIT
//! ```
//!
//! The first failing step aborts the delivery and is reported as
//! [`RelayError::Upstream`] tagged with its [`SendStage`].

use crate::config::{ConfigStore, TlsMode};
use crate::error::{RelayError, Result, SendStage};
use crate::relay::Target;
use crate::security::auth::encode_login_credential;
use crate::security::TlsConfig;
use crate::smtp::envelope::Message;
use async_trait::async_trait;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tracing::{debug, info, warn};

/// Timeout for establishing the TCP connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for each command/reply exchange
const COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Outbound stream, plain or encrypted
enum UpstreamStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for UpstreamStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            UpstreamStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for UpstreamStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            UpstreamStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            UpstreamStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            UpstreamStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            UpstreamStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// A complete, possibly multi-line, server reply
#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    lines: Vec<String>,
}

impl Reply {
    /// Whether an EHLO reply advertises `keyword`
    fn has_extension(&self, keyword: &str) -> bool {
        self.lines.iter().skip(1).any(|line| {
            line.split_whitespace()
                .next()
                .map(|word| word.eq_ignore_ascii_case(keyword))
                .unwrap_or(false)
        })
    }

    fn text(&self) -> String {
        format!("{} {}", self.code, self.lines.join(" / "))
    }
}

/// One open connection to the upstream relay
struct UpstreamConnection {
    stream: BufReader<UpstreamStream>,
    command_timeout: Duration,
}

impl UpstreamConnection {
    fn new(stream: UpstreamStream, command_timeout: Duration) -> Self {
        Self {
            stream: BufReader::new(stream),
            command_timeout,
        }
    }

    async fn read_reply(&mut self, stage: SendStage) -> Result<Reply> {
        let mut code = None;
        let mut lines = Vec::new();

        loop {
            let mut line = String::new();
            let deadline = self.command_timeout;
            let n = match timeout(deadline, self.stream.read_line(&mut line)).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(RelayError::upstream(stage, e.to_string())),
                Err(_) => return Err(RelayError::upstream(stage, "timed out")),
            };
            if n == 0 {
                return Err(RelayError::upstream(stage, "connection closed"));
            }

            let line = line.trim_end();
            debug!("< {}", line);

            let parsed = line
                .get(..3)
                .and_then(|digits| digits.parse::<u16>().ok())
                .ok_or_else(|| RelayError::upstream(stage, format!("malformed reply: {}", line)))?;
            code.get_or_insert(parsed);
            lines.push(line.get(4..).unwrap_or("").to_string());

            // "250-" continues, "250 " (or a bare code) ends the reply
            if line.as_bytes().get(3) != Some(&b'-') {
                break;
            }
        }

        Ok(Reply {
            code: code.unwrap_or_default(),
            lines,
        })
    }

    async fn expect(&mut self, stage: SendStage, accepted: &[u16]) -> Result<Reply> {
        let reply = self.read_reply(stage).await?;
        if accepted.contains(&reply.code) {
            Ok(reply)
        } else {
            Err(RelayError::upstream(stage, reply.text()))
        }
    }

    async fn write_raw(&mut self, stage: SendStage, data: &[u8]) -> Result<()> {
        let command_timeout = self.command_timeout;
        let stream = &mut self.stream;
        match timeout(command_timeout, async {
            stream.write_all(data).await?;
            stream.flush().await
        })
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(RelayError::upstream(stage, e.to_string())),
            Err(_) => Err(RelayError::upstream(stage, "timed out")),
        }
    }

    async fn command(&mut self, stage: SendStage, line: &str, accepted: &[u16]) -> Result<Reply> {
        debug!("> {}", line);
        self.write_raw(stage, format!("{}\r\n", line).as_bytes()).await?;
        self.expect(stage, accepted).await
    }

    /// Like [`command`](Self::command) without tracing the line itself
    async fn secret_command(&mut self, stage: SendStage, line: &str, accepted: &[u16]) -> Result<Reply> {
        debug!("> {}", crate::config::REDACTED);
        self.write_raw(stage, format!("{}\r\n", line).as_bytes()).await?;
        self.expect(stage, accepted).await
    }

    /// Swap the plain stream for a TLS session after a 220 to STARTTLS
    async fn upgrade(self, tls: &TlsConfig, host: &str) -> Result<Self> {
        let command_timeout = self.command_timeout;
        match self.stream.into_inner() {
            UpstreamStream::Plain(tcp) => {
                let stream = tls
                    .connect(host, tcp)
                    .await
                    .map_err(|e| RelayError::upstream(SendStage::StartTls, e.to_string()))?;
                Ok(Self::new(UpstreamStream::Tls(Box::new(stream)), command_timeout))
            }
            UpstreamStream::Tls(_) => Err(RelayError::upstream(
                SendStage::StartTls,
                "connection already encrypted",
            )),
        }
    }
}

/// Forwards messages to `proxy.address:proxy.port`
pub struct SmtpTarget {
    config: Arc<ConfigStore>,
    tls: TlsConfig,
    hostname: String,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl SmtpTarget {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            config,
            tls: TlsConfig::with_webpki_roots(),
            hostname: local_hostname(),
            connect_timeout: CONNECT_TIMEOUT,
            command_timeout: COMMAND_TIMEOUT,
        }
    }

    pub fn with_tls_config(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Name announced in EHLO
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, command: Duration) -> Self {
        self.connect_timeout = connect;
        self.command_timeout = command;
        self
    }

    async fn connect(&self, addr: &str) -> Result<TcpStream> {
        match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(RelayError::upstream(SendStage::Connect, e.to_string())),
            Err(_) => Err(RelayError::upstream(SendStage::Connect, "timed out")),
        }
    }
}

#[async_trait]
impl Target for SmtpTarget {
    async fn send(&self, message: &Message) -> Result<()> {
        let config = self.config.load();
        let proxy = &config.proxy;
        if proxy.address.is_empty() {
            return Err(RelayError::Config("proxy.address is not set".to_string()));
        }

        let addr = proxy.addr();
        debug!(upstream = %addr, tls = ?proxy.tls, "Connecting to upstream");

        let tcp = self.connect(&addr).await?;
        let stream = match proxy.tls {
            TlsMode::Implicit => {
                let tls = self
                    .tls
                    .connect(&proxy.address, tcp)
                    .await
                    .map_err(|e| RelayError::upstream(SendStage::Connect, e.to_string()))?;
                UpstreamStream::Tls(Box::new(tls))
            }
            TlsMode::StartTls | TlsMode::None => UpstreamStream::Plain(tcp),
        };

        let mut conn = UpstreamConnection::new(stream, self.command_timeout);
        conn.expect(SendStage::Greeting, &[220]).await?;

        let ehlo = format!("EHLO {}", self.hostname);
        let mut capabilities = conn.command(SendStage::Hello, &ehlo, &[250]).await?;

        if proxy.tls == TlsMode::StartTls {
            if !capabilities.has_extension("STARTTLS") {
                return Err(RelayError::upstream(
                    SendStage::StartTls,
                    "STARTTLS not advertised",
                ));
            }
            conn.command(SendStage::StartTls, "STARTTLS", &[220]).await?;
            conn = conn.upgrade(&self.tls, &proxy.address).await?;
            capabilities = conn.command(SendStage::Hello, &ehlo, &[250]).await?;
        }

        if let Some((username, password)) = proxy.credentials() {
            debug!(username, "Authenticating with upstream");
            conn.command(SendStage::Auth, "AUTH LOGIN", &[334]).await?;
            conn.secret_command(SendStage::Auth, &encode_login_credential(username), &[334])
                .await?;
            conn.secret_command(SendStage::Auth, &encode_login_credential(password), &[235])
                .await?;
        }

        let mut mail_from = format!("MAIL FROM:<{}>", message.from);
        if capabilities.has_extension("SIZE") {
            mail_from.push_str(&format!(" SIZE={}", message.len()));
        }
        if let Some(body) = &message.mail_options.body {
            if capabilities.has_extension("8BITMIME") {
                mail_from.push_str(&format!(" BODY={}", body));
            }
        }
        conn.command(SendStage::MailFrom, &mail_from, &[250]).await?;

        conn.command(
            SendStage::RcptTo,
            &format!("RCPT TO:<{}>", message.to),
            &[250, 251],
        )
        .await?;

        conn.command(SendStage::Data, "DATA", &[354]).await?;
        debug!("> <{} bytes>", message.len());
        conn.write_raw(SendStage::Body, &dot_stuff(&message.body)).await?;
        conn.expect(SendStage::Body, &[250]).await?;

        info!(
            from = %message.from,
            to = %message.to,
            upstream = %addr,
            "Message accepted by upstream"
        );

        // Delivered at this point, a failing QUIT changes nothing
        if let Err(e) = conn.command(SendStage::Quit, "QUIT", &[221]).await {
            warn!("Upstream did not close cleanly: {}", e);
        }

        Ok(())
    }
}

/// Body bytes ready for the DATA phase
///
/// Doubles every leading `.`, turns bare LF into CRLF, ends the last line
/// and appends the terminating `.` line.
fn dot_stuff(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 8);
    let mut at_line_start = true;

    for &byte in body {
        if at_line_start && byte == b'.' {
            out.push(b'.');
        }
        if byte == b'\n' && out.last() != Some(&b'\r') {
            out.push(b'\r');
        }
        out.push(byte);
        at_line_start = byte == b'\n';
    }

    if !out.is_empty() && !out.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");
    out
}

/// Name announced in EHLO and in the inbound greeting
pub fn local_hostname() -> String {
    let name = gethostname::gethostname().to_string_lossy().to_string();
    if name.is_empty() {
        "localhost".to_string()
    } else {
        name
    }
}
