//! Plain-text SMTP transport over `tokio::net::TcpStream`.
//!
//! Opens one connection per message: greeting, EHLO (HELO fallback), optional
//! AUTH PLAIN, MAIL FROM, RCPT TO per recipient, DATA, QUIT.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use mailmerge_core::{MailmergeError, MailmergeResult, SmtpServerConfig};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::transport::Transport;

/// SMTP delivery to a single relay host.
#[derive(Clone)]
pub struct SmtpTransport {
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    timeout: Duration,
    hello_name: String,
}

impl SmtpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            credentials: None,
            timeout: Duration::from_secs(30),
            hello_name: "localhost".to_string(),
        }
    }

    /// Build from `[smtp_server]`.
    ///
    /// A username without a password is rejected unless `dry_run` is set; a
    /// dry-run client never talks to the server, so it is built without
    /// credentials.
    pub fn from_config(config: &SmtpServerConfig, dry_run: bool) -> MailmergeResult<Self> {
        let mut transport = Self::new(config.host.clone(), config.port)
            .with_timeout(Duration::from_secs(config.timeout_secs));

        match (&config.username, &config.password) {
            (Some(username), Some(password)) => {
                transport = transport.with_credentials(username.clone(), password.clone());
            }
            (Some(username), None) if !dry_run => {
                return Err(MailmergeError::Config(format!(
                    "username {username} is set but no password was provided \
                     (set MAILMERGE__SMTP_SERVER__PASSWORD)"
                )));
            }
            (Some(username), None) => {
                debug!(username = %username, "Dry run, SMTP password not required");
            }
            (None, _) => {}
        }

        info!(
            host = %transport.host,
            port = transport.port,
            auth = transport.credentials.is_some(),
            "SMTP transport initialized"
        );
        Ok(transport)
    }

    pub fn with_credentials(mut self, username: String, password: String) -> Self {
        self.credentials = Some((username, password));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn deliver(
        &self,
        sender: &str,
        recipients: &[String],
        message: &[u8],
    ) -> MailmergeResult<()> {
        let stream = with_timeout(
            self.timeout,
            "connect",
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await?
        .map_err(|e| {
            MailmergeError::Connection(format!("{}:{}: {e}", self.host, self.port))
        })?;

        let mut conn = SmtpConnection::new(stream, self.timeout);
        conn.expect("greeting", &[220]).await?;

        let ehlo = format!("EHLO {}", self.hello_name);
        match conn.command(&ehlo, "EHLO", &[250]).await {
            Ok(_) => {}
            // Only a server that answered but refused EHLO gets a HELO retry.
            Err(MailmergeError::Smtp { .. }) => {
                let helo = format!("HELO {}", self.hello_name);
                conn.command(&helo, "HELO", &[250]).await?;
            }
            Err(e) => return Err(e),
        }

        if let Some((username, password)) = &self.credentials {
            let token = STANDARD.encode(format!("\0{username}\0{password}"));
            conn.command(&format!("AUTH PLAIN {token}"), "AUTH", &[235])
                .await?;
        }

        conn.command(&format!("MAIL FROM:<{sender}>"), "MAIL FROM", &[250])
            .await?;
        for recipient in recipients {
            conn.command(&format!("RCPT TO:<{recipient}>"), "RCPT TO", &[250, 251])
                .await?;
        }
        conn.command("DATA", "DATA", &[354]).await?;
        conn.write_data(message).await?;
        conn.expect("end of data", &[250]).await?;

        // The message is accepted at this point; a failed QUIT is not a delivery failure.
        if let Err(e) = conn.command("QUIT", "QUIT", &[221]).await {
            debug!(error = %e, "SMTP QUIT failed after delivery");
        }

        debug!(
            host = %self.host,
            sender = %sender,
            recipients = recipients.len(),
            bytes = message.len(),
            "Message accepted by SMTP server"
        );
        Ok(())
    }
}

/// A parsed server reply. Multi-line replies keep one entry per line.
#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    lines: Vec<String>,
}

impl Reply {
    fn text(&self) -> String {
        self.lines.join(" ")
    }
}

struct SmtpConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    timeout: Duration,
}

impl SmtpConnection {
    fn new(stream: TcpStream, timeout: Duration) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
            timeout,
        }
    }

    async fn command(&mut self, line: &str, stage: &str, accept: &[u16]) -> MailmergeResult<Reply> {
        self.write_all(format!("{line}\r\n").as_bytes(), stage).await?;
        self.expect(stage, accept).await
    }

    async fn expect(&mut self, stage: &str, accept: &[u16]) -> MailmergeResult<Reply> {
        let reply = self.read_reply(stage).await?;
        if accept.contains(&reply.code) {
            Ok(reply)
        } else {
            Err(MailmergeError::Smtp {
                code: reply.code,
                message: format!("{stage}: {}", reply.text()),
            })
        }
    }

    async fn read_reply(&mut self, stage: &str) -> MailmergeResult<Reply> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let read = with_timeout(self.timeout, stage, self.reader.read_line(&mut line))
                .await?
                .map_err(|e| MailmergeError::Connection(e.to_string()))?;
            if read == 0 {
                return Err(MailmergeError::Connection(format!(
                    "server closed the connection during {stage}"
                )));
            }

            let line = line.trim_end_matches(['\r', '\n']);
            let code = line
                .get(..3)
                .and_then(|c| c.parse::<u16>().ok())
                .ok_or_else(|| {
                    MailmergeError::Connection(format!("malformed SMTP reply: {line:?}"))
                })?;
            let more = line.as_bytes().get(3) == Some(&b'-');
            lines.push(line.get(4..).unwrap_or_default().to_string());

            if !more {
                return Ok(Reply { code, lines });
            }
        }
    }

    /// Send the message body with dot stuffing and the terminating `.` line.
    async fn write_data(&mut self, message: &[u8]) -> MailmergeResult<()> {
        let data = dot_stuff(message);
        self.write_all(&data, "DATA").await
    }

    async fn write_all(&mut self, bytes: &[u8], stage: &str) -> MailmergeResult<()> {
        with_timeout(self.timeout, stage, self.writer.write_all(bytes))
            .await?
            .map_err(|e| MailmergeError::Connection(e.to_string()))
    }
}

async fn with_timeout<F: Future>(limit: Duration, stage: &str, fut: F) -> MailmergeResult<F::Output> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| MailmergeError::Timeout(stage.to_string()))
}

fn dot_stuff(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + 8);
    let mut at_line_start = true;
    for &byte in message {
        if at_line_start && byte == b'.' {
            out.push(b'.');
        }
        out.push(byte);
        at_line_start = byte == b'\n';
    }
    if !out.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");
    out
}
