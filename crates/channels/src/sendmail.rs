//! Rate-limited send gate in front of a mail transport.
//!
//! Every `send` makes one admit/deny decision. Admitted messages go to the
//! transport (or nowhere in dry-run mode); denied messages are not queued and
//! come back as `SendOutcome::RateLimited` for the caller to resubmit.

use mailmerge_core::clock::{Clock, SystemClock};
use mailmerge_core::{MailmergeError, MailmergeResult, Message, SmtpServerConfig};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::rate_limit::{RateLimitDecision, SendRateLimiter};
use crate::smtp::SmtpTransport;
use crate::transport::Transport;

/// Result of a send that did not fail at the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Delivered, or simulated in dry-run mode.
    Sent,
    /// Not sent because `limit` messages per minute would be exceeded.
    RateLimited { limit: u32, retry_after: Duration },
}

impl SendOutcome {
    /// Caller-facing status code: 0 sent, 1 rate limit hit.
    pub fn code(&self) -> i32 {
        match self {
            SendOutcome::Sent => 0,
            SendOutcome::RateLimited { .. } => 1,
        }
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent)
    }
}

/// Sending client: owns the transport and the rate limiter state.
pub struct SendmailClient<T: Transport, C: Clock = SystemClock> {
    transport: T,
    limiter: SendRateLimiter<C>,
    dry_run: bool,
}

impl SendmailClient<SmtpTransport, SystemClock> {
    /// Build an SMTP-backed client from the `[smtp_server]` section.
    pub fn from_config(config: &SmtpServerConfig, dry_run: bool) -> MailmergeResult<Self> {
        let transport = SmtpTransport::from_config(config, dry_run)?;
        Ok(Self::new(transport, config.effective_ratelimit(), dry_run))
    }
}

impl<T: Transport> SendmailClient<T, SystemClock> {
    pub fn new(transport: T, ratelimit: Option<u32>, dry_run: bool) -> Self {
        Self::with_limiter(transport, SendRateLimiter::new(ratelimit), dry_run)
    }
}

impl<T: Transport, C: Clock> SendmailClient<T, C> {
    pub fn with_clock(transport: T, ratelimit: Option<u32>, dry_run: bool, clock: C) -> Self {
        Self::with_limiter(transport, SendRateLimiter::with_clock(ratelimit, clock), dry_run)
    }

    fn with_limiter(transport: T, limiter: SendRateLimiter<C>, dry_run: bool) -> Self {
        info!(
            ratelimit = ?limiter.limit(),
            dry_run,
            "Sendmail client initialized"
        );
        Self {
            transport,
            limiter,
            dry_run,
        }
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn ratelimit(&self) -> Option<u32> {
        self.limiter.limit()
    }

    pub fn limiter(&self) -> &SendRateLimiter<C> {
        &self.limiter
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send one message, subject to the rate limit.
    ///
    /// The last-send timestamp moves only when the message was actually sent
    /// (or simulated); throttled attempts and transport errors leave it alone.
    pub async fn send(
        &mut self,
        sender: &str,
        recipients: &[String],
        message: &Message,
    ) -> MailmergeResult<SendOutcome> {
        if recipients.is_empty() {
            return Err(MailmergeError::Message(
                "message has no recipients".to_string(),
            ));
        }

        if let RateLimitDecision::Throttle { retry_after } = self.limiter.check() {
            let limit = self.limiter.limit().unwrap_or_default();
            metrics::counter!("mailmerge.rate_limited").increment(1);
            debug!(
                sender = %sender,
                limit,
                retry_after_ms = retry_after.as_millis() as u64,
                "Rate limit hit, message not sent"
            );
            return Ok(SendOutcome::RateLimited { limit, retry_after });
        }

        if self.dry_run {
            debug!(sender = %sender, recipients = recipients.len(), "Dry run, skipping transport");
        } else {
            let raw = message.to_bytes();
            if let Err(e) = self.transport.deliver(sender, recipients, &raw).await {
                if e.is_transport() {
                    metrics::counter!("mailmerge.transport_errors").increment(1);
                }
                warn!(sender = %sender, error = %e, "Message delivery failed");
                return Err(e);
            }
        }

        self.limiter.record_send();
        let mode = if self.dry_run { "dry_run" } else { "smtp" };
        metrics::counter!("mailmerge.messages_sent", "mode" => mode).increment(1);

        Ok(SendOutcome::Sent)
    }

    /// Send using the envelope taken from the message's own headers.
    pub async fn send_message(&mut self, message: &Message) -> MailmergeResult<SendOutcome> {
        let sender = message.sender()?;
        let recipients = message.recipients();
        self.send(&sender, &recipients, message).await
    }
}
