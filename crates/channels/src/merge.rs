//! Per-recipient merge loop.
//!
//! Renders one message per database row, pushes it through the send gate and
//! reports each result. A rate-limited message is reported and skipped; the
//! loop moves on to the next row. Transport errors end the run.

use mailmerge_core::clock::Clock;
use mailmerge_core::{MailmergeResult, MessageTemplate};
use std::io::Write;
use tracing::info;

use crate::database::Row;
use crate::sendmail::{SendOutcome, SendmailClient};
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOptions {
    /// Stop after this many messages. `None` processes every row.
    pub limit: Option<usize>,
    /// 1-based row to start from.
    pub resume: usize,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            limit: None,
            resume: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub processed: usize,
    pub sent: usize,
    pub rate_limited: usize,
    /// Rows were left unprocessed because of `MergeOptions::limit`.
    pub limit_reached: bool,
}

/// "1 message" / "60 messages".
pub fn pluralize_messages(count: u64) -> String {
    if count == 1 {
        "1 message".to_string()
    } else {
        format!("{count} messages")
    }
}

pub fn rate_limit_notice(limit: u32) -> String {
    format!(
        "Rate limit of {} per minute hit",
        pluralize_messages(u64::from(limit))
    )
}

pub async fn run_merge<T, C, W>(
    client: &mut SendmailClient<T, C>,
    template: &MessageTemplate,
    rows: &[Row],
    options: &MergeOptions,
    out: &mut W,
) -> MailmergeResult<MergeSummary>
where
    T: Transport,
    C: Clock,
    W: Write,
{
    let mut summary = MergeSummary::default();
    let skip = options.resume.saturating_sub(1);

    for (idx, row) in rows.iter().enumerate().skip(skip) {
        if options.limit.is_some_and(|limit| summary.processed >= limit) {
            summary.limit_reached = true;
            break;
        }
        let number = idx + 1;

        let message = template.render_message(row)?;
        writeln!(out, ">>> message {number}")?;
        let text = message.to_string();
        write!(out, "{text}")?;
        if !text.ends_with('\n') {
            writeln!(out)?;
        }

        match client.send_message(&message).await? {
            SendOutcome::Sent => {
                summary.sent += 1;
                writeln!(out, ">>> message {number} sent")?;
            }
            SendOutcome::RateLimited { limit, .. } => {
                summary.rate_limited += 1;
                writeln!(
                    out,
                    ">>> message {number} not sent: {}",
                    rate_limit_notice(limit)
                )?;
            }
        }
        summary.processed += 1;
    }

    if client.dry_run() {
        writeln!(
            out,
            ">>> This was a dry run.  To send messages, use the --no-dry-run option."
        )?;
    }
    if summary.limit_reached {
        if let Some(limit) = options.limit {
            writeln!(
                out,
                ">>> Limit was {}.  To remove the limit, use the --no-limit option.",
                pluralize_messages(limit as u64)
            )?;
        }
    }

    info!(
        processed = summary.processed,
        sent = summary.sent,
        rate_limited = summary.rate_limited,
        dry_run = client.dry_run(),
        "Mail merge finished"
    );
    Ok(summary)
}
