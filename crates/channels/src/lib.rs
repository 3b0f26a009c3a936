//! Outbound email delivery for mail merges.
//!
//! Send gate: `SendmailClient` admits at most `ratelimit` messages per minute
//! and hands admitted messages to a `Transport` (SMTP, or nothing in dry runs).
//! Merge: `run_merge` renders one message per database row and pushes each
//! through the gate.

pub mod database;
pub mod merge;
pub mod rate_limit;
pub mod sendmail;
pub mod smtp;
pub mod transport;

pub use database::{read_database, Row};
pub use merge::{run_merge, MergeOptions, MergeSummary};
pub use rate_limit::{RateLimitDecision, SendRateLimiter};
pub use sendmail::{SendOutcome, SendmailClient};
pub use smtp::SmtpTransport;
pub use transport::Transport;
