//! mailmerge — send one templated email per row of a CSV database.
//!
//! Dry run by default. Outbound SMTP is throttled by the `ratelimit` value of
//! the `[smtp_server]` config section.

use anyhow::Context;
use clap::Parser;
use mailmerge_channels::{read_database, run_merge, MergeOptions, SendmailClient};
use mailmerge_core::config::AppConfig;
use mailmerge_core::MessageTemplate;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "mailmerge")]
#[command(about = "Mail merge with a Jinja-style template, a CSV database and SMTP")]
#[command(version)]
struct Cli {
    /// Message template: headers, blank line, body, with {{column}} placeholders
    #[arg(long, default_value = "mailmerge_template.txt")]
    template: PathBuf,

    /// CSV database with a header row, one recipient per record
    #[arg(long, default_value = "mailmerge_database.csv")]
    database: PathBuf,

    /// SMTP server config file (INI, [smtp_server] section)
    #[arg(long, default_value = "mailmerge_server.conf")]
    config: PathBuf,

    /// Render and rate-limit messages without sending them (default)
    #[arg(long, overrides_with = "no_dry_run")]
    dry_run: bool,

    /// Actually send messages
    #[arg(long, overrides_with = "dry_run")]
    no_dry_run: bool,

    /// Stop after this many messages
    #[arg(long, default_value_t = 1)]
    limit: usize,

    /// Process every row of the database
    #[arg(long)]
    no_limit: bool,

    /// Start on this message number
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    resume: u64,
}

impl Cli {
    fn is_dry_run(&self) -> bool {
        !self.no_dry_run
    }

    fn merge_options(&self) -> MergeOptions {
        MergeOptions {
            limit: (!self.no_limit).then_some(self.limit),
            resume: self.resume as usize,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the merge output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "mailmerge=warn,mailmerge_core=warn,mailmerge_channels=warn".into()
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("loading server config {}", cli.config.display()))?;
    let template = MessageTemplate::from_file(&cli.template)?;
    let rows = read_database(&cli.database)?;

    info!(
        host = %config.smtp_server.host,
        port = config.smtp_server.port,
        ratelimit = ?config.smtp_server.effective_ratelimit(),
        rows = rows.len(),
        dry_run = cli.is_dry_run(),
        "Configuration loaded"
    );

    let mut client = SendmailClient::from_config(&config.smtp_server, cli.is_dry_run())?;
    let options = cli.merge_options();

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run_merge(&mut client, &template, &rows, &options, &mut out)
        .await
        .context("Error sending message")?;

    Ok(())
}
