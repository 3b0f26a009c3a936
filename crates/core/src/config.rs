use serde::Deserialize;
use std::path::Path;

use crate::error::MailmergeResult;

/// Root application configuration. Loaded from an INI server config file,
/// overridden by environment variables with the prefix `MAILMERGE__`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub smtp_server: SmtpServerConfig,
}

/// The `[smtp_server]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Messages per minute. Absent or zero disables rate limiting.
    #[serde(default)]
    pub ratelimit: Option<u32>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    25
}
fn default_timeout_secs() -> u64 {
    30
}

impl Default for SmtpServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ratelimit: None,
            username: None,
            password: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl SmtpServerConfig {
    /// The configured limit, with zero normalized to `None`.
    pub fn effective_ratelimit(&self) -> Option<u32> {
        self.ratelimit.filter(|limit| *limit > 0)
    }
}

impl AppConfig {
    /// Load configuration from the server config file and environment variables.
    ///
    /// Fails when the file is missing or a value has the wrong type, e.g. a
    /// non-numeric `ratelimit`.
    pub fn load(path: &Path) -> MailmergeResult<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Ini))
            .add_source(
                config::Environment::with_prefix("MAILMERGE")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        let app: AppConfig = config.try_deserialize()?;

        tracing::debug!(
            host = %app.smtp_server.host,
            port = app.smtp_server.port,
            ratelimit = ?app.smtp_server.effective_ratelimit(),
            "Server configuration loaded"
        );
        Ok(app)
    }
}
