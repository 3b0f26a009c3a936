use thiserror::Error;

pub type MailmergeResult<T> = Result<T, MailmergeError>;

#[derive(Error, Debug)]
pub enum MailmergeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Message error: {0}")]
    Message(String),

    #[error("SMTP connection error: {0}")]
    Connection(String),

    #[error("SMTP server timed out during {0}")]
    Timeout(String),

    #[error("SMTP error {code}: {message}")]
    Smtp { code: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for MailmergeError {
    fn from(err: config::ConfigError) -> Self {
        MailmergeError::Config(err.to_string())
    }
}

impl MailmergeError {
    /// True for failures raised while talking to the SMTP server.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            MailmergeError::Connection(_) | MailmergeError::Timeout(_) | MailmergeError::Smtp { .. }
        )
    }
}
