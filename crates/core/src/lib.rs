pub mod clock;
pub mod config;
pub mod error;
pub mod message;
pub mod templates;

pub use clock::{Clock, SystemClock};
pub use config::{AppConfig, SmtpServerConfig};
pub use error::{MailmergeError, MailmergeResult};
pub use message::Message;
pub use templates::MessageTemplate;
