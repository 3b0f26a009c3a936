use async_trait::async_trait;
use mailmerge_core::MailmergeResult;

/// Delivers one already-serialized message to its envelope recipients.
///
/// Errors are passed through the send gate untouched.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(
        &self,
        sender: &str,
        recipients: &[String],
        message: &[u8],
    ) -> MailmergeResult<()>;
}

