//! Message template rendering engine.
//!
//! Templates use `{{ column }}` placeholders filled from one database row.
//! Rendering is strict: a placeholder with no matching column is an error.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{MailmergeError, MailmergeResult};
use crate::message::Message;

#[derive(Debug, Clone)]
pub struct MessageTemplate {
    source: String,
}

impl MessageTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn from_file(path: &Path) -> MailmergeResult<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            MailmergeError::Template(format!("cannot read {}: {e}", path.display()))
        })?;
        Ok(Self::new(source))
    }

    /// Render the template with the given variables
    pub fn render(&self, variables: &HashMap<String, String>) -> MailmergeResult<String> {
        substitute(&self.source, variables)
    }

    /// Render and parse into a message with `Date` and `Message-ID` filled in.
    pub fn render_message(&self, variables: &HashMap<String, String>) -> MailmergeResult<Message> {
        let text = self.render(variables)?;
        let mut message = Message::parse(&text)?;
        message.ensure_standard_headers();
        Ok(message)
    }
}

fn substitute(template_str: &str, variables: &HashMap<String, String>) -> MailmergeResult<String> {
    let mut result = String::with_capacity(template_str.len());
    let mut rest = template_str;

    while let Some(start) = rest.find("{{") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| {
            MailmergeError::Template("unclosed '{{' placeholder".to_string())
        })?;
        let name = after[..end].trim();
        let value = variables
            .get(name)
            .ok_or_else(|| MailmergeError::Template(format!("'{name}' is undefined")))?;
        result.push_str(value);
        rest = &after[end + 2..];
    }
    result.push_str(rest);
    Ok(result)
}
