//! Structured email message: ordered headers plus a plain-text body.
//!
//! Messages come out of template rendering as text and go to the transport as
//! RFC 5322 bytes with CRLF line endings.

use chrono::Local;
use std::fmt;
use uuid::Uuid;

use crate::error::{MailmergeError, MailmergeResult};

const RECIPIENT_HEADERS: [&str; 3] = ["To", "Cc", "Bcc"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    headers: Vec<(String, String)>,
    body: String,
}

impl Message {
    /// Parse `Name: value` header lines, a blank line, then the body.
    /// Header lines starting with whitespace continue the previous header.
    pub fn parse(text: &str) -> MailmergeResult<Self> {
        let text = text.trim_start_matches(['\r', '\n']);
        let mut headers: Vec<(String, String)> = Vec::new();
        let mut lines = text.lines();
        let mut body_lines = Vec::new();

        for line in lines.by_ref() {
            if line.trim().is_empty() {
                break;
            }
            if line.starts_with([' ', '\t']) {
                match headers.last_mut() {
                    Some((_, value)) => {
                        value.push(' ');
                        value.push_str(line.trim());
                    }
                    None => {
                        return Err(MailmergeError::Message(format!(
                            "continuation line before any header: {line:?}"
                        )))
                    }
                }
                continue;
            }
            let (name, value) = line.split_once(':').ok_or_else(|| {
                MailmergeError::Message(format!("malformed header line: {line:?}"))
            })?;
            let name = name.trim();
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(MailmergeError::Message(format!(
                    "malformed header name: {name:?}"
                )));
            }
            headers.push((name.to_string(), value.trim().to_string()));
        }
        body_lines.extend(lines);

        let mut body = body_lines.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        Ok(Self { headers, body })
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// First header with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Envelope sender taken from the `From` header.
    pub fn sender(&self) -> MailmergeResult<String> {
        self.header("From")
            .and_then(|value| parse_address_list(value).into_iter().next())
            .ok_or_else(|| MailmergeError::Message("missing From header".to_string()))
    }

    /// Envelope recipients from `To`, `Cc` and `Bcc`, in header order.
    pub fn recipients(&self) -> Vec<String> {
        self.headers
            .iter()
            .filter(|(n, _)| RECIPIENT_HEADERS.iter().any(|r| n.eq_ignore_ascii_case(r)))
            .flat_map(|(_, v)| parse_address_list(v))
            .collect()
    }

    /// Add `Date` and `Message-ID` when the template did not provide them.
    pub fn ensure_standard_headers(&mut self) {
        if self.header("Date").is_none() {
            self.headers
                .push(("Date".to_string(), Local::now().to_rfc2822()));
        }
        if self.header("Message-ID").is_none() {
            let domain = self
                .sender()
                .ok()
                .and_then(|s| s.split_once('@').map(|(_, d)| d.to_string()))
                .unwrap_or_else(|| "localhost".to_string());
            self.headers.push((
                "Message-ID".to_string(),
                format!("<{}@{}>", Uuid::new_v4(), domain),
            ));
        }
    }

    /// Wire form: CRLF line endings, `Bcc` stripped.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("Bcc") {
                continue;
            }
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        for line in self.body.lines() {
            out.push_str(line);
            out.push_str("\r\n");
        }
        out.into_bytes()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.headers {
            writeln!(f, "{name}: {value}")?;
        }
        writeln!(f)?;
        write!(f, "{}", self.body)
    }
}

/// Split a header value like `"Doe, Jane" <jane@example.com>, bob@example.com`
/// into bare addresses.
pub fn parse_address_list(value: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_angle = false;

    for ch in value.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            ',' if !in_quotes && !in_angle => {
                parts.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    parts.push(current);

    parts
        .iter()
        .filter_map(|part| {
            let part = part.trim();
            let addr = match (part.rfind('<'), part.rfind('>')) {
                (Some(start), Some(end)) if start < end => &part[start + 1..end],
                _ => part,
            };
            let addr = addr.trim();
            (!addr.is_empty()).then(|| addr.to_string())
        })
        .collect()
}
