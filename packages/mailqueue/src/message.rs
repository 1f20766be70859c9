//! Assembly of single-part notification messages.
//!
//! Output layout: `From`, `To`, `Subject`, extra headers in the order given,
//! exactly one `Content-Type`, a blank line, then the body verbatim. Lines are
//! CRLF-terminated. Header values are validated rather than escaped: anything
//! carrying a line break or other control character is rejected.

use std::fmt::Write as _;

use chrono::Utc;
use mailparse::MailHeaderMap;
use thiserror::Error;

const HTML_CONTENT_TYPE: &str = "text/html; charset=UTF-8";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=UTF-8";

/// Substrings that mark a body as HTML. A heuristic, not a parser.
const HTML_MARKERS: &[&str] = &[
    "<p>",
    "<br",
    "<div>",
    "<span>",
    "<strong>",
    "<em>",
    "<b>",
    "<i>",
    "<h1>",
    "<h2>",
    "<h3>",
    "<ul>",
    "<ol>",
    "<li>",
    "<table>",
    "<a ",
    "<blockquote>",
    "<img ",
];

/// Headers the assembler writes itself and refuses as extras.
const RESERVED_HEADERS: &[&str] = &["From", "To", "Subject", "Content-Type"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("recipient must not be empty")]
    EmptyRecipient,

    #[error("message-id domain must not be empty")]
    EmptyDomain,

    #[error("header {header} contains a line break or control character")]
    HeaderInjection { header: String },

    #[error("invalid header name {0:?}")]
    InvalidHeaderName(String),

    #[error("header {0} is set by the assembler and cannot be overridden")]
    ReservedHeader(String),
}

/// How the body's content type is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BodyFormat {
    /// Guess from markup markers in the body.
    #[default]
    Auto,
    Html,
    PlainText,
}

impl BodyFormat {
    fn content_type(self, body: &str) -> &'static str {
        match self {
            BodyFormat::Html => HTML_CONTENT_TYPE,
            BodyFormat::PlainText => TEXT_CONTENT_TYPE,
            BodyFormat::Auto if contains_html(body) => HTML_CONTENT_TYPE,
            BodyFormat::Auto => TEXT_CONTENT_TYPE,
        }
    }
}

/// A message carrying threading headers, plus the `Message-ID` generated for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadedMessage {
    pub bytes: Vec<u8>,
    /// Generated id including angle brackets, e.g. `<1700000000.0a1b2c3d4e5f6789@example.com>`.
    pub message_id: String,
}

/// Whether `content` contains any of the known HTML markers.
pub fn contains_html(content: &str) -> bool {
    HTML_MARKERS.iter().any(|marker| content.contains(marker))
}

/// Build a message, detecting the content type from the body.
pub fn build_message(
    from: &str,
    to: &str,
    subject: &str,
    body: &str,
) -> Result<Vec<u8>, MessageError> {
    build_message_with_headers(from, to, subject, body, &[], BodyFormat::Auto)
}

/// Build a message declared as HTML regardless of its contents.
pub fn build_html_message(
    from: &str,
    to: &str,
    subject: &str,
    html_body: &str,
) -> Result<Vec<u8>, MessageError> {
    build_message_with_headers(from, to, subject, html_body, &[], BodyFormat::Html)
}

/// Build a message declared as plain text regardless of its contents.
pub fn build_text_message(
    from: &str,
    to: &str,
    subject: &str,
    text_body: &str,
) -> Result<Vec<u8>, MessageError> {
    build_message_with_headers(from, to, subject, text_body, &[], BodyFormat::PlainText)
}

/// Serialize headers and body into message bytes.
///
/// `headers` are written after `Subject` in the order given.
pub fn build_message_with_headers(
    from: &str,
    to: &str,
    subject: &str,
    body: &str,
    headers: &[(&str, &str)],
    format: BodyFormat,
) -> Result<Vec<u8>, MessageError> {
    if to.trim().is_empty() {
        return Err(MessageError::EmptyRecipient);
    }

    check_value("From", from)?;
    check_value("To", to)?;
    check_value("Subject", subject)?;
    for (name, value) in headers {
        check_name(name)?;
        check_value(name, value)?;
    }

    let mut head = String::with_capacity(256);
    write_header(&mut head, "From", from);
    write_header(&mut head, "To", to);
    write_header(&mut head, "Subject", subject);
    for (name, value) in headers {
        write_header(&mut head, name, value);
    }
    write_header(&mut head, "Content-Type", format.content_type(body));
    head.push_str("\r\n");

    let mut message = head.into_bytes();
    message.extend_from_slice(body.as_bytes());
    Ok(message)
}

/// Threading context for a notification that belongs to a conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Threading {
    /// Right-hand side of the generated `Message-ID`.
    pub domain: String,
    /// Message-ID being replied to, with brackets. Empty to omit.
    pub in_reply_to: String,
    /// Space-separated ancestor Message-IDs. Empty to omit.
    pub references: String,
}

impl Threading {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Default::default()
        }
    }

    pub fn in_reply_to(mut self, message_id: impl Into<String>) -> Self {
        self.in_reply_to = message_id.into();
        self
    }

    pub fn references(mut self, references: impl Into<String>) -> Self {
        self.references = references.into();
        self
    }
}

/// Build a message with a fresh `Message-ID` and, when non-empty,
/// `In-Reply-To` and `References`, so mail clients thread it under the
/// originating conversation.
pub fn build_message_with_threading(
    from: &str,
    to: &str,
    subject: &str,
    body: &str,
    domain: &str,
    in_reply_to: &str,
    references: &str,
) -> Result<ThreadedMessage, MessageError> {
    let threading = Threading {
        domain: domain.to_string(),
        in_reply_to: in_reply_to.to_string(),
        references: references.to_string(),
    };
    build_threaded_message(from, to, subject, body, &threading, BodyFormat::Auto)
}

/// [`build_message_with_threading`] with an explicit body format.
pub fn build_threaded_message(
    from: &str,
    to: &str,
    subject: &str,
    body: &str,
    threading: &Threading,
    format: BodyFormat,
) -> Result<ThreadedMessage, MessageError> {
    if threading.domain.trim().is_empty() {
        return Err(MessageError::EmptyDomain);
    }
    check_value("Message-ID", &threading.domain)?;

    let message_id = generate_message_id(&threading.domain);

    let mut headers = vec![("Message-ID", message_id.as_str())];
    if !threading.in_reply_to.is_empty() {
        headers.push(("In-Reply-To", threading.in_reply_to.as_str()));
    }
    if !threading.references.is_empty() {
        headers.push(("References", threading.references.as_str()));
    }

    let bytes = build_message_with_headers(from, to, subject, body, &headers, format)?;
    Ok(ThreadedMessage { bytes, message_id })
}

/// Generate `<unixSeconds.randomHex@domain>` using 8 bytes from the
/// thread-local CSPRNG.
pub fn generate_message_id(domain: &str) -> String {
    let random: [u8; 8] = rand::random();
    format!(
        "<{}.{}@{}>",
        Utc::now().timestamp(),
        hex::encode(random),
        domain
    )
}

/// Return the `Message-ID` of a raw message without angle brackets, or an
/// empty string when absent.
///
/// Only the header block is inspected; the body is never scanned.
pub fn extract_message_id(raw_message: &[u8]) -> String {
    let Ok((headers, _)) = mailparse::parse_headers(raw_message) else {
        return String::new();
    };

    headers
        .get_first_value("Message-ID")
        .map(|value| {
            value
                .trim()
                .trim_matches(|c| c == '<' || c == '>')
                .to_string()
        })
        .unwrap_or_default()
}

fn write_header(out: &mut String, name: &str, value: &str) {
    // Writing into a String cannot fail.
    let _ = write!(out, "{name}: {value}\r\n");
}

fn check_value(header: &str, value: &str) -> Result<(), MessageError> {
    if value.chars().any(|c| c.is_control() && c != '\t') {
        return Err(MessageError::HeaderInjection {
            header: header.to_string(),
        });
    }
    Ok(())
}

fn check_name(name: &str) -> Result<(), MessageError> {
    let printable = !name.is_empty() && name.bytes().all(|b| (33..=126).contains(&b) && b != b':');
    if !printable {
        return Err(MessageError::InvalidHeaderName(name.to_string()));
    }
    if RESERVED_HEADERS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
    {
        return Err(MessageError::ReservedHeader(name.to_string()));
    }
    Ok(())
}
