//! RFC 5322 message assembly.
//!
//! Bodies are always sent base64 encoded with an explicit UTF-8 charset so
//! that templated HTML never has to worry about line length or 8-bit
//! transport.

use std::fmt::Write;

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use rand::Rng;

use crate::client::{ClientError, Result};

/// Encoded-word payload size. 45 bytes encode to 60 base64 characters, which
/// keeps each `=?utf-8?B?...?=` under the 75 character limit.
const ENCODED_WORD_CHUNK: usize = 45;

const BODY_LINE_LENGTH: usize = 76;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyKind {
    #[default]
    Html,
    Plain,
}

impl BodyKind {
    const fn content_type(self) -> &'static str {
        match self {
            Self::Html => "text/html; charset=utf-8",
            Self::Plain => "text/plain; charset=utf-8",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    from_name: Option<String>,
    to: Option<String>,
    subject: String,
    body: String,
    kind: BodyKind,
    date: Option<DateTime<Utc>>,
    message_id: Option<String>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from(mut self, address: impl Into<String>) -> Self {
        self.from = Some(address.into());
        self
    }

    /// Display name shown next to the sender address.
    #[must_use]
    pub fn from_name(mut self, name: impl Into<String>) -> Self {
        self.from_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to = Some(address.into());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<String>, kind: BodyKind) -> Self {
        self.body = body.into();
        self.kind = kind;
        self
    }

    /// Override the `Date` header, which otherwise uses the current time.
    #[must_use]
    pub const fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Override the generated `Message-ID` (without angle brackets).
    #[must_use]
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Render the headers and the encoded body.
    ///
    /// # Errors
    /// Returns [`ClientError::BuilderError`] if the sender or recipient is
    /// missing, or if an address or display name contains a line break.
    pub fn build(self) -> Result<String> {
        let from = self
            .from
            .ok_or_else(|| ClientError::BuilderError("Sender address is required".to_string()))?;
        let to = self
            .to
            .ok_or_else(|| ClientError::BuilderError("Recipient address is required".to_string()))?;

        for (field, value) in [("From", Some(&from)), ("To", Some(&to))]
            .into_iter()
            .chain(std::iter::once(("From name", self.from_name.as_ref())))
        {
            if value.is_some_and(|v| v.contains(['\r', '\n'])) {
                return Err(ClientError::BuilderError(format!(
                    "{field} must not contain line breaks"
                )));
            }
        }

        let date = self.date.unwrap_or_else(Utc::now);
        let message_id = self
            .message_id
            .unwrap_or_else(|| generate_message_id(&from, date));

        let mut message = String::with_capacity(self.body.len() * 4 / 3 + 512);

        // Writing into a String cannot fail.
        let _ = match &self.from_name {
            Some(name) => write!(message, "From: {} <{from}>\r\n", display_name(name)),
            None => write!(message, "From: <{from}>\r\n"),
        };
        let _ = write!(message, "To: <{to}>\r\n");
        let _ = write!(message, "Subject: {}\r\n", encode_header(&self.subject));
        let _ = write!(message, "Date: {}\r\n", date.to_rfc2822());
        let _ = write!(message, "Message-ID: <{message_id}>\r\n");
        message.push_str("MIME-Version: 1.0\r\n");
        let _ = write!(message, "Content-Type: {}\r\n", self.kind.content_type());
        message.push_str("Content-Transfer-Encoding: base64\r\n");
        message.push_str("\r\n");
        message.push_str(&encode_body(&self.body));

        Ok(message)
    }
}

fn generate_message_id(from: &str, date: DateTime<Utc>) -> String {
    let domain = from
        .rsplit_once('@')
        .map_or("localhost", |(_, domain)| domain);
    let nonce: u64 = rand::rng().random();
    format!("{}.{nonce:016x}@{domain}", date.timestamp_millis())
}

fn needs_encoding(value: &str) -> bool {
    !value.is_ascii() || value.contains(['\r', '\n'])
}

/// RFC 2047 `B` encoding, split into folded encoded-words on character boundaries.
fn encode_header(value: &str) -> String {
    if !needs_encoding(value) {
        return value.to_string();
    }

    let mut words = Vec::new();
    let mut start = 0;
    let mut end = 0;
    for (index, ch) in value.char_indices() {
        let next = index + ch.len_utf8();
        if next - start > ENCODED_WORD_CHUNK {
            words.push(&value[start..end]);
            start = end;
        }
        end = next;
    }
    if start < value.len() {
        words.push(&value[start..]);
    }

    words
        .into_iter()
        .map(|chunk| format!("=?utf-8?B?{}?=", STANDARD.encode(chunk)))
        .collect::<Vec<_>>()
        .join("\r\n ")
}

fn display_name(name: &str) -> String {
    if needs_encoding(name) {
        return encode_header(name);
    }

    let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

fn encode_body(body: &str) -> String {
    let encoded = STANDARD.encode(body);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / BODY_LINE_LENGTH * 2 + 2);

    // Base64 output is ASCII, so byte chunks are valid UTF-8.
    for line in encoded.as_bytes().chunks(BODY_LINE_LENGTH) {
        out.push_str(std::str::from_utf8(line).unwrap_or_default());
        out.push_str("\r\n");
    }

    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    fn header<'a>(message: &'a str, name: &str) -> Option<&'a str> {
        let prefix = format!("{name}: ");
        message
            .split("\r\n")
            .find_map(|line| line.strip_prefix(prefix.as_str()))
    }

    fn decoded_body(message: &str) -> String {
        let (_, body) = message.split_once("\r\n\r\n").unwrap();
        let joined: String = body.split("\r\n").collect();
        String::from_utf8(STANDARD.decode(joined).unwrap()).unwrap()
    }

    #[test]
    fn builds_html_message() {
        let date = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        let message = MessageBuilder::new()
            .from("noreply@maple.example")
            .from_name("Maple Server")
            .to("user@example.com")
            .subject("Welcome to Maple Server")
            .body("<p>Hello</p>", BodyKind::Html)
            .date(date)
            .message_id("fixed@maple.example")
            .build()
            .unwrap();

        assert_eq!(
            header(&message, "From"),
            Some("\"Maple Server\" <noreply@maple.example>")
        );
        assert_eq!(header(&message, "To"), Some("<user@example.com>"));
        assert_eq!(header(&message, "Subject"), Some("Welcome to Maple Server"));
        assert_eq!(
            header(&message, "Date"),
            Some("Fri, 15 Mar 2024 12:00:00 +0000")
        );
        assert_eq!(header(&message, "Message-ID"), Some("<fixed@maple.example>"));
        assert_eq!(
            header(&message, "Content-Type"),
            Some("text/html; charset=utf-8")
        );
        assert_eq!(decoded_body(&message), "<p>Hello</p>");
    }

    #[test]
    fn long_bodies_are_wrapped() {
        let body = "x".repeat(1000);
        let message = MessageBuilder::new()
            .from("a@b.c")
            .to("d@e.f")
            .body(body.clone(), BodyKind::Plain)
            .build()
            .unwrap();

        let (_, encoded) = message.split_once("\r\n\r\n").unwrap();
        assert!(encoded.split("\r\n").all(|line| line.len() <= BODY_LINE_LENGTH));
        assert_eq!(decoded_body(&message), body);
    }

    #[test]
    fn non_ascii_subject_is_encoded() {
        let subject = "Ваш сервер готов к работе, спасибо за покупку!";
        let encoded = encode_header(subject);

        let decoded: String = encoded
            .split("\r\n ")
            .map(|word| {
                let payload = word
                    .strip_prefix("=?utf-8?B?")
                    .and_then(|w| w.strip_suffix("?="))
                    .unwrap();
                assert!(word.len() <= 75);
                String::from_utf8(STANDARD.decode(payload).unwrap()).unwrap()
            })
            .collect();
        assert_eq!(decoded, subject);
    }

    #[test]
    fn header_injection_is_rejected() {
        let result = MessageBuilder::new()
            .from("a@b.c")
            .to("victim@example.com\r\nBcc: everyone@example.com")
            .build();
        assert!(matches!(result, Err(ClientError::BuilderError(_))));

        // Subjects are encoded rather than rejected.
        let message = MessageBuilder::new()
            .from("a@b.c")
            .to("d@e.f")
            .subject("hi\r\nBcc: x@y.z")
            .build()
            .unwrap();
        assert!(!message.contains("\r\nBcc:"));
    }

    #[test]
    fn generated_message_id_uses_sender_domain() {
        let message = MessageBuilder::new()
            .from("noreply@maple.example")
            .to("d@e.f")
            .build()
            .unwrap();
        assert!(
            header(&message, "Message-ID")
                .unwrap()
                .ends_with("@maple.example>")
        );
    }

    #[test]
    fn missing_recipient() {
        assert!(MessageBuilder::new().from("a@b.c").build().is_err());
    }
}
