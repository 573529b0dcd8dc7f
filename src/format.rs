//! Document format detection and content extraction.
//!
//! Ingested documents arrive as raw bytes. Detection is ordered: the PDF
//! magic prefix wins over JSON parsing, which wins over MIME parsing. A
//! message only counts as email when at least one header carries a parsed
//! value, so bare prose falls through to [`DocumentFormat::Unknown`].

use mail_parser::{HeaderValue, MessageParser};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Detected wire format of an ingested document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Json,
    Email,
    Unknown,
}

impl DocumentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Json => "json",
            DocumentFormat::Email => "email",
            DocumentFormat::Unknown => "unknown",
        }
    }
}

/// Classifies raw bytes by format, in priority order.
pub fn detect(raw: &[u8]) -> DocumentFormat {
    if raw.starts_with(b"%PDF") {
        return DocumentFormat::Pdf;
    }
    if serde_json::from_slice::<Value>(raw).is_ok() {
        return DocumentFormat::Json;
    }
    // Lenient parsing records colon-less lines as headers with an empty
    // value, so presence of headers alone does not make an email.
    if MessageParser::default().parse(raw).is_some_and(|message| {
        message
            .headers()
            .iter()
            .any(|header| !matches!(header.value, HeaderValue::Empty))
    }) {
        return DocumentFormat::Email;
    }
    DocumentFormat::Unknown
}

/// Extracts the text used for intent scoring.
///
/// PDF payloads yield an empty sample since no text extraction is
/// attempted. JSON yields its compact serialization; unknown formats fall
/// back to a lossy UTF-8 decode.
pub fn extract_content(raw: &[u8], format: DocumentFormat) -> String {
    match format {
        DocumentFormat::Pdf => String::new(),
        DocumentFormat::Json => serde_json::from_slice::<Value>(raw)
            .map(|value| value.to_string())
            .unwrap_or_default(),
        DocumentFormat::Email => MessageParser::default()
            .parse(raw)
            .map(|message| message_body_text(&message))
            .unwrap_or_default(),
        DocumentFormat::Unknown => String::from_utf8_lossy(raw).into_owned(),
    }
}

/// Concatenates the decoded text of every text body part, in document order.
///
/// Single-part messages yield their sole payload. HTML-only messages yield
/// the converted text alternative mail-parser derives for them.
pub fn message_body_text(message: &mail_parser::Message<'_>) -> String {
    let mut parts = Vec::new();
    let mut index = 0;
    while let Some(text) = message.body_text(index) {
        parts.push(text.into_owned());
        index += 1;
    }
    parts.join("\n")
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> mail_parser::Message<'_> {
        MessageParser::default().parse(raw.as_bytes()).unwrap()
    }

    #[test]
    fn pdf_magic_wins_over_everything() {
        assert_eq!(detect(b"%PDF-1.7 content"), DocumentFormat::Pdf);
        // Even a JSON-shaped tail does not override the magic prefix.
        assert_eq!(detect(b"%PDF{\"a\":1}"), DocumentFormat::Pdf);
    }

    #[test]
    fn json_values_of_every_kind_detected() {
        assert_eq!(detect(br#"{"a": 1}"#), DocumentFormat::Json);
        assert_eq!(detect(b"[1, 2, 3]"), DocumentFormat::Json);
        assert_eq!(detect(br#""quoted string""#), DocumentFormat::Json);
        assert_eq!(detect(b"42"), DocumentFormat::Json);
    }

    #[test]
    fn email_requires_a_header_block() {
        let message = b"From: a@example.com\r\nSubject: hi\r\n\r\nhello";
        assert_eq!(detect(message), DocumentFormat::Email);
        assert_eq!(detect(b"just some prose without structure"), DocumentFormat::Unknown);
        assert_eq!(
            detect(b"first line of prose\r\nsecond line of prose"),
            DocumentFormat::Unknown
        );
    }

    #[test]
    fn empty_input_is_unknown() {
        assert_eq!(detect(b""), DocumentFormat::Unknown);
    }

    #[test]
    fn extraction_per_format() {
        assert_eq!(extract_content(b"%PDF-1.7", DocumentFormat::Pdf), "");
        assert_eq!(
            extract_content(br#"{ "a" : 1 }"#, DocumentFormat::Json),
            r#"{"a":1}"#
        );
        let email = b"Subject: hi\r\n\r\nbody line";
        assert_eq!(extract_content(email, DocumentFormat::Email), "body line");
        assert_eq!(
            extract_content(b"plain text", DocumentFormat::Unknown),
            "plain text"
        );
    }

    #[test]
    fn multipart_text_parts_joined_with_newlines() {
        let raw = concat!(
            "From: a@example.com\r\n",
            "Content-Type: multipart/mixed; boundary=\"b\"\r\n",
            "\r\n",
            "--b\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "first part\r\n",
            "--b\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "second part\r\n",
            "--b--\r\n",
        );
        let message = parse(raw);
        assert_eq!(message_body_text(&message), "first part\nsecond part");
    }
}
