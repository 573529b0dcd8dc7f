//! Email normalization agent.
//!
//! Parses a raw MIME message, extracts header metadata, identifies the
//! sender, grades urgency from keyword cues and shapes a CRM-ready
//! record. Sender, urgency and subject are merged into the conversation
//! context for downstream agents.

use std::sync::LazyLock;

use async_trait::async_trait;
use mail_parser::{MessageParser, MimeHeaders};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::agents::{Agent, AuditStatus, Processed};
use crate::format::message_body_text;
use crate::store::{Context, ConversationId, ConversationStore};

// ── Urgency ──────────────────────────────────────────────────────────────────

const HIGH_CUES: &[&str] = &["urgent", "asap", "emergency", "immediate", "critical"];
const MEDIUM_CUES: &[&str] = &["important", "priority", "attention", "please respond"];
const LOW_CUES: &[&str] = &["fyi", "update", "newsletter", "information"];

/// Urgency tier inferred from subject and body cues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    High,
    Medium,
    Low,
    Normal,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::High => "high",
            Urgency::Medium => "medium",
            Urgency::Low => "low",
            Urgency::Normal => "normal",
        }
    }
}

/// Grade urgency from keyword cues in the body and subject.
///
/// Tiers are checked in priority order; a high cue wins regardless of
/// how many lower-tier cues are present.
pub fn determine_urgency(content: &str, subject: &str) -> Urgency {
    let text = format!("{content} {subject}").to_lowercase();
    if HIGH_CUES.iter().any(|cue| text.contains(cue)) {
        Urgency::High
    } else if MEDIUM_CUES.iter().any(|cue| text.contains(cue)) {
        Urgency::Medium
    } else if LOW_CUES.iter().any(|cue| text.contains(cue)) {
        Urgency::Low
    } else {
        Urgency::Normal
    }
}

// ── Sender ───────────────────────────────────────────────────────────────────

static SENDER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*"?([^"<]*)"?\s*<([^>]+)>\s*$"#).unwrap());

/// Sender identity parsed from the From header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderInfo {
    pub name: String,
    /// Parsed address, or the whole header verbatim when the address is
    /// invalid.
    pub email: String,
    /// Domain part of the address; empty when the address is invalid.
    pub domain: String,
    pub valid: bool,
}

/// Split a From header into display name and address.
///
/// Accepts `Name <addr>`, `"Name" <addr>` and bare `addr` forms. Without
/// angle brackets the whole header is taken as the address. When the
/// address fails validation the whole header is kept as the address and
/// the name is dropped.
pub fn parse_sender(raw: &str) -> SenderInfo {
    let (name, email) = match SENDER_PATTERN.captures(raw) {
        Some(captures) => (
            captures.get(1).map_or("", |m| m.as_str()).trim().to_string(),
            captures.get(2).map_or("", |m| m.as_str()).trim().to_string(),
        ),
        None => (String::new(), raw.trim().to_string()),
    };

    if !is_routable_address(&email) {
        return SenderInfo {
            name: String::new(),
            email: raw.trim().to_string(),
            domain: String::new(),
            valid: false,
        };
    }

    let domain = email
        .rsplit_once('@')
        .map(|(_, domain)| domain.to_string())
        .unwrap_or_default();

    SenderInfo {
        name,
        email,
        domain,
        valid: true,
    }
}

// Syntactic check plus a dotted-domain requirement, so `root@localhost`
// does not count as a deliverable address.
fn is_routable_address(candidate: &str) -> bool {
    candidate.parse::<lettre::Address>().is_ok()
        && candidate
            .rsplit_once('@')
            .is_some_and(|(_, domain)| domain.contains('.'))
}

// ── Report types ─────────────────────────────────────────────────────────────

/// Headers lifted from the parsed message. Missing headers stay empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMetadata {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub date: String,
    pub message_id: String,
    pub content_type: String,
}

/// CRM-shaped projection of a normalized email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmRecord {
    pub contact: CrmContact,
    pub communication: CrmCommunication,
    pub metadata: CrmMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmContact {
    pub name: String,
    pub email: String,
    pub domain: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmCommunication {
    #[serde(rename = "type")]
    pub kind: String,
    pub direction: String,
    pub subject: String,
    pub body: String,
    pub date: String,
    pub urgency: Urgency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmMetadata {
    pub message_id: String,
    pub content_type: String,
    pub recipients: Vec<String>,
}

/// Payload of a successful normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailReport {
    pub metadata: EmailMetadata,
    pub sender: SenderInfo,
    pub urgency: Urgency,
    pub crm_format: CrmRecord,
}

/// Result of normalizing one email document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EmailOutcome {
    Success(EmailReport),
    Error { error: String },
}

impl EmailOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            EmailOutcome::Success(_) => "success",
            EmailOutcome::Error { .. } => "error",
        }
    }

    pub fn report(&self) -> Option<&EmailReport> {
        match self {
            EmailOutcome::Success(report) => Some(report),
            EmailOutcome::Error { .. } => None,
        }
    }
}

// ── Extraction helpers ───────────────────────────────────────────────────────

fn extract_metadata(message: &mail_parser::Message<'_>) -> EmailMetadata {
    EmailMetadata {
        from: message.from().map(format_address).unwrap_or_default(),
        to: message.to().map(format_address).unwrap_or_default(),
        subject: message.subject().unwrap_or_default().to_string(),
        date: message.date().map(format_date).unwrap_or_default(),
        message_id: message.message_id().unwrap_or_default().to_string(),
        content_type: message
            .content_type()
            .map(|ct| match ct.subtype() {
                Some(subtype) => format!("{}/{subtype}", ct.ctype()),
                None => ct.ctype().to_string(),
            })
            .unwrap_or_default(),
    }
}

fn format_address(address: &mail_parser::Address<'_>) -> String {
    let mut rendered = Vec::new();
    match address {
        mail_parser::Address::List(list) => {
            for addr in list {
                rendered.push(format_mailbox(addr));
            }
        }
        mail_parser::Address::Group(groups) => {
            for group in groups {
                for addr in &group.addresses {
                    rendered.push(format_mailbox(addr));
                }
            }
        }
    }
    rendered.join(", ")
}

fn format_mailbox(addr: &mail_parser::Addr<'_>) -> String {
    match (addr.name.as_deref(), addr.address.as_deref()) {
        (Some(name), Some(address)) => format!("{name} <{address}>"),
        (None, Some(address)) => address.to_string(),
        (Some(name), None) => name.to_string(),
        (None, None) => String::new(),
    }
}

// The header's UTC offset is carried into the rendered timestamp.
fn format_date(date: &mail_parser::DateTime) -> String {
    let offset_seconds = (i32::from(date.tz_hour) * 3600 + i32::from(date.tz_minute) * 60)
        * if date.tz_before_gmt { -1 } else { 1 };
    let Some(offset) = chrono::FixedOffset::east_opt(offset_seconds) else {
        return String::new();
    };

    chrono::NaiveDate::from_ymd_opt(i32::from(date.year), u32::from(date.month), u32::from(date.day))
        .and_then(|day| {
            day.and_hms_opt(
                u32::from(date.hour),
                u32::from(date.minute),
                u32::from(date.second),
            )
        })
        .and_then(|naive| naive.and_local_timezone(offset).single())
        .map(|stamp| stamp.to_rfc3339())
        .unwrap_or_default()
}

fn build_crm_record(
    metadata: &EmailMetadata,
    sender: &SenderInfo,
    content: &str,
    urgency: Urgency,
) -> CrmRecord {
    CrmRecord {
        contact: CrmContact {
            name: sender.name.clone(),
            email: sender.email.clone(),
            domain: sender.domain.clone(),
        },
        communication: CrmCommunication {
            kind: "email".into(),
            direction: "inbound".into(),
            subject: metadata.subject.clone(),
            body: content.to_string(),
            date: metadata.date.clone(),
            urgency,
        },
        metadata: CrmMetadata {
            message_id: metadata.message_id.clone(),
            content_type: metadata.content_type.clone(),
            recipients: metadata
                .to
                .split(',')
                .map(|recipient| recipient.trim().to_string())
                .filter(|recipient| !recipient.is_empty())
                .collect(),
        },
    }
}

// ── Agent ────────────────────────────────────────────────────────────────────

/// Agent normalizing email documents.
pub struct EmailAgent {
    store: ConversationStore,
}

impl EmailAgent {
    pub fn new(store: ConversationStore) -> Self {
        Self { store }
    }

    fn parse(&self, raw: &[u8]) -> Result<EmailReport, String> {
        if raw.is_empty() {
            return Err("empty document".to_string());
        }
        let Some(message) = MessageParser::default().parse(raw) else {
            return Err("unable to parse MIME message".to_string());
        };

        let metadata = extract_metadata(&message);
        let content = message_body_text(&message);
        let sender = parse_sender(&metadata.from);
        let urgency = determine_urgency(&content, &metadata.subject);
        let crm_format = build_crm_record(&metadata, &sender, &content, urgency);

        Ok(EmailReport {
            metadata,
            sender,
            urgency,
            crm_format,
        })
    }
}

#[async_trait]
impl Agent for EmailAgent {
    type Output = EmailOutcome;

    fn name(&self) -> &'static str {
        "email_agent"
    }

    fn store(&self) -> &ConversationStore {
        &self.store
    }

    async fn process(&self, raw: &[u8], conversation: &ConversationId) -> Processed<EmailOutcome> {
        let mut audit = AuditStatus::Recorded;

        let report = match self.parse(raw) {
            Ok(report) => report,
            Err(reason) => {
                let message = format!("Error processing email: {reason}");
                // A store failure here must not replace the parse error.
                if let Err(e) = self
                    .log_action(
                        conversation,
                        "process_email_error",
                        json!({"status": "error", "error": message}),
                    )
                    .await
                {
                    warn!(conversation = %conversation, error = %e, "Failed to record email parse failure");
                    audit.degrade(&e);
                }
                return Processed {
                    outcome: EmailOutcome::Error { error: message },
                    audit,
                };
            }
        };

        let details = json!({
            "sender": report.sender.email,
            "urgency": report.urgency,
            "subject": report.metadata.subject,
        });
        if let Err(e) = self.log_action(conversation, "process_email", details).await {
            warn!(conversation = %conversation, error = %e, "Failed to record email processing");
            audit.degrade(&e);
        }

        let mut updates = Context::new();
        updates.insert("email_sender".into(), json!(report.sender.email));
        updates.insert("email_urgency".into(), json!(report.urgency));
        updates.insert("email_subject".into(), json!(report.metadata.subject));
        if let Err(e) = self.update_context(conversation, updates).await {
            warn!(conversation = %conversation, error = %e, "Failed to update conversation context");
            audit.degrade(&e);
        }

        Processed {
            outcome: EmailOutcome::Success(report),
            audit,
        }
    }
}
