//! JSON normalization agent.
//!
//! Infers a structural schema from an arbitrary JSON value, validates
//! the value against a schema, and flags structural anomalies (empty
//! containers, nulls, inconsistent array element types). Inference is a
//! pure function of the value, so validating against the freshly
//! inferred schema always passes; the validator earns its keep when a
//! caller supplies a schema from an earlier document.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use crate::agents::{Agent, AuditStatus, Processed};
use crate::store::{Context, ConversationId, ConversationStore};

// ── Schema ───────────────────────────────────────────────────────────────────

/// Structural type tag of a JSON value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    Boolean,
    Integer,
    Number,
    String,
    Array,
    Object,
    Null,
    /// Never produced by inference; foreign schemas may carry it and
    /// validation skips such nodes.
    Unknown,
}

impl SchemaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::Boolean => "boolean",
            SchemaType::Integer => "integer",
            SchemaType::Number => "number",
            SchemaType::String => "string",
            SchemaType::Array => "array",
            SchemaType::Object => "object",
            SchemaType::Null => "null",
            SchemaType::Unknown => "unknown",
        }
    }
}

/// Runtime type tag of a JSON value. Whole numbers are integers,
/// anything with a fractional representation is a number.
pub fn runtime_kind(value: &Value) -> SchemaType {
    match value {
        Value::Null => SchemaType::Null,
        Value::Bool(_) => SchemaType::Boolean,
        Value::Number(n) if n.is_f64() => SchemaType::Number,
        Value::Number(_) => SchemaType::Integer,
        Value::String(_) => SchemaType::String,
        Value::Array(_) => SchemaType::Array,
        Value::Object(_) => SchemaType::Object,
    }
}

/// Recursive structural descriptor of a JSON value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(rename = "type")]
    pub kind: SchemaType,
    /// Present for objects, including empty ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, Schema>>,
    /// Present for non-empty arrays, derived from the first element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,
}

/// Infer the schema of a value. Arrays take their element schema from
/// the first element only; divergent elements are anomaly territory.
pub fn infer_schema(value: &Value) -> Schema {
    match value {
        Value::Object(map) => Schema {
            kind: SchemaType::Object,
            properties: Some(
                map.iter()
                    .map(|(key, child)| (key.clone(), infer_schema(child)))
                    .collect(),
            ),
            items: None,
        },
        Value::Array(items) => Schema {
            kind: SchemaType::Array,
            properties: None,
            items: items.first().map(|first| Box::new(infer_schema(first))),
        },
        other => Schema {
            kind: runtime_kind(other),
            properties: None,
            items: None,
        },
    }
}

// ── Validation ───────────────────────────────────────────────────────────────

/// One schema violation at a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub path: String,
    pub expected: SchemaType,
    /// Runtime type name, or `missing` for an absent property.
    pub found: String,
}

/// Validate a value against a schema.
///
/// Declared object properties must be present and type-compatible.
/// Arrays are checked for arrayness only; element types are anomaly
/// territory, not validation failures.
pub fn validate(value: &Value, schema: &Schema) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    check(value, schema, "", &mut issues);
    issues
}

fn check(value: &Value, schema: &Schema, path: &str, issues: &mut Vec<ValidationIssue>) {
    match schema.kind {
        SchemaType::Object => {
            let Some(object) = value.as_object() else {
                issues.push(ValidationIssue {
                    path: path.to_string(),
                    expected: SchemaType::Object,
                    found: runtime_kind(value).as_str().to_string(),
                });
                return;
            };
            if let Some(properties) = &schema.properties {
                for (key, sub) in properties {
                    let child = join_path(path, key);
                    match object.get(key) {
                        None => issues.push(ValidationIssue {
                            path: child,
                            expected: sub.kind,
                            found: "missing".to_string(),
                        }),
                        Some(present) => check(present, sub, &child, issues),
                    }
                }
            }
        }
        SchemaType::Array => {
            if !value.is_array() {
                issues.push(ValidationIssue {
                    path: path.to_string(),
                    expected: SchemaType::Array,
                    found: runtime_kind(value).as_str().to_string(),
                });
            }
        }
        SchemaType::Unknown => {}
        expected => {
            let found = runtime_kind(value);
            if found != expected {
                issues.push(ValidationIssue {
                    path: path.to_string(),
                    expected,
                    found: found.as_str().to_string(),
                });
            }
        }
    }
}

fn join_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

// ── Anomalies ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    EmptyObject,
    EmptyArray,
    NullValue,
    InconsistentArrayType,
}

/// A structural irregularity flagged without blocking processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomaly {
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    /// Dotted path from the root, `[i]` for array indices, `""` at root.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub found: Option<String>,
}

impl Anomaly {
    fn at(kind: AnomalyKind, path: &str) -> Self {
        Anomaly {
            kind,
            path: path.to_string(),
            expected: None,
            found: None,
        }
    }
}

/// Walk the value and collect anomalies, independent of any schema.
pub fn detect_anomalies(value: &Value) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();
    walk(value, "", &mut anomalies);
    anomalies
}

fn walk(value: &Value, path: &str, anomalies: &mut Vec<Anomaly>) {
    match value {
        Value::Null => anomalies.push(Anomaly::at(AnomalyKind::NullValue, path)),
        Value::Object(map) => {
            if map.is_empty() {
                anomalies.push(Anomaly::at(AnomalyKind::EmptyObject, path));
            } else {
                for (key, child) in map {
                    walk(child, &join_path(path, key), anomalies);
                }
            }
        }
        Value::Array(items) => {
            if items.is_empty() {
                anomalies.push(Anomaly::at(AnomalyKind::EmptyArray, path));
            } else {
                let expected = runtime_kind(&items[0]);
                for (index, element) in items.iter().enumerate() {
                    let child = format!("{path}[{index}]");
                    let found = runtime_kind(element);
                    if found != expected {
                        anomalies.push(Anomaly {
                            kind: AnomalyKind::InconsistentArrayType,
                            path: child.clone(),
                            expected: Some(expected.as_str().to_string()),
                            found: Some(found.as_str().to_string()),
                        });
                    }
                    walk(element, &child, anomalies);
                }
            }
        }
        _ => {}
    }
}

// ── Report types ─────────────────────────────────────────────────────────────

/// Payload of a parsed JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonReport {
    /// The original value, or `{"validation_errors": [...]}` when the
    /// schema check failed.
    pub validated_data: Value,
    pub schema: Schema,
    pub anomalies: Vec<Anomaly>,
}

/// Result of normalizing one JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JsonOutcome {
    Success(JsonReport),
    /// Parsed fine but carries at least one anomaly.
    Warning(JsonReport),
    Error { error: String },
}

impl JsonOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            JsonOutcome::Success(_) => "success",
            JsonOutcome::Warning(_) => "warning",
            JsonOutcome::Error { .. } => "error",
        }
    }

    pub fn report(&self) -> Option<&JsonReport> {
        match self {
            JsonOutcome::Success(report) | JsonOutcome::Warning(report) => Some(report),
            JsonOutcome::Error { .. } => None,
        }
    }
}

// ── Agent ────────────────────────────────────────────────────────────────────

/// Agent normalizing JSON documents.
pub struct JsonAgent {
    store: ConversationStore,
}

impl JsonAgent {
    pub fn new(store: ConversationStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Agent for JsonAgent {
    type Output = JsonOutcome;

    fn name(&self) -> &'static str {
        "json_agent"
    }

    fn store(&self) -> &ConversationStore {
        &self.store
    }

    async fn process(&self, raw: &[u8], conversation: &ConversationId) -> Processed<JsonOutcome> {
        let mut audit = AuditStatus::Recorded;

        let value: Value = match serde_json::from_slice(raw) {
            Ok(value) => value,
            Err(parse_error) => {
                let message = format!("Invalid JSON format: {parse_error}");
                if let Err(e) = self
                    .log_action(
                        conversation,
                        "process_json_error",
                        json!({"status": "error", "error": message}),
                    )
                    .await
                {
                    warn!(conversation = %conversation, error = %e, "Failed to record JSON parse failure");
                    audit.degrade(&e);
                }
                return Processed {
                    outcome: JsonOutcome::Error { error: message },
                    audit,
                };
            }
        };

        let schema = infer_schema(&value);
        let issues = validate(&value, &schema);
        let anomalies = detect_anomalies(&value);
        let status = if anomalies.is_empty() {
            "success"
        } else {
            "warning"
        };

        let details = json!({
            "schema": schema,
            "anomalies_found": anomalies.len(),
            "status": status,
        });
        if let Err(e) = self.log_action(conversation, "process_json", details).await {
            warn!(conversation = %conversation, error = %e, "Failed to record JSON processing");
            audit.degrade(&e);
        }

        let mut updates = Context::new();
        updates.insert("json_schema".into(), json!(schema));
        updates.insert("anomalies".into(), json!(anomalies));
        updates.insert("processing_status".into(), json!(status));
        if let Err(e) = self.update_context(conversation, updates).await {
            warn!(conversation = %conversation, error = %e, "Failed to update conversation context");
            audit.degrade(&e);
        }

        let validated_data = if issues.is_empty() {
            value
        } else {
            json!({"validation_errors": issues})
        };
        let report = JsonReport {
            validated_data,
            schema,
            anomalies,
        };
        let outcome = if status == "success" {
            JsonOutcome::Success(report)
        } else {
            JsonOutcome::Warning(report)
        };

        Processed { outcome, audit }
    }
}
