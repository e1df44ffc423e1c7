//! src/session/validate.rs
//!
//! Structural and semantic validation of an inbound envelope, hand-coded
//! per the design note ruling out a generic JSON-schema library. Rejecting,
//! never coercing: every failure is collected as a (field path, reason)
//! pair so the caller can log the full list at debug before converting it
//! into a single `INVALID_MESSAGE` error.

use crate::session::envelope::Envelope;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ValidationFailures(pub Vec<FieldError>);

impl ValidationFailures {
    fn push(&mut self, path: &str, reason: impl Into<String>) {
        self.0.push(FieldError {
            path: path.to_string(),
            reason: reason.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Validates an envelope already deserialized from JSON (so structural
/// field-presence is enforced by serde; this layer re-checks the semantic
/// constraints serde's `Deserialize` cannot express: UUID shape, version
/// format, priority range, non-negative timestamp).
pub fn validate(envelope: &Envelope) -> ValidationFailures {
    let mut failures = ValidationFailures::default();

    if !is_uuid_like(&envelope.message_id) {
        failures.push("messageId", "must be a UUID");
    }
    if !is_version_like(&envelope.version) {
        failures.push("version", "must match <major>.<minor>");
    }
    if envelope.source.client_id.trim().is_empty() {
        failures.push("source.clientId", "must not be empty");
    }
    if envelope.source.session_id.trim().is_empty() {
        failures.push("source.sessionId", "must not be empty");
    }
    if envelope.timestamp < 0 {
        failures.push("timestamp", "must be non-negative");
    }
    if envelope.priority > 10 {
        failures.push("priority", "must be in range 0..=10");
    }
    if !envelope.payload.is_object() && !envelope.payload.is_null() {
        failures.push("payload", "must be an object");
    }
    if let Some(cid) = &envelope.correlation_id {
        if !is_uuid_like(cid) {
            failures.push("correlationId", "must be a UUID");
        }
    }
    if let Some(irt) = &envelope.in_reply_to {
        if !is_uuid_like(irt) {
            failures.push("inReplyTo", "must be a UUID");
        }
    }

    failures
}

fn is_uuid_like(s: &str) -> bool {
    uuid::Uuid::parse_str(s).is_ok()
}

fn is_version_like(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    parts.len() == 2 && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}
