//! src/session/envelope.rs
//!
//! The on-the-wire JSON envelope exchanged between a client and the
//! coordination server. Generalized from the teacher's tagged
//! `WebSocketMessage` enum (`#[serde(tag = "type", content = "payload")]`)
//! from a visualizer-only snapshot/update pair into the full envelope type
//! set, with camelCase field names as required by the wire format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeType {
    Register,
    RegisterAck,
    Welcome,
    Heartbeat,
    HeartbeatAck,
    Message,
    Response,
    StreamChunk,
    StreamEnd,
    Query,
    Command,
    CommandResult,
    Event,
    Broadcast,
    Subscribe,
    SubscribeAck,
    Unsubscribe,
    UnsubscribeAck,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    #[serde(rename = "clientId")]
    pub client_id: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Target {
    #[serde(rename = "clientId", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all: Option<bool>,
}

/// The full envelope, matching §6's wire shape field-for-field. Kept as a
/// single flat struct (not an internally-tagged enum keyed on `payload`)
/// because `payload`'s shape varies by `type` in ways the envelope itself
/// does not need to understand — dispatch downstream inspects `type` and
/// deserializes `payload` into whatever shape that handler expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub version: String,
    #[serde(rename = "type")]
    pub envelope_type: EnvelopeType,
    pub source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
    #[serde(rename = "correlationId", skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(rename = "inReplyTo", skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    pub timestamp: i64,
    pub priority: u8,
    #[serde(rename = "expiresAt", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Envelope {
    pub fn new(envelope_type: EnvelopeType, source: Source, payload: Value) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            version: "1.0".to_string(),
            envelope_type,
            source,
            target: None,
            correlation_id: None,
            in_reply_to: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
            priority: 5,
            expires_at: None,
            payload,
            metadata: None,
        }
    }

    pub fn with_correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_in_reply_to(mut self, id: impl Into<String>) -> Self {
        self.in_reply_to = Some(id.into());
        self
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    /// Builds the standard `ERROR` envelope for a given failing request.
    /// `in_reply_to` is set when the originating envelope's ID is known,
    /// per §7's rule that it must point back where possible.
    pub fn error(
        source: Source,
        code: &'static str,
        message: impl Into<String>,
        retryable: bool,
        in_reply_to: Option<String>,
    ) -> Self {
        let payload = serde_json::json!({
            "errorCode": code,
            "errorMessage": message.into(),
            "retryable": retryable,
        });
        let mut env = Self::new(EnvelopeType::Error, source, payload);
        env.in_reply_to = in_reply_to;
        env
    }
}
