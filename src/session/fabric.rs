//! src/session/fabric.rs
//!
//! The Session Fabric: the join point between client-facing sessions,
//! envelope validation, the router, and the memory service. Sessions are
//! indexed under one fabric-wide mutex (mutated only for
//! insert/remove/snapshot); each session's own state is owned by its
//! entry and touched only by the read loop that holds its ID, matching
//! §5's "per-session state mutated only by that session's read loop"
//! shared-resource policy.

use crate::config::{RateLimitConfig, SessionConfig};
use crate::domain::NodeId;
use crate::error::Error;
use crate::gossip::GossipHandle;
use crate::memory::model::{Message, MessageRole};
use crate::memory::MemoryService;
use crate::router::provider::{Capability, ChatMessage, CompletionRequest, Role as ProviderRole, StreamChunk};
use crate::router::Router;
use crate::session::envelope::{Envelope, EnvelopeType, Source, Target};
use crate::session::identity::IdentityStore;
use crate::session::session::{OutboundItem, Session, SessionState};
use crate::session::validate;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

struct SessionEntry {
    session: Mutex<Session>,
}

pub struct Fabric {
    sessions: Mutex<HashMap<String, Arc<SessionEntry>>>,
    client_to_session: Mutex<HashMap<String, String>>,
    identity: Arc<dyn IdentityStore>,
    router: Arc<Router>,
    memory: Arc<MemoryService>,
    gossip: Option<GossipHandle>,
    local_id: NodeId,
    session_config: SessionConfig,
    rate_limit: RateLimitConfig,
}

#[derive(Clone)]
pub struct FabricHandle {
    inner: Arc<Fabric>,
}

impl FabricHandle {
    pub fn new(
        identity: Arc<dyn IdentityStore>,
        router: Arc<Router>,
        memory: Arc<MemoryService>,
        gossip: Option<GossipHandle>,
        local_id: NodeId,
        session_config: SessionConfig,
        rate_limit: RateLimitConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Fabric {
                sessions: Mutex::new(HashMap::new()),
                client_to_session: Mutex::new(HashMap::new()),
                identity,
                router,
                memory,
                gossip,
                local_id,
                session_config,
                rate_limit,
            }),
        }
    }

    /// Accepts a freshly upgraded transport connection: mints a session ID,
    /// registers it under the fabric-wide lock, and sends the `WELCOME`
    /// envelope. The caller owns the returned receiver's far end (usually
    /// an axum WebSocket write loop).
    pub async fn accept(&self, outbound_tx: mpsc::Sender<OutboundItem>) -> String {
        let session_id = uuid::Uuid::new_v4().to_string();
        let session = Session::new(
            session_id.clone(),
            outbound_tx,
            self.inner.rate_limit.points,
            self.inner.rate_limit.window_ms,
        );
        let entry = Arc::new(SessionEntry {
            session: Mutex::new(session),
        });
        self.inner.sessions.lock().await.insert(session_id.clone(), entry.clone());

        let welcome = Envelope::new(
            EnvelopeType::Welcome,
            Source {
                client_id: String::new(),
                session_id: session_id.clone(),
            },
            json!({ "sessionId": session_id, "capabilities": ["stream", "query", "group"] }),
        );
        let _ = entry.session.lock().await.try_send(welcome);
        session_id
    }

    pub async fn remove_session(&self, session_id: &str) {
        if let Some(entry) = self.inner.sessions.lock().await.remove(session_id) {
            let mut session = entry.session.lock().await;
            if let Some(client_id) = &session.client_id {
                self.inner.client_to_session.lock().await.remove(client_id);
            }
            session.disconnect();
        }
    }

    pub async fn close_stale_sessions(&self, timeout_ms: u64) -> usize {
        let ids: Vec<String> = {
            let sessions = self.inner.sessions.lock().await;
            let mut stale = Vec::new();
            for (id, entry) in sessions.iter() {
                if entry.session.lock().await.is_stale(timeout_ms) {
                    stale.push(id.clone());
                }
            }
            stale
        };
        for id in &ids {
            if let Some(entry) = self.inner.sessions.lock().await.get(id).cloned() {
                entry.session.lock().await.request_close("heartbeat timeout exceeded");
            }
            self.remove_session(id).await;
        }
        ids.len()
    }

    /// Parses, validates, and dispatches one raw inbound frame. Never
    /// panics on malformed input: a parse or validation failure produces
    /// an `INVALID_MESSAGE` reply and the frame is discarded.
    pub async fn handle_raw(&self, session_id: &str, raw: &str) {
        let entry = {
            let sessions = self.inner.sessions.lock().await;
            match sessions.get(session_id) {
                Some(e) => e.clone(),
                None => return,
            }
        };

        let envelope: Envelope = match serde_json::from_str(raw) {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(session_id, error = %e, "discarding malformed envelope");
                return;
            }
        };

        let failures = validate::validate(&envelope);
        if !failures.is_empty() {
            tracing::debug!(session_id, failures = ?failures.0, "envelope failed validation");
            let reply = Envelope::error(
                self_source(session_id, &envelope),
                "INVALID_MESSAGE",
                "envelope failed validation",
                false,
                Some(envelope.message_id.clone()),
            );
            let _ = entry.session.lock().await.try_send(reply);
            return;
        }

        {
            let mut session = entry.session.lock().await;
            session.touch();

            if session.state != SessionState::Active && !session.accepts_unauthenticated(envelope.envelope_type) {
                let reply = Envelope::error(
                    self_source(session_id, &envelope),
                    "AUTHENTICATION_REQUIRED",
                    "session must complete REGISTER before sending this envelope type",
                    false,
                    Some(envelope.message_id.clone()),
                );
                let _ = session.try_send(reply);
                return;
            }

            if !session.rate_limiter.try_consume() {
                let reply = Envelope::error(
                    self_source(session_id, &envelope),
                    "RATE_LIMIT_EXCEEDED",
                    "too many envelopes in the current window",
                    true,
                    Some(envelope.message_id.clone()),
                );
                let _ = session.try_send(reply);
                return;
            }
        }

        self.dispatch(session_id, entry, envelope).await;
    }

    async fn dispatch(&self, session_id: &str, entry: Arc<SessionEntry>, envelope: Envelope) {
        match envelope.envelope_type {
            EnvelopeType::Register => self.handle_register(session_id, entry, envelope).await,
            EnvelopeType::Heartbeat => self.handle_heartbeat(entry, envelope).await,
            EnvelopeType::Subscribe => self.handle_subscribe(entry, envelope, true).await,
            EnvelopeType::Unsubscribe => self.handle_subscribe(entry, envelope, false).await,
            EnvelopeType::Query => self.handle_query(entry, envelope).await,
            EnvelopeType::Message => self.handle_message(session_id, entry, envelope).await,
            _ => {
                let reply = Envelope::error(
                    self_source(session_id, &envelope),
                    "UNKNOWN_MESSAGE_TYPE",
                    "server does not accept this envelope type from a client",
                    false,
                    Some(envelope.message_id.clone()),
                );
                let _ = entry.session.lock().await.try_send(reply);
            }
        }
    }

    async fn handle_register(&self, session_id: &str, entry: Arc<SessionEntry>, envelope: Envelope) {
        let client_id = envelope.payload.get("clientId").and_then(Value::as_str).unwrap_or_default();
        let token = envelope.payload.get("authToken").and_then(Value::as_str).unwrap_or_default();

        if !self.inner.identity.verify_token(client_id, token).await {
            let reply = Envelope::error(
                self_source(session_id, &envelope),
                "AUTHENTICATION_FAILED",
                "invalid client id or auth token",
                false,
                Some(envelope.message_id.clone()),
            );
            let mut session = entry.session.lock().await;
            let _ = session.try_send(reply);
            session.request_close("authentication failed");
            return;
        }

        {
            let mut session = entry.session.lock().await;
            session.authenticate(client_id.to_string());
            session.activate();
        }
        self.inner
            .client_to_session
            .lock()
            .await
            .insert(client_id.to_string(), session_id.to_string());

        let ack = Envelope::new(
            EnvelopeType::RegisterAck,
            self_source(session_id, &envelope),
            json!({ "success": true, "sessionId": session_id }),
        )
        .with_in_reply_to(envelope.message_id.clone());
        let _ = entry.session.lock().await.try_send(ack);
    }

    async fn handle_heartbeat(&self, entry: Arc<SessionEntry>, envelope: Envelope) {
        let session_id = entry.session.lock().await.id.clone();
        let ack = Envelope::new(
            EnvelopeType::HeartbeatAck,
            self_source(&session_id, &envelope),
            json!({ "serverTime": chrono::Utc::now().timestamp_millis() }),
        )
        .with_in_reply_to(envelope.message_id.clone());
        let _ = entry.session.lock().await.try_send(ack);
    }

    async fn handle_subscribe(&self, entry: Arc<SessionEntry>, envelope: Envelope, subscribing: bool) {
        let group = envelope.payload.get("group").and_then(Value::as_str).unwrap_or_default().to_string();
        let session_id = entry.session.lock().await.id.clone();
        {
            let mut session = entry.session.lock().await;
            if subscribing {
                session.subscriptions.insert(group.clone());
            } else {
                session.subscriptions.remove(&group);
            }
        }
        let ack_type = if subscribing {
            EnvelopeType::SubscribeAck
        } else {
            EnvelopeType::UnsubscribeAck
        };
        let ack = Envelope::new(ack_type, self_source(&session_id, &envelope), json!({ "group": group }))
            .with_in_reply_to(envelope.message_id.clone());
        let _ = entry.session.lock().await.try_send(ack);
    }

    async fn handle_query(&self, entry: Arc<SessionEntry>, envelope: Envelope) {
        let session_id = entry.session.lock().await.id.clone();
        let query_type = envelope.payload.get("queryType").and_then(Value::as_str).unwrap_or_default();
        let payload = match query_type {
            "list_providers" => json!({ "providers": self.inner.router.provider_ids() }),
            "list_models" => json!({ "models": self.inner.router.default_models() }),
            "get_nodes" => {
                let nodes = match &self.inner.gossip {
                    Some(handle) => handle
                        .roster
                        .snapshot()
                        .await
                        .into_iter()
                        .map(|n| json!({ "id": n.id.to_string(), "state": format!("{:?}", n.state), "isLeader": n.is_leader }))
                        .collect(),
                    None => Vec::<Value>::new(),
                };
                json!({ "nodes": nodes })
            }
            "session_info" => {
                let session = entry.session.lock().await;
                json!({
                    "sessionId": session.id,
                    "clientId": session.client_id,
                    "subscriptions": session.subscriptions.iter().collect::<Vec<_>>(),
                })
            }
            _ => json!({ "error": "Unknown query type" }),
        };
        let response = Envelope::new(EnvelopeType::Response, self_source(&session_id, &envelope), payload)
            .with_in_reply_to(envelope.message_id.clone());
        let _ = entry.session.lock().await.try_send(response);
    }

    async fn handle_message(&self, session_id: &str, entry: Arc<SessionEntry>, envelope: Envelope) {
        let target = envelope.target.clone();
        match target {
            Some(Target { client_id: Some(client_id), .. }) => {
                self.deliver_direct(session_id, entry, envelope, &client_id).await
            }
            Some(Target { group: Some(group), .. }) => {
                self.deliver_group(session_id, entry, envelope, &group).await
            }
            Some(Target { all: Some(true), .. }) => self.deliver_broadcast(session_id, entry, envelope).await,
            _ => self.handle_ai_request(session_id, entry, envelope).await,
        }
    }

    async fn deliver_direct(&self, sender_session_id: &str, entry: Arc<SessionEntry>, envelope: Envelope, target_client_id: &str) {
        let target_session_id = self.inner.client_to_session.lock().await.get(target_client_id).cloned();
        let target_entry = match target_session_id {
            Some(id) => self.inner.sessions.lock().await.get(&id).cloned(),
            None => None,
        };
        match target_entry {
            Some(target) if target.session.lock().await.state == SessionState::Active => {
                let mut forwarded = envelope.clone();
                forwarded.source = self_source(sender_session_id, &envelope);
                self.send_or_close_for_backpressure(target, forwarded).await;
            }
            _ => {
                let reply = Envelope::error(
                    self_source(sender_session_id, &envelope),
                    "TARGET_NOT_FOUND",
                    format!("client '{target_client_id}' is not connected"),
                    false,
                    Some(envelope.message_id.clone()),
                );
                let _ = entry.session.lock().await.try_send(reply);
            }
        }
    }

    async fn deliver_group(&self, sender_session_id: &str, _entry: Arc<SessionEntry>, envelope: Envelope, group: &str) {
        let targets: Vec<Arc<SessionEntry>> = {
            let sessions = self.inner.sessions.lock().await;
            let mut matched = Vec::new();
            for (id, e) in sessions.iter() {
                if id == sender_session_id {
                    continue;
                }
                let session = e.session.lock().await;
                if session.state == SessionState::Active && session.subscriptions.contains(group) {
                    matched.push(e.clone());
                }
            }
            matched
        };
        for target in targets {
            let mut forwarded = envelope.clone();
            forwarded.source = self_source(sender_session_id, &envelope);
            self.send_or_close_for_backpressure(target, forwarded).await;
        }
    }

    async fn deliver_broadcast(&self, sender_session_id: &str, _entry: Arc<SessionEntry>, envelope: Envelope) {
        let targets: Vec<Arc<SessionEntry>> = {
            let sessions = self.inner.sessions.lock().await;
            let mut matched = Vec::new();
            for (id, e) in sessions.iter() {
                if id == sender_session_id {
                    continue;
                }
                if e.session.lock().await.state == SessionState::Active {
                    matched.push(e.clone());
                }
            }
            matched
        };
        for target in targets {
            let mut forwarded = envelope.clone();
            forwarded.source = self_source(sender_session_id, &envelope);
            self.send_or_close_for_backpressure(target, forwarded).await;
        }
    }

    async fn send_or_close_for_backpressure(&self, target: Arc<SessionEntry>, envelope: Envelope) {
        let session = target.session.lock().await;
        if session.try_send(envelope).is_err() {
            tracing::warn!(session_id = %session.id, "outbound queue full, closing slow client");
            session.request_close("SLOW_CLIENT");
        }
    }

    async fn handle_ai_request(&self, session_id: &str, entry: Arc<SessionEntry>, envelope: Envelope) {
        let content = envelope.payload.get("content").and_then(Value::as_str).unwrap_or_default().to_string();
        let preferred = envelope.payload.get("provider").and_then(Value::as_str).map(str::to_string);
        let stream_requested = envelope.payload.get("stream").and_then(Value::as_bool).unwrap_or(false);
        let extended_thinking = envelope.payload.get("extendedThinking").and_then(Value::as_bool).unwrap_or(false);

        let capabilities: HashSet<Capability> = envelope
            .payload
            .get("capabilities")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .filter_map(parse_capability)
                    .collect()
            })
            .unwrap_or_default();

        let request = CompletionRequest {
            model: preferred.clone().unwrap_or_default(),
            messages: vec![ChatMessage {
                role: ProviderRole::User,
                content: content.clone(),
            }],
            extended_thinking,
            budget_tokens: envelope.payload.get("budgetTokens").and_then(Value::as_u64).map(|v| v as u32),
        };

        let result = self.inner.router.route(&capabilities, preferred.as_deref(), request).await;
        match result {
            Ok((provider_id, mut rx)) => {
                if stream_requested {
                    let mut saw_content = false;
                    while let Some(chunk) = rx.recv().await {
                        match chunk {
                            StreamChunk::Content(text) => {
                                saw_content = true;
                                let chunk_env = Envelope::new(
                                    EnvelopeType::StreamChunk,
                                    self_source(session_id, &envelope),
                                    json!({ "type": "content", "text": text }),
                                )
                                .with_correlation(envelope.message_id.clone());
                                let _ = entry.session.lock().await.try_send(chunk_env);
                            }
                            StreamChunk::Thinking(text) => {
                                let chunk_env = Envelope::new(
                                    EnvelopeType::StreamChunk,
                                    self_source(session_id, &envelope),
                                    json!({ "type": "thinking", "text": text }),
                                )
                                .with_correlation(envelope.message_id.clone());
                                let _ = entry.session.lock().await.try_send(chunk_env);
                            }
                            StreamChunk::Metadata(v) => {
                                let chunk_env = Envelope::new(
                                    EnvelopeType::StreamChunk,
                                    self_source(session_id, &envelope),
                                    json!({ "type": "metadata", "data": v }),
                                )
                                .with_correlation(envelope.message_id.clone());
                                let _ = entry.session.lock().await.try_send(chunk_env);
                            }
                            StreamChunk::Error(msg) => {
                                let err = Envelope::error(
                                    self_source(session_id, &envelope),
                                    "PROVIDER_ERROR",
                                    msg,
                                    true,
                                    Some(envelope.message_id.clone()),
                                )
                                .with_correlation(envelope.message_id.clone());
                                let _ = entry.session.lock().await.try_send(err);
                                break;
                            }
                        }
                    }
                    let _ = saw_content;
                    let end = Envelope::new(
                        EnvelopeType::StreamEnd,
                        self_source(session_id, &envelope),
                        json!({ "provider": provider_id }),
                    )
                    .with_correlation(envelope.message_id.clone());
                    let _ = entry.session.lock().await.try_send(end);
                } else {
                    let mut text = String::new();
                    let mut usage = json!({});
                    let mut model = String::new();
                    while let Some(chunk) = rx.recv().await {
                        match chunk {
                            StreamChunk::Content(t) => text.push_str(&t),
                            StreamChunk::Metadata(v) => {
                                if let Some(u) = v.get("usage") {
                                    usage = u.clone();
                                }
                                if let Some(m) = v.get("model").and_then(Value::as_str) {
                                    model = m.to_string();
                                }
                            }
                            StreamChunk::Error(msg) => {
                                let err = Envelope::error(
                                    self_source(session_id, &envelope),
                                    "PROVIDER_ERROR",
                                    msg,
                                    true,
                                    Some(envelope.message_id.clone()),
                                );
                                let _ = entry.session.lock().await.try_send(err);
                                return;
                            }
                            StreamChunk::Thinking(_) => {}
                        }
                    }
                    let response = Envelope::new(
                        EnvelopeType::Response,
                        self_source(session_id, &envelope),
                        json!({ "content": text, "provider": provider_id, "model": model, "usage": usage }),
                    )
                    .with_in_reply_to(envelope.message_id.clone());
                    let _ = entry.session.lock().await.try_send(response);
                }

                let client_id = entry.session.lock().await.client_id.clone().unwrap_or_default();
                let conversation_id = format!("conv-{client_id}");
                let mut m = Message::new(conversation_id, MessageRole::User, content);
                m.session_id = Some(session_id.to_string());
                let _ = self.inner.memory.append_message(m).await;
            }
            Err(e @ Error::NoSuitableProvider) | Err(e @ Error::ProviderError(..)) => {
                let reply = Envelope::error(
                    self_source(session_id, &envelope),
                    e.error_code(),
                    e.to_string(),
                    e.retryable(),
                    Some(envelope.message_id.clone()),
                );
                let _ = entry.session.lock().await.try_send(reply);
            }
            Err(e) => {
                let reply = Envelope::error(
                    self_source(session_id, &envelope),
                    "INTERNAL_ERROR",
                    e.to_string(),
                    false,
                    Some(envelope.message_id.clone()),
                );
                let _ = entry.session.lock().await.try_send(reply);
            }
        }
    }
}

fn self_source(session_id: &str, envelope: &Envelope) -> Source {
    Source {
        client_id: envelope.source.client_id.clone(),
        session_id: session_id.to_string(),
    }
}

fn parse_capability(s: &str) -> Option<Capability> {
    match s {
        "reasoning" => Some(Capability::Reasoning),
        "coding" => Some(Capability::Coding),
        "fast" => Some(Capability::Fast),
        "cheap" => Some(Capability::Cheap),
        "local" => Some(Capability::Local),
        "vision" => Some(Capability::Vision),
        _ => None,
    }
}
