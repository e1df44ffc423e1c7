//! src/session/session.rs
//!
//! A single client's session: its state machine, subscription set, rate
//! limiter, and outbound writer queue. The writer queue generalizes the
//! teacher's single `watch`-driven push loop (`api::ws::handle_socket`)
//! into a bounded `mpsc` per session so that one slow client cannot block
//! fan-out to the rest of the mesh.

use crate::domain::now_ms;
use crate::session::envelope::Envelope;
use crate::session::rate_limit::TokenBucket;
use std::collections::HashSet;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticated,
    Active,
    Disconnected,
}

/// Sent to the per-session writer task. `Close` lets the read loop or the
/// heartbeat monitor request termination without dropping the sender side.
pub enum OutboundItem {
    Envelope(Box<Envelope>),
    Close(&'static str),
}

pub struct Session {
    pub id: String,
    pub client_id: Option<String>,
    pub state: SessionState,
    pub last_activity_ms: u64,
    pub subscriptions: HashSet<String>,
    pub rate_limiter: TokenBucket,
    outbound_tx: mpsc::Sender<OutboundItem>,
}

impl Session {
    pub fn new(id: String, outbound_tx: mpsc::Sender<OutboundItem>, rate_points: u32, rate_window_ms: u64) -> Self {
        Self {
            id,
            client_id: None,
            state: SessionState::Connecting,
            last_activity_ms: now_ms(),
            subscriptions: HashSet::new(),
            rate_limiter: TokenBucket::new(rate_points, rate_window_ms),
            outbound_tx,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity_ms = now_ms();
    }

    pub fn is_stale(&self, timeout_ms: u64) -> bool {
        now_ms().saturating_sub(self.last_activity_ms) > timeout_ms
    }

    pub fn authenticate(&mut self, client_id: String) {
        self.client_id = Some(client_id);
        self.state = SessionState::Authenticated;
    }

    pub fn activate(&mut self) {
        if self.state == SessionState::Authenticated {
            self.state = SessionState::Active;
        }
    }

    pub fn disconnect(&mut self) {
        self.state = SessionState::Disconnected;
    }

    pub fn accepts_unauthenticated(&self, envelope_type: crate::session::envelope::EnvelopeType) -> bool {
        use crate::session::envelope::EnvelopeType::*;
        matches!(envelope_type, Register | Heartbeat)
    }

    /// Enqueues an envelope for delivery, respecting the configured queue
    /// depth. Returns `Err` (queue full — caller should treat the session
    /// as a slow client and close it with `SLOW_CLIENT`) without blocking.
    pub fn try_send(&self, envelope: Envelope) -> Result<(), ()> {
        self.outbound_tx
            .try_send(OutboundItem::Envelope(Box::new(envelope)))
            .map_err(|_| ())
    }

    pub fn request_close(&self, reason: &'static str) {
        let _ = self.outbound_tx.try_send(OutboundItem::Close(reason));
    }
}
