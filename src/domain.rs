//! src/domain.rs
//!
//! Shared domain types used across the gossip, election, and task-queue
//! subsystems: node identity, membership state, and the task envelope a
//! leader drains work from. Session/envelope/memory types live in their own
//! modules (`session::envelope`, `memory::model`) since they are not shared
//! with the gossip mesh.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Stable string identifier for a node participating in gossip. Unlike a
/// public key, this is operator-assigned (or derived from the bind address)
/// so that a `Sync` entry's 64-byte `id` field round-trips through restarts
/// without requiring a persisted keypair.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Membership state of a peer under the gossip engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    Alive,
    Suspect,
    Dead,
    Left,
}

impl NodeState {
    pub fn as_u8(self) -> u8 {
        match self {
            NodeState::Alive => 0,
            NodeState::Suspect => 1,
            NodeState::Dead => 2,
            NodeState::Left => 3,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(NodeState::Alive),
            1 => Some(NodeState::Suspect),
            2 => Some(NodeState::Dead),
            3 => Some(NodeState::Left),
            _ => None,
        }
    }
}

/// A peer participating in gossip.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub addr: SocketAddr,
    pub state: NodeState,
    pub incarnation: u32,
    pub last_seen_ms: u64,
    pub is_leader: bool,
    /// Exactly one node per process has `is_local = true`.
    pub is_local: bool,
}

impl Node {
    pub fn new_local(id: NodeId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            state: NodeState::Alive,
            incarnation: 0,
            last_seen_ms: now_ms(),
            is_leader: false,
            is_local: true,
        }
    }

    pub fn new_remote(id: NodeId, addr: SocketAddr, incarnation: u32) -> Self {
        Self {
            id,
            addr,
            state: NodeState::Alive,
            incarnation,
            last_seen_ms: now_ms(),
            is_leader: false,
            is_local: false,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen_ms = now_ms();
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}

/// Unit of leader-distributed work.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    pub payload: Vec<u8>,
    pub created_at_ms: u64,
    pub deadline_ms: Option<u64>,
}

impl Task {
    pub fn new(kind: TaskKind, payload: Vec<u8>, deadline_ms: Option<u64>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            payload,
            created_at_ms: now_ms(),
            deadline_ms,
        }
    }

    pub fn is_expired(&self) -> bool {
        match self.deadline_ms {
            Some(d) => now_ms() > d,
            None => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    AiRequest,
    MemorySync,
    Broadcast,
    HealthCheck,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Completed,
}
