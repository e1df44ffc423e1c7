//! src/gossip/roster.rs
//!
//! The peer roster: a mapping from node ID to `Node`, mutated only under a
//! single mutex (matching the teacher's `Arc<Mutex<HashMap<..>>>` pattern in
//! `transport::connection`, generalized from connection caching to
//! membership state). Enforces the monotonic-incarnation merge invariant.

use crate::domain::{now_ms, Node, NodeId, NodeState};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Callback invoked on every state transition observed for a node.
pub type StateChangeCallback = Arc<dyn Fn(&Node, NodeState, NodeState) + Send + Sync>;

#[derive(Clone)]
pub struct Roster {
    inner: Arc<Mutex<HashMap<NodeId, Node>>>,
    on_change: Arc<Mutex<Vec<StateChangeCallback>>>,
}

impl Roster {
    pub fn new(local: Node) -> Self {
        let mut map = HashMap::new();
        map.insert(local.id.clone(), local);
        Self {
            inner: Arc::new(Mutex::new(map)),
            on_change: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn register_callback(&self, cb: StateChangeCallback) {
        self.on_change.lock().await.push(cb);
    }

    async fn notify(&self, node: &Node, old: NodeState, new: NodeState) {
        if old == new {
            return;
        }
        for cb in self.on_change.lock().await.iter() {
            cb(node, old, new);
        }
    }

    pub async fn local_id(&self) -> NodeId {
        self.inner
            .lock()
            .await
            .values()
            .find(|n| n.is_local)
            .map(|n| n.id.clone())
            .expect("roster always holds exactly one local node")
    }

    /// Inserts a freshly observed peer (via `Join` or a first gossip contact).
    /// No-ops if the peer is already known.
    pub async fn insert_seed(&self, id: NodeId, addr: SocketAddr) {
        let mut guard = self.inner.lock().await;
        guard
            .entry(id.clone())
            .or_insert_with(|| Node::new_remote(id, addr, 0));
    }

    pub async fn get(&self, id: &NodeId) -> Option<Node> {
        self.inner.lock().await.get(id).cloned()
    }

    /// Snapshot of all nodes. Copies out of the lock so callers never hold
    /// it across a user callback or network I/O.
    pub async fn snapshot(&self) -> Vec<Node> {
        self.inner.lock().await.values().cloned().collect()
    }

    pub async fn alive_peers(&self, exclude_local: bool) -> Vec<Node> {
        self.inner
            .lock()
            .await
            .values()
            .filter(|n| n.state == NodeState::Alive && (!exclude_local || !n.is_local))
            .cloned()
            .collect()
    }

    pub async fn alive_count(&self) -> usize {
        self.inner
            .lock()
            .await
            .values()
            .filter(|n| n.state == NodeState::Alive)
            .count()
    }

    /// Marks the given peer Alive, bumping its incarnation if `incarnation`
    /// has risen. Used on direct or relayed Ack.
    pub async fn mark_alive(&self, id: &NodeId, incarnation: u32, addr: Option<SocketAddr>) {
        let mut guard = self.inner.lock().await;
        if let Some(node) = guard.get_mut(id) {
            let old = node.state;
            if incarnation >= node.incarnation {
                node.incarnation = incarnation;
            }
            node.state = NodeState::Alive;
            node.touch();
            if let Some(a) = addr {
                node.addr = a;
            }
            let snapshot = node.clone();
            drop(guard);
            self.notify(&snapshot, old, NodeState::Alive).await;
        }
    }

    /// Confirms a peer is alive without asserting a specific incarnation,
    /// used when an Ack only proves liveness (e.g. a relayed indirect ack,
    /// which does not carry the target's own incarnation).
    pub async fn confirm_alive(&self, id: &NodeId) {
        let mut guard = self.inner.lock().await;
        if let Some(node) = guard.get_mut(id) {
            if node.state != NodeState::Alive {
                let old = node.state;
                node.state = NodeState::Alive;
                node.touch();
                let snapshot = node.clone();
                drop(guard);
                self.notify(&snapshot, old, NodeState::Alive).await;
            } else {
                node.touch();
            }
        }
    }

    pub async fn mark_suspect(&self, id: &NodeId) {
        let mut guard = self.inner.lock().await;
        if let Some(node) = guard.get_mut(id) {
            if node.state != NodeState::Alive {
                return;
            }
            let old = node.state;
            node.state = NodeState::Suspect;
            let snapshot = node.clone();
            drop(guard);
            self.notify(&snapshot, old, NodeState::Suspect).await;
        }
    }

    pub async fn mark_dead(&self, id: &NodeId) {
        let mut guard = self.inner.lock().await;
        if let Some(node) = guard.get_mut(id) {
            if node.state == NodeState::Dead || node.state == NodeState::Left {
                return;
            }
            let old = node.state;
            node.state = NodeState::Dead;
            let snapshot = node.clone();
            drop(guard);
            self.notify(&snapshot, old, NodeState::Dead).await;
        }
    }

    pub async fn mark_left(&self, id: &NodeId) {
        let mut guard = self.inner.lock().await;
        if let Some(node) = guard.get_mut(id) {
            let old = node.state;
            node.state = NodeState::Left;
            let snapshot = node.clone();
            drop(guard);
            self.notify(&snapshot, old, NodeState::Left).await;
        }
    }

    pub async fn set_leader(&self, id: &NodeId, is_leader: bool) {
        let mut guard = self.inner.lock().await;
        for (node_id, node) in guard.iter_mut() {
            if node_id == id {
                node.is_leader = is_leader;
            } else if is_leader {
                node.is_leader = false;
            }
        }
    }

    /// Applies the merge rule for a single `Sync` entry: unknown peers are
    /// inserted, known peers are updated only when the arriving incarnation
    /// strictly exceeds the stored one (a Suspect/Dead peer may only recover
    /// to Alive if the arriving incarnation is strictly greater, per the
    /// Sync-merge invariant; a peer refutes rumors about itself this way).
    pub async fn merge_entry(
        &self,
        local_id: &NodeId,
        id: NodeId,
        addr: SocketAddr,
        state: NodeState,
        incarnation: u32,
        is_leader: bool,
    ) {
        if &id == local_id {
            return;
        }
        let mut guard = self.inner.lock().await;
        match guard.get_mut(&id) {
            None => {
                let mut node = Node::new_remote(id, addr, incarnation);
                node.state = state;
                node.is_leader = is_leader;
                guard.insert(node.id.clone(), node);
            }
            Some(existing) => {
                if incarnation > existing.incarnation {
                    let old = existing.state;
                    existing.incarnation = incarnation;
                    existing.state = state;
                    existing.addr = addr;
                    existing.is_leader = is_leader;
                    existing.touch();
                    let snapshot = existing.clone();
                    drop(guard);
                    self.notify(&snapshot, old, state).await;
                }
            }
        }
    }

    /// Bumps the local node's own incarnation, used to refute a Suspect
    /// rumor about ourselves.
    pub async fn bump_local_incarnation(&self) -> u32 {
        let mut guard = self.inner.lock().await;
        let local = guard
            .values_mut()
            .find(|n| n.is_local)
            .expect("roster always holds exactly one local node");
        local.incarnation += 1;
        local.state = NodeState::Alive;
        local.touch();
        local.incarnation
    }

    pub async fn local_incarnation(&self) -> u32 {
        self.inner
            .lock()
            .await
            .values()
            .find(|n| n.is_local)
            .map(|n| n.incarnation)
            .unwrap_or(0)
    }

    /// Builds up to `limit` Sync entries to piggyback on a probe, preferring
    /// the most recently changed nodes first is not required by the spec;
    /// any subset under the cap is conformant, so we take by insertion
    /// order for simplicity and determinism in tests.
    pub async fn sync_entries(&self, limit: usize) -> Vec<(NodeId, SocketAddr, NodeState, u32, bool)> {
        self.inner
            .lock()
            .await
            .values()
            .take(limit)
            .map(|n| (n.id.clone(), n.addr, n.state, n.incarnation, n.is_leader))
            .collect()
    }

    pub async fn last_seen_ms(&self, id: &NodeId) -> Option<u64> {
        self.inner.lock().await.get(id).map(|n| n.last_seen_ms)
    }

    pub async fn touch(&self, id: &NodeId) {
        if let Some(node) = self.inner.lock().await.get_mut(id) {
            node.touch();
        }
    }

    pub async fn now_ms(&self) -> u64 {
        now_ms()
    }
}
