//! src/gossip/mod.rs
//!
//! The `GossipEngine` actor: a SWIM-style failure detector over UDP. Every
//! tick it probes one random peer directly, falls back to indirect
//! ping-req probing on timeout, and piggybacks periodic full-state Sync.
//! Structured as a single actor driven by a `tokio::select!` loop, matching
//! the teacher's `engine::Engine::run` shape (timer tick + inbound channel +
//! shutdown token), generalized from one gossip-factor fan-out to the full
//! probe/suspect/dead state machine.

pub mod roster;
pub mod transport;
pub mod wire;

use crate::config::GossipConfig;
use crate::domain::{now_ms, Node, NodeId, NodeState};
use crate::error::Result;
use rand::seq::SliceRandom;
use roster::Roster;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time;
use tokio_util::sync::CancellationToken;
use transport::GossipTransport;
use wire::{GossipMessage, Header, MessageType, SyncEntry};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaderAnnouncement {
    pub id: NodeId,
    pub incarnation: u32,
}

/// Handle to a running `GossipEngine`, held by the rest of the application
/// (leader elector, task queue, API layer) to read membership state and
/// request an out-of-cycle self-announcement.
#[derive(Clone)]
pub struct GossipHandle {
    pub roster: Roster,
    pub leader_rx: watch::Receiver<Option<LeaderAnnouncement>>,
    announce_tx: mpsc::Sender<()>,
}

impl GossipHandle {
    /// Requests that the engine broadcast its current state (including any
    /// leader flag) to a sample of peers immediately, rather than waiting
    /// for the next tick. Used by the elector right after winning a term.
    pub async fn announce_now(&self) {
        let _ = self.announce_tx.send(()).await;
    }
}

enum ProbePhase {
    Direct,
    Indirect,
}

struct OwnProbe {
    target: NodeId,
    target_addr: SocketAddr,
    started_at_ms: u64,
    phase: ProbePhase,
}

struct PendingRelay {
    requester_addr: SocketAddr,
    requester_seq: u32,
    expires_at_ms: u64,
}

pub struct GossipEngine {
    local_id: NodeId,
    config: GossipConfig,
    roster: Roster,
    transport: Arc<GossipTransport>,
    seq: AtomicU32,
    tick_count: u64,
    own_probe: Option<OwnProbe>,
    pending_relays: HashMap<NodeId, Vec<PendingRelay>>,
    leader_tx: watch::Sender<Option<LeaderAnnouncement>>,
    announce_rx: mpsc::Receiver<()>,
}

impl GossipEngine {
    pub fn new(
        local_id: NodeId,
        bind_addr: SocketAddr,
        config: GossipConfig,
    ) -> Result<(Self, GossipHandle)> {
        let local_node = Node::new_local(local_id.clone(), bind_addr);
        let roster = Roster::new(local_node);
        let transport = Arc::new(GossipTransport::bind(bind_addr)?);
        let (leader_tx, leader_rx) = watch::channel(None);
        let (announce_tx, announce_rx) = mpsc::channel(8);

        let handle = GossipHandle {
            roster: roster.clone(),
            leader_rx,
            announce_tx,
        };
        let engine = Self {
            local_id,
            config,
            roster,
            transport,
            seq: AtomicU32::new(0),
            tick_count: 0,
            own_probe: None,
            pending_relays: HashMap::new(),
            leader_tx,
            announce_rx,
        };
        Ok((engine, handle))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.transport.local_addr()
    }

    fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn header(&self) -> Header {
        Header {
            version: 1,
            msg_type: 0,
            payload_len: 0,
            seq: self.next_seq(),
            sender_id: self.local_id.clone(),
            incarnation: 0,
        }
    }

    /// `Join(seed_address, seed_port)`: inserts a synthetic seed entry and
    /// sends an initial Ping and Sync, returning without waiting for
    /// convergence. The seed's real `NodeId` is unknown until it replies; we
    /// register it under a synthetic placeholder that ages out via the
    /// normal suspect/dead sweep once the real entry supersedes it.
    pub async fn join(&self, seed_addr: SocketAddr) {
        let placeholder = NodeId::new(format!("seed:{seed_addr}"));
        self.roster.insert_seed(placeholder.clone(), seed_addr).await;
        let incarnation = self.roster.local_incarnation().await;
        let mut header = self.header();
        header.incarnation = incarnation;
        header.msg_type = MessageType::Ping as u8;
        let ping = GossipMessage::Ping {
            header: header.clone(),
            target_id: placeholder.clone(),
        };
        let _ = self.transport.send(seed_addr, &ping).await;
        self.send_sync_to(seed_addr).await;
    }

    /// `Leave()`: marks local state Left and attempts one Sync broadcast.
    pub async fn leave(&self) {
        self.roster.mark_left(&self.local_id).await;
        let peers = self.roster.alive_peers(true).await;
        for p in peers.iter().take(self.config.gossip_factor_on_leave) {
            self.send_sync_to(p.addr).await;
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!(node = %self.local_id, "Gossip engine started");
        let mut tick_timer = time::interval(Duration::from_millis(self.config.interval_ms));
        let mut sweep_timer = time::interval(Duration::from_millis(self.config.sweep_interval_ms()));

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Gossip engine received shutdown signal");
                    break;
                }
                _ = tick_timer.tick() => {
                    self.do_tick().await;
                }
                _ = sweep_timer.tick() => {
                    self.sweep().await;
                }
                Some(()) = self.announce_rx.recv() => {
                    self.announce_self().await;
                }
                recv = self.transport.recv() => {
                    match recv {
                        Ok((from, Ok(msg))) => self.handle_message(from, msg).await,
                        Ok((from, Err(e))) => {
                            tracing::debug!(%from, error = %e, "discarding malformed gossip datagram");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "gossip socket recv failed");
                        }
                    }
                }
            }
        }
    }

    async fn do_tick(&mut self) {
        self.tick_count += 1;
        let candidates = self.probe_candidates().await;
        let Some(peer) = candidates.choose(&mut rand::thread_rng()).cloned() else {
            return;
        };

        let incarnation = self.roster.local_incarnation().await;
        let mut header = self.header();
        header.incarnation = incarnation;
        header.msg_type = MessageType::Ping as u8;
        let ping = GossipMessage::Ping {
            header,
            target_id: peer.id.clone(),
        };
        let _ = self.transport.send(peer.addr, &ping).await;
        self.own_probe = Some(OwnProbe {
            target: peer.id.clone(),
            target_addr: peer.addr,
            started_at_ms: now_ms(),
            phase: ProbePhase::Direct,
        });

        if self.tick_count % self.config.sync_every_ticks as u64 == 0 {
            self.send_sync_to(peer.addr).await;
        }
    }

    async fn probe_candidates(&self) -> Vec<Node> {
        self.roster
            .snapshot()
            .await
            .into_iter()
            .filter(|n| {
                !n.is_local && matches!(n.state, NodeState::Alive | NodeState::Suspect)
            })
            .collect()
    }

    /// Runs more frequently than the gossip tick: escalates a timed-out
    /// direct probe to indirect ping-req, expires stale relay records, and
    /// drives the Alive->Suspect->Dead sweep off each peer's last-contact
    /// timestamp.
    async fn sweep(&mut self) {
        let now = now_ms();

        if let Some(probe) = &self.own_probe {
            if matches!(probe.phase, ProbePhase::Direct)
                && now.saturating_sub(probe.started_at_ms) >= self.config.probe_timeout_ms
            {
                let target = probe.target.clone();
                let target_addr = probe.target_addr;
                self.send_indirect_probes(target, target_addr).await;
                if let Some(p) = &mut self.own_probe {
                    p.phase = ProbePhase::Indirect;
                }
            }
        }

        self.pending_relays.retain(|_, relays| {
            relays.retain(|r| r.expires_at_ms > now);
            !relays.is_empty()
        });

        let snapshot = self.roster.snapshot().await;
        for node in snapshot {
            if node.is_local {
                continue;
            }
            let age = now.saturating_sub(node.last_seen_ms);
            match node.state {
                NodeState::Alive if age > self.config.suspect_timeout_ms => {
                    tracing::debug!(peer = %node.id, "marking peer Suspect (no contact)");
                    self.roster.mark_suspect(&node.id).await;
                }
                NodeState::Suspect if age > self.config.suspect_timeout_ms * 2 => {
                    tracing::info!(peer = %node.id, "marking peer Dead (suspect timeout elapsed)");
                    self.roster.mark_dead(&node.id).await;
                }
                _ => {}
            }
        }
    }

    async fn send_indirect_probes(&self, target: NodeId, target_addr: SocketAddr) {
        let candidates: Vec<Node> = self
            .roster
            .snapshot()
            .await
            .into_iter()
            .filter(|n| !n.is_local && n.id != target && n.state == NodeState::Alive)
            .collect();
        let chosen: Vec<&Node> = candidates
            .choose_multiple(&mut rand::thread_rng(), self.config.indirect_nodes)
            .collect();
        if chosen.is_empty() {
            return;
        }
        let incarnation = self.roster.local_incarnation().await;
        for helper in chosen {
            let mut header = self.header();
            header.incarnation = incarnation;
            header.msg_type = MessageType::PingReq as u8;
            let msg = GossipMessage::PingReq {
                header,
                target_id: target.clone(),
                source_id: self.local_id.clone(),
            };
            let _ = self.transport.send(helper.addr, &msg).await;
        }
        let _ = target_addr;
    }

    async fn send_sync_to(&self, addr: SocketAddr) {
        let entries = self
            .roster
            .sync_entries(self.config.sync_max_entries)
            .await
            .into_iter()
            .map(|(id, address, state, incarnation, is_leader)| SyncEntry {
                id,
                address,
                state,
                incarnation,
                is_leader,
            })
            .collect();
        let incarnation = self.roster.local_incarnation().await;
        let mut header = self.header();
        header.incarnation = incarnation;
        header.msg_type = MessageType::Sync as u8;
        let msg = GossipMessage::Sync { header, entries };
        let _ = self.transport.send(addr, &msg).await;
    }

    /// Bumps our own incarnation and broadcasts Sync to a sample of alive
    /// peers immediately. Used both to refute a Suspect rumor about
    /// ourselves and by the leader elector right after winning an election.
    async fn announce_self(&self) {
        self.roster.bump_local_incarnation().await;
        let peers = self.roster.alive_peers(true).await;
        for p in peers.iter().take(self.config.gossip_factor) {
            self.send_sync_to(p.addr).await;
        }
    }

    async fn handle_message(&mut self, from: SocketAddr, msg: GossipMessage) {
        match msg {
            GossipMessage::Ping { header, target_id } => {
                self.roster.mark_alive(&header.sender_id, header.incarnation, Some(from)).await;
                if target_id == self.local_id {
                    let incarnation = self.roster.local_incarnation().await;
                    let mut ack_header = self.header();
                    ack_header.seq = header.seq;
                    ack_header.incarnation = incarnation;
                    ack_header.msg_type = MessageType::Ack as u8;
                    let ack = GossipMessage::Ack {
                        header: ack_header,
                        target_id: self.local_id.clone(),
                        payload: Vec::new(),
                    };
                    let _ = self.transport.send(from, &ack).await;
                }
            }
            GossipMessage::PingReq {
                header,
                target_id,
                source_id: _,
            } => {
                self.roster.mark_alive(&header.sender_id, header.incarnation, Some(from)).await;
                if let Some(target) = self.roster.get(&target_id).await {
                    let incarnation = self.roster.local_incarnation().await;
                    let mut ping_header = self.header();
                    ping_header.incarnation = incarnation;
                    ping_header.msg_type = MessageType::Ping as u8;
                    let seq = ping_header.seq;
                    let ping = GossipMessage::Ping {
                        header: ping_header,
                        target_id: target_id.clone(),
                    };
                    let _ = self.transport.send(target.addr, &ping).await;
                    self.pending_relays.entry(target_id).or_default().push(PendingRelay {
                        requester_addr: from,
                        requester_seq: seq,
                        expires_at_ms: now_ms() + self.config.suspect_timeout_ms,
                    });
                }
            }
            GossipMessage::Ack { header, target_id, payload } => {
                self.roster.mark_alive(&header.sender_id, header.incarnation, Some(from)).await;
                self.roster.confirm_alive(&target_id).await;

                if let Some(probe) = &self.own_probe {
                    if probe.target == target_id {
                        self.own_probe = None;
                    }
                }

                if let Some(relays) = self.pending_relays.remove(&target_id) {
                    for relay in relays {
                        let mut ack_header = self.header();
                        ack_header.seq = relay.requester_seq;
                        ack_header.msg_type = MessageType::Ack as u8;
                        let relayed = GossipMessage::Ack {
                            header: ack_header,
                            target_id: target_id.clone(),
                            payload: payload.clone(),
                        };
                        let _ = self.transport.send(relay.requester_addr, &relayed).await;
                    }
                }
            }
            GossipMessage::Sync { header, entries } => {
                self.roster.mark_alive(&header.sender_id, header.incarnation, Some(from)).await;
                for e in entries {
                    if e.id == self.local_id {
                        continue;
                    }
                    self.roster
                        .merge_entry(&self.local_id, e.id.clone(), e.address, e.state, e.incarnation, e.is_leader)
                        .await;
                    if e.is_leader && e.state == NodeState::Alive {
                        let announcement = LeaderAnnouncement {
                            id: e.id,
                            incarnation: e.incarnation,
                        };
                        let should_update = match self.leader_tx.borrow().as_ref() {
                            Some(current) => announcement.incarnation >= current.incarnation,
                            None => true,
                        };
                        if should_update {
                            let _ = self.leader_tx.send(Some(announcement));
                        }
                    }
                }
            }
        }
    }
}
