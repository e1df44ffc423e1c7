//! src/election.rs
//!
//! The `LeaderElector`: a simplified term-based election layered on top of
//! gossip-observed membership. Structured as a dedicated timer-driven actor
//! (per the design note replacing "coordinator polled on a main-loop tick"
//! with "state machine driven by a dedicated timer task"), generalized from
//! the teacher's single timer+channel actor loop shape.

use crate::domain::NodeId;
use crate::gossip::GossipHandle;
use rand::Rng;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElectionState {
    pub term: u64,
    pub role: Role,
    pub leader_id: Option<NodeId>,
}

pub struct LeaderElector {
    local_id: NodeId,
    gossip: GossipHandle,
    state_tx: watch::Sender<ElectionState>,
    term: u64,
    role: Role,
    leader_id: Option<NodeId>,
    last_known_leader_incarnation: u32,
}

impl LeaderElector {
    pub fn new(local_id: NodeId, gossip: GossipHandle) -> (Self, watch::Receiver<ElectionState>) {
        let initial = ElectionState {
            term: 0,
            role: Role::Follower,
            leader_id: None,
        };
        let (state_tx, state_rx) = watch::channel(initial);
        let elector = Self {
            local_id,
            gossip,
            state_tx,
            term: 0,
            role: Role::Follower,
            leader_id: None,
            last_known_leader_incarnation: 0,
        };
        (elector, state_rx)
    }

    fn publish(&self) {
        let _ = self.state_tx.send(ElectionState {
            term: self.term,
            role: self.role,
            leader_id: self.leader_id.clone(),
        });
    }

    fn random_deadline() -> Duration {
        Duration::from_millis(rand::thread_rng().gen_range(150..=300))
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!(node = %self.local_id, "Leader elector started");
        let mut leader_rx = self.gossip.leader_rx.clone();
        let mut deadline = time::sleep(Self::random_deadline());
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Leader elector received shutdown signal");
                    break;
                }
                () = &mut deadline, if self.role != Role::Leader => {
                    self.on_deadline_expired().await;
                    deadline.as_mut().reset(Instant::now() + Self::random_deadline());
                }
                changed = leader_rx.changed() => {
                    if changed.is_err() {
                        continue;
                    }
                    let announcement = leader_rx.borrow().clone();
                    if let Some(a) = announcement {
                        if a.incarnation >= self.last_known_leader_incarnation || self.leader_id.is_none() {
                            self.become_follower_under(a.id, a.incarnation).await;
                            deadline.as_mut().reset(Instant::now() + Self::random_deadline());
                        }
                    }
                }
            }

            // If we were leader and gossip no longer sees us as Alive,
            // step down immediately rather than waiting out the term.
            if self.role == Role::Leader {
                if let Some(local) = self.gossip.roster.get(&self.local_id).await {
                    if local.state != crate::domain::NodeState::Alive {
                        tracing::warn!("local node no longer Alive; stepping down from Leader");
                        self.role = Role::Follower;
                        self.publish();
                    }
                }
            }
        }
    }

    async fn become_follower_under(&mut self, leader_id: NodeId, incarnation: u32) {
        if leader_id == self.local_id {
            return;
        }
        self.role = Role::Follower;
        self.leader_id = Some(leader_id);
        self.last_known_leader_incarnation = incarnation;
        self.publish();
    }

    /// Resolves a term without real RequestVote RPCs: every candidate
    /// computes the same deterministic winner from its own locally observed
    /// Alive set (lowest `NodeId`, a bully-algorithm tie-break), so a single
    /// round converges without collecting votes and survives any number of
    /// peers dying, not just the fully-isolated case.
    async fn on_deadline_expired(&mut self) {
        self.term += 1;
        self.role = Role::Candidate;
        self.publish();
        tracing::debug!(term = self.term, "election deadline expired, becoming Candidate");

        let mut alive: Vec<NodeId> = self
            .gossip
            .roster
            .snapshot()
            .await
            .into_iter()
            .filter(|n| n.state == crate::domain::NodeState::Alive)
            .map(|n| n.id)
            .collect();
        alive.sort();
        let winner = alive.into_iter().next().unwrap_or_else(|| self.local_id.clone());

        if winner == self.local_id {
            self.role = Role::Leader;
            self.leader_id = Some(self.local_id.clone());
            self.publish();
            self.gossip.roster.set_leader(&self.local_id, true).await;
            self.gossip.announce_now().await;
            tracing::info!(term = self.term, "won election (lowest alive id), now Leader");
        } else {
            self.role = Role::Follower;
            self.leader_id = Some(winner.clone());
            self.publish();
            tracing::debug!(term = self.term, leader = %winner, "deferring to lower id, staying Follower");
        }
    }
}
