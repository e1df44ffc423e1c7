//! src/app.rs
//!
//! Defines the main `App` struct, which encapsulates the application's state
//! and manages the lifecycle of all its concurrent services: gossip
//! membership, leader election, the leader-gated task queue, the session
//! fabric's WebSocket transport, and the heartbeat sweep.

use crate::api::ApiServer;
use crate::config::{Config, ProviderFamily};
use crate::crypto::Identity;
use crate::domain::NodeId;
use crate::election::{LeaderElector, Role};
use crate::error::Result;
use crate::gossip::GossipEngine;
use crate::memory::MemoryService;
use crate::memory::store::InMemoryStore;
use crate::router::adapters::{AnthropicLikeAdapter, OpenAiLikeAdapter};
use crate::router::provider::{Capability, CostTier, Provider, ProviderAdapter};
use crate::router::Router;
use crate::session::fabric::FabricHandle;
use crate::session::heartbeat::HeartbeatMonitor;
use crate::session::identity::StaticIdentityStore;
use crate::task_queue::{DrainSupervisor, TaskQueue};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Encapsulates the entire application, including its configuration and the
/// lifecycle management of its concurrent services.
pub struct App {
    config: Config,
    shutdown_token: CancellationToken,
}

impl App {
    /// Creates a new `App` from the given configuration.
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self {
            config,
            shutdown_token: CancellationToken::new(),
        })
    }

    /// A clone of this app's shutdown token, for a caller that needs to
    /// trigger graceful shutdown from outside `run` (the binary uses its own
    /// internal ctrl-c listener instead; this is for embedding/tests).
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    fn build_router(&self) -> Router {
        let all_capabilities: std::collections::HashSet<Capability> = [
            Capability::Reasoning,
            Capability::Coding,
            Capability::Fast,
            Capability::Cheap,
            Capability::Local,
            Capability::Vision,
        ]
        .into_iter()
        .collect();

        let mut providers = Vec::new();
        let mut adapters: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();
        for (priority, (id, provider_config)) in self.config.providers.iter().enumerate() {
            providers.push(Provider {
                id: id.clone(),
                enabled: provider_config.enabled,
                capabilities: all_capabilities.clone(),
                priority: priority as i32,
                cost_tier: CostTier::Medium,
                default_model: provider_config.default_model.clone(),
            });
            let adapter: Arc<dyn ProviderAdapter> = match provider_config.family {
                ProviderFamily::Anthropic => Arc::new(AnthropicLikeAdapter::new(id.clone())),
                ProviderFamily::OpenAi => Arc::new(OpenAiLikeAdapter::new(id.clone())),
            };
            adapters.insert(id.clone(), adapter);
        }
        Router::new(providers, adapters)
    }

    /// The main run loop for the application.
    ///
    /// This function performs the following steps:
    ///   1. Initializes the node's cryptographic identity and joins gossip.
    ///   2. Spawns the gossip engine, leader elector, session fabric, and
    ///      heartbeat monitor as independent tasks under one shutdown token.
    ///   3. Drives the leader-only task queue drain loop on and off as
    ///      election state transitions.
    ///   4. Waits for a shutdown signal (like Ctrl+C) and gracefully
    ///      terminates all tasks.
    pub async fn run(self) -> Result<()> {
        let identity = Identity::from_file(&self.config.identity_path)?;
        let local_id = NodeId::new(self.config.node_id.clone());

        tracing::info!(
            node_id = %local_id,
            identity_fingerprint = %identity.node_id,
            "starting node"
        );

        let gossip_bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.config.gossip.port);
        let (gossip_engine, gossip_handle) = GossipEngine::new(local_id.clone(), gossip_bind_addr, self.config.gossip.clone())?;
        for peer_addr in &self.config.bootstrap_peers {
            gossip_engine.join(*peer_addr).await;
        }
        let gossip_task = tokio::spawn(gossip_engine.run(self.shutdown_token.clone()));
        tracing::debug!("gossip engine spawned");

        let (elector, mut election_rx) = LeaderElector::new(local_id.clone(), gossip_handle.clone());
        let elector_task = tokio::spawn(elector.run(self.shutdown_token.clone()));
        tracing::debug!("leader elector spawned");

        let task_queue = TaskQueue::new(std::time::Duration::from_millis(self.config.gossip.interval_ms));
        let mut drain_supervisor = DrainSupervisor::new(task_queue.clone());
        let supervisor_shutdown = self.shutdown_token.clone();
        let supervisor_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = supervisor_shutdown.cancelled() => break,
                    changed = election_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let role = election_rx.borrow().role;
                        drain_supervisor.start_if_leader(role == Role::Leader);
                    }
                }
            }
        });

        let router = Arc::new(self.build_router());
        let memory = Arc::new(MemoryService::new(
            Arc::new(InMemoryStore::new()),
            self.config.memory.hot_cache_max_per_session,
            self.config.memory.max_messages_per_session,
        ));
        let identity_store = Arc::new(StaticIdentityStore::new(self.config.static_tokens.clone()));
        let fabric = FabricHandle::new(
            identity_store,
            router,
            memory,
            Some(gossip_handle),
            local_id,
            self.config.session.clone(),
            self.config.rate_limit.clone(),
        );

        let heartbeat_monitor = HeartbeatMonitor::new(
            fabric.clone(),
            self.config.session.heartbeat_interval_ms,
            self.config.session.heartbeat_timeout_ms,
        );
        let heartbeat_task = tokio::spawn(heartbeat_monitor.run(self.shutdown_token.clone()));
        tracing::debug!("heartbeat monitor spawned");

        let api_server = ApiServer::new(
            self.config.session.bind_addr,
            fabric,
            self.config.session.outbound_queue_depth,
        );
        let api_task = tokio::spawn(api_server.run(self.shutdown_token.clone()));
        tracing::debug!("session fabric API server spawned");

        let shutdown_token = self.shutdown_token.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
            tracing::info!("ctrl-c received, initiating graceful shutdown");
            shutdown_token.cancel();
        });

        self.shutdown_token.cancelled().await;

        if let Err(e) = gossip_task.await {
            tracing::error!(error = ?e, "gossip engine task failed");
        }
        if let Err(e) = elector_task.await {
            tracing::error!(error = ?e, "leader elector task failed");
        }
        supervisor_task.abort();
        if let Err(e) = heartbeat_task.await {
            tracing::error!(error = ?e, "heartbeat monitor task failed");
        }
        match api_task.await {
            Ok(Err(e)) => tracing::error!(error = %e, "API server task failed"),
            Err(e) => tracing::error!(error = ?e, "API server task panicked"),
            Ok(Ok(())) => {}
        }
        tracing::info!("node has shut down gracefully");

        Ok(())
    }
}
