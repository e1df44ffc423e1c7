//! tests/common/harness.rs
//!
//! Shared building blocks for the integration and component test suites:
//! spawning `App` instances on loopback ports, a WebSocket client for
//! driving the session fabric, and small polling helpers for waiting on
//! gossip convergence and envelope replies.

use anyhow::{Context, Result};
use cortex_mesh::config::{
    Config, GossipConfig, MemoryConfig, ProviderConfig, ProviderFamily, RateLimitConfig, SessionConfig,
};
use cortex_mesh::session::envelope::{Envelope, EnvelopeType, Source, Target};
use cortex_mesh::App;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// A running node under test: its own `App`, on ephemeral gossip and
/// session-fabric ports, shut down via its own cancellation token when the
/// test calls `shutdown`.
pub struct TestNode {
    pub node_id: String,
    pub gossip_addr: SocketAddr,
    pub api_addr: SocketAddr,
    shutdown_token: CancellationToken,
    _temp_dir: TempDir,
}

fn ephemeral_udp_addr() -> Result<SocketAddr> {
    let socket = UdpSocket::bind("127.0.0.1:0").context("binding ephemeral UDP socket")?;
    socket.local_addr().context("reading UDP local addr")
}

fn ephemeral_tcp_addr() -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").context("binding ephemeral TCP socket")?;
    listener.local_addr().context("reading TCP local addr")
}

/// A fast-ticking gossip config so tests converge in milliseconds instead of
/// the production defaults' multi-second windows.
fn fast_gossip_config(port: u16) -> GossipConfig {
    GossipConfig {
        port,
        interval_ms: 60,
        probe_timeout_ms: 50,
        suspect_timeout_ms: 200,
        indirect_nodes: 2,
        sync_every_ticks: 1,
        sync_max_entries: 64,
        gossip_factor: 3,
        gossip_factor_on_leave: 3,
    }
}

fn single_stub_provider() -> HashMap<String, ProviderConfig> {
    let mut providers = HashMap::new();
    providers.insert(
        "anthropic".to_string(),
        ProviderConfig {
            enabled: true,
            default_model: "claude-sonnet".to_string(),
            family: ProviderFamily::Anthropic,
            api_key: None,
            base_url: None,
        },
    );
    providers
}

/// Per-node overrides for the scenarios that need a non-default session
/// config (small outbound queue to force `SLOW_CLIENT`, tight rate-limit
/// points, a short heartbeat timeout) instead of threading every knob
/// through `spawn`'s argument list.
pub struct NodeOptions {
    pub outbound_queue_depth: usize,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub rate_limit_points: u32,
    pub rate_limit_window_ms: u64,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            outbound_queue_depth: 64,
            heartbeat_interval_ms: 100,
            heartbeat_timeout_ms: 100_000,
            rate_limit_points: 1000,
            rate_limit_window_ms: 60_000,
        }
    }
}

impl TestNode {
    /// Spawns a node with the given bootstrap peers (gossip addresses of
    /// already-running nodes) and a static `client_id -> token` table for
    /// the identity stand-in, using default session/rate-limit settings.
    pub async fn spawn(
        node_id: &str,
        bootstrap_peers: Vec<SocketAddr>,
        static_tokens: HashMap<String, String>,
    ) -> Result<Self> {
        Self::spawn_with_options(node_id, bootstrap_peers, static_tokens, NodeOptions::default()).await
    }

    pub async fn spawn_with_options(
        node_id: &str,
        bootstrap_peers: Vec<SocketAddr>,
        static_tokens: HashMap<String, String>,
        options: NodeOptions,
    ) -> Result<Self> {
        let temp_dir = tempdir().context("creating temp dir")?;
        let gossip_addr = ephemeral_udp_addr()?;
        let api_addr = ephemeral_tcp_addr()?;

        let config = Config {
            node_id: node_id.to_string(),
            identity_path: temp_dir.path().join("identity.key"),
            bootstrap_peers,
            gossip: fast_gossip_config(gossip_addr.port()),
            session: SessionConfig {
                bind_addr: api_addr,
                heartbeat_interval_ms: options.heartbeat_interval_ms,
                heartbeat_timeout_ms: options.heartbeat_timeout_ms,
                outbound_queue_depth: options.outbound_queue_depth,
            },
            rate_limit: RateLimitConfig {
                points: options.rate_limit_points,
                window_ms: options.rate_limit_window_ms,
            },
            memory: MemoryConfig::default(),
            providers: single_stub_provider(),
            static_tokens,
        };

        let app = App::new(config).context("constructing App")?;
        let shutdown_token = app.shutdown_handle();
        tokio::spawn(async move {
            if let Err(e) = app.run().await {
                tracing::error!(error = ?e, "test node App::run failed");
            }
        });

        // Give the gossip and session-fabric listeners a moment to bind
        // before the test starts sending traffic at them.
        tokio::time::sleep(Duration::from_millis(30)).await;

        Ok(Self {
            node_id: node_id.to_string(),
            gossip_addr,
            api_addr,
            shutdown_token,
            _temp_dir: temp_dir,
        })
    }

    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }

    pub async fn ws_client(&self) -> Result<WsStream> {
        let url = format!("ws://{}/ws", self.api_addr);
        let (stream, _response) = connect_async(url).await.context("WebSocket connect failed")?;
        Ok(stream)
    }
}

pub async fn send_envelope(ws: &mut WsStream, envelope: &Envelope) -> Result<()> {
    let text = serde_json::to_string(envelope).context("serializing envelope")?;
    ws.send(Message::Text(text)).await.context("sending over WebSocket")?;
    Ok(())
}

pub async fn recv_envelope(ws: &mut WsStream) -> Result<Envelope> {
    loop {
        let msg = ws
            .next()
            .await
            .context("WebSocket stream ended prematurely")?
            .context("WebSocket message error")?;
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).context("parsing envelope JSON");
        }
    }
}

pub async fn wait_for_envelope<F>(ws: &mut WsStream, predicate: F, timeout: Duration) -> Result<Envelope>
where
    F: Fn(&Envelope) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            let env = recv_envelope(ws).await?;
            if predicate(&env) {
                return Ok(env);
            }
        }
    })
    .await
    .context("timed out waiting for matching envelope")?
}

/// Drives `REGISTER` to completion over an already-connected client,
/// consuming the `WELCOME` and `REGISTER_ACK` envelopes. Returns the
/// session ID the server assigned.
pub async fn register(ws: &mut WsStream, client_id: &str, token: &str) -> Result<String> {
    let welcome = recv_envelope(ws).await?;
    assert_eq!(welcome.envelope_type, EnvelopeType::Welcome);
    let session_id = welcome.source.session_id.clone();

    let register = Envelope::new(
        EnvelopeType::Register,
        Source {
            client_id: client_id.to_string(),
            session_id: session_id.clone(),
        },
        json!({ "clientId": client_id, "authToken": token }),
    );
    send_envelope(ws, &register).await?;
    let ack = recv_envelope(ws).await?;
    assert_eq!(ack.envelope_type, EnvelopeType::RegisterAck);
    assert_eq!(ack.payload["success"], true);
    Ok(session_id)
}

/// Sends a `QUERY` envelope of the given type and returns the `RESPONSE`
/// payload.
pub async fn query(ws: &mut WsStream, client_id: &str, session_id: &str, query_type: &str) -> Result<serde_json::Value> {
    let q = Envelope::new(
        EnvelopeType::Query,
        Source {
            client_id: client_id.to_string(),
            session_id: session_id.to_string(),
        },
        json!({ "queryType": query_type }),
    );
    send_envelope(ws, &q).await?;
    let response = recv_envelope(ws).await?;
    Ok(response.payload)
}

/// Polls `get_nodes` until `predicate` holds on the returned node list or
/// `timeout` elapses.
pub async fn wait_for_node_count<F>(
    ws: &mut WsStream,
    client_id: &str,
    session_id: &str,
    predicate: F,
    timeout: Duration,
) -> Result<Vec<serde_json::Value>>
where
    F: Fn(&[serde_json::Value]) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            let payload = query(ws, client_id, session_id, "get_nodes").await?;
            let nodes = payload["nodes"].as_array().cloned().unwrap_or_default();
            if predicate(&nodes) {
                return Ok(nodes);
            }
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
    })
    .await
    .context("timed out waiting for node count condition")?
}

pub fn direct_target(client_id: &str) -> Target {
    Target {
        client_id: Some(client_id.to_string()),
        group: None,
        all: None,
    }
}

pub fn group_target(group: &str) -> Target {
    Target {
        client_id: None,
        group: Some(group.to_string()),
        all: None,
    }
}

pub fn broadcast_target() -> Target {
    Target {
        client_id: None,
        group: None,
        all: Some(true),
    }
}
