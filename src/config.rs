//! src/config.rs
//!
//! Defines the strongly-typed `Config` struct for all runtime parameters,
//! loaded from a TOML file and environment variables via `figment`, exactly
//! as the teacher's `config.rs` does. Extended from the teacher's
//! gossip-only option set to every option named in the external interface.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub node_id: String,
    pub identity_path: PathBuf,
    pub bootstrap_peers: Vec<SocketAddr>,

    pub gossip: GossipConfig,
    pub session: SessionConfig,
    pub rate_limit: RateLimitConfig,
    pub memory: MemoryConfig,
    pub providers: HashMap<String, ProviderConfig>,

    /// Static `client_id -> token` table backing the identity store stand-in
    /// (§6's external "Identity store" collaborator). Empty by default;
    /// deployments wire a real identity provider in front of the session
    /// fabric instead of relying on this table.
    #[serde(default)]
    pub static_tokens: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GossipConfig {
    pub port: u16,
    pub interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub suspect_timeout_ms: u64,
    pub indirect_nodes: usize,
    pub sync_every_ticks: u32,
    pub sync_max_entries: usize,
    pub gossip_factor: usize,
    pub gossip_factor_on_leave: usize,
}

impl GossipConfig {
    /// The housekeeping sweep runs faster than the main tick so that a
    /// timed-out direct probe can be escalated to indirect ping-req well
    /// before the next tick, without needing sub-tick scheduling precision.
    pub fn sweep_interval_ms(&self) -> u64 {
        (self.probe_timeout_ms / 2).max(25)
    }
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            port: 7946,
            interval_ms: 1000,
            probe_timeout_ms: 500,
            suspect_timeout_ms: 5000,
            indirect_nodes: 3,
            sync_every_ticks: 5,
            sync_max_entries: 50,
            gossip_factor: 3,
            gossip_factor_on_leave: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub bind_addr: SocketAddr,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub outbound_queue_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080),
            heartbeat_interval_ms: 15_000,
            heartbeat_timeout_ms: 45_000,
            outbound_queue_depth: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub points: u32,
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            points: 100,
            window_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub hot_cache_max_per_session: usize,
    pub max_messages_per_session: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            hot_cache_max_per_session: 1000,
            max_messages_per_session: 1000,
        }
    }
}

/// Which role-normalization rules a provider's requests need, per §4.5.
/// Drives which `ProviderAdapter` wrapper `App::build_router` constructs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFamily {
    Anthropic,
    OpenAi,
}

impl Default for ProviderFamily {
    fn default() -> Self {
        ProviderFamily::Anthropic
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub enabled: bool,
    pub default_model: String,
    #[serde(default)]
    pub family: ProviderFamily,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Config {
    /// Loads configuration from `config.toml` and environment variables
    /// prefixed `CORTEX_`, layered over built-in defaults.
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("CORTEX_").split("__"))
            .extract()
    }
}

impl Default for Config {
    fn default() -> Self {
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
        Self {
            node_id: "node-1".to_string(),
            identity_path: PathBuf::from("identity.key"),
            bootstrap_peers: Vec::new(),
            gossip: GossipConfig::default(),
            session: SessionConfig::default(),
            rate_limit: RateLimitConfig::default(),
            memory: MemoryConfig::default(),
            providers,
            static_tokens: HashMap::new(),
        }
    }
}
