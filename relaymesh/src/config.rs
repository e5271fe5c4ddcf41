//! Cluster configuration.

use relaymesh_wire::{FullResyncMode, SessionOptions};
use std::time::Duration;

/// Default internal replication listener address.
pub const DEFAULT_INTERNAL_ADDR: &str = "0.0.0.0:4456";

/// Default gossip bind address. The gossip layer binds its own UDP and TCP
/// sockets on this host/port; it never collides with the internal TCP
/// listener even when the two addresses coincide in configuration.
pub const DEFAULT_GOSSIP_ADDR: &str = "0.0.0.0:4456";

/// Options for one cluster node.
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    /// Unique node name within the cluster. Defaults to the host name.
    pub node_name: String,
    /// Address the internal replication listener binds.
    pub internal_addr: String,
    /// Address handed to the gossip layer.
    pub gossip_addr: String,
    /// Seed addresses for the gossip layer to join.
    pub join: Vec<String>,
    /// Maximum buffered events per peer queue.
    pub queue_capacity: usize,
    /// Reconnect and handshake timing for replication sessions.
    pub session: SessionOptions,
    /// First delay after a failed accept; doubles per consecutive failure.
    pub accept_backoff_base: Duration,
    /// Cap for the accept retry delay.
    pub accept_backoff_max: Duration,
    /// How producers reseed a peer that lost its session.
    pub full_resync: FullResyncMode,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            internal_addr: DEFAULT_INTERNAL_ADDR.to_owned(),
            gossip_addr: DEFAULT_GOSSIP_ADDR.to_owned(),
            join: Vec::new(),
            queue_capacity: 65_536,
            session: SessionOptions::default(),
            accept_backoff_base: Duration::from_millis(5),
            accept_backoff_max: Duration::from_secs(1),
            full_resync: FullResyncMode::default(),
        }
    }
}

impl ClusterOptions {
    #[must_use]
    pub fn with_node_name(mut self, name: impl Into<String>) -> Self {
        self.node_name = name.into();
        self
    }

    #[must_use]
    pub fn with_internal_addr(mut self, addr: impl Into<String>) -> Self {
        self.internal_addr = addr.into();
        self
    }

    #[must_use]
    pub fn with_gossip_addr(mut self, addr: impl Into<String>) -> Self {
        self.gossip_addr = addr.into();
        self
    }

    #[must_use]
    pub fn with_join(mut self, seeds: Vec<String>) -> Self {
        self.join = seeds;
        self
    }

    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_session(mut self, session: SessionOptions) -> Self {
        self.session = session;
        self
    }

    #[must_use]
    pub fn with_full_resync(mut self, mode: FullResyncMode) -> Self {
        self.full_resync = mode;
        self
    }
}

fn default_node_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_owned())
}
