//! # Relaymesh
//!
//! Cluster event replication for a distributed pub/sub broker.
//!
//! Broker nodes form a peer group via a gossip membership layer; each node
//! replicates its locally originated state changes (subscribe, unsubscribe,
//! session create/remove, publish) to every live peer over an ordered,
//! at-least-once internal channel, so broker state converges across the
//! cluster.
//!
//! ## Architecture
//!
//! The workspace is layered as a replication kernel:
//!
//! - **`relaymesh-core`**: codec, event model, per-peer queues, backoff,
//!   collaborator interfaces
//! - **`relaymesh-wire`**: framed transport, handshake, producer and
//!   consumer sessions
//! - **`relaymesh`**: cluster coordinator and configuration (this crate)
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use relaymesh::{Cluster, ClusterOptions};
//! use relaymesh::membership::ChannelMembership;
//! # use std::sync::Arc;
//! # use relaymesh::broker::{Publisher, SubscriptionStore};
//!
//! # async fn example(
//! #     publisher: Arc<dyn Publisher>,
//! #     store: Arc<dyn SubscriptionStore>,
//! # ) -> std::io::Result<()> {
//! // Bridge your gossip layer into the oracle...
//! let oracle = ChannelMembership::new();
//!
//! let cluster = Cluster::start(
//!     ClusterOptions::default().with_node_name("node-1"),
//!     &oracle,
//!     publisher,
//!     store,
//!     None,
//! )
//! .await?;
//!
//! // ...then replicate local state changes to the peer group.
//! # let event = todo!();
//! cluster.broadcast(event);
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - Per peer, events are applied in the exact order they were dispatched
//!   (dense, strictly increasing event ids minted at dispatch).
//! - At most one event per peer is in flight at any instant; acks are
//!   cumulative.
//! - A reconnecting session resumes after the last id the peer durably
//!   applied, or renumbers from zero after a session reset.
//! - No ordering across peers, no consensus: this is convergence plumbing,
//!   not a consensus protocol.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::future_not_send)] // single-threaded runtime

mod cluster;
mod config;
pub mod dev_tracing;

pub use cluster::Cluster;
pub use config::{ClusterOptions, DEFAULT_GOSSIP_ADDR, DEFAULT_INTERNAL_ADDR};

// Re-export the layers downstream code needs to drive a cluster.
pub use relaymesh_core::{backoff, broker, codec, error, event, membership, message, queue};
pub use relaymesh_wire::{
    EventConsumer, FullResyncMode, ProducerHandle, SessionOptions, SessionRegistry,
};

pub use bytes::Bytes;
pub use relaymesh_core::error::{ReplicationError, Result};
pub use relaymesh_core::event::{Event, EventId};
pub use relaymesh_core::message::{Message, Subscription};
