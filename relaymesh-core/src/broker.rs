//! Broker collaborator interfaces.
//!
//! Consumer sessions apply replicated events to local broker state through
//! these traits; the broker's publish path and subscription store live
//! outside this subsystem and are assumed concurrency-safe. All consumers
//! share one handle to each.

use crate::error::Result;
use crate::event::EventId;
use crate::message::{Message, Subscription};
use crate::queue::EventQueue;
use async_trait::async_trait;

/// Outcome of storing one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOutcome {
    pub subscription: Subscription,
    /// Whether an equal subscription already existed for the client.
    pub already_existed: bool,
}

/// Local publish path: delivers a replicated message to local subscribers.
pub trait Publisher: Send + Sync {
    fn publish(&self, message: Message);
}

/// Local subscription and session state store.
pub trait SubscriptionStore: Send + Sync {
    /// Stores subscriptions for a client, reporting per-subscription
    /// outcomes.
    fn subscribe(
        &self,
        client_id: &str,
        subscriptions: &[Subscription],
    ) -> Result<Vec<SubscribeOutcome>>;

    /// Removes the given topic filters for a client.
    fn unsubscribe(&self, client_id: &str, topic_filters: &[String]) -> Result<()>;

    /// Records a client session coming up on a remote node.
    fn create_session(&self, client_id: &str) -> Result<()>;

    /// Records a client session going away on a remote node.
    fn remove_session(&self, client_id: &str) -> Result<()>;
}

/// Collaborator that reseeds authoritative local state to a peer which lost
/// its replication session.
///
/// Invoked by a producer after a handshake reset, before streaming resumes.
/// The implementation appends snapshot events to `queue`; `last_applied` is
/// the id the peer reported, which is zero on a full reset.
#[async_trait(?Send)]
pub trait FullResync {
    async fn resync(&self, peer: &str, queue: &EventQueue, last_applied: EventId) -> Result<()>;
}
