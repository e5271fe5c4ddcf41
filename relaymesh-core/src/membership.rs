//! Membership oracle interface.
//!
//! The gossip layer is an external collaborator; the coordinator only
//! consumes its event stream and member snapshot. Any gossip implementation
//! can drive replication by satisfying [`MembershipOracle`], typically by
//! pumping its native events into a [`ChannelMembership`].

use hashbrown::HashMap;
use parking_lot::Mutex;

/// Tag key that must carry a member's internal replication address.
pub const INTERNAL_ADDR_TAG: &str = "internal_addr";

/// A node known to the membership layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Unique node name within the cluster.
    pub name: String,
    /// Gossip tags; must include [`INTERNAL_ADDR_TAG`].
    pub tags: HashMap<String, String>,
}

impl Member {
    /// A member advertising `internal_addr` as its replication endpoint.
    pub fn new(name: impl Into<String>, internal_addr: impl Into<String>) -> Self {
        let mut tags = HashMap::new();
        tags.insert(INTERNAL_ADDR_TAG.to_owned(), internal_addr.into());
        Self {
            name: name.into(),
            tags,
        }
    }

    /// The member's advertised internal replication address, if tagged.
    #[must_use]
    pub fn internal_addr(&self) -> Option<&str> {
        self.tags.get(INTERNAL_ADDR_TAG).map(String::as_str)
    }
}

/// Membership transitions observed from the gossip layer.
///
/// Only the first four variants drive replication; the rest are carried for
/// completeness and ignored by the coordinator.
#[derive(Debug, Clone)]
pub enum MembershipEvent {
    MemberJoin(Vec<Member>),
    MemberLeave(Vec<Member>),
    MemberFail(Vec<Member>),
    MemberReap(Vec<Member>),
    MemberUpdate(Vec<Member>),
    User { name: String, payload: Vec<u8> },
    Query { name: String, payload: Vec<u8> },
}

/// Capability exposed by a gossip membership implementation.
pub trait MembershipOracle: Send + Sync {
    /// Stream of membership transitions.
    fn events(&self) -> flume::Receiver<MembershipEvent>;

    /// Snapshot of currently known members.
    fn members(&self) -> Vec<Member>;
}

/// Channel-backed oracle for gossip adapters and tests: the owning side
/// pushes events and maintains the snapshot, the coordinator consumes.
pub struct ChannelMembership {
    tx: flume::Sender<MembershipEvent>,
    rx: flume::Receiver<MembershipEvent>,
    members: Mutex<Vec<Member>>,
}

impl ChannelMembership {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            tx,
            rx,
            members: Mutex::new(Vec::new()),
        }
    }

    /// Sender half for the embedding gossip adapter.
    #[must_use]
    pub fn sender(&self) -> flume::Sender<MembershipEvent> {
        self.tx.clone()
    }

    /// Replaces the member snapshot returned by [`MembershipOracle::members`].
    pub fn set_members(&self, members: Vec<Member>) {
        *self.members.lock() = members;
    }
}

impl Default for ChannelMembership {
    fn default() -> Self {
        Self::new()
    }
}

impl MembershipOracle for ChannelMembership {
    fn events(&self) -> flume::Receiver<MembershipEvent> {
        self.rx.clone()
    }

    fn members(&self) -> Vec<Member> {
        self.members.lock().clone()
    }
}
