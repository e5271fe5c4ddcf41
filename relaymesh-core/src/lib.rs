//! Relaymesh Core
//!
//! Runtime-agnostic building blocks for cluster event replication:
//! - Checked big-endian wire primitives (`codec`)
//! - Event and message model (`event`, `message`)
//! - Per-peer bounded event queue with mint-at-dispatch ids (`queue`)
//! - Retry backoff (`backoff`) and pooled session buffers (`pool`)
//! - Membership oracle and broker collaborator interfaces (`membership`,
//!   `broker`)
//! - Error taxonomy (`error`)

#![deny(unsafe_code)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod backoff;
pub mod broker;
pub mod codec;
pub mod error;
pub mod event;
pub mod membership;
pub mod message;
pub mod pool;
pub mod queue;
pub mod tcp;

// Small prelude for downstream crates; kept minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::backoff::Backoff;
    pub use crate::broker::{FullResync, Publisher, SubscribeOutcome, SubscriptionStore};
    pub use crate::error::{ReplicationError, Result};
    pub use crate::event::{
        AckEvent, ClientHello, Event, EventId, EventKind, PublishEvent, ServerHello,
        SessionCreateEvent, SessionRemoveEvent, SubscribeEvent, UnsubscribeEvent,
    };
    pub use crate::membership::{
        ChannelMembership, Member, MembershipEvent, MembershipOracle, INTERNAL_ADDR_TAG,
    };
    pub use crate::message::{Message, Subscription};
    pub use crate::queue::{EventQueue, QueueError};
}
