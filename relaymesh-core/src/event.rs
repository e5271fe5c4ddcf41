//! Events exchanged between cluster nodes.
//!
//! Every frame on the internal channel is a single-byte type tag followed by
//! the variant payload. Tags are fixed for cross-node compatibility; adding
//! a variant means appending a tag, never renumbering.
//!
//! Non-handshake events carry an [`EventId`] minted by the producer when the
//! event is dispatched from its peer queue (not when it is appended), which
//! makes ids dense and strictly increasing in transmission order. Handshake
//! events carry no id.

use crate::codec::{self, CodecError};
use crate::message::{Message, Subscription};
use bytes::{Buf, BufMut};
use std::fmt;

/// Monotonic identifier minted at dispatch; used for cumulative ack and
/// resume.
pub type EventId = u64;

/// Wire type tag of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventKind {
    Subscribe = 1,
    Unsubscribe = 2,
    Publish = 3,
    SessionCreate = 4,
    SessionRemove = 5,
    Ack = 6,
    ClientHello = 7,
    ServerHello = 8,
}

impl EventKind {
    /// Maps a wire tag back to a kind.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Subscribe),
            2 => Some(Self::Unsubscribe),
            3 => Some(Self::Publish),
            4 => Some(Self::SessionCreate),
            5 => Some(Self::SessionRemove),
            6 => Some(Self::Ack),
            7 => Some(Self::ClientHello),
            8 => Some(Self::ServerHello),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "Subscribe",
            Self::Unsubscribe => "Unsubscribe",
            Self::Publish => "Publish",
            Self::SessionCreate => "SessionCreate",
            Self::SessionRemove => "SessionRemove",
            Self::Ack => "Ack",
            Self::ClientHello => "ClientHello",
            Self::ServerHello => "ServerHello",
        }
    }
}

/// A client subscribed on the originating node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeEvent {
    pub event_id: Option<EventId>,
    pub client_id: String,
    pub subscriptions: Vec<Subscription>,
}

/// A client dropped topic filters on the originating node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribeEvent {
    pub event_id: Option<EventId>,
    pub client_id: String,
    pub topic_filters: Vec<String>,
}

/// A message published on the originating node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishEvent {
    pub event_id: Option<EventId>,
    pub message: Message,
}

/// A client session came up on the originating node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCreateEvent {
    pub event_id: Option<EventId>,
    pub client_id: String,
}

/// A client session went away on the originating node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRemoveEvent {
    pub event_id: Option<EventId>,
    pub client_id: String,
}

/// Cumulative acknowledgement: every event with id ≤ `event_id` is acked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckEvent {
    pub event_id: EventId,
}

/// First frame from the dialer, carrying its session continuity token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub session_id: String,
}

/// Listener's handshake reply: the session to use and the id of the last
/// event durably applied under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub session_id: String,
    pub last_event_id: EventId,
}

/// Tagged sum of everything that crosses the internal channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Subscribe(SubscribeEvent),
    Unsubscribe(UnsubscribeEvent),
    Publish(PublishEvent),
    SessionCreate(SessionCreateEvent),
    SessionRemove(SessionRemoveEvent),
    Ack(AckEvent),
    ClientHello(ClientHello),
    ServerHello(ServerHello),
}

impl Event {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Subscribe(_) => EventKind::Subscribe,
            Self::Unsubscribe(_) => EventKind::Unsubscribe,
            Self::Publish(_) => EventKind::Publish,
            Self::SessionCreate(_) => EventKind::SessionCreate,
            Self::SessionRemove(_) => EventKind::SessionRemove,
            Self::Ack(_) => EventKind::Ack,
            Self::ClientHello(_) => EventKind::ClientHello,
            Self::ServerHello(_) => EventKind::ServerHello,
        }
    }

    /// The assigned event id. `None` for handshake variants and for events
    /// not yet dispatched from a peer queue.
    #[must_use]
    pub const fn id(&self) -> Option<EventId> {
        match self {
            Self::Subscribe(e) => e.event_id,
            Self::Unsubscribe(e) => e.event_id,
            Self::Publish(e) => e.event_id,
            Self::SessionCreate(e) => e.event_id,
            Self::SessionRemove(e) => e.event_id,
            Self::Ack(e) => Some(e.event_id),
            Self::ClientHello(_) | Self::ServerHello(_) => None,
        }
    }

    /// Stamps the event with a minted id. No-op for handshake variants.
    pub fn set_id(&mut self, id: EventId) {
        match self {
            Self::Subscribe(e) => e.event_id = Some(id),
            Self::Unsubscribe(e) => e.event_id = Some(id),
            Self::Publish(e) => e.event_id = Some(id),
            Self::SessionCreate(e) => e.event_id = Some(id),
            Self::SessionRemove(e) => e.event_id = Some(id),
            Self::Ack(e) => e.event_id = id,
            Self::ClientHello(_) | Self::ServerHello(_) => {}
        }
    }

    /// Encodes `tag || payload` into `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) -> Result<(), CodecError> {
        codec::write_u8(buf, self.kind() as u8);
        match self {
            Self::Subscribe(e) => {
                codec::write_u64(buf, e.event_id.unwrap_or_default());
                codec::write_string(buf, &e.client_id)?;
                if e.subscriptions.len() > usize::from(u16::MAX) {
                    return Err(CodecError::FieldTooLarge(e.subscriptions.len()));
                }
                codec::write_u16(buf, e.subscriptions.len() as u16);
                for sub in &e.subscriptions {
                    sub.encode(buf)?;
                }
            }
            Self::Unsubscribe(e) => {
                codec::write_u64(buf, e.event_id.unwrap_or_default());
                codec::write_string(buf, &e.client_id)?;
                if e.topic_filters.len() > usize::from(u16::MAX) {
                    return Err(CodecError::FieldTooLarge(e.topic_filters.len()));
                }
                codec::write_u16(buf, e.topic_filters.len() as u16);
                for filter in &e.topic_filters {
                    codec::write_string(buf, filter)?;
                }
            }
            Self::Publish(e) => {
                codec::write_u64(buf, e.event_id.unwrap_or_default());
                e.message.encode(buf)?;
            }
            Self::SessionCreate(e) => {
                codec::write_u64(buf, e.event_id.unwrap_or_default());
                codec::write_string(buf, &e.client_id)?;
            }
            Self::SessionRemove(e) => {
                codec::write_u64(buf, e.event_id.unwrap_or_default());
                codec::write_string(buf, &e.client_id)?;
            }
            Self::Ack(e) => codec::write_u64(buf, e.event_id),
            Self::ClientHello(e) => codec::write_string(buf, &e.session_id)?,
            Self::ServerHello(e) => {
                codec::write_string(buf, &e.session_id)?;
                codec::write_u64(buf, e.last_event_id);
            }
        }
        Ok(())
    }

    /// Decodes one event from `buf`, tag byte first.
    ///
    /// # Errors
    ///
    /// [`CodecError::InvalidEventType`] for an unknown tag;
    /// [`CodecError::ShortRead`] when the source ends mid-payload.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, CodecError> {
        let tag = codec::read_u8(buf)?;
        let kind = EventKind::from_tag(tag).ok_or(CodecError::InvalidEventType(tag))?;
        let event = match kind {
            EventKind::Subscribe => {
                let event_id = Some(codec::read_u64(buf)?);
                let client_id = codec::read_string(buf)?;
                let count = codec::read_u16(buf)?;
                let mut subscriptions = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    subscriptions.push(Subscription::decode(buf)?);
                }
                Self::Subscribe(SubscribeEvent {
                    event_id,
                    client_id,
                    subscriptions,
                })
            }
            EventKind::Unsubscribe => {
                let event_id = Some(codec::read_u64(buf)?);
                let client_id = codec::read_string(buf)?;
                let count = codec::read_u16(buf)?;
                let mut topic_filters = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    topic_filters.push(codec::read_string(buf)?);
                }
                Self::Unsubscribe(UnsubscribeEvent {
                    event_id,
                    client_id,
                    topic_filters,
                })
            }
            EventKind::Publish => Self::Publish(PublishEvent {
                event_id: Some(codec::read_u64(buf)?),
                message: Message::decode(buf)?,
            }),
            EventKind::SessionCreate => Self::SessionCreate(SessionCreateEvent {
                event_id: Some(codec::read_u64(buf)?),
                client_id: codec::read_string(buf)?,
            }),
            EventKind::SessionRemove => Self::SessionRemove(SessionRemoveEvent {
                event_id: Some(codec::read_u64(buf)?),
                client_id: codec::read_string(buf)?,
            }),
            EventKind::Ack => Self::Ack(AckEvent {
                event_id: codec::read_u64(buf)?,
            }),
            EventKind::ClientHello => Self::ClientHello(ClientHello {
                session_id: codec::read_string(buf)?,
            }),
            EventKind::ServerHello => Self::ServerHello(ServerHello {
                session_id: codec::read_string(buf)?,
                last_event_id: codec::read_u64(buf)?,
            }),
        };
        Ok(event)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ack(e) => write!(f, "Ack, id: {}", e.event_id),
            Self::ClientHello(e) => write!(f, "ClientHello, session_id: {}", e.session_id),
            Self::ServerHello(e) => write!(
                f,
                "ServerHello, session_id: {}, last_event_id: {}",
                e.session_id, e.last_event_id
            ),
            other => match other.id() {
                Some(id) => write!(f, "{}, id: {}", other.kind().as_str(), id),
                None => write!(f, "{}", other.kind().as_str()),
            },
        }
    }
}
