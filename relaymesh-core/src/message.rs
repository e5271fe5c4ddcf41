//! Broker domain payloads carried inside replicated events.
//!
//! These are the pieces of broker state that cross the cluster channel: a
//! client subscription and an application message. Both encode with the
//! checked codec so replicated frames stay byte-compatible across nodes.

use crate::codec::{self, CodecError};
use bytes::{Buf, BufMut, Bytes};
use thiserror::Error;

/// Rejected subscription options.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid subscription: {0}")]
pub struct InvalidSubscription(&'static str);

/// A single client subscription as replicated between nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Share name of a shared subscription; empty for non-shared ones.
    pub share_name: String,
    /// Topic filter, not including the share name.
    pub topic_filter: String,
    /// Subscription identifier.
    pub id: u32,
    /// QoS level (0..=2).
    pub qos: u8,
    /// No Local option.
    pub no_local: bool,
    /// Retain As Published option.
    pub retain_as_published: bool,
    /// Retain Handling option (0..=2).
    pub retain_handling: u8,
}

impl Subscription {
    /// A plain subscription to `topic_filter` with everything else defaulted.
    pub fn new(topic_filter: impl Into<String>) -> Self {
        Self {
            share_name: String::new(),
            topic_filter: topic_filter.into(),
            id: 0,
            qos: 0,
            no_local: false,
            retain_as_published: false,
            retain_handling: 0,
        }
    }

    /// Full topic name including the share prefix, if any.
    #[must_use]
    pub fn full_topic_name(&self) -> String {
        if self.share_name.is_empty() {
            self.topic_filter.clone()
        } else {
            format!("$share/{}/{}", self.share_name, self.topic_filter)
        }
    }

    /// Validates the subscription options.
    pub fn validate(&self) -> Result<(), InvalidSubscription> {
        if self.topic_filter.is_empty() {
            return Err(InvalidSubscription("empty topic filter"));
        }
        if self.qos > 2 {
            return Err(InvalidSubscription("invalid qos"));
        }
        if self.retain_handling > 2 {
            return Err(InvalidSubscription("invalid retain handling"));
        }
        Ok(())
    }

    pub fn encode(&self, buf: &mut impl BufMut) -> Result<(), CodecError> {
        codec::write_string(buf, &self.share_name)?;
        codec::write_string(buf, &self.topic_filter)?;
        codec::write_u32(buf, self.id);
        codec::write_u8(buf, self.qos);
        codec::write_bool(buf, self.no_local);
        codec::write_bool(buf, self.retain_as_published);
        codec::write_u8(buf, self.retain_handling);
        Ok(())
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, CodecError> {
        Ok(Self {
            share_name: codec::read_string(buf)?,
            topic_filter: codec::read_string(buf)?,
            id: codec::read_u32(buf)?,
            qos: codec::read_u8(buf)?,
            no_local: codec::read_bool(buf)?,
            retain_as_published: codec::read_bool(buf)?,
            retain_handling: codec::read_u8(buf)?,
        })
    }
}

/// An application message replicated to remote subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Topic the message was published to.
    pub topic: String,
    /// Opaque application payload.
    pub payload: Bytes,
    /// QoS level the message was published with.
    pub qos: u8,
    /// Whether the message was retained.
    pub retained: bool,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: 0,
            retained: false,
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) -> Result<(), CodecError> {
        codec::write_string(buf, &self.topic)?;
        codec::write_binary(buf, &self.payload)?;
        codec::write_u8(buf, self.qos);
        codec::write_bool(buf, self.retained);
        Ok(())
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, CodecError> {
        Ok(Self {
            topic: codec::read_string(buf)?,
            payload: codec::read_binary(buf)?,
            qos: codec::read_u8(buf)?,
            retained: codec::read_bool(buf)?,
        })
    }
}
