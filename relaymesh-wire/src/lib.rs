//! Relaymesh Wire
//!
//! The internal-channel protocol layer: framed event transport over a
//! long-lived TCP connection, the producer/consumer handshake that resumes
//! or resynchronizes a session after disconnects, and the two session
//! loops themselves.
//!
//! Layering:
//! - [`framing`]: tag-delimited event stream, incremental decoding
//! - [`handshake`]: hello exchange with timeout
//! - [`producer`]: dialer side: reconnect loop, session negotiation,
//!   credit-1 streaming against the peer queue
//! - [`consumer`]: listener side: session registry, apply-and-ack loop

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::future_not_send)] // single-threaded runtime

pub mod consumer;
pub mod framing;
pub mod handshake;
pub mod producer;

pub use consumer::{EventConsumer, SessionRegistry};
pub use framing::{EventChannel, EventDecoder};
pub use producer::{EventProducer, FullResyncMode, ProducerHandle, SessionOptions};
