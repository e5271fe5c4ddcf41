//! Session handshake on the internal channel.
//!
//! The first frame from the dialer is `ClientHello` carrying its session
//! continuity token; the first frame back from the listener is
//! `ServerHello` naming the session to use and the last event id durably
//! applied under it. Any other first frame is a protocol error. Both sides
//! bound the inbound read with the handshake timeout; on expiry the session
//! fails and the dialer's backoff restarts.

use crate::framing::EventChannel;
use relaymesh_core::error::{ReplicationError, Result};
use relaymesh_core::event::{ClientHello, Event, ServerHello};
use std::time::Duration;

pub(crate) async fn recv_with_timeout(
    chan: &mut EventChannel,
    timeout: Duration,
) -> Result<Event> {
    match compio::time::timeout(timeout, chan.recv()).await {
        Ok(result) => result,
        Err(_elapsed) => Err(ReplicationError::HandshakeTimeout(timeout)),
    }
}

/// Dialer side: offer our continuity token, await the listener's verdict.
pub async fn client_handshake(
    chan: &mut EventChannel,
    session_id: &str,
    timeout: Duration,
) -> Result<ServerHello> {
    chan.send(&Event::ClientHello(ClientHello {
        session_id: session_id.to_owned(),
    }))
    .await?;
    match recv_with_timeout(chan, timeout).await? {
        Event::ServerHello(hello) => Ok(hello),
        other => Err(ReplicationError::unexpected(format!(
            "handshake expected ServerHello, got {other}"
        ))),
    }
}

/// Listener side: await the dialer's hello. The reply is sent by the
/// consumer once it has resolved the session against its registry.
pub async fn server_handshake(chan: &mut EventChannel, timeout: Duration) -> Result<ClientHello> {
    match recv_with_timeout(chan, timeout).await? {
        Event::ClientHello(hello) => Ok(hello),
        other => Err(ReplicationError::unexpected(format!(
            "handshake expected ClientHello, got {other}"
        ))),
    }
}
