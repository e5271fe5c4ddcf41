//! Producer session: the outbound half of pair-wise replication.
//!
//! One producer exists per remote peer. It exclusively owns that peer's
//! event queue, dials the peer's advertised internal address, negotiates
//! session continuity, then streams queued events under a single-slot send
//! credit: mint → send → await cumulative ack → re-grant. The credit bounds
//! the wire to one in-flight event per peer and doubles as the recovery
//! pointer on reconnect.
//!
//! The session runs as one pump task; with the credit fixed at one the
//! reference's fetch/write/read activities are strictly sequential, and the
//! single-threaded runtime never splits a stream. Widening the credit into
//! a windowed scheme only requires growing the permit channel; acks are
//! already cumulative.

use crate::framing::EventChannel;
use crate::handshake;
use compio::net::TcpStream;
use futures::FutureExt;
use relaymesh_core::backoff::Backoff;
use relaymesh_core::broker::FullResync;
use relaymesh_core::error::{ReplicationError, Result};
use relaymesh_core::event::{Event, EventId};
use relaymesh_core::queue::{EventQueue, QueueError};
use relaymesh_core::tcp;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Timing knobs for one replication session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Delay between reconnect attempts.
    pub reconnect_ivl: Duration,
    /// How long either side waits for the peer's handshake frame.
    pub handshake_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            reconnect_ivl: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

impl SessionOptions {
    #[must_use]
    pub fn with_reconnect_ivl(mut self, ivl: Duration) -> Self {
        self.reconnect_ivl = ivl;
        self
    }

    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

/// What a producer does when the peer reports a lost session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FullResyncMode {
    /// Accept the reset: renumber from zero and replay whatever the queue
    /// still retains. State replicated before the retained window is lost
    /// for that peer; a warning is logged.
    #[default]
    QueueReplay,
    /// Ask the [`FullResync`] collaborator to seed authoritative local
    /// state into the peer queue before streaming resumes.
    Delegated,
}

/// Single-slot send credit.
///
/// Granted once after a successful handshake and again on every ack, so at
/// most one dispatched event is unacknowledged at any instant.
struct ReadPermit {
    tx: flume::Sender<()>,
    rx: flume::Receiver<()>,
}

impl ReadPermit {
    fn new() -> Self {
        let (tx, rx) = flume::bounded(1);
        Self { tx, rx }
    }

    fn grant(&self) {
        let _ = self.tx.try_send(());
    }

    async fn acquire(&self) {
        let _ = self.rx.recv_async().await;
    }
}

/// Outbound replication session for one peer.
pub struct EventProducer {
    peer: String,
    remote_addr: String,
    queue: Arc<EventQueue>,
    options: SessionOptions,
    resync_mode: FullResyncMode,
    resync: Option<Arc<dyn FullResync>>,
    exit: flume::Receiver<()>,
    /// Continuity token; empty until the first handshake assigns one.
    session_id: String,
    /// Id to mint for the next dispatched event.
    next_event_id: EventId,
    permit: ReadPermit,
}

/// Owning handle to a spawned producer. Dropping the handle's exit sender
/// tells the session to unwind; [`stop`](ProducerHandle::stop) waits for
/// it.
pub struct ProducerHandle {
    exit_tx: flume::Sender<()>,
    task: compio::runtime::Task<()>,
}

impl ProducerHandle {
    /// Signals the producer to exit and waits until it has quiesced.
    pub async fn stop(self) {
        drop(self.exit_tx);
        let _ = self.task.await;
    }
}

impl EventProducer {
    /// Spawns a producer replicating `queue` to `remote_addr`.
    #[must_use]
    pub fn spawn(
        peer: impl Into<String>,
        remote_addr: impl Into<String>,
        queue: Arc<EventQueue>,
        options: SessionOptions,
        resync_mode: FullResyncMode,
        resync: Option<Arc<dyn FullResync>>,
    ) -> ProducerHandle {
        let (exit_tx, exit_rx) = flume::bounded(1);
        let producer = Self {
            peer: peer.into(),
            remote_addr: remote_addr.into(),
            queue,
            options,
            resync_mode,
            resync,
            exit: exit_rx,
            session_id: String::new(),
            next_event_id: 0,
            permit: ReadPermit::new(),
        };
        let task = compio::runtime::spawn(producer.run());
        ProducerHandle { exit_tx, task }
    }

    /// Reconnect loop: serve one connection, back off, try again, until the
    /// coordinator signals exit or closes the queue.
    async fn run(mut self) {
        let mut backoff = Backoff::fixed(self.options.reconnect_ivl);
        loop {
            match self.serve_conn().await {
                Err(e) if e.is_terminal() => {
                    debug!(peer = %self.peer, "producer exiting: {e}");
                    return;
                }
                Err(e) if e.is_disconnect() || e.is_transient() => {
                    debug!(peer = %self.peer, error = %e, "producer connection lost");
                }
                Err(e) => {
                    error!(peer = %self.peer, error = %e, "producer connection error");
                }
                Ok(()) => unreachable!("serve_conn only returns on error"),
            }
            if self.queue.is_closed() {
                return;
            }
            futures::select! {
                _ = self.exit.recv_async().fuse() => return,
                () = compio::time::sleep(backoff.next_delay()).fuse() => {}
            }
        }
    }

    async fn serve_conn(&mut self) -> Result<()> {
        let stream = futures::select! {
            _ = self.exit.recv_async().fuse() => return Err(ReplicationError::Cancelled),
            res = TcpStream::connect(self.remote_addr.as_str()).fuse() => res?,
        };
        tcp::enable_nodelay(&stream)?;
        let mut chan = EventChannel::new(stream);

        futures::select! {
            _ = self.exit.recv_async().fuse() => return Err(ReplicationError::Cancelled),
            res = Self::negotiate(
                &mut chan,
                &self.queue,
                &mut self.session_id,
                &mut self.next_event_id,
                &self.peer,
                &self.options,
                self.resync_mode,
                self.resync.as_deref(),
            ).fuse() => res?,
        }
        info!(peer = %self.peer, session_id = %self.session_id, "producer handshake succeeded");

        // Prime the cycle: exactly one event may be in flight.
        self.permit.grant();
        self.pump(&mut chan).await
    }

    /// Handshake and session-position negotiation.
    ///
    /// Resume (same session, non-zero last id): the reported id is an
    /// implicit cumulative ack: drop everything the peer already applied,
    /// rewind the read position to the head so an unapplied in-flight event
    /// is re-dispatched, and keep minting strictly above the applied ids.
    ///
    /// Reset (new session, or nothing applied): adopt the peer's session,
    /// renumber from zero and replay from the head per the configured
    /// full-resync mode.
    #[allow(clippy::too_many_arguments)]
    async fn negotiate(
        chan: &mut EventChannel,
        queue: &EventQueue,
        session_id: &mut String,
        next_event_id: &mut EventId,
        peer: &str,
        options: &SessionOptions,
        resync_mode: FullResyncMode,
        resync: Option<&dyn FullResync>,
    ) -> Result<()> {
        let hello = handshake::client_handshake(chan, session_id, options.handshake_timeout).await?;
        if hello.session_id == *session_id && hello.last_event_id > 0 {
            match queue.ack(hello.last_event_id) {
                // The ack for the in-flight event was lost with the
                // connection; it is settled now.
                Ok(()) => {}
                // Acks were already processed before the drop.
                Err(QueueError::IdNotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
            queue.set_read_pos(0);
            *next_event_id = hello.last_event_id + 1;
            debug!(
                peer,
                last_event_id = hello.last_event_id,
                "resuming replication session"
            );
        } else {
            *session_id = hello.session_id;
            *next_event_id = 0;
            queue.set_read_pos(0);
            match resync_mode {
                FullResyncMode::QueueReplay => {
                    warn!(peer, "peer lost session state; replaying retained queue only");
                }
                FullResyncMode::Delegated => {
                    let Some(resync) = resync else {
                        return Err(ReplicationError::apply(
                            "full resync is delegated but no collaborator is configured",
                        ));
                    };
                    resync.resync(peer, queue, hello.last_event_id).await?;
                }
            }
        }
        Ok(())
    }

    /// Steady state: credit → fetch/mint → send → cumulative ack, repeated
    /// until the connection, the queue or the coordinator ends the session.
    async fn pump(&mut self, chan: &mut EventChannel) -> Result<()> {
        loop {
            futures::select! {
                _ = self.exit.recv_async().fuse() => return Err(ReplicationError::Cancelled),
                () = self.permit.acquire().fuse() => {}
            }

            let event = futures::select! {
                _ = self.exit.recv_async().fuse() => return Err(ReplicationError::Cancelled),
                event = self.queue.read(self.next_event_id).fuse() => event,
            };
            let Some(event) = event else {
                return Err(QueueError::Closed.into());
            };
            self.next_event_id += 1;

            chan.send(&event).await?;

            let reply = futures::select! {
                _ = self.exit.recv_async().fuse() => return Err(ReplicationError::Cancelled),
                reply = chan.recv().fuse() => reply?,
            };
            match reply {
                Event::Ack(ack) => {
                    self.queue.ack(ack.event_id)?;
                    self.permit.grant();
                }
                other => {
                    return Err(ReplicationError::unexpected(format!(
                        "expected Ack, got {other}"
                    )))
                }
            }
        }
    }
}
