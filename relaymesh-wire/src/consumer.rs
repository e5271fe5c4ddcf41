//! Consumer session: the inbound half of pair-wise replication.
//!
//! One consumer exists per accepted connection on the internal listener.
//! It resolves session continuity against the listener-wide
//! [`SessionRegistry`], then applies each decoded event to the local broker
//! collaborators and answers with a cumulative ack. Application is strictly
//! in receive order, so acking every event is correct.
//!
//! A collaborator failure ends the session; the peer's producer reconnects
//! and resumes from the last acknowledged id.

use crate::framing::EventChannel;
use crate::handshake;
use crate::producer::SessionOptions;
use compio::net::TcpStream;
use dashmap::DashMap;
use relaymesh_core::broker::{Publisher, SubscriptionStore};
use relaymesh_core::error::{ReplicationError, Result};
use relaymesh_core::event::{AckEvent, Event, EventId, ServerHello};
use relaymesh_core::tcp;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Session continuity state shared by every consumer of one listener.
///
/// Maps a session id to the highest event id applied under it. An entry
/// surviving a reconnect is what makes resume possible; losing the registry
/// (process restart) sends peers down the reset path.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, EventId>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the applied position for a session offered by a peer.
    #[must_use]
    pub fn resume(&self, session_id: &str) -> Option<EventId> {
        self.sessions.get(session_id).map(|entry| *entry)
    }

    /// Mints and registers a fresh session.
    #[must_use]
    pub fn begin(&self) -> String {
        let session_id = format!("{:032x}", rand::random::<u128>());
        self.sessions.insert(session_id.clone(), 0);
        session_id
    }

    /// Records the highest applied id for a session.
    pub fn record(&self, session_id: &str, id: EventId) {
        self.sessions.insert(session_id.to_owned(), id);
    }
}

/// Inbound replication session over one accepted socket.
pub struct EventConsumer {
    chan: EventChannel,
    publisher: Arc<dyn Publisher>,
    store: Arc<dyn SubscriptionStore>,
    registry: Arc<SessionRegistry>,
    options: SessionOptions,
    session_id: String,
    acked_event_id: EventId,
}

impl EventConsumer {
    #[must_use]
    pub fn new(
        stream: TcpStream,
        publisher: Arc<dyn Publisher>,
        store: Arc<dyn SubscriptionStore>,
        registry: Arc<SessionRegistry>,
        options: SessionOptions,
    ) -> Self {
        if let Err(e) = tcp::enable_nodelay(&stream) {
            warn!(error = %e, "could not enable TCP_NODELAY on inbound stream");
        }
        Self {
            chan: EventChannel::new(stream),
            publisher,
            store,
            registry,
            options,
            session_id: String::new(),
            acked_event_id: 0,
        }
    }

    /// Runs the session until the socket closes or a failure ends it.
    pub async fn serve(mut self) {
        match self.run().await {
            Err(e) if e.is_disconnect() => {
                debug!(session_id = %self.session_id, "consumer connection closed");
            }
            Err(e) => {
                error!(session_id = %self.session_id, error = %e, "consumer session error");
            }
            Ok(()) => unreachable!("consumer loop only returns on error"),
        }
    }

    async fn run(&mut self) -> Result<()> {
        self.handshake().await?;
        loop {
            let event = self.chan.recv().await?;
            let Some(id) = event.id() else {
                return Err(ReplicationError::unexpected(format!(
                    "replicated event without id: {event}"
                )));
            };
            self.apply(event)?;
            self.chan.send(&Event::Ack(AckEvent { event_id: id })).await?;
            self.acked_event_id = id;
            self.registry.record(&self.session_id, id);
        }
    }

    /// Answers the peer's hello: resume a known session at its applied
    /// position, or mint a fresh one reporting zero so the peer performs a
    /// full resync.
    async fn handshake(&mut self) -> Result<()> {
        let hello = handshake::server_handshake(&mut self.chan, self.options.handshake_timeout).await?;
        match self.registry.resume(&hello.session_id) {
            Some(acked) => {
                self.session_id = hello.session_id;
                self.acked_event_id = acked;
                debug!(
                    session_id = %self.session_id,
                    last_event_id = acked,
                    "resuming consumer session"
                );
            }
            None => {
                self.session_id = self.registry.begin();
                self.acked_event_id = 0;
                debug!(session_id = %self.session_id, "starting fresh consumer session");
            }
        }
        self.chan
            .send(&Event::ServerHello(ServerHello {
                session_id: self.session_id.clone(),
                last_event_id: self.acked_event_id,
            }))
            .await
    }

    /// Applies one replicated event to local broker state.
    fn apply(&self, event: Event) -> Result<()> {
        debug!(event = %event, "applying replicated event");
        match event {
            Event::Publish(e) => {
                self.publisher.publish(e.message);
                Ok(())
            }
            Event::Subscribe(e) => {
                self.store.subscribe(&e.client_id, &e.subscriptions)?;
                Ok(())
            }
            Event::Unsubscribe(e) => self.store.unsubscribe(&e.client_id, &e.topic_filters),
            Event::SessionCreate(e) => self.store.create_session(&e.client_id),
            Event::SessionRemove(e) => self.store.remove_session(&e.client_id),
            other => Err(ReplicationError::unexpected(format!(
                "consumer cannot apply {other}"
            ))),
        }
    }
}
