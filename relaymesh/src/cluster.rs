//! Cluster coordinator.
//!
//! Subscribes to the membership oracle and maintains the producer side of
//! replication: a joined member gets a fresh bounded queue and a producer
//! dialing its advertised `internal_addr` tag; a failed or departed member
//! has its queue closed and its producer stopped, and the mapping is
//! dropped only once the producer has quiesced.
//!
//! The coordinator also operates the internal TCP listener, serving one
//! consumer session per accepted socket. All consumers share the broker
//! collaborators and one session registry, which is what lets a peer resume
//! across its reconnects.
//!
//! Broadcast and multicast append to peer queues through the hub task, so
//! membership changes and appends never race. A broadcast is not atomic
//! across peers; each pair's stream stays ordered.

use crate::config::ClusterOptions;
use compio::net::TcpListener;
use dashmap::DashMap;
use futures::FutureExt;
use hashbrown::HashMap;
use relaymesh_core::backoff::Backoff;
use relaymesh_core::broker::{FullResync, Publisher, SubscriptionStore};
use relaymesh_core::event::Event;
use relaymesh_core::membership::{Member, MembershipEvent, MembershipOracle};
use relaymesh_core::queue::EventQueue;
use relaymesh_wire::consumer::{EventConsumer, SessionRegistry};
use relaymesh_wire::producer::{EventProducer, FullResyncMode, ProducerHandle, SessionOptions};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

enum ClusterCmd {
    Broadcast(Event),
    Multicast(Event, Vec<String>),
}

/// A running cluster replication node.
///
/// The handle owns the coordinator and listener tasks; [`shutdown`]
/// (Cluster::shutdown) stops every producer, closes all peer queues and
/// waits for the hub to quiesce.
pub struct Cluster {
    local_name: String,
    local_addr: SocketAddr,
    cmd_tx: flume::Sender<ClusterCmd>,
    members: Arc<DashMap<String, Member>>,
    exit_tx: Option<flume::Sender<()>>,
    hub_task: Option<compio::runtime::Task<()>>,
    listener_task: Option<compio::runtime::Task<()>>,
}

impl Cluster {
    /// Binds the internal listener and starts the coordinator.
    ///
    /// # Errors
    ///
    /// Listener bind failure is fatal: without it the node cannot serve the
    /// cluster.
    pub async fn start(
        options: ClusterOptions,
        oracle: &dyn MembershipOracle,
        publisher: Arc<dyn Publisher>,
        store: Arc<dyn SubscriptionStore>,
        resync: Option<Arc<dyn FullResync>>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(options.internal_addr.as_str()).await?;
        let local_addr = listener.local_addr()?;
        info!(
            node_name = %options.node_name,
            internal_addr = %local_addr,
            "cluster replication listening"
        );

        let (cmd_tx, cmd_rx) = flume::unbounded();
        let (exit_tx, exit_rx) = flume::bounded(1);
        let members = Arc::new(DashMap::new());
        let registry = Arc::new(SessionRegistry::new());

        let listener_task = compio::runtime::spawn(serve_listener(
            listener,
            publisher,
            store,
            registry,
            options.session.clone(),
            Backoff::new(options.accept_backoff_base, options.accept_backoff_max),
            exit_rx.clone(),
        ));

        let membership_rx = oracle.events();
        let mut hub = ClusterHub {
            local_name: options.node_name.clone(),
            queue_capacity: options.queue_capacity,
            session: options.session,
            resync_mode: options.full_resync,
            resync,
            producers: HashMap::new(),
            members: members.clone(),
            membership_rx,
            cmd_rx,
            exit: exit_rx,
        };
        // Members seen before we subscribed still get producers.
        hub.node_join(oracle.members());
        let hub_task = compio::runtime::spawn(hub.run());

        Ok(Self {
            local_name: options.node_name,
            local_addr,
            cmd_tx,
            members,
            exit_tx: Some(exit_tx),
            hub_task: Some(hub_task),
            listener_task: Some(listener_task),
        })
    }

    /// This node's name.
    #[must_use]
    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// Bound address of the internal listener.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Snapshot of tracked remote members.
    #[must_use]
    pub fn members(&self) -> Vec<Member> {
        self.members.iter().map(|e| e.value().clone()).collect()
    }

    /// Replicates `event` to every live peer.
    pub fn broadcast(&self, event: Event) {
        if self.cmd_tx.send(ClusterCmd::Broadcast(event)).is_err() {
            warn!("broadcast after cluster shutdown");
        }
    }

    /// Replicates `event` to the named peers, skipping unknown names.
    pub fn multicast(&self, event: Event, names: Vec<String>) {
        if self.cmd_tx.send(ClusterCmd::Multicast(event, names)).is_err() {
            warn!("multicast after cluster shutdown");
        }
    }

    /// Stops the listener and all producers, then waits for quiescence.
    pub async fn shutdown(mut self) {
        drop(self.exit_tx.take());
        if let Some(task) = self.hub_task.take() {
            let _ = task.await;
        }
        if let Some(task) = self.listener_task.take() {
            let _ = task.await;
        }
        debug!(node_name = %self.local_name, "cluster shut down");
    }
}

struct PeerLink {
    queue: Arc<EventQueue>,
    handle: ProducerHandle,
}

struct ClusterHub {
    local_name: String,
    queue_capacity: usize,
    session: SessionOptions,
    resync_mode: FullResyncMode,
    resync: Option<Arc<dyn FullResync>>,
    producers: HashMap<String, PeerLink>,
    members: Arc<DashMap<String, Member>>,
    membership_rx: flume::Receiver<MembershipEvent>,
    cmd_rx: flume::Receiver<ClusterCmd>,
    exit: flume::Receiver<()>,
}

impl ClusterHub {
    async fn run(mut self) {
        loop {
            futures::select! {
                _ = self.exit.recv_async().fuse() => break,
                event = self.membership_rx.recv_async().fuse() => match event {
                    Ok(event) => self.on_membership(event).await,
                    // Oracle dropped: no further membership truth exists.
                    Err(_) => break,
                },
                cmd = self.cmd_rx.recv_async().fuse() => match cmd {
                    Ok(cmd) => self.on_command(cmd),
                    Err(_) => break,
                },
            }
        }
        self.stop_all_producers().await;
    }

    async fn on_membership(&mut self, event: MembershipEvent) {
        match event {
            MembershipEvent::MemberJoin(members) => self.node_join(members),
            MembershipEvent::MemberLeave(members)
            | MembershipEvent::MemberFail(members)
            | MembershipEvent::MemberReap(members) => self.node_fail(members).await,
            MembershipEvent::MemberUpdate(_)
            | MembershipEvent::User { .. }
            | MembershipEvent::Query { .. } => {}
        }
    }

    fn node_join(&mut self, members: Vec<Member>) {
        for member in members {
            if member.name == self.local_name || self.producers.contains_key(&member.name) {
                continue;
            }
            let Some(remote_addr) = member.internal_addr().map(str::to_owned) else {
                warn!(node_name = %member.name, "joined member has no internal_addr tag");
                continue;
            };
            info!(
                node_name = %member.name,
                remote_addr = %remote_addr,
                "node joined, starting event producer"
            );
            let queue = Arc::new(EventQueue::new(member.name.clone(), self.queue_capacity));
            let handle = EventProducer::spawn(
                member.name.clone(),
                remote_addr,
                queue.clone(),
                self.session.clone(),
                self.resync_mode,
                self.resync.clone(),
            );
            self.members.insert(member.name.clone(), member.clone());
            self.producers.insert(member.name, PeerLink { queue, handle });
        }
    }

    async fn node_fail(&mut self, members: Vec<Member>) {
        for member in members {
            if member.name == self.local_name {
                continue;
            }
            self.members.remove(&member.name);
            if let Some(link) = self.producers.remove(&member.name) {
                info!(node_name = %member.name, "node down, stopping event producer");
                // Closing the queue wakes a producer blocked in fetch.
                link.queue.close();
                link.handle.stop().await;
            }
        }
    }

    fn on_command(&mut self, cmd: ClusterCmd) {
        match cmd {
            ClusterCmd::Broadcast(event) => {
                for (name, link) in &self.producers {
                    Self::append(name, link, event.clone());
                }
            }
            ClusterCmd::Multicast(event, names) => {
                for name in names {
                    if let Some(link) = self.producers.get(&name) {
                        Self::append(&name, link, event.clone());
                    }
                }
            }
        }
    }

    fn append(name: &str, link: &PeerLink, event: Event) {
        // Overflow drops the event for this peer only; the local operation
        // already happened.
        if let Err(e) = link.queue.append(event) {
            warn!(peer = %name, error = %e, "dropping replication event");
        }
    }

    async fn stop_all_producers(&mut self) {
        for (name, link) in self.producers.drain() {
            link.queue.close();
            link.handle.stop().await;
            debug!(node_name = %name, "producer stopped");
        }
    }
}

async fn serve_listener(
    listener: TcpListener,
    publisher: Arc<dyn Publisher>,
    store: Arc<dyn SubscriptionStore>,
    registry: Arc<SessionRegistry>,
    session: SessionOptions,
    mut backoff: Backoff,
    exit: flume::Receiver<()>,
) {
    loop {
        futures::select! {
            _ = exit.recv_async().fuse() => return,
            res = listener.accept().fuse() => match res {
                Ok((stream, remote)) => {
                    backoff.reset();
                    debug!(remote = %remote, "accepted internal connection");
                    let consumer = EventConsumer::new(
                        stream,
                        publisher.clone(),
                        store.clone(),
                        registry.clone(),
                        session.clone(),
                    );
                    compio::runtime::spawn(consumer.serve()).detach();
                }
                Err(e) => {
                    warn!(error = %e, "accept error on internal listener");
                    compio::time::sleep(backoff.next_delay()).await;
                }
            }
        }
    }
}
