//! End-to-end membership churn: real clusters replicating over localhost.

use relaymesh::broker::{Publisher, SubscribeOutcome, SubscriptionStore};
use relaymesh::dev_tracing::init_tracing;
use relaymesh::error::Result;
use relaymesh::event::{Event, SubscribeEvent};
use relaymesh::membership::{ChannelMembership, Member, MembershipEvent};
use relaymesh::message::{Message, Subscription};
use relaymesh::{Cluster, ClusterOptions, SessionOptions};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct RecordingPublisher {
    messages: parking_lot::Mutex<Vec<Message>>,
}

impl Publisher for RecordingPublisher {
    fn publish(&self, message: Message) {
        self.messages.lock().push(message);
    }
}

#[derive(Default)]
struct RecordingStore {
    clients: parking_lot::Mutex<Vec<String>>,
}

impl RecordingStore {
    fn has_client(&self, client_id: &str) -> bool {
        self.clients.lock().iter().any(|c| c == client_id)
    }
}

impl SubscriptionStore for RecordingStore {
    fn subscribe(
        &self,
        client_id: &str,
        subscriptions: &[Subscription],
    ) -> Result<Vec<SubscribeOutcome>> {
        self.clients.lock().push(client_id.to_owned());
        Ok(subscriptions
            .iter()
            .map(|sub| SubscribeOutcome {
                subscription: sub.clone(),
                already_existed: false,
            })
            .collect())
    }

    fn unsubscribe(&self, _: &str, _: &[String]) -> Result<()> {
        Ok(())
    }

    fn create_session(&self, _: &str) -> Result<()> {
        Ok(())
    }

    fn remove_session(&self, _: &str) -> Result<()> {
        Ok(())
    }
}

struct Node {
    cluster: Cluster,
    oracle: ChannelMembership,
    store: Arc<RecordingStore>,
    #[allow(dead_code)]
    publisher: Arc<RecordingPublisher>,
}

async fn start_node(name: &str) -> Node {
    let oracle = ChannelMembership::new();
    let store = Arc::new(RecordingStore::default());
    let publisher = Arc::new(RecordingPublisher::default());
    let options = ClusterOptions::default()
        .with_node_name(name)
        .with_internal_addr("127.0.0.1:0")
        .with_session(
            SessionOptions::default()
                .with_reconnect_ivl(Duration::from_millis(50))
                .with_handshake_timeout(Duration::from_secs(2)),
        );
    let cluster = Cluster::start(options, &oracle, publisher.clone(), store.clone(), None)
        .await
        .unwrap();
    Node {
        cluster,
        oracle,
        store,
        publisher,
    }
}

fn member(name: &str, addr: SocketAddr) -> Member {
    Member::new(name, addr.to_string())
}

fn subscribe_event(client: &str, topic: &str) -> Event {
    Event::Subscribe(SubscribeEvent {
        event_id: None,
        client_id: client.into(),
        subscriptions: vec![Subscription::new(topic)],
    })
}

async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        compio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

#[compio::test]
async fn membership_churn_routes_broadcasts() {
    init_tracing();

    let a = start_node("a").await;
    let b = start_node("b").await;
    let c = start_node("c").await;

    // A observes B and C joining.
    a.oracle
        .sender()
        .send(MembershipEvent::MemberJoin(vec![
            member("b", b.cluster.local_addr()),
            member("c", c.cluster.local_addr()),
        ]))
        .unwrap();
    wait_until("both members tracked", || a.cluster.members().len() == 2).await;

    // A broadcast between the joins and the fail reaches both peers.
    a.cluster.broadcast(subscribe_event("client-1", "t/1"));
    wait_until("b applied client-1", || b.store.has_client("client-1")).await;
    wait_until("c applied client-1", || c.store.has_client("client-1")).await;

    // B fails; its producer is stopped and its queue closed.
    a.oracle
        .sender()
        .send(MembershipEvent::MemberFail(vec![member(
            "b",
            b.cluster.local_addr(),
        )]))
        .unwrap();
    wait_until("b untracked", || a.cluster.members().len() == 1).await;

    // A broadcast after the fail reaches only the survivor.
    a.cluster.broadcast(subscribe_event("client-2", "t/2"));
    wait_until("c applied client-2", || c.store.has_client("client-2")).await;
    compio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        !b.store.has_client("client-2"),
        "failed member must not receive post-fail broadcasts"
    );

    a.cluster.shutdown().await;
    b.cluster.shutdown().await;
    c.cluster.shutdown().await;
}

#[compio::test]
async fn multicast_targets_named_peers_only() {
    let a = start_node("a").await;
    let b = start_node("b").await;
    let c = start_node("c").await;

    a.oracle
        .sender()
        .send(MembershipEvent::MemberJoin(vec![
            member("b", b.cluster.local_addr()),
            member("c", c.cluster.local_addr()),
        ]))
        .unwrap();
    wait_until("both members tracked", || a.cluster.members().len() == 2).await;

    // Unknown names are skipped, named peers receive the event.
    a.cluster.multicast(
        subscribe_event("client-3", "t/3"),
        vec!["b".to_owned(), "ghost".to_owned()],
    );
    wait_until("b applied client-3", || b.store.has_client("client-3")).await;
    compio::time::sleep(Duration::from_millis(200)).await;
    assert!(!c.store.has_client("client-3"));

    a.cluster.shutdown().await;
    b.cluster.shutdown().await;
    c.cluster.shutdown().await;
}

#[compio::test]
async fn rejoin_after_fail_creates_fresh_producer() {
    let a = start_node("a").await;
    let b = start_node("b").await;

    a.oracle
        .sender()
        .send(MembershipEvent::MemberJoin(vec![member(
            "b",
            b.cluster.local_addr(),
        )]))
        .unwrap();
    a.cluster.broadcast(subscribe_event("client-1", "t/1"));
    wait_until("b applied client-1", || b.store.has_client("client-1")).await;

    a.oracle
        .sender()
        .send(MembershipEvent::MemberLeave(vec![member(
            "b",
            b.cluster.local_addr(),
        )]))
        .unwrap();
    wait_until("b untracked", || a.cluster.members().is_empty()).await;

    a.oracle
        .sender()
        .send(MembershipEvent::MemberJoin(vec![member(
            "b",
            b.cluster.local_addr(),
        )]))
        .unwrap();
    wait_until("b tracked again", || a.cluster.members().len() == 1).await;

    a.cluster.broadcast(subscribe_event("client-2", "t/2"));
    wait_until("b applied client-2", || b.store.has_client("client-2")).await;

    a.cluster.shutdown().await;
    b.cluster.shutdown().await;
}
