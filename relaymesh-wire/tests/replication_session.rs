//! Producer/consumer protocol tests over localhost TCP.
//!
//! The producer side is exercised against a scripted peer driving raw
//! [`EventChannel`] frames, which pins down the exact wire behavior:
//! ordering, id minting, resume, reset and the one-in-flight credit.

use compio::net::{TcpListener, TcpStream};
use relaymesh_core::broker::{Publisher, SubscribeOutcome, SubscriptionStore};
use relaymesh_core::error::{ReplicationError, Result};
use relaymesh_core::event::{
    AckEvent, ClientHello, Event, PublishEvent, ServerHello, SessionCreateEvent,
    SessionRemoveEvent, SubscribeEvent, UnsubscribeEvent,
};
use relaymesh_core::message::{Message, Subscription};
use relaymesh_core::queue::EventQueue;
use relaymesh_wire::consumer::{EventConsumer, SessionRegistry};
use relaymesh_wire::framing::EventChannel;
use relaymesh_wire::producer::{EventProducer, FullResyncMode, SessionOptions};
use std::sync::Arc;
use std::time::Duration;

fn subscribe_event(client: &str, topic: &str) -> Event {
    Event::Subscribe(SubscribeEvent {
        event_id: None,
        client_id: client.into(),
        subscriptions: vec![Subscription::new(topic)],
    })
}

fn publish_event(topic: &str, payload: &'static [u8]) -> Event {
    Event::Publish(PublishEvent {
        event_id: None,
        message: Message::new(topic, payload),
    })
}

fn fast_session() -> SessionOptions {
    SessionOptions::default()
        .with_reconnect_ivl(Duration::from_millis(50))
        .with_handshake_timeout(Duration::from_secs(2))
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

async fn expect_client_hello(chan: &mut EventChannel) -> ClientHello {
    match chan.recv().await.unwrap() {
        Event::ClientHello(hello) => hello,
        other => panic!("expected ClientHello, got {other}"),
    }
}

async fn greet(chan: &mut EventChannel, session_id: &str, last_event_id: u64) {
    chan.send(&Event::ServerHello(ServerHello {
        session_id: session_id.into(),
        last_event_id,
    }))
    .await
    .unwrap();
}

async fn recv_and_ack(chan: &mut EventChannel) -> Event {
    let event = chan.recv().await.unwrap();
    let id = event.id().expect("replicated event carries an id");
    chan.send(&Event::Ack(AckEvent { event_id: id }))
        .await
        .unwrap();
    event
}

fn client_of(event: &Event) -> &str {
    match event {
        Event::Subscribe(e) => &e.client_id,
        other => panic!("expected Subscribe, got {other}"),
    }
}

#[compio::test]
async fn order_preservation_with_dense_ids() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let queue = Arc::new(EventQueue::new("peer", 64));
    queue.append(subscribe_event("a", "t/a")).unwrap();
    queue.append(subscribe_event("b", "t/b")).unwrap();
    queue.append(publish_event("t/m", b"m")).unwrap();

    let handle = EventProducer::spawn(
        "peer",
        addr.to_string(),
        queue.clone(),
        fast_session(),
        FullResyncMode::QueueReplay,
        None,
    );

    let (stream, _) = listener.accept().await.unwrap();
    let mut chan = EventChannel::new(stream);
    let hello = expect_client_hello(&mut chan).await;
    assert!(hello.session_id.is_empty(), "no continuity token yet");
    greet(&mut chan, "sess-1", 0).await;

    let mut seen = Vec::new();
    for expect_id in 0..3u64 {
        let event = recv_and_ack(&mut chan).await;
        assert_eq!(event.id(), Some(expect_id), "ids are dense from zero");
        seen.push(event);
    }
    assert_eq!(client_of(&seen[0]), "a");
    assert_eq!(client_of(&seen[1]), "b");
    assert!(matches!(&seen[2], Event::Publish(_)));

    // Every event acked: the queue drains completely.
    wait_until("queue drained", || queue.is_empty()).await;
    handle.stop().await;
}

#[compio::test]
async fn at_most_one_event_in_flight() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let queue = Arc::new(EventQueue::new("peer", 64));
    for client in ["a", "b", "c"] {
        queue.append(subscribe_event(client, "t")).unwrap();
    }
    let handle = EventProducer::spawn(
        "peer",
        addr.to_string(),
        queue.clone(),
        fast_session(),
        FullResyncMode::QueueReplay,
        None,
    );

    let (stream, _) = listener.accept().await.unwrap();
    let mut chan = EventChannel::new(stream);
    expect_client_hello(&mut chan).await;
    greet(&mut chan, "sess-1", 0).await;

    let first = chan.recv().await.unwrap();
    assert_eq!(first.id(), Some(0));

    // Withholding the ack must stall the stream: credit is one.
    let second = compio::time::timeout(Duration::from_millis(200), chan.recv()).await;
    assert!(second.is_err(), "second event arrived without an ack");

    chan.send(&Event::Ack(AckEvent { event_id: 0 })).await.unwrap();
    let second = chan.recv().await.unwrap();
    assert_eq!(second.id(), Some(1));

    chan.send(&Event::Ack(AckEvent { event_id: 1 })).await.unwrap();
    handle.stop().await;
}

#[compio::test]
async fn resume_after_connection_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let queue = Arc::new(EventQueue::new("peer", 64));
    for client in ["a", "b", "c", "d", "e"] {
        queue.append(subscribe_event(client, "t")).unwrap();
    }
    let handle = EventProducer::spawn(
        "peer",
        addr.to_string(),
        queue.clone(),
        fast_session(),
        FullResyncMode::QueueReplay,
        None,
    );

    // First connection: apply ids 0..=2, but the ack for 2 is lost with the
    // connection.
    let (stream, _) = listener.accept().await.unwrap();
    let mut chan = EventChannel::new(stream);
    expect_client_hello(&mut chan).await;
    greet(&mut chan, "sess-1", 0).await;
    for expect_id in 0..3u64 {
        let event = chan.recv().await.unwrap();
        assert_eq!(event.id(), Some(expect_id));
        if expect_id < 2 {
            chan.send(&Event::Ack(AckEvent { event_id: expect_id }))
                .await
                .unwrap();
        }
    }
    drop(chan);

    // Reconnect: the producer offers the same session, we report everything
    // through id 2 as applied. Streaming must pick up at id 3 with the
    // fourth event; nothing with id <= 2 may reappear.
    let (stream, _) = listener.accept().await.unwrap();
    let mut chan = EventChannel::new(stream);
    let hello = expect_client_hello(&mut chan).await;
    assert_eq!(hello.session_id, "sess-1", "continuity token survives");
    greet(&mut chan, "sess-1", 2).await;

    let event = recv_and_ack(&mut chan).await;
    assert_eq!(event.id(), Some(3));
    assert_eq!(client_of(&event), "d");
    let event = recv_and_ack(&mut chan).await;
    assert_eq!(event.id(), Some(4));
    assert_eq!(client_of(&event), "e");

    wait_until("queue drained", || queue.is_empty()).await;
    handle.stop().await;
}

#[compio::test]
async fn session_reset_replays_from_head() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let queue = Arc::new(EventQueue::new("peer", 64));
    for client in ["a", "b", "c", "d"] {
        queue.append(subscribe_event(client, "t")).unwrap();
    }
    let handle = EventProducer::spawn(
        "peer",
        addr.to_string(),
        queue.clone(),
        fast_session(),
        FullResyncMode::QueueReplay,
        None,
    );

    // First session acks the first two events, then the peer "restarts".
    let (stream, _) = listener.accept().await.unwrap();
    let mut chan = EventChannel::new(stream);
    expect_client_hello(&mut chan).await;
    greet(&mut chan, "sess-old", 0).await;
    for expect_id in 0..2u64 {
        let event = recv_and_ack(&mut chan).await;
        assert_eq!(event.id(), Some(expect_id));
    }
    wait_until("acks settled", || queue.len() == 2).await;
    drop(chan);

    // The restarted peer mints a new session and reports nothing applied:
    // ids restart at zero and the retained queue replays from the head.
    let (stream, _) = listener.accept().await.unwrap();
    let mut chan = EventChannel::new(stream);
    let hello = expect_client_hello(&mut chan).await;
    assert_eq!(hello.session_id, "sess-old");
    greet(&mut chan, "sess-new", 0).await;

    let event = recv_and_ack(&mut chan).await;
    assert_eq!(event.id(), Some(0), "ids restart at zero after reset");
    assert_eq!(client_of(&event), "c");
    let event = recv_and_ack(&mut chan).await;
    assert_eq!(event.id(), Some(1));
    assert_eq!(client_of(&event), "d");

    // The next connection carries the adopted session id.
    drop(chan);
    let (stream, _) = listener.accept().await.unwrap();
    let mut chan = EventChannel::new(stream);
    let hello = expect_client_hello(&mut chan).await;
    assert_eq!(hello.session_id, "sess-new");
    greet(&mut chan, "sess-new", 1).await;

    handle.stop().await;
}

#[compio::test]
async fn producer_fails_session_on_non_ack_reply() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let queue = Arc::new(EventQueue::new("peer", 64));
    queue.append(subscribe_event("a", "t")).unwrap();
    let handle = EventProducer::spawn(
        "peer",
        addr.to_string(),
        queue.clone(),
        fast_session(),
        FullResyncMode::QueueReplay,
        None,
    );

    let (stream, _) = listener.accept().await.unwrap();
    let mut chan = EventChannel::new(stream);
    expect_client_hello(&mut chan).await;
    greet(&mut chan, "sess-1", 0).await;
    let _ = chan.recv().await.unwrap();
    // Answering with anything but an Ack is a protocol violation.
    chan.send(&publish_with_id(9)).await.unwrap();

    // The producer tears the session down and redials.
    let (stream, _) = listener.accept().await.unwrap();
    let mut chan2 = EventChannel::new(stream);
    let hello = expect_client_hello(&mut chan2).await;
    assert_eq!(hello.session_id, "sess-1");

    handle.stop().await;
}

fn publish_with_id(id: u64) -> Event {
    let mut event = publish_event("t", b"x");
    event.set_id(id);
    event
}

// ---------------------------------------------------------------------------
// Consumer-side tests with recording collaborators.
// ---------------------------------------------------------------------------

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
    log: parking_lot::Mutex<Vec<String>>,
}

impl SubscriptionStore for RecordingStore {
    fn subscribe(
        &self,
        client_id: &str,
        subscriptions: &[Subscription],
    ) -> Result<Vec<SubscribeOutcome>> {
        for sub in subscriptions {
            self.log
                .lock()
                .push(format!("sub:{client_id}:{}", sub.topic_filter));
        }
        Ok(subscriptions
            .iter()
            .map(|sub| SubscribeOutcome {
                subscription: sub.clone(),
                already_existed: false,
            })
            .collect())
    }

    fn unsubscribe(&self, client_id: &str, topic_filters: &[String]) -> Result<()> {
        for filter in topic_filters {
            self.log.lock().push(format!("unsub:{client_id}:{filter}"));
        }
        Ok(())
    }

    fn create_session(&self, client_id: &str) -> Result<()> {
        self.log.lock().push(format!("create:{client_id}"));
        Ok(())
    }

    fn remove_session(&self, client_id: &str) -> Result<()> {
        self.log.lock().push(format!("remove:{client_id}"));
        Ok(())
    }
}

struct FailingStore;

impl SubscriptionStore for FailingStore {
    fn subscribe(&self, _: &str, _: &[Subscription]) -> Result<Vec<SubscribeOutcome>> {
        Err(ReplicationError::apply("store rejected subscription"))
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

fn serve_consumers(
    listener: TcpListener,
    publisher: Arc<dyn Publisher>,
    store: Arc<dyn SubscriptionStore>,
    registry: Arc<SessionRegistry>,
) {
    compio::runtime::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let consumer = EventConsumer::new(
                stream,
                publisher.clone(),
                store.clone(),
                registry.clone(),
                SessionOptions::default(),
            );
            compio::runtime::spawn(consumer.serve()).detach();
        }
    })
    .detach();
}

#[compio::test]
async fn consumer_applies_all_event_kinds_and_resumes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let publisher = Arc::new(RecordingPublisher::default());
    let store = Arc::new(RecordingStore::default());
    let registry = Arc::new(SessionRegistry::new());
    serve_consumers(listener, publisher.clone(), store.clone(), registry);

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut chan = EventChannel::new(stream);
    chan.send(&Event::ClientHello(ClientHello {
        session_id: String::new(),
    }))
    .await
    .unwrap();
    let session_id = match chan.recv().await.unwrap() {
        Event::ServerHello(hello) => {
            assert_eq!(hello.last_event_id, 0);
            assert!(!hello.session_id.is_empty());
            hello.session_id
        }
        other => panic!("expected ServerHello, got {other}"),
    };

    let mut next_id = 0u64;
    let mut send_applied = |event: Event| {
        let mut event = event;
        event.set_id(next_id);
        let expect = next_id;
        next_id += 1;
        (event, expect)
    };

    let frames = vec![
        send_applied(subscribe_event("c1", "t/a")),
        send_applied(publish_event("t/m", b"hello")),
        send_applied(Event::Unsubscribe(UnsubscribeEvent {
            event_id: None,
            client_id: "c1".into(),
            topic_filters: vec!["t/a".into()],
        })),
        send_applied(Event::SessionCreate(SessionCreateEvent {
            event_id: None,
            client_id: "c2".into(),
        })),
        send_applied(Event::SessionRemove(SessionRemoveEvent {
            event_id: None,
            client_id: "c2".into(),
        })),
    ];
    for (event, expect_id) in frames {
        chan.send(&event).await.unwrap();
        match chan.recv().await.unwrap() {
            Event::Ack(ack) => assert_eq!(ack.event_id, expect_id),
            other => panic!("expected Ack, got {other}"),
        }
    }

    let expected: Vec<String> = ["sub:c1:t/a", "unsub:c1:t/a", "create:c2", "remove:c2"]
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(store.log.lock().clone(), expected);
    assert_eq!(publisher.messages.lock().len(), 1);
    assert_eq!(publisher.messages.lock()[0].topic, "t/m");

    // Reconnect with the minted session: the registry remembers id 4.
    drop(chan);
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut chan = EventChannel::new(stream);
    chan.send(&Event::ClientHello(ClientHello {
        session_id: session_id.clone(),
    }))
    .await
    .unwrap();
    match chan.recv().await.unwrap() {
        Event::ServerHello(hello) => {
            assert_eq!(hello.session_id, session_id);
            assert_eq!(hello.last_event_id, 4);
        }
        other => panic!("expected ServerHello, got {other}"),
    }
}

#[compio::test]
async fn consumer_fails_session_on_collaborator_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let publisher = Arc::new(RecordingPublisher::default());
    let registry = Arc::new(SessionRegistry::new());
    serve_consumers(listener, publisher, Arc::new(FailingStore), registry);

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut chan = EventChannel::new(stream);
    chan.send(&Event::ClientHello(ClientHello {
        session_id: String::new(),
    }))
    .await
    .unwrap();
    let Event::ServerHello(_) = chan.recv().await.unwrap() else {
        panic!("expected ServerHello");
    };

    let mut event = subscribe_event("c1", "t");
    event.set_id(0);
    chan.send(&event).await.unwrap();

    // No ack; the consumer tears the session down instead.
    assert!(chan.recv().await.is_err());
}

#[compio::test]
async fn consumer_rejects_event_stream_before_hello() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let publisher = Arc::new(RecordingPublisher::default());
    let store = Arc::new(RecordingStore::default());
    let registry = Arc::new(SessionRegistry::new());
    serve_consumers(listener, publisher, store, registry);

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut chan = EventChannel::new(stream);
    // First frame must be ClientHello; an event is a protocol error.
    chan.send(&publish_with_id(0)).await.unwrap();
    assert!(chan.recv().await.is_err());
}
