//! Per-peer event queue.
//!
//! One queue exists per remote peer and is exclusively owned by that peer's
//! producer session. Broker tasks append; the producer reads, minting event
//! ids at dispatch time, and later acks cumulatively. Entries survive from
//! append until ack so a reconnecting session can redeliver anything the
//! peer has not durably applied.
//!
//! Three logical cursors order the queue: `head` (oldest unacked entry),
//! `read_pos` (next entry to dispatch) and `tail` (append slot), with
//! `head <= read_pos <= tail` at all times.
//!
//! All operations are serialized under one mutex. The single blocked reader
//! waits on a capacity-1 wakeup channel signalled by [`EventQueue::append`]
//! and [`EventQueue::close`]; the channel keeps one pending token, so a
//! wakeup raced between the reader's state check and its wait is never
//! lost.

use crate::event::{Event, EventId};
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use thiserror::Error;
use tracing::trace;

/// Peer-queue operation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The queue holds `max` entries.
    #[error("event buffer full")]
    Full,

    /// An event with this id is already live in the queue.
    #[error("duplicated event id: {0}")]
    Duplicated(EventId),

    /// The acked id is not outstanding.
    #[error("event id not found: {0}")]
    IdNotFound(EventId),

    /// The queue has been closed by its owner.
    #[error("queue has been closed")]
    Closed,
}

struct Inner {
    entries: VecDeque<Event>,
    /// Sequence number of `entries[0]`; grows monotonically as acks drain
    /// the head, giving stable positions for the id index.
    head_seq: u64,
    /// Offset of the next entry to dispatch, counted from the head.
    read_pos: usize,
    /// Dispatched-event id -> sequence number.
    index: HashMap<EventId, u64>,
    closed: bool,
}

/// Bounded, ordered, ackable FIFO of events pending replication to one peer.
pub struct EventQueue {
    peer: String,
    max: usize,
    inner: Mutex<Inner>,
    wake_tx: flume::Sender<()>,
    wake_rx: flume::Receiver<()>,
}

impl EventQueue {
    /// Creates a queue for `peer` holding at most `max` events.
    pub fn new(peer: impl Into<String>, max: usize) -> Self {
        let (wake_tx, wake_rx) = flume::bounded(1);
        Self {
            peer: peer.into(),
            max,
            inner: Mutex::new(Inner {
                entries: VecDeque::new(),
                head_seq: 0,
                read_pos: 0,
                index: HashMap::new(),
                closed: false,
            }),
            wake_tx,
            wake_rx,
        }
    }

    /// Name of the peer this queue replicates to.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Appends an event at the tail and wakes a waiting reader.
    ///
    /// # Errors
    ///
    /// [`QueueError::Closed`] after [`close`](Self::close),
    /// [`QueueError::Full`] at capacity, [`QueueError::Duplicated`] when the
    /// event carries an id that is already live in the index.
    pub fn append(&self, event: Event) -> Result<(), QueueError> {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(QueueError::Closed);
            }
            if inner.entries.len() >= self.max {
                return Err(QueueError::Full);
            }
            if let Some(id) = event.id() {
                if inner.index.contains_key(&id) {
                    return Err(QueueError::Duplicated(id));
                }
                let seq = inner.head_seq + inner.entries.len() as u64;
                inner.index.insert(id, seq);
            }
            inner.entries.push_back(event);
        }
        self.notify();
        Ok(())
    }

    /// Takes the next undispatched event, stamping it with the caller-minted
    /// `id`. This is the only place event ids are assigned, which keeps them
    /// dense and strictly increasing in the order actually transmitted.
    ///
    /// Blocks until an entry is dispatchable or the queue closes; returns
    /// `None` once closed. Exactly one reader is supported.
    pub async fn read(&self, id: EventId) -> Option<Event> {
        loop {
            {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return None;
                }
                if inner.read_pos < inner.entries.len() {
                    let pos = inner.read_pos;
                    let seq = inner.head_seq + pos as u64;
                    if let Some(old) = inner.entries[pos].id() {
                        inner.index.remove(&old);
                    }
                    inner.entries[pos].set_id(id);
                    let event = inner.entries[pos].clone();
                    inner.index.insert(id, seq);
                    inner.read_pos += 1;
                    trace!(peer = %self.peer, event = %event, "dispatched event");
                    return Some(event);
                }
            }
            // State is re-checked after every wakeup; a stale token only
            // costs one extra loop.
            let _ = self.wake_rx.recv_async().await;
        }
    }

    /// Cumulatively removes every dispatched entry with id ≤ `id`.
    ///
    /// # Errors
    ///
    /// [`QueueError::IdNotFound`] if `id` was never dispatched or has
    /// already been acked; [`QueueError::Closed`] after close.
    pub fn ack(&self, id: EventId) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(QueueError::Closed);
        }
        let Some(&seq) = inner.index.get(&id) else {
            return Err(QueueError::IdNotFound(id));
        };
        // Dispatched entries form a prefix with ascending ids, so everything
        // up to this position is covered by the cumulative ack.
        let count = (seq - inner.head_seq) as usize + 1;
        for _ in 0..count {
            if let Some(acked) = inner.entries.pop_front() {
                if let Some(acked_id) = acked.id() {
                    inner.index.remove(&acked_id);
                }
            }
        }
        inner.head_seq += count as u64;
        inner.read_pos = inner.read_pos.saturating_sub(count);
        trace!(peer = %self.peer, id, count, "acked events");
        Ok(())
    }

    /// Relocates the read position to `start` entries from the head,
    /// clamped to the current length. Entries at or beyond the new position
    /// lose their dispatched ids; they will be re-minted on the next read.
    pub fn set_read_pos(&self, start: u64) {
        let mut inner = self.inner.lock();
        let pos = usize::try_from(start)
            .unwrap_or(usize::MAX)
            .min(inner.entries.len());
        inner.read_pos = pos;
        let head_seq = inner.head_seq;
        inner
            .index
            .retain(|_, &mut seq| ((seq - head_seq) as usize) < pos);
    }

    /// Marks the queue closed and wakes the reader. Idempotent.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
        }
        self.notify();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Current number of buffered events (unacked plus undispatched).
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn notify(&self) {
        let _ = self.wake_tx.try_send(());
    }
}
