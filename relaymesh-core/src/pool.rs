//! Process-wide pool of session I/O buffers.
//!
//! Replication sessions churn with peer reconnects; their read and write
//! buffers are taken from this pool on session start and returned on
//! teardown instead of being reallocated per connection.

use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// Capacity of a fresh pooled buffer.
pub const IO_BUF_CAPACITY: usize = 8 * 1024;

/// Retained buffers above this count are dropped instead of pooled.
const POOL_LIMIT: usize = 64;

static POOL: Lazy<Mutex<Vec<Vec<u8>>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Takes a cleared buffer from the pool, allocating if the pool is empty.
#[must_use]
pub fn take_buf() -> Vec<u8> {
    match POOL.lock().pop() {
        Some(mut buf) => {
            buf.clear();
            buf
        }
        None => Vec::with_capacity(IO_BUF_CAPACITY),
    }
}

/// Returns a buffer to the pool.
pub fn put_buf(buf: Vec<u8>) {
    if buf.capacity() == 0 {
        return;
    }
    let mut pool = POOL.lock();
    if pool.len() < POOL_LIMIT {
        pool.push(buf);
    }
}
