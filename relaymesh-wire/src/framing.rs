//! Framed event transport over a replication stream.
//!
//! Every frame is `u8 type_tag || payload` with no outer envelope; field
//! widths in the payload delimit the frame. [`EventDecoder`] reassembles
//! frames from arbitrary read chunks: a frame cut mid-field simply waits
//! for more bytes, while an unknown tag is fatal for the session.
//!
//! [`EventChannel`] owns the socket and a pooled buffer pair; each outbound
//! event is encoded and written out in full per call to bound latency.

use bytes::{Buf, BytesMut};
use compio::buf::BufResult;
use compio::io::{AsyncRead, AsyncWriteExt};
use compio::net::TcpStream;
use relaymesh_core::codec::CodecError;
use relaymesh_core::error::Result;
use relaymesh_core::event::Event;
use relaymesh_core::pool;
use std::io;
use tracing::trace;

/// Stateful frame decoder.
///
/// Feed raw chunks in, pull typed events out:
/// - `Ok(Some(event))` → one frame decoded and consumed
/// - `Ok(None)` → need more bytes
/// - `Err` → protocol violation, the session must end
pub struct EventDecoder {
    staging: BytesMut,
}

impl EventDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            staging: BytesMut::with_capacity(pool::IO_BUF_CAPACITY),
        }
    }

    /// Appends a raw chunk from the stream.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.staging.extend_from_slice(chunk);
    }

    /// Attempts to decode one event from the front of the staging buffer.
    pub fn decode(&mut self) -> std::result::Result<Option<Event>, CodecError> {
        if self.staging.is_empty() {
            return Ok(None);
        }
        let mut cursor = &self.staging[..];
        match Event::decode(&mut cursor) {
            Ok(event) => {
                let consumed = self.staging.len() - cursor.remaining();
                self.staging.advance(consumed);
                Ok(Some(event))
            }
            // Partial frame: keep the bytes, wait for the next chunk.
            Err(CodecError::ShortRead { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Bidirectional event stream over one long-lived TCP connection.
///
/// Read and write buffers come from the process-wide pool and go back when
/// the channel is dropped, whatever the exit path.
pub struct EventChannel {
    stream: TcpStream,
    decoder: EventDecoder,
    read_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl EventChannel {
    #[must_use]
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            decoder: EventDecoder::new(),
            read_buf: pool::take_buf(),
            write_buf: pool::take_buf(),
        }
    }

    /// Encodes `event` and writes the whole frame to the socket.
    pub async fn send(&mut self, event: &Event) -> Result<()> {
        self.write_buf.clear();
        event.encode(&mut self.write_buf)?;
        trace!(event = %event, "sending event");

        let buf = std::mem::take(&mut self.write_buf);
        let BufResult(res, buf) = self.stream.write_all(buf).await;
        self.write_buf = buf;
        res?;
        Ok(())
    }

    /// Reads the next event, blocking until a full frame arrives.
    ///
    /// An orderly peer close surfaces as
    /// [`io::ErrorKind::UnexpectedEof`].
    pub async fn recv(&mut self) -> Result<Event> {
        loop {
            if let Some(event) = self.decoder.decode()? {
                trace!(event = %event, "event received");
                return Ok(event);
            }

            let mut chunk = std::mem::take(&mut self.read_buf);
            chunk.clear();
            let BufResult(res, chunk) = self.stream.read(chunk).await;
            self.read_buf = chunk;
            let n = match res {
                Ok(n) => n,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
            self.decoder.feed(&self.read_buf[..n]);
        }
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        pool::put_buf(std::mem::take(&mut self.read_buf));
        pool::put_buf(std::mem::take(&mut self.write_buf));
    }
}
