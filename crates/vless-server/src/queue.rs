//! Ordered write queue for the tunnel side of a session.
//!
//! Every write to the tunnel (the ack, then reverse-path chunks) goes through
//! one [`RelayQueue`]. A single [`QueueWriter`] drains it, so chunk N+1 is
//! never started before chunk N has been handed to the WebSocket sink.

use std::fmt;

use bytes::Bytes;
use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use vless_metrics::record_bytes_downstream;

use crate::error::QueueError;

/// Create a queue holding at most `capacity` chunks.
///
/// A full queue makes [`RelayQueue::enqueue`] wait, which throttles the
/// outbound reader to the speed of the tunnel.
pub fn relay_queue(capacity: usize) -> (RelayQueue, QueueWriter) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (RelayQueue { tx }, QueueWriter { rx, written: 0 })
}

/// Submission handle. Clones share the same FIFO.
#[derive(Clone)]
pub struct RelayQueue {
    tx: mpsc::Sender<Bytes>,
}

impl RelayQueue {
    pub async fn enqueue(&self, chunk: Bytes) -> Result<(), QueueError> {
        self.tx.send(chunk).await.map_err(|_| QueueError::Closed)
    }
}

impl fmt::Debug for RelayQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayQueue")
            .field("capacity", &self.tx.max_capacity())
            .finish()
    }
}

/// The single consumer of a [`RelayQueue`].
pub struct QueueWriter {
    rx: mpsc::Receiver<Bytes>,
    written: u64,
}

impl QueueWriter {
    /// Write queued chunks to `sink` one at a time, in submission order.
    ///
    /// Returns `Ok` once every handle is dropped and the queue is empty. The
    /// first failed write ends the queue; later chunks are discarded.
    pub async fn run<S>(&mut self, sink: &mut S) -> Result<(), QueueError>
    where
        S: Sink<Message> + Unpin,
        S::Error: fmt::Display,
    {
        while let Some(chunk) = self.rx.recv().await {
            let len = chunk.len() as u64;
            if let Err(e) = sink.send(Message::Binary(chunk.to_vec())).await {
                self.rx.close();
                return Err(QueueError::Write(e.to_string()));
            }
            self.written += len;
            record_bytes_downstream(len);
        }
        Ok(())
    }

    /// Total bytes delivered to the sink so far, ack included.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }
}
