//! Delivery sink: hands consumed messages to whoever reads the node's output.
//!
//! The queue is bounded and never waits. A full queue drops the message and
//! counts it; routing and reassembly must not stall behind a slow consumer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::router::KeyClass;

/// A message consumed by this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Which key opened it.
    pub class: KeyClass,
    /// Channel name for channel traffic.
    pub channel: Option<String>,
    pub content: Vec<u8>,
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct DeliverySink {
    tx: mpsc::Sender<Delivery>,
    counters: Arc<Counters>,
}

/// Create a sink and its receiving end.
pub fn delivery_queue(depth: usize) -> (DeliverySink, mpsc::Receiver<Delivery>) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    (
        DeliverySink {
            tx,
            counters: Arc::new(Counters::default()),
        },
        rx,
    )
}

impl DeliverySink {
    /// Queue without waiting. Returns false if the message was dropped.
    pub fn offer(&self, delivery: Delivery) -> bool {
        let len = delivery.content.len();
        match self.tx.try_send(delivery) {
            Ok(()) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(d)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(bytes = len, channel = ?d.channel, "delivery queue full, message dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(bytes = len, "delivery receiver gone, message dropped");
                false
            }
        }
    }

    pub fn delivered(&self) -> u64 {
        self.counters.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    pub fn log_stats(&self) {
        let dropped = self.dropped();
        if dropped > 0 {
            tracing::info!(delivered = self.delivered(), dropped, "delivery stats");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(n: u8) -> Delivery {
        Delivery {
            class: KeyClass::Content,
            channel: None,
            content: vec![n],
        }
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let (sink, mut rx) = delivery_queue(2);
        assert!(sink.offer(msg(1)));
        assert!(sink.offer(msg(2)));
        assert!(!sink.offer(msg(3)));
        assert_eq!(sink.delivered(), 2);
        assert_eq!(sink.dropped(), 1);

        assert_eq!(rx.recv().await.unwrap().content, vec![1]);
        assert!(sink.offer(msg(4)));
    }

    #[tokio::test]
    async fn closed_receiver_counts_as_drop() {
        let (sink, rx) = delivery_queue(4);
        drop(rx);
        assert!(!sink.offer(msg(1)));
        assert_eq!(sink.dropped(), 1);
    }
}
