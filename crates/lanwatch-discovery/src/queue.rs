//! Bounded FIFO queues between pipeline stages
//!
//! Thin wrapper over [`tokio::sync::mpsc`] that keeps a depth gauge the fleet
//! monitor can read without owning either end of the channel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Create a bounded queue holding at most `capacity` items
pub fn bounded<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>, QueueGauge) {
    let (tx, rx) = mpsc::channel(capacity);
    let depth = Arc::new(AtomicUsize::new(0));
    let gauge = QueueGauge {
        depth: Arc::clone(&depth),
    };
    (
        QueueSender {
            tx,
            depth: Arc::clone(&depth),
        },
        QueueReceiver { rx, depth },
        gauge,
    )
}

/// Producer end; `send` waits while the queue is full
#[derive(Debug)]
pub struct QueueSender<T> {
    tx: mpsc::Sender<T>,
    depth: Arc<AtomicUsize>,
}

impl<T> QueueSender<T> {
    /// Push an item, waiting for room. Returns the item back if the consumer
    /// is gone.
    ///
    /// Cancel safe: if the future is dropped while waiting, nothing is queued.
    pub async fn send(&self, item: T) -> Result<(), T> {
        match self.tx.reserve().await {
            Ok(permit) => {
                // count before the item becomes visible so the gauge never underflows
                self.depth.fetch_add(1, Ordering::Relaxed);
                permit.send(item);
                Ok(())
            }
            Err(_) => Err(item),
        }
    }
}

/// Consumer end
#[derive(Debug)]
pub struct QueueReceiver<T> {
    rx: mpsc::Receiver<T>,
    depth: Arc<AtomicUsize>,
}

impl<T> QueueReceiver<T> {
    /// Next item in FIFO order, `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<T> {
        let item = self.rx.recv().await?;
        self.depth.fetch_sub(1, Ordering::Relaxed);
        Some(item)
    }
}

/// Read-only view of a queue's depth
#[derive(Debug, Clone)]
pub struct QueueGauge {
    depth: Arc<AtomicUsize>,
}

impl QueueGauge {
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_and_depth() {
        let (tx, mut rx, gauge) = bounded(8);
        for item in 1..=3 {
            tx.send(item).await.unwrap();
        }
        assert_eq!(gauge.depth(), 3);

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(gauge.depth(), 1);
        assert_eq!(rx.recv().await, Some(3));
        assert_eq!(gauge.depth(), 0);
    }

    #[tokio::test]
    async fn test_send_waits_when_full() {
        let (tx, mut rx, gauge) = bounded(1);
        tx.send("a").await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), tx.send("b")).await;
        assert!(blocked.is_err());
        assert_eq!(gauge.depth(), 1);

        assert_eq!(rx.recv().await, Some("a"));
        tx.send("c").await.unwrap();
        assert_eq!(rx.recv().await, Some("c"));
    }

    #[tokio::test]
    async fn test_closed_queue() {
        let (tx, rx, gauge) = bounded::<u8>(4);
        drop(rx);
        assert_eq!(tx.send(7).await, Err(7));
        assert_eq!(gauge.depth(), 0);

        let (tx, mut rx, _gauge) = bounded::<u8>(4);
        drop(tx);
        assert_eq!(rx.recv().await, None);
    }
}
