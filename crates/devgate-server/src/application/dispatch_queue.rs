//! FIFO hand-off from receivers to the data handler.
//!
//! Every receiver pushes `{client_id, payload}` items into one unbounded
//! queue; a single consumer task pops them in arrival order and invokes the
//! embedding application's [`DataHandler`].  The handler therefore never runs
//! on a receiver task and never runs concurrently with itself.
//!
//! The queue is unbounded: a handler that stalls makes the backlog grow
//! without limit.  [`DispatchQueue::depth`] exposes the backlog so callers can
//! watch for that.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use devgate_core::DispatchItem;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Callback invoked once per received chunk, in arrival order.
pub trait DataHandler: Send + 'static {
    fn on_data(&mut self, item: DispatchItem);
}

impl<F> DataHandler for F
where
    F: FnMut(DispatchItem) + Send + 'static,
{
    fn on_data(&mut self, item: DispatchItem) {
        self(item)
    }
}

/// Creates a connected producer/consumer pair.
pub fn dispatch_queue() -> (DispatchQueue, DispatchConsumer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        DispatchQueue {
            tx,
            depth: Arc::clone(&depth),
        },
        DispatchConsumer { rx, depth },
    )
}

/// Producer side; cloned into every receiver.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<DispatchItem>,
    depth: Arc<AtomicUsize>,
}

impl DispatchQueue {
    /// Appends `item` to the queue.
    ///
    /// Returns `false` if the consumer has gone away and the item was dropped.
    pub fn enqueue(&self, item: DispatchItem) -> bool {
        self.depth.fetch_add(1, Ordering::SeqCst);
        match self.tx.send(item) {
            Ok(()) => true,
            Err(_) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                debug!("dispatch consumer gone; item dropped");
                false
            }
        }
    }

    /// Items enqueued but not yet handed to the handler.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

/// Consumer side; owns the receiving end of the queue.
#[derive(Debug)]
pub struct DispatchConsumer {
    rx: mpsc::UnboundedReceiver<DispatchItem>,
    depth: Arc<AtomicUsize>,
}

impl DispatchConsumer {
    /// Pops items and feeds them to `handler` until every producer is dropped.
    ///
    /// A panicking handler is logged and the loop moves on to the next item.
    pub async fn run<H: DataHandler>(mut self, mut handler: H) {
        debug!("dispatch consumer started");
        while let Some(item) = self.rx.recv().await {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            let client_id = item.client_id().clone();
            if catch_unwind(AssertUnwindSafe(|| handler.on_data(item))).is_err() {
                error!("data handler panicked while processing data from {client_id}");
            }
        }
        debug!("dispatch consumer stopped");
    }

    /// Runs the consumer on its own task.
    pub fn spawn<H: DataHandler>(self, handler: H) -> JoinHandle<()> {
        tokio::spawn(self.run(handler))
    }
}
