//! Event bus: unbounded internal channel drained to a bounded
//! subscriber channel.
//!
//! The control loop must never block on a slow subscriber, so it emits
//! into an unbounded channel; a drain task copies events into the
//! bounded subscriber channel, absorbing the backpressure on the loop's
//! behalf. The internal sender is handed out exactly once (to the
//! control loop), so the drain exits, and the subscriber stream closes,
//! when the loop drops it.

use spoolchat_types::ClientEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One-producer event fan-out from the control loop to the subscriber.
pub(crate) struct EventBus {
    tx: Option<mpsc::UnboundedSender<ClientEvent>>,
    rx: Option<mpsc::UnboundedReceiver<ClientEvent>>,
    out_tx: Option<mpsc::Sender<ClientEvent>>,
    out_rx: Option<mpsc::Receiver<ClientEvent>>,
}

impl EventBus {
    /// Creates a bus with the given subscriber-channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::channel(capacity);
        Self {
            tx: Some(tx),
            rx: Some(rx),
            out_tx: Some(out_tx),
            out_rx: Some(out_rx),
        }
    }

    /// Sender handed to the control loop. Yields `None` after the first
    /// call; the drain exits once the holder drops it.
    pub fn take_sender(&mut self) -> Option<mpsc::UnboundedSender<ClientEvent>> {
        self.tx.take()
    }

    /// Subscriber receiver. Yields `None` after the first call.
    pub fn take_subscriber(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.out_rx.take()
    }

    /// Spawns the drain task. Yields `None` after the first call.
    pub fn spawn_drain(&mut self) -> Option<JoinHandle<()>> {
        let mut rx = self.rx.take()?;
        let out_tx = self.out_tx.take()?;
        Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if out_tx.send(event).await.is_err() {
                    tracing::debug!("event subscriber dropped; stopping drain");
                    return;
                }
            }
            tracing::debug!("event sink drained; terminating gracefully");
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
