//!
//! Unbuffered hand-off between partition workers and the application.
//!
//! The application asks for a message by queueing a one-shot slot; a worker fills the first
//! live slot. Nothing is ever parked between the two sides, so a message is either in the hands
//! of the application or still owned by its worker.
//!
use crate::message::Message;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::{CancellationToken, DropGuard};

type Slot = oneshot::Sender<Message>;

pub(crate) fn channel() -> (Handoff, Subscription) {
    let (slots_tx, slots_rx) = mpsc::unbounded_channel();
    let dropped = CancellationToken::new();
    (
        Handoff {
            slots: Arc::new(Mutex::new(slots_rx)),
            dropped: dropped.clone(),
        },
        Subscription {
            slots: slots_tx,
            _dropped: dropped.drop_guard(),
        },
    )
}

/// Worker side. The subscription ends once every clone is dropped.
#[derive(Clone)]
pub(crate) struct Handoff {
    slots: Arc<Mutex<mpsc::UnboundedReceiver<Slot>>>,
    dropped: CancellationToken,
}

impl Handoff {
    /// Waits until the application asks for a message and hands `message` over.
    ///
    /// Gives the message back if the [`Subscription`] was dropped. Dropping the returned future
    /// before it completes never delivers the message.
    pub(crate) async fn send(&self, mut message: Message) -> Result<(), Message> {
        let mut slots = tokio::select! {
            slots = self.slots.lock() => slots,
            _ = self.dropped.cancelled() => return Err(message),
        };
        loop {
            let slot = tokio::select! {
                slot = slots.recv() => slot,
                _ = self.dropped.cancelled() => None,
            };
            let Some(slot) = slot else {
                return Err(message);
            };
            // Slots of abandoned `recv` calls are skipped.
            match slot.send(message) {
                Ok(()) => return Ok(()),
                Err(returned) => message = returned,
            }
        }
    }

    /// Whether the application dropped its [`Subscription`].
    pub(crate) fn is_closed(&self) -> bool {
        self.dropped.is_cancelled()
    }
}

/// Stream of messages of one `subscribe` call.
pub struct Subscription {
    slots: mpsc::UnboundedSender<Slot>,
    _dropped: DropGuard,
}

impl Subscription {
    /// Waits for the next message. Returns `None` once the subscription has ended.
    ///
    /// Cancel safe: a `recv` dropped before completing never consumes a message.
    pub async fn recv(&mut self) -> Option<Message> {
        let (slot, delivered) = oneshot::channel();
        self.slots.send(slot).ok()?;
        delivered.await.ok()
    }
}
