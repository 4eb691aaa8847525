//! Single-slot hand-off between the broker's delivery task and the waiting
//! caller.
//!
//! The slot accepts exactly one delivery: the first whose correlation token
//! equals the expected token. Everything after that, matching or not, is
//! ignored. Once sealed, nothing can be captured at all.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

use crate::broker::{Delivery, DeliveryHandler};

enum SlotState {
    /// No match yet; the sender fires the waiting caller exactly once.
    Waiting(oneshot::Sender<Delivery>),
    /// First match handed off; later deliveries are ignored.
    Filled,
    /// Deadline declared; nothing may be captured any more.
    Sealed,
}

/// Filters deliveries on the response queue by correlation token and hands
/// the first match to the waiting caller.
pub struct Correlator {
    expected: String,
    slot: Arc<Mutex<SlotState>>,
}

impl Correlator {
    /// Returns the correlator and the receiver the wait coordinator blocks
    /// on.
    pub fn new(expected: &str) -> (Self, oneshot::Receiver<Delivery>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                expected: expected.to_string(),
                slot: Arc::new(Mutex::new(SlotState::Waiting(tx))),
            },
            rx,
        )
    }

    /// The handler to register on the response queue subscription. Runs on
    /// the broker's delivery task; never blocks.
    pub fn handler(&self) -> DeliveryHandler {
        let expected = self.expected.clone();
        let slot = self.slot.clone();
        Arc::new(move |delivery: Delivery| {
            if delivery.correlation.as_deref() != Some(expected.as_str()) {
                trace!("delivery ignored: correlation token mismatch");
                return;
            }
            let mut state = slot.lock();
            if matches!(*state, SlotState::Waiting(_)) {
                if let SlotState::Waiting(tx) = std::mem::replace(&mut *state, SlotState::Filled) {
                    // A dropped receiver means the caller is gone; the
                    // delivery is discarded either way.
                    let _ = tx.send(delivery);
                }
            }
        })
    }

    /// Close the slot. Called by the wait coordinator when the deadline
    /// elapses, before the subscription is cancelled, so a delivery racing
    /// the timeout can never be captured.
    pub fn seal(&self) {
        *self.slot.lock() = SlotState::Sealed;
    }
}
