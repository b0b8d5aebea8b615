//! Per-address admission gate of the queue processor.
//!
//! The gate is a map from address to a FIFO of one-shot wake-ups. Presence
//! of a key means "a processor is running for this address". Arrivals enroll
//! a wake-up and suspend; a finishing processor hands its slot to the first
//! live waiter, or clears the key when nobody is waiting. The map lock is
//! only ever held for the queue bookkeeping itself, never across I/O.

// Built-in deps
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
// External uses
use tokio::sync::{oneshot, Mutex};
// Workspace uses
use remit_types::Address;
// Local uses

#[derive(Debug, Clone, Default)]
pub(crate) struct QueueGate {
    slots: Arc<Mutex<HashMap<Address, VecDeque<oneshot::Sender<()>>>>>,
}

impl QueueGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the caller is the only active processor for `address`.
    /// Waiters are woken in arrival order.
    pub async fn acquire(&self, address: Address) {
        let waiter = {
            let mut slots = self.slots.lock().await;
            match slots.get_mut(&address) {
                None => {
                    slots.insert(address, VecDeque::new());
                    None
                }
                Some(waiters) => {
                    let (wake_up, waiter) = oneshot::channel();
                    waiters.push_back(wake_up);
                    Some(waiter)
                }
            }
        };

        if let Some(waiter) = waiter {
            // The holder dropping the sender counts as a wake-up too, so a
            // lost slot cannot strand the queue.
            let _ = waiter.await;
        }
    }

    /// Hands the slot to the next waiter, or frees it when none is enrolled.
    pub async fn release(&self, address: &Address) {
        let mut slots = self.slots.lock().await;
        let waiters = match slots.get_mut(address) {
            Some(waiters) => waiters,
            None => return,
        };
        loop {
            match waiters.pop_front() {
                // A waiter may have been dropped since it enrolled; skip it.
                Some(next) => {
                    if next.send(()).is_ok() {
                        return;
                    }
                }
                None => {
                    slots.remove(address);
                    return;
                }
            }
        }
    }
}
