// Built-in deps
// External uses
// Workspace uses
use remit_types::{PaymentMessage, QueuedTransaction, TxStatus};
// Local uses
use crate::tasks::TaskDispatcher;

/// Builds payment messages and decides who hears about a status change.
///
/// Users only ever see the sent-to-network abstraction: a transition into
/// `queued` is reported as `unconfirmed`, and the later `queued` →
/// `unconfirmed` move is suppressed entirely because it was already
/// announced.
#[derive(Debug, Clone)]
pub(crate) struct Notifier {
    tasks: TaskDispatcher,
    network_id: u64,
}

impl Notifier {
    pub fn new(tasks: TaskDispatcher, network_id: u64) -> Self {
        Self { tasks, network_id }
    }

    /// Runs the notification rules for a persisted transition of `tx` (which
    /// still carries the previous status) into `status`.
    pub fn payment_status_changed(&self, tx: &QueuedTransaction, status: TxStatus) {
        let status = match status {
            TxStatus::Queued => TxStatus::Unconfirmed,
            TxStatus::Unconfirmed if tx.status == Some(TxStatus::Queued) => {
                // Already announced when the row was parked.
                return;
            }
            other => other,
        };

        let message = PaymentMessage {
            value: tx.value,
            tx_hash: tx.hash,
            status,
            from_address: tx.from,
            to_address: tx.to,
            network_id: self.network_id,
        };

        // The sender always hears about its own payment.
        self.tasks.send_notification(tx.from, message.clone());

        // Contract creations have nobody on the receiving end.
        let to = match tx.to {
            Some(to) => to,
            None => return,
        };

        // A payment that failed before anyone heard of it stays between the
        // service and the sender.
        if tx.status.is_none() && status == TxStatus::Error {
            return;
        }

        self.tasks.send_notification(to, message);
    }
}
