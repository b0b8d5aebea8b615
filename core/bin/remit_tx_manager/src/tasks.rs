//! The task bus: fire-and-forget dispatch of the three tasks the manager
//! exchanges with its surroundings, plus the listener loop that drives them.

// Built-in deps
use std::sync::Arc;
use std::time::Duration;
// External uses
use futures::channel::mpsc;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time;
// Workspace uses
use remit_types::{Address, PaymentMessage};
// Local uses
use crate::database::DatabaseInterface;
use crate::ethereum_interface::EthereumInterface;
use crate::TransactionQueueManager;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Task {
    /// Re-examine the outbound queue of the address.
    ProcessTransactionQueue(Address),
    /// Deliver a payment message to the owner of the address.
    SendNotification {
        address: Address,
        message: PaymentMessage,
    },
    /// Run the sanity sweep after `delay`, then keep it running with the
    /// given period.
    SanityCheck { frequency: Duration, delay: Duration },
}

/// Sending half of the task bus. Cheap to clone; dispatch never blocks.
#[derive(Debug, Clone)]
pub(crate) struct TaskDispatcher {
    sender: mpsc::UnboundedSender<Task>,
}

impl TaskDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Task>) {
        let (sender, receiver) = mpsc::unbounded();
        (Self { sender }, receiver)
    }

    pub fn process_transaction_queue(&self, address: Address) {
        self.dispatch(Task::ProcessTransactionQueue(address));
    }

    pub fn send_notification(&self, address: Address, message: PaymentMessage) {
        self.dispatch(Task::SendNotification { address, message });
    }

    pub fn sanity_check(&self, frequency: Duration, delay: Duration) {
        self.dispatch(Task::SanityCheck { frequency, delay });
    }

    fn dispatch(&self, task: Task) {
        // Only happens during shutdown, when the listener is already gone.
        if self.sender.unbounded_send(task).is_err() {
            log::warn!("Task bus is closed, dropping a task");
        }
    }
}

/// Runs the listening half of the bus. Every incoming task is handled on its
/// own tokio task, so a slow queue pass never delays the rest of the bus;
/// per-address serialization is the gate's job, not the listener's.
#[must_use]
pub(crate) fn run_task_listener<ETH, DB>(
    manager: Arc<TransactionQueueManager<ETH, DB>>,
    mut tasks: mpsc::UnboundedReceiver<Task>,
) -> JoinHandle<()>
where
    ETH: EthereumInterface,
    DB: DatabaseInterface,
{
    tokio::spawn(async move {
        while let Some(task) = tasks.next().await {
            match task {
                Task::ProcessTransactionQueue(address) => {
                    let manager = manager.clone();
                    tokio::spawn(async move {
                        manager.process_transaction_queue(address).await;
                    });
                }
                Task::SendNotification { address, message } => {
                    // Delivery itself belongs to the push-notification
                    // service; it consumes the rendered form.
                    log::info!(
                        "Payment notification for {:#x}: {}",
                        address,
                        message.render()
                    );
                }
                Task::SanityCheck { frequency, delay } => {
                    let manager = manager.clone();
                    tokio::spawn(async move {
                        time::sleep(delay).await;
                        manager.sanity_check(frequency).await;
                    });
                }
            }
        }
    })
}
