//! The transaction-queue manager of the custodial payment service.
//!
//! Users hand the service pre-signed transactions; this module decides, per
//! sending address, which of them may go out to the Ethereum network right
//! now, in what order, and which must be failed. It also reconciles rows
//! that were broadcast but never seen confirmed, and emits a payment
//! notification on every externally visible state change.
//!
//! # Queue discipline
//!
//! Each pass over an address works against a single snapshot: the
//! `last_blocknumber` marker of the block monitor and one balance read at
//! that height. Rows go out strictly in nonce order; the first row that
//! cannot ever execute (nonce gap, bad signature, node rejection,
//! unaffordable even with optimistic inbound funds) fails the rest of the
//! queue behind it, because a nonce gap makes later rows unexecutable
//! anyway. A row that is merely unaffordable *right now* parks the queue
//! instead: an inbound confirmation will re-trigger it.
//!
//! # Serialization
//!
//! At most one pass runs per address at any time, enforced by the
//! [`queue_gate::QueueGate`]. Cross-address effects (A paying B) are
//! propagated by re-dispatching the affected queue on the task bus, never by
//! processing it inline; the re-trigger graph may contain cycles, which is
//! fine because a pass over a settled queue is a no-op.

// Built-in deps
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
// External uses
use futures::channel::mpsc;
use futures::{future, StreamExt};
use tokio::task::JoinHandle;
// Workspace uses
use remit_config::{ConfigurationOptions, TxManagerOptions};
use remit_eth_client::ClientError;
use remit_storage::ConnectionPool;
use remit_types::tx::{recover_sender, TxError};
use remit_types::{Address, QueuedTransaction, TransactionId, TxStatus, U256};
// Local uses
use self::database::{Database, DatabaseInterface};
use self::ethereum_interface::{EthereumHttpClient, EthereumInterface};
use self::notifier::Notifier;
use self::queue_gate::QueueGate;
use self::tasks::{run_task_listener, TaskDispatcher};

mod database;
mod ethereum_interface;
mod notifier;
mod queue_gate;
mod reconciler;
mod tasks;

#[cfg(test)]
mod tests;

/// The per-address transaction-queue state machine.
///
/// One instance serves every address; the gate serializes passes so that at
/// most one processor is active per sender. The database row is the single
/// source of truth, everything in here is transient coordination.
struct TransactionQueueManager<ETH: EthereumInterface, DB: DatabaseInterface> {
    db: DB,
    ethereum: ETH,
    tasks: TaskDispatcher,
    notifier: Notifier,
    gate: QueueGate,
    network_id: u64,
}

impl<ETH: EthereumInterface, DB: DatabaseInterface> TransactionQueueManager<ETH, DB> {
    fn new(db: DB, ethereum: ETH, tasks: TaskDispatcher, network_id: u64) -> Self {
        Self {
            notifier: Notifier::new(tasks.clone(), network_id),
            gate: QueueGate::new(),
            db,
            ethereum,
            tasks,
            network_id,
        }
    }

    /// Entry point of a queue pass.
    ///
    /// Never propagates errors: a failed pass is logged and the gate is
    /// released either way, so the address cannot be left wedged.
    async fn process_transaction_queue(&self, address: Address) {
        self.gate.acquire(address).await;
        if let Err(err) = self.process_queue(address).await {
            log::error!(
                "Unexpected issue processing the tx queue of {:#x}: {:#}",
                address,
                err
            );
        }
        self.gate.release(&address).await;
    }

    async fn process_queue(&self, address: Address) -> anyhow::Result<()> {
        log::info!("Processing tx queue of {:#x}", address);

        // The snapshot block pins every node query of this pass, so a block
        // confirmed mid-pass cannot skew the balance accounting against the
        // database view.
        let last_block = self.db.load_last_blocknumber().await?;
        let mut outbound: VecDeque<QueuedTransaction> =
            self.db.load_outbound(address).await?.into();

        // Addresses whose queues may be unblocked by what happens here.
        let mut to_retrigger: HashSet<Address> = HashSet::new();

        if !outbound.is_empty() {
            let net_balance = self.ethereum.balance(address, last_block).await?;
            let inflight = self
                .db
                .load_inflight(address, last_block.unwrap_or(0))
                .await?;

            let mut balance = net_balance;
            // In-flight debits may overdraw the snapshot balance; the
            // shortfall is carried separately since `balance` cannot go
            // negative.
            let mut deficit = U256::zero();
            let mut nonce = match inflight.last() {
                Some(last) => {
                    let spent = inflight
                        .iter()
                        .fold(U256::zero(), |acc, tx| acc + tx.cost());
                    if spent <= balance {
                        balance -= spent;
                    } else {
                        deficit = spent - balance;
                        balance = U256::zero();
                    }
                    last.nonce + 1
                }
                None => self.ethereum.next_nonce(address, last_block).await?,
            };

            let mut failure_cascade = false;

            while let Some(tx) = outbound.pop_front() {
                // A failed row leaves a nonce gap; nothing behind it can
                // execute.
                if failure_cascade {
                    log::info!(
                        "Setting tx {:#x} to error due to a previous failure in the queue",
                        tx.hash
                    );
                    self.update_transaction(tx.id, TxStatus::Error).await?;
                    if let Some(to) = tx.to {
                        to_retrigger.insert(to);
                    }
                    continue;
                }

                if tx.nonce != nonce {
                    failure_cascade = true;
                    log::info!(
                        "Setting tx {:#x} to error due to the nonce not matching the network",
                        tx.hash
                    );
                    self.update_transaction(tx.id, TxStatus::Error).await?;
                    if let Some(to) = tx.to {
                        to_retrigger.insert(to);
                    }
                    continue;
                }

                let cost = tx.cost();

                if deficit.is_zero() && balance >= cost {
                    let encoded = match self.encode_verified(&tx, address) {
                        Ok(encoded) => encoded,
                        Err(err) => {
                            log::error!(
                                "Signature of queued tx {:#x} is invalid: {}",
                                tx.hash,
                                err
                            );
                            failure_cascade = true;
                            self.update_transaction(tx.id, TxStatus::Error).await?;
                            if let Some(to) = tx.to {
                                to_retrigger.insert(to);
                            }
                            continue;
                        }
                    };

                    match self.ethereum.send_raw_tx(encoded).await {
                        Ok(_) => {
                            self.update_transaction(tx.id, TxStatus::Unconfirmed).await?;
                            balance -= cost;
                            nonce += 1;
                        }
                        Err(err @ ClientError::Rpc { .. }) => {
                            // The node refused this transaction, so nothing
                            // behind it can go out either.
                            log::error!("Error sending queued tx {:#x}: {}", tx.hash, err);
                            failure_cascade = true;
                            self.update_transaction(tx.id, TxStatus::Error).await?;
                            if let Some(to) = tx.to {
                                to_retrigger.insert(to);
                            }
                        }
                        // A transport failure says nothing about the queue
                        // itself; abort the pass and leave the remaining rows
                        // for the next trigger.
                        Err(err) => return Err(err.into()),
                    }
                    continue;
                }

                // Insufficient balance. Optimistic inbound funds decide
                // between parking the queue and failing it outright.
                let incoming = self
                    .db
                    .load_incoming(address, last_block.unwrap_or(0))
                    .await?;
                let pending_in = incoming
                    .iter()
                    .fold(U256::zero(), |acc, tx| acc + tx.value);

                if balance + pending_in < cost + deficit {
                    failure_cascade = true;
                    log::info!(
                        "Setting tx {:#x} to error due to insufficient pending balance",
                        tx.hash
                    );
                    self.update_transaction(tx.id, TxStatus::Error).await?;
                    if let Some(to) = tx.to {
                        to_retrigger.insert(to);
                    }
                    continue;
                }

                // An inbound row confirmed after the snapshot means a fresher
                // balance may already cover this row; have another look right
                // away.
                let snapshot = last_block.unwrap_or(0);
                if incoming
                    .iter()
                    .any(|t| t.blocknumber.map_or(false, |b| b > snapshot))
                {
                    to_retrigger.insert(address);
                }

                // Park the queue: nothing behind this row can go out before
                // it does, but brand-new rows still owe their first
                // notification.
                let mut parked = Some(tx);
                while let Some(tx) = parked {
                    if tx.status.is_none() {
                        self.update_transaction(tx.id, TxStatus::Queued).await?;
                    }
                    parked = outbound.pop_front();
                }
                break;
            }
        }

        for recipient in to_retrigger {
            self.tasks.process_transaction_queue(recipient);
        }

        // Anything left unexamined gets a fresh pass.
        if !outbound.is_empty() {
            self.tasks.process_transaction_queue(address);
        }

        Ok(())
    }

    /// Re-verifies the stored signature against the queue address and
    /// produces the wire bytes. Catches corrupt or spoofed rows before they
    /// reach the network.
    fn encode_verified(
        &self,
        tx: &QueuedTransaction,
        address: Address,
    ) -> Result<Vec<u8>, TxError> {
        let signature = tx.signature.ok_or(TxError::MissingSignature)?;
        let raw = tx.raw();
        let sender = recover_sender(&raw, &signature, self.network_id)?;
        if sender != address {
            log::error!(
                "Signature of tx {:#x} recovers to {:#x}, expected sender {:#x}",
                tx.hash,
                sender,
                address
            );
            return Err(TxError::Recovery);
        }
        Ok(raw.encode(&signature))
    }

    /// Persists a status change and runs its side effects: payment
    /// notifications and a re-examination of the recipient's queue.
    ///
    /// `confirmed` rows are terminal and never overwritten. `error` rows are
    /// deliberately *not* protected the same way: a later confirmation
    /// observation wins over an earlier error classification.
    async fn update_transaction(
        &self,
        id: TransactionId,
        status: TxStatus,
    ) -> anyhow::Result<()> {
        let tx = match self.db.get_transaction(id).await? {
            Some(tx) => tx,
            None => return Ok(()),
        };
        if tx.status == Some(status) {
            return Ok(());
        }
        if tx.status == Some(TxStatus::Confirmed) {
            log::warn!(
                "Trying to update status of tx {:#x} to {}, but the tx is already confirmed",
                tx.hash,
                status
            );
            return Ok(());
        }

        log::info!(
            "Updating status of tx {:#x} to {} (previously: {:?})",
            tx.hash,
            status,
            tx.status
        );

        let blocknumber = if status == TxStatus::Confirmed {
            self.ethereum
                .tx_status(tx.hash)
                .await?
                .and_then(|observed| observed.blocknumber)
        } else {
            None
        };
        self.db.set_status(id, status, blocknumber).await?;

        self.notifier.payment_status_changed(&tx, status);

        // The recipient's queue may have been waiting on this payment.
        if let Some(to) = tx.to {
            self.tasks.process_transaction_queue(to);
        }
        Ok(())
    }
}

/// Starts the queue manager: wires the task bus, schedules the first sanity
/// sweep and spawns the task listener.
pub fn run_tx_manager(
    pool: ConnectionPool,
    config: &ConfigurationOptions,
    options: &TxManagerOptions,
) -> anyhow::Result<JoinHandle<()>> {
    let (dispatcher, task_receiver) = TaskDispatcher::new();
    let ethereum = EthereumHttpClient::new(config)?;
    let database = Database::new(pool);
    let manager = Arc::new(TransactionQueueManager::new(
        database,
        ethereum,
        dispatcher.clone(),
        config.eth_network_id,
    ));

    // Give the task-bus connection a moment to settle before the first sweep.
    dispatcher.sanity_check(
        options.sanity_check_interval,
        options.sanity_check_startup_delay,
    );

    Ok(run_task_listener(manager, task_receiver))
}

/// Waits for *any* of the tokio tasks to be finished.
/// Since the main tokio tasks are used as actors which should live as long
/// as application runs, any possible outcome (either `Ok` or `Err`) is considered
/// as a reason to stop the server completely.
pub async fn wait_for_tasks(task_futures: Vec<JoinHandle<()>>) {
    match future::select_all(task_futures).await {
        (Ok(_), _, _) => {
            panic!("One of the actors finished its run, while it wasn't expected to do it");
        }
        (Err(error), _, _) => {
            log::warn!("One of the tokio actors unexpectedly finished, shutting down");
            if error.is_panic() {
                // Resume the panic on the main task
                std::panic::resume_unwind(error.into_panic());
            }
        }
    }
}

/// Waits for a message on a `stop_signal_receiver`. This receiver exists
/// for threads that aren't using the tokio Runtime to run on, and thus
/// cannot be handled the same way as the tokio tasks.
pub async fn wait_for_stop_signal(mut stop_signal_receiver: mpsc::Receiver<bool>) {
    stop_signal_receiver.next().await;
}
