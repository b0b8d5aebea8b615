//! Periodic sanity sweep over senders whose queue looks stuck.
//!
//! The block monitor normally moves rows from `unconfirmed` to `confirmed`;
//! this sweep covers the cases where it lags or where a broadcast
//! transaction silently fell out of the node's view.

// Built-in deps
use std::collections::HashSet;
use std::time::Duration;
// External uses
// Workspace uses
use remit_types::TxStatus;
// Local uses
use crate::database::DatabaseInterface;
use crate::ethereum_interface::EthereumInterface;
use crate::TransactionQueueManager;

impl<ETH: EthereumInterface, DB: DatabaseInterface> TransactionQueueManager<ETH, DB> {
    /// One sweep over every sender with stale rows. Errors are logged and the
    /// next sweep is scheduled regardless, so a single bad node response
    /// cannot silently stop reconciliation. A zero `frequency` runs a single
    /// sweep without rescheduling.
    pub(crate) async fn sanity_check(&self, frequency: Duration) {
        if let Err(err) = self.run_sanity_check().await {
            log::error!("Unexpected issue during the queue sanity check: {:#}", err);
        }
        if !frequency.is_zero() {
            self.tasks.sanity_check(frequency, frequency);
        }
    }

    async fn run_sanity_check(&self) -> anyhow::Result<()> {
        let senders = self.db.load_stale_senders().await?;
        if !senders.is_empty() {
            log::info!(
                "Sanity check found {} addresses with potentially stuck transactions",
                senders.len()
            );
        }

        let mut to_retrigger = HashSet::new();

        for address in senders {
            let unconfirmed = self.db.load_unconfirmed(address).await?;

            if unconfirmed.is_empty() {
                log::error!(
                    "{:#x} has transactions in its queue, but no unconfirmed transactions",
                    address
                );
                // Trigger queue processing as a last resort.
                to_retrigger.insert(address);
                continue;
            }

            for tx in unconfirmed {
                // The block monitor may simply not have seen the confirmation
                // yet; the node has the authoritative state.
                match self.ethereum.tx_status(tx.hash).await? {
                    None => {
                        log::info!(
                            "Setting unconfirmed tx {:#x} to error as it is no longer visible on the node",
                            tx.hash
                        );
                        self.update_transaction(tx.id, TxStatus::Error).await?;
                        to_retrigger.insert(tx.from);
                        if let Some(to) = tx.to {
                            to_retrigger.insert(to);
                        }
                    }
                    Some(observed) if observed.blocknumber.is_some() => {
                        self.update_transaction(tx.id, TxStatus::Confirmed).await?;
                        to_retrigger.insert(tx.from);
                        if let Some(to) = tx.to {
                            to_retrigger.insert(to);
                        }
                    }
                    Some(_) => {
                        log::warn!(
                            "Transaction {:#x} is on the node but old and still unconfirmed",
                            tx.hash
                        );
                    }
                }
            }
        }

        for address in to_retrigger {
            self.tasks.process_transaction_queue(address);
        }

        Ok(())
    }
}
