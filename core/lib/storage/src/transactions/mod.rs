// Built-in deps
use std::time::Instant;
// External imports
// Workspace imports
use remit_types::helpers::parse_address;
use remit_types::{Address, QueuedTransaction, TransactionId, TxStatus};
// Local imports
use self::records::StorageTransaction;
use crate::{QueryResult, StorageProcessor};

pub mod records;

/// Transactions schema is the queue manager's view of the payment queue:
/// per-address slices of the `transactions` table, plus the
/// `last_blocknumber` marker maintained by the block monitor.
#[derive(Debug)]
pub struct TransactionsSchema<'a, 'c>(pub &'a mut StorageProcessor<'c>);

impl<'a, 'c> TransactionsSchema<'a, 'c> {
    /// Signed rows of the sender waiting to be broadcast, oldest nonce first.
    pub async fn load_outbound(
        &mut self,
        address: Address,
    ) -> QueryResult<Vec<QueuedTransaction>> {
        let start = Instant::now();
        let txs = sqlx::query_as::<_, StorageTransaction>(
            "SELECT * FROM transactions \
             WHERE from_address = $1 \
               AND (status IS NULL OR status = 'queued') \
               AND r IS NOT NULL \
             ORDER BY nonce ASC",
        )
        .bind(address_param(address))
        .fetch_all(self.0.conn())
        .await?;

        metrics::histogram!("sql.transactions.load_outbound", start.elapsed());
        txs.into_iter().map(StorageTransaction::into_tx).collect()
    }

    /// Rows of the sender whose cost is already debited from the balance
    /// snapshot: broadcast but unconfirmed, or confirmed past the snapshot
    /// block. Oldest nonce first.
    pub async fn load_inflight(
        &mut self,
        address: Address,
        last_block: u64,
    ) -> QueryResult<Vec<QueuedTransaction>> {
        let start = Instant::now();
        let txs = sqlx::query_as::<_, StorageTransaction>(
            "SELECT * FROM transactions \
             WHERE from_address = $1 \
               AND (status = 'unconfirmed' \
                 OR (status = 'confirmed' AND blocknumber > $2)) \
             ORDER BY nonce ASC",
        )
        .bind(address_param(address))
        .bind(last_block as i64)
        .fetch_all(self.0.conn())
        .await?;

        metrics::histogram!("sql.transactions.load_inflight", start.elapsed());
        txs.into_iter().map(StorageTransaction::into_tx).collect()
    }

    /// Rows paying into the address that are not reflected in the balance
    /// snapshot yet: anything non-terminal, plus rows confirmed past the
    /// snapshot block.
    pub async fn load_incoming(
        &mut self,
        address: Address,
        last_block: u64,
    ) -> QueryResult<Vec<QueuedTransaction>> {
        let start = Instant::now();
        let txs = sqlx::query_as::<_, StorageTransaction>(
            "SELECT * FROM transactions \
             WHERE to_address = $1 \
               AND ((status IS NULL OR status = 'queued' OR status = 'unconfirmed') \
                 OR (status = 'confirmed' AND blocknumber > $2))",
        )
        .bind(address_param(address))
        .bind(last_block as i64)
        .fetch_all(self.0.conn())
        .await?;

        metrics::histogram!("sql.transactions.load_incoming", start.elapsed());
        txs.into_iter().map(StorageTransaction::into_tx).collect()
    }

    /// Senders that still have non-terminal rows older than the stale
    /// threshold; the input of the sanity sweep.
    pub async fn load_stale_senders(&mut self) -> QueryResult<Vec<Address>> {
        let start = Instant::now();
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT from_address FROM transactions \
             WHERE (status IS NULL OR status = 'queued' OR status = 'unconfirmed') \
               AND created < (now() AT TIME ZONE 'utc') - interval '2 minutes'",
        )
        .fetch_all(self.0.conn())
        .await?;

        metrics::histogram!("sql.transactions.load_stale_senders", start.elapsed());
        Ok(rows
            .into_iter()
            .filter_map(|raw| {
                let parsed = parse_address(&raw);
                if parsed.is_none() {
                    log::warn!("Skipping malformed sender address {} in sanity sweep", raw);
                }
                parsed
            })
            .collect())
    }

    /// Broadcast rows of the sender that have not been seen confirmed.
    pub async fn load_unconfirmed(
        &mut self,
        address: Address,
    ) -> QueryResult<Vec<QueuedTransaction>> {
        let start = Instant::now();
        let txs = sqlx::query_as::<_, StorageTransaction>(
            "SELECT * FROM transactions \
             WHERE from_address = $1 \
               AND status = 'unconfirmed' \
             ORDER BY nonce ASC",
        )
        .bind(address_param(address))
        .fetch_all(self.0.conn())
        .await?;

        metrics::histogram!("sql.transactions.load_unconfirmed", start.elapsed());
        txs.into_iter().map(StorageTransaction::into_tx).collect()
    }

    pub async fn get_transaction(
        &mut self,
        id: TransactionId,
    ) -> QueryResult<Option<QueuedTransaction>> {
        let start = Instant::now();
        let tx = sqlx::query_as::<_, StorageTransaction>(
            "SELECT * FROM transactions WHERE transaction_id = $1",
        )
        .bind(id)
        .fetch_optional(self.0.conn())
        .await?;

        metrics::histogram!("sql.transactions.get_transaction", start.elapsed());
        tx.map(StorageTransaction::into_tx).transpose()
    }

    /// The singleton block-height marker advanced by the block monitor.
    /// `None` until the monitor has seen its first block.
    pub async fn load_last_blocknumber(&mut self) -> QueryResult<Option<u64>> {
        let start = Instant::now();
        let blocknumber: Option<Option<i64>> =
            sqlx::query_scalar("SELECT blocknumber FROM last_blocknumber")
                .fetch_optional(self.0.conn())
                .await?;

        metrics::histogram!("sql.transactions.load_last_blocknumber", start.elapsed());
        Ok(blocknumber.flatten().map(|b| b as u64))
    }

    /// Persists a status change, stamping `updated`. The block number is
    /// written only for transitions into `confirmed`.
    pub async fn update_status(
        &mut self,
        id: TransactionId,
        status: TxStatus,
        blocknumber: Option<u64>,
    ) -> QueryResult<()> {
        let start = Instant::now();
        if let Some(blocknumber) = blocknumber {
            sqlx::query(
                "UPDATE transactions \
                 SET status = $1, blocknumber = $2, updated = (now() AT TIME ZONE 'utc') \
                 WHERE transaction_id = $3",
            )
            .bind(status.as_str())
            .bind(blocknumber as i64)
            .bind(id)
            .execute(self.0.conn())
            .await?;
        } else {
            sqlx::query(
                "UPDATE transactions \
                 SET status = $1, updated = (now() AT TIME ZONE 'utc') \
                 WHERE transaction_id = $2",
            )
            .bind(status.as_str())
            .bind(id)
            .execute(self.0.conn())
            .await?;
        }

        metrics::histogram!("sql.transactions.update_status", start.elapsed());
        Ok(())
    }
}

fn address_param(address: Address) -> String {
    format!("{:#x}", address)
}
