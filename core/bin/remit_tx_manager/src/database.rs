// Built-in deps
// External uses
// Workspace uses
use remit_storage::ConnectionPool;
use remit_types::{Address, QueuedTransaction, TransactionId, TxStatus};
// Local uses

/// Abstract database access trait, optimized for the needs of the queue
/// manager and narrow enough to be mocked in tests.
#[async_trait::async_trait]
pub(crate) trait DatabaseInterface: Send + Sync + 'static {
    /// The singleton block-height marker of the block monitor; `None` until
    /// the monitor has seen its first block.
    async fn load_last_blocknumber(&self) -> anyhow::Result<Option<u64>>;

    /// Signed rows of the sender waiting to be broadcast, oldest nonce first.
    async fn load_outbound(&self, address: Address) -> anyhow::Result<Vec<QueuedTransaction>>;

    /// Rows of the sender already debited from the balance snapshot, oldest
    /// nonce first.
    async fn load_inflight(
        &self,
        address: Address,
        last_block: u64,
    ) -> anyhow::Result<Vec<QueuedTransaction>>;

    /// Rows paying into the address that the balance snapshot cannot see yet.
    async fn load_incoming(
        &self,
        address: Address,
        last_block: u64,
    ) -> anyhow::Result<Vec<QueuedTransaction>>;

    /// Senders with non-terminal rows older than the stale threshold.
    async fn load_stale_senders(&self) -> anyhow::Result<Vec<Address>>;

    /// Broadcast rows of the sender not yet seen confirmed.
    async fn load_unconfirmed(&self, address: Address)
        -> anyhow::Result<Vec<QueuedTransaction>>;

    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> anyhow::Result<Option<QueuedTransaction>>;

    /// Persists a status change in its own database transaction.
    async fn set_status(
        &self,
        id: TransactionId,
        status: TxStatus,
        blocknumber: Option<u64>,
    ) -> anyhow::Result<()>;
}

/// The actual database wrapper.
/// This structure uses `StorageProcessor` to interact with an existing database.
#[derive(Debug)]
pub(crate) struct Database {
    /// Connection to the database.
    db_pool: ConnectionPool,
}

impl Database {
    pub fn new(db_pool: ConnectionPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait::async_trait]
impl DatabaseInterface for Database {
    async fn load_last_blocknumber(&self) -> anyhow::Result<Option<u64>> {
        let mut storage = self.db_pool.access_storage().await?;
        storage.transactions_schema().load_last_blocknumber().await
    }

    async fn load_outbound(&self, address: Address) -> anyhow::Result<Vec<QueuedTransaction>> {
        let mut storage = self.db_pool.access_storage().await?;
        storage.transactions_schema().load_outbound(address).await
    }

    async fn load_inflight(
        &self,
        address: Address,
        last_block: u64,
    ) -> anyhow::Result<Vec<QueuedTransaction>> {
        let mut storage = self.db_pool.access_storage().await?;
        storage
            .transactions_schema()
            .load_inflight(address, last_block)
            .await
    }

    async fn load_incoming(
        &self,
        address: Address,
        last_block: u64,
    ) -> anyhow::Result<Vec<QueuedTransaction>> {
        let mut storage = self.db_pool.access_storage().await?;
        storage
            .transactions_schema()
            .load_incoming(address, last_block)
            .await
    }

    async fn load_stale_senders(&self) -> anyhow::Result<Vec<Address>> {
        let mut storage = self.db_pool.access_storage().await?;
        storage.transactions_schema().load_stale_senders().await
    }

    async fn load_unconfirmed(
        &self,
        address: Address,
    ) -> anyhow::Result<Vec<QueuedTransaction>> {
        let mut storage = self.db_pool.access_storage().await?;
        storage.transactions_schema().load_unconfirmed(address).await
    }

    async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> anyhow::Result<Option<QueuedTransaction>> {
        let mut storage = self.db_pool.access_storage().await?;
        storage.transactions_schema().get_transaction(id).await
    }

    async fn set_status(
        &self,
        id: TransactionId,
        status: TxStatus,
        blocknumber: Option<u64>,
    ) -> anyhow::Result<()> {
        let mut storage = self.db_pool.access_storage().await?;
        let mut transaction = storage.start_transaction().await?;
        transaction
            .transactions_schema()
            .update_status(id, status, blocknumber)
            .await?;
        transaction.commit().await?;
        Ok(())
    }
}
