// Built-in deps
use std::env;
use std::fmt;
// External imports
use async_trait::async_trait;
use deadpool::managed::{Manager, PoolConfig, RecycleResult, Timeouts};
use deadpool::Runtime;
use sqlx::{postgres::Postgres, Connection, Error as SqlxError, PgConnection, Transaction};
// Workspace imports
use remit_utils::parse_env;
// Local imports
use crate::StorageProcessor;

/// How long `access_storage` waits for a free slot before giving up.
const POOL_ACQUIRE_TIMEOUT_MILLIS: u64 = 20_000;

type Pool = deadpool::managed::Pool<PoolManager>;

pub type PooledConnection = deadpool::managed::Object<PoolManager>;

/// The two connection shapes the queue manager works through: a connection
/// borrowed from the pool for the per-address queue reads, and an open
/// database transaction for the status updates that must commit atomically.
pub enum ConnectionHolder<'a> {
    Pooled(PooledConnection),
    Transaction(Transaction<'a, Postgres>),
}

impl fmt::Debug for ConnectionHolder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pooled(_) => write!(f, "Pooled connection"),
            Self::Transaction(_) => write!(f, "Database transaction"),
        }
    }
}

#[derive(Clone)]
pub(crate) struct PoolManager {
    url: String,
}

#[async_trait]
impl Manager for PoolManager {
    type Type = PgConnection;
    type Error = SqlxError;

    async fn create(&self) -> Result<PgConnection, SqlxError> {
        PgConnection::connect(&self.url).await
    }
    async fn recycle(&self, conn: &mut PgConnection) -> RecycleResult<SqlxError> {
        Ok(conn.ping().await?)
    }
}

/// Fixed-size pool of connections to the payment-queue database.
///
/// The pool size and the database URL come from the `DB_POOL_SIZE` and
/// `DATABASE_URL` environment variables.
#[derive(Clone)]
pub struct ConnectionPool {
    pool: Pool,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionPool")
    }
}

impl ConnectionPool {
    /// Establishes the pool. `pool_max_size` overrides the `DB_POOL_SIZE`
    /// environment variable when given.
    pub async fn new(pool_max_size: Option<u32>) -> Self {
        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let max_size = pool_max_size.unwrap_or_else(|| parse_env("DB_POOL_SIZE"));

        let config = PoolConfig {
            max_size: max_size as usize,
            timeouts: Timeouts::wait_millis(POOL_ACQUIRE_TIMEOUT_MILLIS),
        };
        let pool = Pool::builder(PoolManager { url: database_url })
            .config(config)
            .runtime(Runtime::Tokio1)
            .build()
            .expect("failed to build the database connection pool");

        Self { pool }
    }

    /// Borrows a connection and wraps it into a `StorageProcessor`; the
    /// connection returns to the pool when the processor is dropped.
    pub async fn access_storage(&self) -> Result<StorageProcessor<'_>, SqlxError> {
        let connection = self
            .pool
            .get()
            .await
            .expect("timed out waiting for a free database connection");

        Ok(StorageProcessor::from_pool(connection))
    }
}
