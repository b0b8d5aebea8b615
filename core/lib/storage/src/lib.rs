//! Storage crate provides the interfaces to interact with the database.
//! The backend is `Postgres`, accessed through the `sqlx` crate.
//!
//! All access goes through the [`StorageProcessor`]: a wrapper around one
//! database connection that hands out the `transactions` schema — the
//! persistent payment queue plus the `last_blocknumber` marker maintained by
//! the block monitor. Queue reads borrow a pooled connection; every status
//! update of the queue manager runs through `start_transaction`/`commit`,
//! one database transaction per update, so a half-applied update can never
//! become visible.

// Built-in deps
// External imports
use sqlx::{Connection, PgConnection};
// Workspace imports
// Local imports
use crate::connection::{ConnectionHolder, PooledConnection};

pub mod connection;
pub mod transactions;

pub use crate::connection::ConnectionPool;
pub type QueryResult<T> = Result<T, anyhow::Error>;

/// Storage processor is the main storage interaction point.
/// It wraps a single database connection and provides the schema built on
/// top of it.
#[derive(Debug)]
pub struct StorageProcessor<'a> {
    conn: ConnectionHolder<'a>,
}

impl<'a> StorageProcessor<'a> {
    /// Wraps a connection borrowed from the pool.
    pub fn from_pool(conn: PooledConnection) -> Self {
        Self {
            conn: ConnectionHolder::Pooled(conn),
        }
    }

    /// Opens a database transaction; writes made through the returned
    /// processor become visible only after `commit`.
    pub async fn start_transaction<'c: 'b, 'b>(
        &'c mut self,
    ) -> QueryResult<StorageProcessor<'b>> {
        let transaction = self.conn().begin().await?;

        Ok(StorageProcessor {
            conn: ConnectionHolder::Transaction(transaction),
        })
    }

    pub async fn commit(self) -> QueryResult<()> {
        if let ConnectionHolder::Transaction(transaction) = self.conn {
            transaction.commit().await?;
            Ok(())
        } else {
            panic!("StorageProcessor::commit can only be invoked after calling StorageProcessor::start_transaction");
        }
    }

    /// Gains access to the `Transactions` schema.
    pub fn transactions_schema(&mut self) -> transactions::TransactionsSchema<'_, 'a> {
        transactions::TransactionsSchema(self)
    }

    fn conn(&mut self) -> &mut PgConnection {
        match &mut self.conn {
            ConnectionHolder::Pooled(conn) => conn,
            ConnectionHolder::Transaction(conn) => conn,
        }
    }
}
