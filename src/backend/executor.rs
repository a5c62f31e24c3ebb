use sqlx::{Database, Transaction};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::ClientError;

/// Executor wraps an open sqlx transaction shared by every task of a context.
///
/// Clones point at the same transaction. Statements lock it for the duration
/// of one call, so tasks running concurrently against one context are
/// serialized here rather than by the context.
pub struct Executor<DB: Database> {
    pub tx: Arc<Mutex<Option<Transaction<'static, DB>>>>,
}

impl<DB: Database> Executor<DB> {
    /// Creates a new Executor from an open transaction.
    pub fn new(tx: Transaction<'static, DB>) -> Self {
        Self {
            tx: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Whether the transaction is still open.
    pub async fn is_open(&self) -> bool {
        self.tx.lock().await.is_some()
    }

    /// Whether two executors share the same transaction.
    pub fn same_transaction(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.tx, &other.tx)
    }

    /// Takes ownership of the transaction, leaving None in its place.
    /// This should only be called when committing or rolling back.
    pub(crate) async fn take_transaction(&self) -> Result<Transaction<'static, DB>, ClientError> {
        self.tx.lock().await.take().ok_or(ClientError::TransactionClosed)
    }
}

impl<DB: Database> Clone for Executor<DB> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<DB: Database> fmt::Debug for Executor<DB> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("tx", &Arc::as_ptr(&self.tx))
            .finish()
    }
}
