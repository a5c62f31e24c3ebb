use async_trait::async_trait;

use crate::bindings::Bindings;
use crate::value::StatementResult;

/// The database client a [`TransactionContext`](crate::TransactionContext) drives.
///
/// Implementations own connection management. The adapter only asks them to
/// open a transaction, to run statements inside it, and to finish it.
#[async_trait]
pub trait DatabaseClient: Send + Sync + 'static {
    /// An open transaction. Clones refer to the same transaction.
    type Handle: Clone + Send + Sync + 'static;

    type Error: std::error::Error + Send + Sync + 'static;

    /// Start a new transaction.
    async fn begin_transaction(&self) -> Result<Self::Handle, Self::Error>;

    /// Commit the transaction behind `handle`.
    async fn commit(&self, handle: Self::Handle) -> Result<(), Self::Error>;

    /// Roll back the transaction behind `handle`.
    async fn rollback(&self, handle: Self::Handle) -> Result<(), Self::Error>;

    /// Run one statement inside the transaction behind `handle`.
    async fn execute_statement(
        &self,
        statement: &str,
        bindings: Bindings,
        handle: &Self::Handle,
    ) -> Result<StatementResult, Self::Error>;
}
