use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::task::{TaskRegistry, UnitOfWorkTask, WorkFn};
use crate::{BindingSource, DatabaseClient, InvalidState, UnitOfWorkError, UnitOfWorkResult};

/// One database transaction as seen by a coordinator.
///
/// A context is either uninitialised or holds exactly one open transaction.
/// `init` opens it, `commit` and `rollback` finish it and return the context
/// to the uninitialised state so it can be initialised again.
#[async_trait]
pub trait Context: Send + Sync {
    /// Open the transaction. Fails if one is already held.
    async fn init(&self) -> UnitOfWorkResult<()>;

    /// Commit the held transaction. Fails if none is held.
    ///
    /// When the commit itself fails the context keeps its handle and stays
    /// initialised. Whether that transaction can still be used depends on the
    /// client: the sqlx client has already consumed it, so a later `rollback`
    /// fails with `TransactionClosed` and `init` keeps failing with
    /// `AlreadyInitialized`. Such a context should be dropped.
    async fn commit(&self) -> UnitOfWorkResult<()>;

    /// Roll back the held transaction. Fails if none is held.
    ///
    /// A failed rollback leaves the context initialised, as for `commit`.
    async fn rollback(&self) -> UnitOfWorkResult<()>;

    /// Whether a transaction is currently held.
    fn is_initialized(&self) -> bool;

    /// Human-readable identity, for diagnostics only.
    fn name(&self) -> String;
}

/// [`Context`] backed by a [`DatabaseClient`].
pub struct TransactionContext<C: DatabaseClient> {
    context_id: Uuid,
    client: Arc<C>,
    handle: RwLock<Option<C::Handle>>,
    // Serializes init/commit/rollback so a transition is never interleaved
    // with another one while the client call is pending.
    lifecycle: Mutex<()>,
}

impl<C: DatabaseClient> TransactionContext<C> {
    /// Create an uninitialised context over `client`.
    pub fn new(client: Arc<C>) -> Arc<Self> {
        Arc::new(Self {
            context_id: Uuid::new_v4(),
            client,
            handle: RwLock::new(None),
            lifecycle: Mutex::new(()),
        })
    }

    pub fn id(&self) -> Uuid {
        self.context_id
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// The transaction currently held by this context.
    pub fn transaction_handle(&self) -> UnitOfWorkResult<C::Handle> {
        self.handle
            .read()
            .clone()
            .ok_or(UnitOfWorkError::InvalidState(InvalidState::NotInitialized))
    }

    /// Build a statement task bound to this context and add it to `registry`.
    pub fn register_task<R>(
        self: &Arc<Self>,
        registry: &mut R,
        statement: impl Into<String>,
        bindings: impl Into<BindingSource>,
    ) -> Arc<UnitOfWorkTask<C>>
    where
        R: TaskRegistry + ?Sized,
    {
        let task = UnitOfWorkTask::statement(self.clone(), statement, bindings);
        registry.add_task(task.clone());
        task
    }

    /// Build a callback task bound to this context and add it to `registry`.
    pub fn register_function_task<R>(
        self: &Arc<Self>,
        registry: &mut R,
        work: WorkFn<C>,
    ) -> Arc<UnitOfWorkTask<C>>
    where
        R: TaskRegistry + ?Sized,
    {
        let task = UnitOfWorkTask::callback(self.clone(), work);
        registry.add_task(task.clone());
        task
    }
}

#[async_trait]
impl<C: DatabaseClient> Context for TransactionContext<C> {
    async fn init(&self) -> UnitOfWorkResult<()> {
        let _transition = self.lifecycle.lock().await;
        if self.is_initialized() {
            return Err(InvalidState::AlreadyInitialized.into());
        }

        let handle = self.client.begin_transaction().await.map_err(|err| {
            warn!(context = %self.context_id, error = %err, "failed to begin transaction");
            UnitOfWorkError::AcquisitionFailed(Box::new(err))
        })?;
        *self.handle.write() = Some(handle);

        debug!(context = %self.context_id, "{} is initialised.", self.name());
        Ok(())
    }

    async fn commit(&self) -> UnitOfWorkResult<()> {
        let _transition = self.lifecycle.lock().await;
        let handle = self.transaction_handle()?;

        // On failure the handle stays in place and no recovery is attempted.
        self.client.commit(handle).await.map_err(|err| {
            warn!(context = %self.context_id, error = %err, "commit failed");
            UnitOfWorkError::CommitFailed(Box::new(err))
        })?;
        *self.handle.write() = None;

        debug!(context = %self.context_id, "{} is committed.", self.name());
        Ok(())
    }

    async fn rollback(&self) -> UnitOfWorkResult<()> {
        let _transition = self.lifecycle.lock().await;
        let handle = self.transaction_handle()?;

        self.client.rollback(handle).await.map_err(|err| {
            warn!(context = %self.context_id, error = %err, "rollback failed");
            UnitOfWorkError::RollbackFailed(Box::new(err))
        })?;
        *self.handle.write() = None;

        debug!(context = %self.context_id, "{} is rolled back.", self.name());
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.handle.read().is_some()
    }

    fn name(&self) -> String {
        format!("sqlx unit-of-work context: {}", self.context_id)
    }
}

impl<C: DatabaseClient> fmt::Debug for TransactionContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext")
            .field("context_id", &self.context_id)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}
