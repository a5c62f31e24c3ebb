use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::context::{Context, TransactionContext};
use crate::{
    BindingSource, Bindings, BoxError, DatabaseClient, InvalidState, TaskOutcome, UnitOfWorkError,
    UnitOfWorkResult,
};

/// Future returned by a callback task.
pub type WorkFuture = BoxFuture<'static, Result<serde_json::Value, BoxError>>;

/// Callback run by a task in place of a statement.
///
/// It receives the database client, the context's open transaction and the
/// task itself, and resolves to the value stored as the task's result.
pub type WorkFn<C> = Arc<
    dyn Fn(Arc<C>, <C as DatabaseClient>::Handle, Arc<UnitOfWorkTask<C>>) -> WorkFuture
        + Send
        + Sync,
>;

/// Wrap an async closure into a [`WorkFn`].
pub fn work_fn<C, F, Fut>(f: F) -> WorkFn<C>
where
    C: DatabaseClient,
    F: Fn(Arc<C>, C::Handle, Arc<UnitOfWorkTask<C>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, BoxError>> + Send + 'static,
{
    Arc::new(
        move |client: Arc<C>, handle: C::Handle, task: Arc<UnitOfWorkTask<C>>| -> WorkFuture {
            Box::pin(f(client, handle, task))
        },
    )
}

/// One unit of work as seen by a coordinator.
#[async_trait]
pub trait Task: Send + Sync {
    /// The context whose transaction this task runs in.
    fn context(&self) -> Arc<dyn Context>;

    /// Run the task inside its context's current transaction.
    async fn exec(&self) -> UnitOfWorkResult<()>;

    /// The captured outcome, if the task has executed successfully.
    fn result(&self) -> Option<TaskOutcome>;

    fn name(&self) -> String;
}

/// The coordinator's list of tasks.
pub trait TaskRegistry {
    fn add_task(&mut self, task: Arc<dyn Task>);
}

impl TaskRegistry for Vec<Arc<dyn Task>> {
    fn add_task(&mut self, task: Arc<dyn Task>) {
        self.push(task);
    }
}

/// What a task executes.
pub enum Work<C: DatabaseClient> {
    Statement(String),
    Callback(WorkFn<C>),
}

impl<C: DatabaseClient> Clone for Work<C> {
    fn clone(&self) -> Self {
        match self {
            Work::Statement(statement) => Work::Statement(statement.clone()),
            Work::Callback(work) => Work::Callback(work.clone()),
        }
    }
}

impl<C: DatabaseClient> fmt::Debug for Work<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Work::Statement(statement) => f.debug_tuple("Statement").field(statement).finish(),
            Work::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// [`Task`] that runs a statement or a callback in a [`TransactionContext`].
///
/// The transaction handle is looked up when the task executes, not when it
/// is built, so every task of a context runs against the transaction the
/// context holds at that moment.
pub struct UnitOfWorkTask<C: DatabaseClient> {
    task_id: Uuid,
    this: Weak<Self>,
    context: Arc<TransactionContext<C>>,
    work: Work<C>,
    bindings: RwLock<BindingSource>,
    result: RwLock<Option<TaskOutcome>>,
}

impl<C: DatabaseClient> UnitOfWorkTask<C> {
    pub fn new(
        context: Arc<TransactionContext<C>>,
        work: Work<C>,
        bindings: impl Into<BindingSource>,
    ) -> Arc<Self> {
        let bindings = bindings.into();
        Arc::new_cyclic(|this| Self {
            task_id: Uuid::new_v4(),
            this: this.clone(),
            context,
            work,
            bindings: RwLock::new(bindings),
            result: RwLock::new(None),
        })
    }

    pub fn statement(
        context: Arc<TransactionContext<C>>,
        statement: impl Into<String>,
        bindings: impl Into<BindingSource>,
    ) -> Arc<Self> {
        Self::new(context, Work::Statement(statement.into()), bindings)
    }

    pub fn callback(context: Arc<TransactionContext<C>>, work: WorkFn<C>) -> Arc<Self> {
        Self::new(context, Work::Callback(work), BindingSource::default())
    }

    pub fn id(&self) -> Uuid {
        self.task_id
    }

    pub fn context(&self) -> &Arc<TransactionContext<C>> {
        &self.context
    }

    pub fn work(&self) -> &Work<C> {
        &self.work
    }

    /// Statement text, for statement tasks.
    pub fn statement_text(&self) -> Option<&str> {
        match &self.work {
            Work::Statement(statement) => Some(statement.as_str()),
            Work::Callback(_) => None,
        }
    }

    /// Replace the bindings used by later executions.
    pub fn set_bindings(&self, bindings: impl Into<BindingSource>) {
        *self.bindings.write() = bindings.into();
    }

    /// Current bindings, running the producer if one is set.
    pub fn resolve_bindings(&self) -> Bindings {
        let source = self.bindings.read().clone();
        source.resolve()
    }
}

#[async_trait]
impl<C: DatabaseClient> Task for UnitOfWorkTask<C> {
    fn context(&self) -> Arc<dyn Context> {
        self.context.clone()
    }

    async fn exec(&self) -> UnitOfWorkResult<()> {
        let handle = self.context.transaction_handle()?;
        let client = self.context.client().clone();

        let outcome = match &self.work {
            Work::Callback(work) => {
                debug!(
                    task = %self.task_id,
                    context = %self.context.id(),
                    "executing callback task"
                );
                let this = self.this.upgrade().ok_or(InvalidState::TaskDetached)?;
                let value = work(client, handle, this).await.map_err(|err| {
                    warn!(task = %self.task_id, error = %err, "callback task failed");
                    UnitOfWorkError::Work(err)
                })?;
                TaskOutcome::Value(value)
            }
            Work::Statement(statement) => {
                let bindings = self.resolve_bindings();
                debug!(
                    task = %self.task_id,
                    context = %self.context.id(),
                    %statement,
                    "executing statement task"
                );
                let result = client
                    .execute_statement(statement, bindings, &handle)
                    .await
                    .map_err(|err| {
                        warn!(task = %self.task_id, error = %err, "statement task failed");
                        UnitOfWorkError::StatementFailed {
                            statement: statement.clone(),
                            source: Box::new(err),
                        }
                    })?;
                TaskOutcome::Statement(result)
            }
        };

        *self.result.write() = Some(outcome);
        Ok(())
    }

    fn result(&self) -> Option<TaskOutcome> {
        self.result.read().clone()
    }

    fn name(&self) -> String {
        format!("{} / task {}", self.context.name(), self.task_id)
    }
}

impl<C: DatabaseClient> fmt::Debug for UnitOfWorkTask<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWorkTask")
            .field("task_id", &self.task_id)
            .field("context", &self.context.id())
            .field("work", &self.work)
            .field("bindings", &*self.bindings.read())
            .finish_non_exhaustive()
    }
}
