//! sqlx implementation of [`DatabaseClient`].

mod executor;
mod postgres;
mod sqlite;

use async_trait::async_trait;
use sqlx::pool::PoolOptions;
use sqlx::{Database, Pool, Postgres, Sqlite, Transaction};
use tracing::debug;

use crate::{
    BindingError, Bindings, ClientConfig, DatabaseClient, PlaceholderStyle, StatementResult, Value,
};

pub use executor::Executor;

/// Error type of the sqlx client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Binding error: {0}")]
    Binding(#[from] BindingError),

    #[error("Transaction already finished")]
    TransactionClosed,

    #[error("Unsupported type {type_name} for column {column}")]
    UnsupportedColumn { column: String, type_name: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// The error reported by the database server, if any.
    pub fn as_database_error(&self) -> Option<&dyn sqlx::error::DatabaseError> {
        match self {
            ClientError::Database(sqlx::Error::Database(err)) => Some(err.as_ref()),
            _ => None,
        }
    }

    /// Whether the server rejected a duplicate key.
    pub fn is_unique_violation(&self) -> bool {
        self.as_database_error()
            .is_some_and(|err| err.is_unique_violation())
    }
}

mod private {
    pub trait Sealed {}

    impl Sealed for sqlx::Postgres {}
    impl Sealed for sqlx::Sqlite {}
}

/// Driver-specific statement execution for [`SqlxClient`].
#[async_trait]
pub trait SqlxBackend: Database + private::Sealed {
    /// Numbered placeholder syntax of the driver.
    const PLACEHOLDERS: PlaceholderStyle;

    /// Run `statement` with positional `values` inside `tx`.
    async fn run(
        tx: &mut Transaction<'static, Self>,
        statement: &str,
        values: Vec<Value>,
    ) -> Result<StatementResult, ClientError>;
}

/// [`DatabaseClient`] over a sqlx connection pool.
#[derive(Debug)]
pub struct SqlxClient<DB: Database> {
    pool: Pool<DB>,
}

impl<DB: Database> Clone for SqlxClient<DB> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

pub type PgClient = SqlxClient<Postgres>;
pub type SqliteClient = SqlxClient<Sqlite>;

impl<DB: Database> SqlxClient<DB> {
    /// Create a client over an existing pool.
    pub fn new(pool: Pool<DB>) -> Self {
        Self { pool }
    }

    /// Open a pool as described by `config`.
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let pool = PoolOptions::<DB>::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await?;
        debug!(
            max_connections = config.max_connections,
            "connected {} pool",
            DB::NAME
        );
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &Pool<DB> {
        &self.pool
    }
}

#[async_trait]
impl<DB: SqlxBackend> DatabaseClient for SqlxClient<DB> {
    type Handle = Executor<DB>;
    type Error = ClientError;

    async fn begin_transaction(&self) -> Result<Executor<DB>, ClientError> {
        let tx = self.pool.begin().await?;
        Ok(Executor::new(tx))
    }

    async fn commit(&self, handle: Executor<DB>) -> Result<(), ClientError> {
        let tx = handle.take_transaction().await?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self, handle: Executor<DB>) -> Result<(), ClientError> {
        let tx = handle.take_transaction().await?;
        tx.rollback().await?;
        Ok(())
    }

    async fn execute_statement(
        &self,
        statement: &str,
        bindings: Bindings,
        handle: &Executor<DB>,
    ) -> Result<StatementResult, ClientError> {
        let (sql, values) = bindings.expand(statement, DB::PLACEHOLDERS)?;

        let mut tx_guard = handle.tx.lock().await;
        let tx = tx_guard.as_mut().ok_or(ClientError::TransactionClosed)?;
        DB::run(tx, &sql, values).await
    }
}
