//! SQL Unit of Work Module
//!
//! This module lets a multi-step transaction coordinator drive one database
//! transaction through a [`Context`], and run statements or callbacks inside
//! it through [`Task`]s, without knowing anything about the database client.

pub mod backend;
pub mod bindings;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod task;
pub mod value;

pub use backend::{ClientError, Executor, SqlxBackend, SqlxClient};
pub use bindings::{BindingError, BindingSource, Bindings, PlaceholderStyle};
pub use client::DatabaseClient;
pub use config::ClientConfig;
pub use context::{Context, TransactionContext};
pub use error::{BoxError, InvalidState, UnitOfWorkError, UnitOfWorkResult};
pub use task::{work_fn, Task, TaskRegistry, UnitOfWorkTask, Work, WorkFn, WorkFuture};
pub use value::{Row, StatementMetadata, StatementResult, TaskOutcome, Value};
