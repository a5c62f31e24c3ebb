use std::fmt;

/// Boxed error carried across the database-client and callback boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Illegal lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidState {
    /// `init` was called while a transaction is already held.
    AlreadyInitialized,
    /// `commit`, `rollback` or a task execution needed a transaction but none is held.
    NotInitialized,
    /// The task was executed after its owning `Arc` was dropped.
    TaskDetached,
}

impl fmt::Display for InvalidState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInitialized => write!(f, "context already initialised"),
            Self::NotInitialized => write!(f, "context not initialised"),
            Self::TaskDetached => write!(f, "task is no longer referenced"),
        }
    }
}

/// Error type for context and task operations
#[derive(Debug, thiserror::Error)]
pub enum UnitOfWorkError {
    #[error("Invalid state: {0}")]
    InvalidState(InvalidState),

    #[error("Transaction acquisition failed: {0}")]
    AcquisitionFailed(#[source] BoxError),

    #[error("Transaction commit failed: {0}")]
    CommitFailed(#[source] BoxError),

    #[error("Transaction rollback failed: {0}")]
    RollbackFailed(#[source] BoxError),

    #[error("Statement execution failed: {source}")]
    StatementFailed {
        statement: String,
        #[source]
        source: BoxError,
    },

    /// Error returned by a callback task, passed through untouched.
    #[error(transparent)]
    Work(BoxError),
}

impl UnitOfWorkError {
    /// Returns `true` for illegal lifecycle transitions.
    #[must_use]
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState(_))
    }

    /// Recovers the concrete error a callback task failed with.
    pub fn downcast_work<E>(self) -> Result<E, Self>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match self {
            Self::Work(err) => err.downcast::<E>().map(|e| *e).map_err(Self::Work),
            other => Err(other),
        }
    }
}

impl From<InvalidState> for UnitOfWorkError {
    fn from(state: InvalidState) -> Self {
        Self::InvalidState(state)
    }
}

/// Result type for context and task operations
pub type UnitOfWorkResult<T> = Result<T, UnitOfWorkError>;
