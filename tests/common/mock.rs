use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use sqlx_unit_of_work::{Bindings, DatabaseClient, StatementResult};

/// Opaque transaction id handed out by the mock client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MockHandle(pub u64);

/// Every call the mock client received, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Begin,
    Commit(MockHandle),
    Rollback(MockHandle),
    Execute {
        statement: String,
        bindings: Bindings,
        handle: MockHandle,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("mock failure: {0}")]
pub struct MockError(pub String);

/// In-memory database client that records calls and fails on demand
#[derive(Default)]
pub struct MockClient {
    calls: Mutex<Vec<Call>>,
    next_handle: AtomicU64,
    failing: Mutex<Vec<&'static str>>,
    canned: Mutex<HashMap<String, StatementResult>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an operation fail: "begin", "commit", "rollback", or any
    /// statement containing the given text.
    pub fn fail_on(&self, what: &'static str) {
        self.failing.lock().push(what);
    }

    pub fn respond(&self, statement: &str, result: StatementResult) {
        self.canned.lock().insert(statement.to_string(), result);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn executions(&self) -> Vec<(String, Bindings, MockHandle)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Execute {
                    statement,
                    bindings,
                    handle,
                } => Some((statement.clone(), bindings.clone(), *handle)),
                _ => None,
            })
            .collect()
    }

    fn check(&self, what: &str) -> Result<(), MockError> {
        if self.failing.lock().iter().any(|f| what.contains(f)) {
            return Err(MockError(what.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseClient for MockClient {
    type Handle = MockHandle;
    type Error = MockError;

    async fn begin_transaction(&self) -> Result<MockHandle, MockError> {
        self.calls.lock().push(Call::Begin);
        self.check("begin")?;
        Ok(MockHandle(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn commit(&self, handle: MockHandle) -> Result<(), MockError> {
        self.calls.lock().push(Call::Commit(handle));
        self.check("commit")
    }

    async fn rollback(&self, handle: MockHandle) -> Result<(), MockError> {
        self.calls.lock().push(Call::Rollback(handle));
        self.check("rollback")
    }

    async fn execute_statement(
        &self,
        statement: &str,
        bindings: Bindings,
        handle: &MockHandle,
    ) -> Result<StatementResult, MockError> {
        self.calls.lock().push(Call::Execute {
            statement: statement.to_string(),
            bindings,
            handle: *handle,
        });
        self.check(statement)?;
        Ok(self.canned.lock().get(statement).cloned().unwrap_or_default())
    }
}
