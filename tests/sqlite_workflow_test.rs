mod common;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

use sqlx_unit_of_work::backend::SqliteClient;
use sqlx_unit_of_work::{
    work_fn, BindingError, BindingSource, Bindings, BoxError, ClientError, Context,
    DatabaseClient, Executor, InvalidState, Task, TransactionContext, UnitOfWorkError,
    UnitOfWorkTask, Value,
};

use common::Sequence;

const INSERT_STUDENT: &str =
    "INSERT INTO Students(id, name, createdAt, updatedAt) VALUES ($id, $name, date(), date())";

/// One shared in-memory database per test; a single connection keeps it alive
async fn setup_database() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to open database");

    sqlx::query(
        r#"
        CREATE TABLE Students (
            id INTEGER PRIMARY KEY,
            name TEXT,
            createdAt TEXT NOT NULL,
            updatedAt TEXT NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await
    .expect("Failed to create Students table");

    pool
}

fn student(id: i64, name: &str) -> Bindings {
    Bindings::named([("id", Value::from(id)), ("name", Value::from(name))])
}

/// Count rows from a fresh, independent transaction
async fn count_students(client: &Arc<SqliteClient>) -> i64 {
    let context = TransactionContext::new(client.clone());
    context.init().await.expect("Failed to begin count transaction");
    let task = UnitOfWorkTask::statement(
        context.clone(),
        "SELECT COUNT(*) AS count FROM Students",
        Bindings::default(),
    );
    task.exec().await.expect("Failed to count students");
    context.commit().await.expect("Failed to commit count transaction");

    let outcome = task.result().expect("Count result missing");
    outcome.rows()[0]
        .get("count")
        .and_then(Value::as_i64)
        .expect("Count column missing")
}

#[tokio::test]
async fn test_function_task_workflow_commits() {
    let pool = setup_database().await;
    let client = Arc::new(SqliteClient::new(pool.clone()));
    let context = TransactionContext::new(client.clone());
    let mut sequence = Sequence::new();

    context.register_task(&mut sequence, "DELETE FROM Students", Bindings::default());
    let insert = context.register_task(&mut sequence, INSERT_STUDENT, student(1, "Dave"));
    let create = context.register_function_task(
        &mut sequence,
        work_fn(|client: Arc<SqliteClient>, handle: Executor<Sqlite>, _task| async move {
            client
                .execute_statement(INSERT_STUDENT, student(2, "Kevin"), &handle)
                .await?;
            let created = client
                .execute_statement(
                    "SELECT id, name FROM Students WHERE id = ?1",
                    Bindings::positional([2]),
                    &handle,
                )
                .await?;
            Ok::<_, BoxError>(serde_json::to_value(&created.rows[0])?)
        }),
    );
    context.register_task(&mut sequence, "SELECT * FROM Students ORDER BY id", Bindings::default());

    sequence.exec().await.expect("Sequence failed");
    assert!(!context.is_initialized());

    let inserted = insert.result().expect("Insert result missing");
    let metadata = inserted.as_statement().expect("Statement outcome expected").metadata;
    assert_eq!(metadata.rows_affected, 1);
    assert_eq!(metadata.last_insert_id, Some(1));

    assert_eq!(
        create.result().and_then(|outcome| outcome.as_value().cloned()),
        Some(json!({ "id": 2, "name": "Kevin" }))
    );

    let selected = sequence.tasks()[3].result().expect("Select result missing");
    let rows = selected.rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("name").and_then(Value::as_str), Some("Dave"));
    assert_eq!(rows[1].get("name").and_then(Value::as_str), Some("Kevin"));

    assert_eq!(count_students(&client).await, 2);
    pool.close().await;
}

#[tokio::test]
async fn test_duplicate_key_rolls_everything_back() {
    let pool = setup_database().await;
    let client = Arc::new(SqliteClient::new(pool.clone()));
    let context = TransactionContext::new(client.clone());
    let mut sequence = Sequence::new();

    context.register_task(&mut sequence, INSERT_STUDENT, student(1, "Dave"));
    context.register_task(&mut sequence, INSERT_STUDENT, student(2, "Kevin"));
    let duplicate = context.register_task(&mut sequence, INSERT_STUDENT, student(1, "Bob"));

    let err = sequence.exec().await.unwrap_err();
    match &err {
        UnitOfWorkError::StatementFailed { statement, source } => {
            assert_eq!(statement, INSERT_STUDENT);
            let client_error = source
                .downcast_ref::<ClientError>()
                .expect("Driver error expected");
            assert!(client_error.as_database_error().is_some());
            assert!(client_error.to_string().contains("UNIQUE constraint failed"));
        }
        other => panic!("Unexpected error: {other:?}"),
    }

    assert!(duplicate.result().is_none());
    assert!(!context.is_initialized());
    assert_eq!(count_students(&client).await, 0, "Prior inserts must be undone");
    pool.close().await;
}

#[tokio::test]
async fn test_tasks_share_the_context_transaction() {
    let pool = setup_database().await;
    let client = Arc::new(SqliteClient::new(pool.clone()));
    let context = TransactionContext::new(client.clone());
    context.init().await.expect("Failed to init context");

    let first = context.transaction_handle().expect("Handle missing");
    let second = context.transaction_handle().expect("Handle missing");
    assert!(first.same_transaction(&second));
    assert!(first.is_open().await);

    // Uncommitted writes are visible to later tasks of the same context
    let insert = UnitOfWorkTask::statement(context.clone(), INSERT_STUDENT, student(7, "Ann"));
    insert.exec().await.expect("Failed to insert");
    let select = UnitOfWorkTask::statement(
        context.clone(),
        "SELECT name FROM Students WHERE id = $id",
        Bindings::named([("id", 7)]),
    );
    select.exec().await.expect("Failed to select");
    let outcome = select.result().expect("Select result missing");
    assert_eq!(outcome.rows()[0].get("name").and_then(Value::as_str), Some("Ann"));

    context.rollback().await.expect("Failed to rollback");
    assert!(!first.is_open().await, "Rollback consumes the shared transaction");

    // A stale handle cannot be used behind the context's back
    let err = client
        .execute_statement("SELECT 1", Bindings::default(), &first)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::TransactionClosed));

    assert_eq!(count_students(&client).await, 0);
    pool.close().await;
}

#[tokio::test]
async fn test_missing_named_binding_fails_the_statement() {
    let pool = setup_database().await;
    let client = Arc::new(SqliteClient::new(pool.clone()));
    let context = TransactionContext::new(client.clone());
    context.init().await.expect("Failed to init context");

    let task = UnitOfWorkTask::statement(
        context.clone(),
        INSERT_STUDENT,
        Bindings::named([("id", 1)]),
    );
    let err = task.exec().await.unwrap_err();
    match err {
        UnitOfWorkError::StatementFailed { source, .. } => {
            assert!(matches!(
                source.downcast_ref::<ClientError>(),
                Some(ClientError::Binding(_))
            ));
        }
        other => panic!("Unexpected error: {other:?}"),
    }

    context.rollback().await.expect("Failed to rollback");
    pool.close().await;
}

#[tokio::test]
async fn test_typed_values_are_stored_as_text() {
    let pool = setup_database().await;
    sqlx::query(
        r#"
        CREATE TABLE Tokens (
            id TEXT PRIMARY KEY,
            owner INTEGER,
            amount TEXT NOT NULL,
            issuedAt TEXT NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await
    .expect("Failed to create Tokens table");

    let client = Arc::new(SqliteClient::new(pool.clone()));
    let context = TransactionContext::new(client.clone());
    context.init().await.expect("Failed to init context");

    let id = Uuid::new_v4();
    let issued_at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    let insert = UnitOfWorkTask::statement(
        context.clone(),
        "INSERT INTO Tokens(id, owner, amount, issuedAt) VALUES ($id, $owner, $amount, $at)",
        BindingSource::producer(move || {
            Bindings::named([
                ("id", Value::from(id)),
                ("owner", Value::Null),
                ("amount", Value::from(Decimal::new(1250, 2))),
                ("at", Value::from(issued_at)),
            ])
        }),
    );
    insert.exec().await.expect("Failed to insert token");

    let select = UnitOfWorkTask::statement(
        context.clone(),
        "SELECT * FROM Tokens WHERE id = $id AND owner IS NULL",
        Bindings::named([("id", id)]),
    );
    select.exec().await.expect("Failed to select token");
    context.commit().await.expect("Failed to commit");

    let outcome = select.result().expect("Select result missing");
    let row = &outcome.rows()[0];
    assert_eq!(row.get("id").and_then(Value::as_uuid), Some(id));
    assert_eq!(row.get("owner"), Some(&Value::Null));
    assert_eq!(row.get("amount").and_then(Value::as_str), Some("12.50"));
    let stored = row.get("issuedAt").and_then(Value::as_str).expect("issuedAt missing");
    assert!(stored.starts_with("2024-01-02"), "Unexpected timestamp {stored}");

    pool.close().await;
}

#[tokio::test]
async fn test_placeholders_inside_block_comments_are_ignored() {
    let pool = setup_database().await;
    let client = Arc::new(SqliteClient::new(pool.clone()));
    let context = TransactionContext::new(client.clone());
    context.init().await.expect("Failed to init context");

    let task = UnitOfWorkTask::statement(
        context.clone(),
        "/* don't */ SELECT $id AS v",
        Bindings::named([("id", 5)]),
    );
    task.exec().await.expect("Failed to select");
    let outcome = task.result().expect("Select result missing");
    assert_eq!(outcome.rows()[0].get("v"), Some(&Value::Integer(5)));

    let mixed = UnitOfWorkTask::statement(
        context.clone(),
        "SELECT ?1 AS a, $id AS b",
        Bindings::named([("id", 5)]),
    );
    match mixed.exec().await.unwrap_err() {
        UnitOfWorkError::StatementFailed { source, .. } => {
            assert!(matches!(
                source.downcast_ref::<ClientError>(),
                Some(ClientError::Binding(BindingError::MixedPlaceholders(_)))
            ));
        }
        other => panic!("Unexpected error: {other:?}"),
    }

    context.rollback().await.expect("Failed to rollback");
    pool.close().await;
}

#[tokio::test]
async fn test_failed_commit_leaves_a_spent_handle() {
    let pool = setup_database().await;
    sqlx::query(
        r#"
        CREATE TABLE Enrollments (
            id INTEGER PRIMARY KEY,
            studentId INTEGER NOT NULL
                REFERENCES Students(id) DEFERRABLE INITIALLY DEFERRED
        )
        "#,
    )
    .execute(&pool)
    .await
    .expect("Failed to create Enrollments table");

    let client = Arc::new(SqliteClient::new(pool.clone()));
    let context = TransactionContext::new(client.clone());
    context.init().await.expect("Failed to init context");

    // The dangling reference is only checked when the transaction commits
    UnitOfWorkTask::statement(
        context.clone(),
        "INSERT INTO Enrollments(id, studentId) VALUES (1, 99)",
        Bindings::default(),
    )
    .exec()
    .await
    .expect("Failed to insert enrollment");

    let err = context.commit().await.unwrap_err();
    assert!(matches!(err, UnitOfWorkError::CommitFailed(_)));
    assert!(context.is_initialized(), "The handle is kept after a failed commit");

    let err = context.rollback().await.unwrap_err();
    match err {
        UnitOfWorkError::RollbackFailed(source) => {
            assert!(matches!(
                source.downcast_ref::<ClientError>(),
                Some(ClientError::TransactionClosed)
            ));
        }
        other => panic!("Unexpected error: {other:?}"),
    }
    assert!(matches!(
        context.init().await.unwrap_err(),
        UnitOfWorkError::InvalidState(InvalidState::AlreadyInitialized)
    ));

    // A fresh context sees nothing of the failed transaction
    assert_eq!(count_students(&client).await, 0);
    pool.close().await;
}
