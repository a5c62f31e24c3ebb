use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column as _, Either, Row as _, Sqlite, Transaction, TypeInfo as _, ValueRef as _};

use super::{ClientError, SqlxBackend};
use crate::{PlaceholderStyle, Row, StatementResult, Value};

#[async_trait]
impl SqlxBackend for Sqlite {
    const PLACEHOLDERS: PlaceholderStyle = PlaceholderStyle::Question;

    async fn run(
        tx: &mut Transaction<'static, Sqlite>,
        statement: &str,
        values: Vec<Value>,
    ) -> Result<StatementResult, ClientError> {
        let query = values.into_iter().fold(sqlx::query(statement), bind_value);
        let inserts = is_insert(statement);

        let mut result = StatementResult::default();
        #[allow(deprecated)]
        let mut stream = query.fetch_many(&mut **tx);
        while let Some(step) = stream.try_next().await? {
            match step {
                Either::Left(done) => {
                    result.metadata.rows_affected += done.rows_affected();
                    if inserts && done.rows_affected() > 0 {
                        result.metadata.last_insert_id = Some(done.last_insert_rowid());
                    }
                }
                Either::Right(row) => result.rows.push(decode_row(&row)?),
            }
        }
        Ok(result)
    }
}

fn is_insert(statement: &str) -> bool {
    let head = statement.trim_start();
    ["INSERT", "REPLACE"].iter().any(|keyword| {
        head.get(..keyword.len())
            .is_some_and(|word| word.eq_ignore_ascii_case(keyword))
    })
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<i64>),
        Value::Bool(v) => query.bind(v),
        Value::Integer(v) => query.bind(v),
        Value::Real(v) => query.bind(v),
        Value::Text(v) => query.bind(v),
        Value::Blob(v) => query.bind(v),
        Value::Uuid(v) => query.bind(v.to_string()),
        Value::Timestamp(v) => query.bind(v),
        Value::Date(v) => query.bind(v),
        Value::Decimal(v) => query.bind(v.to_string()),
        Value::Json(v) => query.bind(v.to_string()),
    }
}

// SQLite is dynamically typed, so values are decoded by their storage class
// rather than by the declared column type.
fn decode_row(row: &SqliteRow) -> Result<Row, ClientError> {
    let mut decoded = Row::new();
    for column in row.columns() {
        let index = column.ordinal();
        let raw = row.try_get_raw(index)?;
        let storage_class = raw.type_info().name().to_string();
        let is_null = raw.is_null();

        let value = match storage_class.as_str() {
            _ if is_null => Value::Null,
            "NULL" => Value::Null,
            "INTEGER" => Value::Integer(row.try_get(index)?),
            "REAL" => Value::Real(row.try_get(index)?),
            "TEXT" => Value::Text(row.try_get(index)?),
            "BLOB" => Value::Blob(row.try_get(index)?),
            other => {
                return Err(ClientError::UnsupportedColumn {
                    column: column.name().to_string(),
                    type_name: other.to_string(),
                })
            }
        };
        decoded.push(column.name(), value);
    }
    Ok(decoded)
}
