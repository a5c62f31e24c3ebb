use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::TryStreamExt;
use rust_decimal::Decimal;
use sqlx::encode::{Encode, IsNull};
use sqlx::error::BoxDynError;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgRow, PgTypeInfo};
use sqlx::query::Query;
use sqlx::{
    Column as _, Either, Postgres, Row as _, Transaction, Type, TypeInfo as _, ValueRef as _,
};

use super::{ClientError, SqlxBackend};
use crate::{PlaceholderStyle, Row, StatementResult, Value};

#[async_trait]
impl SqlxBackend for Postgres {
    const PLACEHOLDERS: PlaceholderStyle = PlaceholderStyle::Dollar;

    async fn run(
        tx: &mut Transaction<'static, Postgres>,
        statement: &str,
        values: Vec<Value>,
    ) -> Result<StatementResult, ClientError> {
        // The same text may be bound with different parameter types from one
        // execution to the next, and a cached statement keeps the first ones.
        let query = values
            .into_iter()
            .fold(sqlx::query(statement).persistent(false), bind_value);

        let mut result = StatementResult::default();
        #[allow(deprecated)]
        let mut stream = query.fetch_many(&mut **tx);
        while let Some(step) = stream.try_next().await? {
            match step {
                Either::Left(done) => result.metadata.rows_affected += done.rows_affected(),
                Either::Right(row) => result.rows.push(decode_row(&row)?),
            }
        }
        Ok(result)
    }
}

/// NULL parameter declared with type oid 0, which leaves the parameter type
/// for the server to infer from the statement.
struct UntypedNull;

impl Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl Encode<'_, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

fn bind_value(
    query: Query<'_, Postgres, PgArguments>,
    value: Value,
) -> Query<'_, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(UntypedNull),
        Value::Bool(v) => query.bind(v),
        Value::Integer(v) => query.bind(v),
        Value::Real(v) => query.bind(v),
        Value::Text(v) => query.bind(v),
        Value::Blob(v) => query.bind(v),
        Value::Uuid(v) => query.bind(v),
        Value::Timestamp(v) => query.bind(v),
        Value::Date(v) => query.bind(v),
        Value::Decimal(v) => query.bind(v),
        Value::Json(v) => query.bind(v),
    }
}

fn decode_row(row: &PgRow) -> Result<Row, ClientError> {
    let mut decoded = Row::new();
    for column in row.columns() {
        let index = column.ordinal();
        if row.try_get_raw(index)?.is_null() {
            decoded.push(column.name(), Value::Null);
            continue;
        }

        let value = match column.type_info().name() {
            "BOOL" => Value::Bool(row.try_get(index)?),
            "INT2" => Value::Integer(row.try_get::<i16, _>(index)?.into()),
            "INT4" => Value::Integer(row.try_get::<i32, _>(index)?.into()),
            "INT8" => Value::Integer(row.try_get(index)?),
            "FLOAT4" => Value::Real(row.try_get::<f32, _>(index)?.into()),
            "FLOAT8" => Value::Real(row.try_get(index)?),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => Value::Text(row.try_get(index)?),
            "BYTEA" => Value::Blob(row.try_get(index)?),
            "UUID" => Value::Uuid(row.try_get(index)?),
            "TIMESTAMPTZ" => Value::Timestamp(row.try_get::<DateTime<Utc>, _>(index)?),
            // Naive timestamps are read as UTC
            "TIMESTAMP" => Value::Timestamp(row.try_get::<NaiveDateTime, _>(index)?.and_utc()),
            "DATE" => Value::Date(row.try_get::<NaiveDate, _>(index)?),
            "TIME" => Value::Text(row.try_get::<NaiveTime, _>(index)?.to_string()),
            "NUMERIC" => Value::Decimal(row.try_get::<Decimal, _>(index)?),
            "JSON" | "JSONB" => Value::Json(row.try_get::<serde_json::Value, _>(index)?),
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
