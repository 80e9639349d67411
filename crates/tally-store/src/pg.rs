use std::{collections::BTreeSet, str::FromStr};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder, Row as _, types::Json};
use tally_core::{COMPANY_ID, DIVISION_ID, Filter, Query, Row, RowStore, StoreError};
use tracing::debug;
use uuid::Uuid;

const UNDEFINED_COLUMN: &str = "42703";
const CONSTRAINT_CODES: [&str; 4] = ["23505", "23502", "23503", "23514"];

/// Row store over Postgres. Rows travel as `jsonb` so one code path serves
/// every table: `to_jsonb` on the way out, `jsonb_populate_recordset` on the
/// way in, letting Postgres cast text into uuid/numeric/date columns.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RowStore for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|err| map_error("health", err))?;
        Ok(())
    }

    async fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        let table = identifier(&query.table)?;
        let mut builder =
            QueryBuilder::<Postgres>::new(format!("SELECT to_jsonb(t) AS row FROM {table} t"));
        push_filters(&mut builder, &query.filters)?;

        if let Some(order) = &query.order_by {
            builder.push(format!(" ORDER BY {} ASC", identifier(order)?));
        }
        if let Some(limit) = query.limit() {
            builder.push(" LIMIT ");
            builder.push_bind(limit as i64);
            builder.push(" OFFSET ");
            builder.push_bind(query.offset() as i64);
        }

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|err| map_error(table, err))?;

        rows.into_iter()
            .map(|row| {
                let value: Value = row
                    .try_get("row")
                    .map_err(|err| StoreError::Backend(err.to_string()))?;
                match value {
                    Value::Object(map) => Ok(map),
                    other => Err(StoreError::Backend(format!(
                        "expected a json object from {table}, got {other}"
                    ))),
                }
            })
            .collect()
    }

    async fn insert(&self, table: &str, rows: &[Row]) -> Result<u64, StoreError> {
        self.write_rows(table, rows, None).await
    }

    async fn upsert(
        &self,
        table: &str,
        rows: &[Row],
        conflict: &[&str],
    ) -> Result<u64, StoreError> {
        self.write_rows(table, rows, Some(conflict)).await
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: &Row,
    ) -> Result<u64, StoreError> {
        let table = identifier(table)?;
        if patch.is_empty() {
            return Ok(0);
        }

        let result = update_statement(table, filters, patch)?
            .build()
            .execute(&self.pool)
            .await
            .map_err(|err| map_error(table, err))?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<u64, StoreError> {
        let table = identifier(table)?;
        if filters.is_empty() {
            return Err(StoreError::UnscopedDelete(table.to_string()));
        }

        let mut builder = QueryBuilder::<Postgres>::new(format!("DELETE FROM {table}"));
        push_filters(&mut builder, filters)?;

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|err| map_error(table, err))?;
        debug!(table, deleted = result.rows_affected(), "rows deleted");
        Ok(result.rows_affected())
    }
}

impl PgStore {
    async fn write_rows(
        &self,
        table: &str,
        rows: &[Row],
        conflict: Option<&[&str]>,
    ) -> Result<u64, StoreError> {
        let table = identifier(table)?;
        if rows.is_empty() {
            return Ok(0);
        }

        let result = write_statement(table, rows, conflict)?
            .build()
            .execute(&self.pool)
            .await
            .map_err(|err| map_error(table, err))?;
        Ok(result.rows_affected())
    }
}

/// `INSERT ... SELECT` over `jsonb_populate_recordset`, optionally turned into
/// an upsert on `conflict`. Only columns present in some row are written.
fn write_statement(
    table: &str,
    rows: &[Row],
    conflict: Option<&[&str]>,
) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let table = identifier(table)?;
    let mut columns = BTreeSet::new();
    for row in rows {
        for column in row.keys() {
            columns.insert(identifier(column)?);
        }
    }
    let column_list = columns.iter().copied().collect::<Vec<_>>().join(", ");

    let mut builder = QueryBuilder::<Postgres>::new(format!(
        "INSERT INTO {table} ({column_list}) SELECT {column_list} FROM jsonb_populate_recordset(NULL::{table}, "
    ));
    builder.push_bind(Json(rows.to_vec()));
    builder.push(")");

    if let Some(conflict) = conflict {
        let keys = conflict
            .iter()
            .map(|column| identifier(column))
            .collect::<Result<Vec<_>, _>>()?;
        let assignments: Vec<String> = columns
            .iter()
            .filter(|column| !keys.contains(column))
            .map(|column| format!("{column} = EXCLUDED.{column}"))
            .collect();

        if assignments.is_empty() {
            builder.push(format!(" ON CONFLICT ({}) DO NOTHING", keys.join(", ")));
        } else {
            builder.push(format!(
                " ON CONFLICT ({}) DO UPDATE SET {}",
                keys.join(", "),
                assignments.join(", ")
            ));
        }
    }

    Ok(builder)
}

/// Each patched column is read back through `jsonb_populate_record` so the
/// json value is cast to the column type.
fn update_statement(
    table: &str,
    filters: &[Filter],
    patch: &Row,
) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let table = identifier(table)?;
    let mut builder = QueryBuilder::<Postgres>::new(format!("UPDATE {table} SET "));
    for (position, column) in patch.keys().enumerate() {
        let column = identifier(column)?;
        if position > 0 {
            builder.push(", ");
        }
        builder.push(format!(
            "{column} = (SELECT {column} FROM jsonb_populate_record(NULL::{table}, "
        ));
        builder.push_bind(Json(patch.clone()));
        builder.push("))");
    }
    push_filters(&mut builder, filters)?;
    Ok(builder)
}

/// Table and column names are interpolated, so only plain snake_case is allowed.
fn identifier(name: &str) -> Result<&str, StoreError> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .next()
            .is_some_and(|first| first.is_ascii_lowercase() || first == '_')
        && name
            .chars()
            .all(|character| character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_');

    if valid {
        Ok(name)
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

fn push_filters(
    builder: &mut QueryBuilder<'_, Postgres>,
    filters: &[Filter],
) -> Result<(), StoreError> {
    for (position, filter) in filters.iter().enumerate() {
        builder.push(if position == 0 { " WHERE " } else { " AND " });

        match filter {
            Filter::Eq(column, value) => push_comparison(builder, identifier(column)?, "=", value),
            Filter::Gte(column, value) => push_comparison(builder, identifier(column)?, ">=", value),
            Filter::Lte(column, value) => push_comparison(builder, identifier(column)?, "<=", value),
            Filter::NotEmpty(column) => {
                let column = identifier(column)?;
                builder.push(format!("({column} IS NOT NULL AND {column}::text <> '')"));
            }
            Filter::IsNull(column) => {
                builder.push(format!("{} IS NULL", identifier(column)?));
            }
            Filter::TenantOrGlobal(scope) => {
                builder.push("((company_id = ");
                builder.push_bind(scope.company_id);
                builder.push(" AND division_id = ");
                builder.push_bind(scope.division_id);
                builder.push(") OR (company_id IS NULL AND division_id IS NULL))");
            }
        }
    }

    Ok(())
}

fn push_comparison(
    builder: &mut QueryBuilder<'_, Postgres>,
    column: &str,
    operator: &str,
    value: &Value,
) {
    match value {
        Value::Null if operator == "=" => {
            builder.push(format!("{column} IS NULL"));
        }
        Value::Null => {
            builder.push("FALSE");
        }
        // Tenant columns are uuid and must stay uncast to hit their indexes.
        Value::String(text) if column == COMPANY_ID || column == DIVISION_ID => {
            match Uuid::parse_str(text) {
                Ok(id) => {
                    builder.push(format!("{column} {operator} "));
                    builder.push_bind(id);
                }
                Err(_) => {
                    builder.push("FALSE");
                }
            }
        }
        Value::String(text) => {
            builder.push(format!("{column}::text {operator} "));
            builder.push_bind(text.clone());
        }
        Value::Bool(flag) => {
            builder.push(format!("{column} {operator} "));
            builder.push_bind(*flag);
        }
        Value::Number(number) => match number.as_i64() {
            Some(integer) => {
                builder.push(format!("{column} {operator} "));
                builder.push_bind(integer);
            }
            None => {
                let decimal = Decimal::from_str(&number.to_string())
                    .or_else(|_| Decimal::from_scientific(&number.to_string()))
                    .unwrap_or(Decimal::ZERO);
                builder.push(format!("{column} {operator} "));
                builder.push_bind(decimal);
            }
        },
        Value::Array(_) | Value::Object(_) => {
            builder.push(format!("to_jsonb({column}) {operator} "));
            builder.push_bind(Json(value.clone()));
        }
    }
}

fn map_error(table: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|code| code.to_string());
            match code.as_deref() {
                Some(UNDEFINED_COLUMN) => StoreError::UndefinedColumn {
                    table: table.to_string(),
                    detail: db.message().to_string(),
                },
                Some(code) if CONSTRAINT_CODES.contains(&code) => StoreError::Constraint {
                    table: table.to_string(),
                    detail: db.message().to_string(),
                },
                _ => StoreError::Backend(db.to_string()),
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(err.to_string())
        }
        other => StoreError::Backend(other.to_string()),
    }
}
