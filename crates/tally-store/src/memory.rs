use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
    str::FromStr,
};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use tally_core::{COMPANY_ID, DIVISION_ID, Filter, Query, Row, RowStore, StoreError};
use tokio::sync::RwLock;

/// Row store held in process memory.
///
/// Tables are created on first write. A table may declare its column set, in
/// which case any filter, order or write naming an unknown column fails with
/// [`StoreError::UndefinedColumn`] the way Postgres does. Unique keys declared
/// with [`InMemoryStore::with_unique`] reject duplicate inserts.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    columns: HashMap<String, HashSet<String>>,
    unique: HashMap<String, Vec<String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_columns(mut self, table: &str, columns: &[&str]) -> Self {
        self.columns.insert(
            table.to_string(),
            columns.iter().map(|column| column.to_string()).collect(),
        );
        self
    }

    pub fn with_unique(mut self, table: &str, columns: &[&str]) -> Self {
        self.unique.insert(
            table.to_string(),
            columns.iter().map(|column| column.to_string()).collect(),
        );
        self
    }

    pub async fn rows(&self, table: &str) -> Vec<Row> {
        let tables = self.tables.read().await;
        tables.get(table).cloned().unwrap_or_default()
    }

    pub async fn count(&self, table: &str) -> usize {
        let tables = self.tables.read().await;
        tables.get(table).map(Vec::len).unwrap_or(0)
    }

    fn check_columns<'a>(
        &self,
        table: &str,
        columns: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), StoreError> {
        let Some(known) = self.columns.get(table) else {
            return Ok(());
        };

        for column in columns {
            if !known.contains(column) {
                return Err(StoreError::UndefinedColumn {
                    table: table.to_string(),
                    detail: format!("column \"{column}\" does not exist"),
                });
            }
        }

        Ok(())
    }

    fn check_filters(&self, table: &str, filters: &[Filter]) -> Result<(), StoreError> {
        self.check_columns(table, filters.iter().flat_map(Filter::columns))
    }

    fn unique_key(&self, table: &str, row: &Row) -> Option<Vec<Value>> {
        let columns = self.unique.get(table)?;
        Some(
            columns
                .iter()
                .map(|column| row.get(column).cloned().unwrap_or(Value::Null))
                .collect(),
        )
    }
}

#[async_trait]
impl RowStore for InMemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        self.check_filters(&query.table, &query.filters)?;
        if let Some(order) = &query.order_by {
            self.check_columns(&query.table, [order.as_str()])?;
        }

        let tables = self.tables.read().await;
        let mut rows: Vec<Row> = tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filters.iter().all(|filter| matches(filter, row)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order_by {
            rows.sort_by(|left, right| order_nulls_last(left.get(order), right.get(order)));
        }

        let offset = query.offset();
        let limit = query.limit().unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn insert(&self, table: &str, rows: &[Row]) -> Result<u64, StoreError> {
        for row in rows {
            self.check_columns(table, row.keys().map(String::as_str))?;
        }

        let mut tables = self.tables.write().await;
        let existing = tables.entry(table.to_string()).or_default();

        if self.unique.contains_key(table) {
            let mut seen: Vec<Vec<Value>> = existing
                .iter()
                .filter_map(|row| self.unique_key(table, row))
                .collect();
            for row in rows {
                if let Some(key) = self.unique_key(table, row) {
                    if seen.contains(&key) {
                        return Err(StoreError::Constraint {
                            table: table.to_string(),
                            detail: format!("duplicate key {key:?}"),
                        });
                    }
                    seen.push(key);
                }
            }
        }

        existing.extend(rows.iter().cloned());
        Ok(rows.len() as u64)
    }

    async fn upsert(
        &self,
        table: &str,
        rows: &[Row],
        conflict: &[&str],
    ) -> Result<u64, StoreError> {
        for row in rows {
            self.check_columns(table, row.keys().map(String::as_str))?;
        }
        self.check_columns(table, conflict.iter().copied())?;

        let mut tables = self.tables.write().await;
        let existing = tables.entry(table.to_string()).or_default();

        for row in rows {
            let position = existing.iter().position(|current| {
                conflict.iter().all(|column| {
                    match (current.get(*column), row.get(*column)) {
                        (Some(left), Some(right)) => values_equal(left, right),
                        _ => false,
                    }
                })
            });

            match position {
                Some(index) => {
                    for (column, value) in row {
                        existing[index].insert(column.clone(), value.clone());
                    }
                }
                None => existing.push(row.clone()),
            }
        }

        Ok(rows.len() as u64)
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: &Row,
    ) -> Result<u64, StoreError> {
        self.check_filters(table, filters)?;
        self.check_columns(table, patch.keys().map(String::as_str))?;

        let mut tables = self.tables.write().await;
        let Some(rows) = tables.get_mut(table) else {
            return Ok(0);
        };

        let mut updated = 0;
        for row in rows
            .iter_mut()
            .filter(|row| filters.iter().all(|filter| matches(filter, row)))
        {
            for (column, value) in patch {
                row.insert(column.clone(), value.clone());
            }
            updated += 1;
        }

        Ok(updated)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<u64, StoreError> {
        if filters.is_empty() {
            return Err(StoreError::UnscopedDelete(table.to_string()));
        }
        self.check_filters(table, filters)?;

        let mut tables = self.tables.write().await;
        let Some(rows) = tables.get_mut(table) else {
            return Ok(0);
        };

        let before = rows.len();
        rows.retain(|row| !filters.iter().all(|filter| matches(filter, row)));
        Ok((before - rows.len()) as u64)
    }
}

fn is_null(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

fn matches(filter: &Filter, row: &Row) -> bool {
    match filter {
        Filter::Eq(column, expected) => match row.get(column) {
            Some(actual) => values_equal(actual, expected),
            None => expected.is_null(),
        },
        Filter::NotEmpty(column) => match row.get(column) {
            None | Some(Value::Null) => false,
            Some(Value::String(value)) => !value.is_empty(),
            Some(_) => true,
        },
        Filter::IsNull(column) => is_null(row.get(column)),
        Filter::Gte(column, bound) => row
            .get(column)
            .and_then(|actual| compare_values(actual, bound))
            .is_some_and(|ordering| ordering != Ordering::Less),
        Filter::Lte(column, bound) => row
            .get(column)
            .and_then(|actual| compare_values(actual, bound))
            .is_some_and(|ordering| ordering != Ordering::Greater),
        Filter::TenantOrGlobal(scope) => {
            scope.owns(row) || (is_null(row.get(COMPANY_ID)) && is_null(row.get(DIVISION_ID)))
        }
    }
}

fn numeric(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(number) => Decimal::from_str(&number.to_string())
            .or_else(|_| Decimal::from_scientific(&number.to_string()))
            .ok(),
        Value::String(text) => Decimal::from_str(text.trim()).ok(),
        _ => None,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::String(left), Value::String(right)) => left == right,
        (Value::Number(_), _) | (_, Value::Number(_)) => match (numeric(left), numeric(right)) {
            (Some(left), Some(right)) => left == right,
            _ => false,
        },
        _ => left == right,
    }
}

fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::String(left), Value::String(right)) => Some(left.cmp(right)),
        (Value::Bool(left), Value::Bool(right)) => Some(left.cmp(right)),
        _ => match (numeric(left), numeric(right)) {
            (Some(left), Some(right)) => Some(left.cmp(&right)),
            _ => None,
        },
    }
}

fn order_nulls_last(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    match (is_null(left), is_null(right)) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => match (left, right) {
            (Some(left), Some(right)) => compare_values(left, right).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tally_core::TenantScope;
    use uuid::Uuid;

    use super::*;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap_or_default()
    }

    fn scope() -> TenantScope {
        TenantScope::new(Uuid::new_v4(), Uuid::new_v4())
    }

    #[tokio::test]
    async fn select_filters_orders_and_pages() {
        let store = InMemoryStore::new();
        let tenant = scope();
        let mut rows = Vec::new();
        for guid in ["c", "a", "d", "b"] {
            let mut entry = row(json!({"guid": guid, "voucher_number": guid}));
            tenant.stamp(&mut entry);
            rows.push(entry);
        }
        rows.push(row(json!({"guid": "z", "voucher_number": ""})));
        store.insert("trn_accounting", &rows).await.unwrap();

        let query = Query::table("trn_accounting")
            .scoped(&tenant)
            .filter(Filter::NotEmpty("voucher_number".to_string()))
            .order_by("guid")
            .range(1, 2);
        let page = store.select(&query).await.unwrap();

        let guids: Vec<&str> = page.iter().filter_map(|row| row["guid"].as_str()).collect();
        assert_eq!(guids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn declared_columns_reject_unknown_filters() {
        let store = InMemoryStore::new().with_columns("trn_inventory", &["guid", "voucher_guid"]);

        let err = store
            .select(&Query::table("trn_inventory").filter(Filter::NotEmpty("voucher_number".into())))
            .await
            .unwrap_err();

        assert!(err.is_undefined_column());
    }

    #[tokio::test]
    async fn unique_key_rejects_duplicate_insert() {
        let store = InMemoryStore::new().with_unique("mst_ledger", &["guid"]);
        store
            .insert("mst_ledger", &[row(json!({"guid": "g1"}))])
            .await
            .unwrap();

        let err = store
            .insert("mst_ledger", &[row(json!({"guid": "g1"}))])
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Constraint { .. }));
        assert_eq!(store.count("mst_ledger").await, 1);
    }

    #[tokio::test]
    async fn upsert_merges_on_conflict_key() {
        let store = InMemoryStore::new();
        store
            .insert("mst_ledger", &[row(json!({"guid": "g1", "name": "Cash", "parent": ""}))])
            .await
            .unwrap();

        store
            .upsert(
                "mst_ledger",
                &[
                    row(json!({"guid": "g1", "parent": "Cash-in-Hand"})),
                    row(json!({"guid": "g2", "name": "Bank"})),
                ],
                &["guid"],
            )
            .await
            .unwrap();

        let rows = store.rows("mst_ledger").await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], "Cash");
        assert_eq!(rows[0]["parent"], "Cash-in-Hand");
    }

    #[tokio::test]
    async fn tenant_or_global_includes_unscoped_rows() {
        let store = InMemoryStore::new();
        let tenant = scope();
        let mut own = row(json!({"name": "Sales"}));
        tenant.stamp(&mut own);
        let mut foreign = row(json!({"name": "Purchase"}));
        scope().stamp(&mut foreign);
        let global = row(json!({"name": "Journal", "company_id": null, "division_id": null}));
        store
            .insert("mst_vouchertype", &[own, foreign, global])
            .await
            .unwrap();

        let rows = store
            .select(&Query::table("mst_vouchertype").filter(Filter::TenantOrGlobal(tenant)))
            .await
            .unwrap();

        let names: Vec<&str> = rows.iter().filter_map(|row| row["name"].as_str()).collect();
        assert_eq!(names, vec!["Sales", "Journal"]);
    }

    #[tokio::test]
    async fn delete_requires_filters() {
        let store = InMemoryStore::new();
        let err = store.delete("mst_group", &[]).await.unwrap_err();
        assert_eq!(err, StoreError::UnscopedDelete("mst_group".to_string()));
    }

    #[test]
    fn numeric_strings_compare_by_value() {
        assert!(values_equal(&json!("500.00"), &json!(500)));
        assert_eq!(
            compare_values(&json!("2024-04-01"), &json!("2024-03-31")),
            Some(Ordering::Greater)
        );
    }
}
