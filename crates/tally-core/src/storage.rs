use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::models::{COMPANY_ID, DIVISION_ID, Row, TenantScope};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("column does not exist on {table}: {detail}")]
    UndefinedColumn { table: String, detail: String },

    #[error("constraint violated on {table}: {detail}")]
    Constraint { table: String, detail: String },

    #[error("refusing to delete from {0} without filters")]
    UnscopedDelete(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_undefined_column(&self) -> bool {
        matches!(self, StoreError::UndefinedColumn { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    /// Column is non-null and not an empty string.
    NotEmpty(String),
    IsNull(String),
    Gte(String, Value),
    Lte(String, Value),
    /// `(company_id = X AND division_id = Y) OR (company_id IS NULL AND division_id IS NULL)`
    TenantOrGlobal(TenantScope),
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(column.to_string(), value.into())
    }

    pub fn tenant(scope: &TenantScope) -> [Filter; 2] {
        [
            Filter::eq(COMPANY_ID, scope.company_id.to_string()),
            Filter::eq(DIVISION_ID, scope.division_id.to_string()),
        ]
    }

    pub fn columns(&self) -> Vec<&str> {
        match self {
            Filter::Eq(column, _)
            | Filter::NotEmpty(column)
            | Filter::IsNull(column)
            | Filter::Gte(column, _)
            | Filter::Lte(column, _) => vec![column.as_str()],
            Filter::TenantOrGlobal(_) => vec![COMPANY_ID, DIVISION_ID],
        }
    }
}

/// A select against one table. `range` is inclusive on both ends.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<String>,
    pub range: Option<(usize, usize)>,
}

impl Query {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            filters: Vec::new(),
            order_by: None,
            range: None,
        }
    }

    pub fn scoped(mut self, scope: &TenantScope) -> Self {
        self.filters.extend(Filter::tenant(scope));
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::eq(column, value))
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.order_by = Some(column.to_string());
        self
    }

    pub fn range(mut self, from: usize, to: usize) -> Self {
        self.range = Some((from, to));
        self
    }

    /// Zero-based page of `size` rows.
    pub fn page(self, page: usize, size: usize) -> Self {
        let from = page * size;
        self.range(from, from + size.saturating_sub(1))
    }

    pub fn limit(&self) -> Option<usize> {
        self.range.map(|(from, to)| to.saturating_sub(from) + 1)
    }

    pub fn offset(&self) -> usize {
        self.range.map(|(from, _)| from).unwrap_or(0)
    }
}

/// The persistence seam: tenant-agnostic table operations. Callers pass the scope as filters.
#[async_trait]
pub trait RowStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;
    async fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError>;
    async fn insert(&self, table: &str, rows: &[Row]) -> Result<u64, StoreError>;
    async fn upsert(&self, table: &str, rows: &[Row], conflict: &[&str])
    -> Result<u64, StoreError>;
    async fn update(&self, table: &str, filters: &[Filter], patch: &Row)
    -> Result<u64, StoreError>;
    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<u64, StoreError>;
}
