use serde::{Deserialize, Serialize};
use tally_core::{
    COMPANY_ID, DIVISION_ID, Filter, LoadMode, Row, RowStore, StoreError, TenantScope, row_text,
    tables,
};
use tracing::{debug, info, warn};

/// Rows per upsert/insert statement before falling back to row-by-row writes.
pub const CHUNK_SIZE: usize = 500;

/// Tenant-scoped natural key every loaded table is unique on.
pub const CONFLICT_KEY: [&str; 3] = [COMPANY_ID, DIVISION_ID, "guid"];

/// Errors kept per summary; the `failed` count stays exact beyond this.
const MAX_ERRORS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFailure {
    pub index: usize,
    pub guid: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSummary {
    pub table: String,
    pub mode: LoadMode,
    pub total: usize,
    pub inserted: usize,
    pub failed: usize,
    pub deleted: u64,
    pub errors: Vec<RowFailure>,
}

impl LoadSummary {
    fn new(table: &str, mode: LoadMode, total: usize) -> Self {
        Self {
            table: table.to_string(),
            mode,
            total,
            inserted: 0,
            failed: 0,
            deleted: 0,
            errors: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    fn fail(&mut self, index: usize, row: Option<&Row>, error: impl ToString) {
        self.failed += 1;
        if self.errors.len() < MAX_ERRORS {
            self.errors.push(RowFailure {
                index,
                guid: row.and_then(|row| row_text(row, "guid")).map(str::to_string),
                error: error.to_string(),
            });
        }
    }

    fn fail_all(&mut self, rows: &[Row], error: &StoreError) {
        for (index, row) in rows.iter().enumerate() {
            self.fail(index, Some(row), error);
        }
    }
}

/// Writes `rows` into `table` for `scope`. Never fails: every problem ends up
/// in the returned summary.
///
/// Each row is re-stamped with `scope` first, so a payload naming another
/// tenant still lands in this one. `replace` deletes this tenant's rows and
/// then inserts; the two steps are not atomic.
pub async fn load(
    store: &dyn RowStore,
    table: &str,
    mode: LoadMode,
    mut rows: Vec<Row>,
    scope: &TenantScope,
) -> LoadSummary {
    let mut summary = LoadSummary::new(table, mode, rows.len());

    if !tables::is_known(table) {
        summary.fail_all(&rows, &StoreError::InvalidIdentifier(table.to_string()));
        return summary;
    }

    for row in &mut rows {
        scope.stamp(row);
    }

    match mode {
        LoadMode::Insert => insert_each(store, table, &rows, 0, &mut summary).await,
        LoadMode::Upsert => write_chunked(store, table, &rows, true, &mut summary).await,
        LoadMode::Replace => {
            match store.delete(table, &Filter::tenant(scope)).await {
                Ok(deleted) => summary.deleted = deleted,
                Err(err) => {
                    warn!(table, %scope, "replace aborted, delete failed: {err}");
                    summary.fail_all(&rows, &err);
                    return summary;
                }
            }
            write_chunked(store, table, &rows, false, &mut summary).await;
        }
    }

    if summary.is_clean() {
        info!(table, mode = mode.as_str(), rows = summary.inserted, "table loaded");
    } else {
        warn!(
            table,
            mode = mode.as_str(),
            inserted = summary.inserted,
            failed = summary.failed,
            "table loaded with failures"
        );
    }

    summary
}

async fn write_chunked(
    store: &dyn RowStore,
    table: &str,
    rows: &[Row],
    upsert: bool,
    summary: &mut LoadSummary,
) {
    for (chunk_index, chunk) in rows.chunks(CHUNK_SIZE).enumerate() {
        let offset = chunk_index * CHUNK_SIZE;
        let result = if upsert {
            store.upsert(table, chunk, &CONFLICT_KEY).await
        } else {
            store.insert(table, chunk).await
        };

        match result {
            Ok(_) => summary.inserted += chunk.len(),
            Err(err) => {
                debug!(table, offset, "chunk rejected, retrying row by row: {err}");
                if upsert {
                    upsert_each(store, table, chunk, offset, summary).await;
                } else {
                    insert_each(store, table, chunk, offset, summary).await;
                }
            }
        }
    }
}

async fn insert_each(
    store: &dyn RowStore,
    table: &str,
    rows: &[Row],
    offset: usize,
    summary: &mut LoadSummary,
) {
    for (index, row) in rows.iter().enumerate() {
        match store.insert(table, std::slice::from_ref(row)).await {
            Ok(_) => summary.inserted += 1,
            Err(err) => summary.fail(offset + index, Some(row), err),
        }
    }
}

async fn upsert_each(
    store: &dyn RowStore,
    table: &str,
    rows: &[Row],
    offset: usize,
    summary: &mut LoadSummary,
) {
    for (index, row) in rows.iter().enumerate() {
        match store
            .upsert(table, std::slice::from_ref(row), &CONFLICT_KEY)
            .await
        {
            Ok(_) => summary.inserted += 1,
            Err(err) => summary.fail(offset + index, Some(row), err),
        }
    }
}
