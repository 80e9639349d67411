use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tally_core::{Filter, Query, Row, RowStore, StoreError, TenantScope, row_text, tables};
use tracing::{debug, info, warn};

use crate::transform::INVENTORY_SEPARATOR;

pub const BATCH_SIZE: usize = 1000;

const VOUCHER_NUMBER: &str = "voucher_number";
const VOUCHER_GUID: &str = "voucher_guid";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStrategy {
    /// Join on the tenant's `voucher_number`.
    VoucherNumber,
    /// Legacy schema without `trn_inventory.voucher_number`: take the part of the
    /// row GUID before `-inventory-`. Assumes lines were keyed
    /// `{voucher guid}-inventory-{n}`, which is not verified.
    GuidPrefix,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRepair {
    pub table: String,
    pub strategy: RepairStrategy,
    pub total: usize,
    pub fixed: usize,
    pub skipped: usize,
}

impl TableRepair {
    fn new(table: &str, strategy: RepairStrategy) -> Self {
        Self {
            table: table.to_string(),
            strategy,
            total: 0,
            fixed: 0,
            skipped: 0,
        }
    }
}

/// Where one voucher number resolves and how many lines point at it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherDiagnostic {
    pub voucher_number: String,
    pub voucher_guid: Option<String>,
    pub matching_vouchers: usize,
    pub accounting_rows: usize,
    pub inventory_rows: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    pub tables: Vec<TableRepair>,
    pub diagnostic: Option<VoucherDiagnostic>,
    pub errors: Vec<String>,
}

impl RepairReport {
    pub fn fixed(&self) -> usize {
        self.tables.iter().map(|table| table.fixed).sum()
    }

    pub fn table(&self, name: &str) -> Option<&TableRepair> {
        self.tables.iter().find(|table| table.table == name)
    }
}

/// Voucher number to GUID for one tenant. Numbers shared by several vouchers
/// resolve to nothing.
#[derive(Debug, Default)]
struct VoucherIndex {
    by_number: HashMap<String, Option<String>>,
}

impl VoucherIndex {
    fn add(&mut self, number: &str, guid: &str) {
        self.by_number
            .entry(number.to_string())
            .and_modify(|existing| {
                if existing.as_deref() != Some(guid) {
                    *existing = None;
                }
            })
            .or_insert_with(|| Some(guid.to_string()));
    }

    fn resolve(&self, number: &str) -> Option<&str> {
        self.by_number.get(number)?.as_deref()
    }
}

/// Backfills `voucher_guid` on accounting and inventory lines of one tenant.
pub struct RelationshipRepairer<'a> {
    store: &'a dyn RowStore,
    scope: TenantScope,
    batch_size: usize,
}

impl<'a> RelationshipRepairer<'a> {
    pub fn new(store: &'a dyn RowStore, scope: TenantScope) -> Self {
        Self {
            store,
            scope,
            batch_size: BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Runs both tables, then the optional diagnostic for `diagnose`.
    pub async fn run(&self, diagnose: Option<&str>) -> RepairReport {
        let mut report = RepairReport::default();

        let index = match self.voucher_index().await {
            Ok(index) => index,
            Err(err) => {
                warn!(scope = %self.scope, "voucher prefetch failed: {err}");
                report.errors.push(format!("{}: {err}", tables::VOUCHER));
                return report;
            }
        };

        report.tables.push(
            self.repair_by_number(tables::ACCOUNTING, &index, &mut report.errors)
                .await,
        );

        let inventory = match self.inventory_strategy().await {
            Ok(RepairStrategy::VoucherNumber) => {
                self.repair_by_number(tables::INVENTORY, &index, &mut report.errors)
                    .await
            }
            Ok(RepairStrategy::GuidPrefix) => {
                info!(
                    scope = %self.scope,
                    "trn_inventory has no voucher_number column, deriving voucher_guid from line GUIDs"
                );
                self.repair_by_guid_prefix(&mut report.errors).await
            }
            Err(err) => {
                warn!(scope = %self.scope, "inventory column check failed: {err}");
                report.errors.push(format!("{}: {err}", tables::INVENTORY));
                TableRepair::new(tables::INVENTORY, RepairStrategy::VoucherNumber)
            }
        };
        report.tables.push(inventory);

        if let Some(number) = diagnose {
            match self.diagnose(number).await {
                Ok(diagnostic) => report.diagnostic = Some(diagnostic),
                Err(err) => report.errors.push(format!("diagnostic {number}: {err}")),
            }
        }

        for table in &report.tables {
            info!(
                table = %table.table,
                strategy = ?table.strategy,
                total = table.total,
                fixed = table.fixed,
                skipped = table.skipped,
                "relationship repair finished"
            );
        }

        report
    }

    async fn voucher_index(&self) -> Result<VoucherIndex, StoreError> {
        let mut index = VoucherIndex::default();
        self.for_each_page(
            Query::table(tables::VOUCHER)
                .scoped(&self.scope)
                .filter(Filter::NotEmpty(VOUCHER_NUMBER.to_string())),
            |rows| {
                for row in rows {
                    if let (Some(number), Some(guid)) =
                        (row_text(row, VOUCHER_NUMBER), row_text(row, "guid"))
                    {
                        index.add(number, guid);
                    }
                }
            },
        )
        .await?;
        debug!(vouchers = index.by_number.len(), "voucher index built");
        Ok(index)
    }

    /// Probes `trn_inventory.voucher_number`; an undefined-column error selects
    /// the GUID-prefix strategy.
    async fn inventory_strategy(&self) -> Result<RepairStrategy, StoreError> {
        let lookup = Query::table(tables::INVENTORY)
            .scoped(&self.scope)
            .filter(Filter::NotEmpty(VOUCHER_NUMBER.to_string()))
            .range(0, 0);

        match self.store.select(&lookup).await {
            Ok(_) => Ok(RepairStrategy::VoucherNumber),
            Err(err) if err.is_undefined_column() => Ok(RepairStrategy::GuidPrefix),
            Err(err) => Err(err),
        }
    }

    async fn repair_by_number(
        &self,
        table: &str,
        index: &VoucherIndex,
        errors: &mut Vec<String>,
    ) -> TableRepair {
        let mut repair = TableRepair::new(table, RepairStrategy::VoucherNumber);
        let base = Query::table(table)
            .scoped(&self.scope)
            .filter(Filter::NotEmpty(VOUCHER_NUMBER.to_string()))
            .order_by("guid");

        let mut page = 0;
        loop {
            let rows = match self.store.select(&base.clone().page(page, self.batch_size)).await {
                Ok(rows) => rows,
                Err(err) => {
                    warn!(table, page, "repair paging stopped: {err}");
                    errors.push(format!("{table}: {err}"));
                    break;
                }
            };

            for row in &rows {
                repair.total += 1;
                let number = row_text(row, VOUCHER_NUMBER).unwrap_or_default();
                match index.resolve(number) {
                    Some(voucher_guid) => self.relink(table, row, voucher_guid, &mut repair).await,
                    None => {
                        debug!(table, voucher_number = number, "no unique voucher for line");
                        repair.skipped += 1;
                    }
                }
            }

            if rows.len() < self.batch_size {
                break;
            }
            page += 1;
        }

        repair
    }

    async fn repair_by_guid_prefix(&self, errors: &mut Vec<String>) -> TableRepair {
        let table = tables::INVENTORY;
        let mut repair = TableRepair::new(table, RepairStrategy::GuidPrefix);
        let base = Query::table(table).scoped(&self.scope).order_by("guid");

        let mut page = 0;
        loop {
            let rows = match self.store.select(&base.clone().page(page, self.batch_size)).await {
                Ok(rows) => rows,
                Err(err) => {
                    warn!(table, page, "repair paging stopped: {err}");
                    errors.push(format!("{table}: {err}"));
                    break;
                }
            };

            for row in &rows {
                repair.total += 1;
                match row_text(row, "guid").and_then(voucher_guid_from_line) {
                    Some(voucher_guid) => self.relink(table, row, voucher_guid, &mut repair).await,
                    None => repair.skipped += 1,
                }
            }

            if rows.len() < self.batch_size {
                break;
            }
            page += 1;
        }

        repair
    }

    /// Points `row` at `voucher_guid` unless it already does.
    async fn relink(&self, table: &str, row: &Row, voucher_guid: &str, repair: &mut TableRepair) {
        if row_text(row, VOUCHER_GUID) == Some(voucher_guid) {
            return;
        }
        let Some(guid) = row_text(row, "guid") else {
            repair.skipped += 1;
            return;
        };

        let mut filters = Filter::tenant(&self.scope).to_vec();
        filters.push(Filter::eq("guid", guid));
        let mut patch = Row::new();
        patch.insert(
            VOUCHER_GUID.to_string(),
            Value::String(voucher_guid.to_string()),
        );

        match self.store.update(table, &filters, &patch).await {
            Ok(_) => repair.fixed += 1,
            Err(err) => {
                debug!(table, guid, "relink failed: {err}");
                repair.skipped += 1;
            }
        }
    }

    async fn diagnose(&self, voucher_number: &str) -> Result<VoucherDiagnostic, StoreError> {
        let vouchers = self
            .store
            .select(
                &Query::table(tables::VOUCHER)
                    .scoped(&self.scope)
                    .eq(VOUCHER_NUMBER, voucher_number),
            )
            .await?;
        let voucher_guid = match vouchers.as_slice() {
            [only] => row_text(only, "guid").map(str::to_string),
            _ => None,
        };

        let (accounting_rows, inventory_rows) = match &voucher_guid {
            Some(guid) => (
                self.count_lines(tables::ACCOUNTING, guid).await?,
                self.count_lines(tables::INVENTORY, guid).await?,
            ),
            None => (0, 0),
        };

        Ok(VoucherDiagnostic {
            voucher_number: voucher_number.to_string(),
            voucher_guid,
            matching_vouchers: vouchers.len(),
            accounting_rows,
            inventory_rows,
        })
    }

    async fn count_lines(&self, table: &str, voucher_guid: &str) -> Result<usize, StoreError> {
        let mut count = 0;
        self.for_each_page(
            Query::table(table)
                .scoped(&self.scope)
                .eq(VOUCHER_GUID, voucher_guid),
            |rows| count += rows.len(),
        )
        .await?;
        Ok(count)
    }

    async fn for_each_page<F>(&self, query: Query, mut visit: F) -> Result<(), StoreError>
    where
        F: FnMut(&[Row]),
    {
        let query = query.order_by("guid");
        let mut page = 0;
        loop {
            let rows = self
                .store
                .select(&query.clone().page(page, self.batch_size))
                .await?;
            visit(&rows);
            if rows.len() < self.batch_size {
                return Ok(());
            }
            page += 1;
        }
    }
}

/// `"V123-inventory-2"` gives `"V123"`. Lines without the separator or with an
/// empty prefix give nothing.
pub fn voucher_guid_from_line(line_guid: &str) -> Option<&str> {
    line_guid
        .split_once(INVENTORY_SEPARATOR)
        .map(|(prefix, _)| prefix)
        .filter(|prefix| !prefix.is_empty())
}
