use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_core::{
    Filter, Query, Row, RowStore, StoreError, TenantScope, decimal_value, row_decimal, row_text,
    tables,
};
use tracing::{debug, info, warn};

/// Most vouchers examined by one run.
pub const MAX_VOUCHERS: usize = 5000;

const PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecalcReport {
    pub examined: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Sets `total_amount` and `final_amount` of up to `limit` vouchers (capped at
/// [`MAX_VOUCHERS`]) to the sum of their strictly positive accounting amounts.
///
/// Vouchers are taken in GUID order. Only vouchers whose stored amounts differ
/// are written. A voucher with an unreadable line amount or a failed update is
/// counted in `failed` and the run moves on. Errors only when the vouchers or
/// lines cannot be read at all.
pub async fn recalculate_amounts(
    store: &dyn RowStore,
    scope: &TenantScope,
    limit: Option<usize>,
) -> Result<RecalcReport, StoreError> {
    let limit = limit.unwrap_or(MAX_VOUCHERS).min(MAX_VOUCHERS);
    let vouchers = store
        .select(
            &Query::table(tables::VOUCHER)
                .scoped(scope)
                .order_by("guid")
                .range(0, limit.saturating_sub(1)),
        )
        .await?;
    let sums = positive_sums(store, scope).await?;

    let mut report = RecalcReport::default();
    for voucher in vouchers.iter().take(limit) {
        report.examined += 1;
        let Some(guid) = row_text(voucher, "guid") else {
            report.failed += 1;
            continue;
        };

        let expected = match sums.totals.get(guid) {
            _ if sums.unreadable.contains(guid) => {
                warn!(voucher = guid, "skipping voucher with unreadable line amounts");
                report.failed += 1;
                continue;
            }
            Some(total) => *total,
            None => Decimal::ZERO,
        };

        let current_total = row_decimal(voucher, "total_amount");
        let current_final = row_decimal(voucher, "final_amount");
        if current_total == Some(expected) && current_final == Some(expected) {
            continue;
        }

        let mut filters = Filter::tenant(scope).to_vec();
        filters.push(Filter::eq("guid", guid));
        let mut patch = Row::new();
        patch.insert("total_amount".to_string(), decimal_value(expected));
        patch.insert("final_amount".to_string(), decimal_value(expected));

        match store.update(tables::VOUCHER, &filters, &patch).await {
            Ok(_) => {
                debug!(voucher = guid, amount = %expected, "voucher amount recalculated");
                report.updated += 1;
            }
            Err(err) => {
                warn!(voucher = guid, "amount update failed: {err}");
                report.failed += 1;
            }
        }
    }

    info!(
        %scope,
        examined = report.examined,
        updated = report.updated,
        failed = report.failed,
        "voucher amounts recalculated"
    );
    Ok(report)
}

#[derive(Default)]
struct PositiveSums {
    totals: HashMap<String, Decimal>,
    unreadable: HashSet<String>,
}

async fn positive_sums(
    store: &dyn RowStore,
    scope: &TenantScope,
) -> Result<PositiveSums, StoreError> {
    let query = Query::table(tables::ACCOUNTING)
        .scoped(scope)
        .filter(Filter::NotEmpty("voucher_guid".to_string()))
        .order_by("guid");

    let mut sums = PositiveSums::default();
    let mut page = 0;
    loop {
        let rows = store.select(&query.clone().page(page, PAGE_SIZE)).await?;
        for row in &rows {
            let Some(voucher_guid) = row_text(row, "voucher_guid") else {
                continue;
            };
            let amount = match row.get("amount") {
                None | Some(serde_json::Value::Null) => Some(Decimal::ZERO),
                Some(_) => row_decimal(row, "amount"),
            };

            let total = sums.totals.entry(voucher_guid.to_string()).or_default();
            let sum = match amount {
                Some(amount) if amount > Decimal::ZERO => total.checked_add(amount),
                Some(_) => Some(*total),
                None => None,
            };
            match sum {
                Some(sum) => *total = sum,
                None => {
                    sums.unreadable.insert(voucher_guid.to_string());
                }
            }
        }

        if rows.len() < PAGE_SIZE {
            return Ok(sums);
        }
        page += 1;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use tally_store::InMemoryStore;
    use uuid::Uuid;

    use super::*;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap_or_default()
    }

    async fn seed(store: &InMemoryStore, scope: &TenantScope, table: &str, value: Value) {
        let mut row = row(value);
        scope.stamp(&mut row);
        store.insert(table, &[row]).await.unwrap();
    }

    async fn seed_voucher(store: &InMemoryStore, scope: &TenantScope, guid: &str, total: Value) {
        let voucher = json!({"guid": guid, "total_amount": total.clone(), "final_amount": total});
        seed(store, scope, tables::VOUCHER, voucher).await;
    }

    async fn seed_line(store: &InMemoryStore, scope: &TenantScope, guid: &str, amount: &str) {
        let voucher_guid = guid.split('-').next().unwrap_or_default();
        let line = json!({"guid": guid, "voucher_guid": voucher_guid, "amount": amount});
        seed(store, scope, tables::ACCOUNTING, line).await;
    }

    #[tokio::test]
    async fn only_changed_vouchers_are_written() {
        let store = InMemoryStore::new();
        let scope = TenantScope::new(Uuid::new_v4(), Uuid::new_v4());

        seed_voucher(&store, &scope, "A", json!("0")).await;
        seed(
            &store,
            &scope,
            tables::VOUCHER,
            json!({"guid": "B", "total_amount": "75.00", "final_amount": 75}),
        )
        .await;
        seed_line(&store, &scope, "A-1", "120.5").await;
        seed_line(&store, &scope, "A-2", "-120.5").await;
        seed_line(&store, &scope, "B-1", "75").await;

        let report = recalculate_amounts(&store, &scope, None).await.unwrap();
        assert_eq!(
            report,
            RecalcReport {
                examined: 2,
                updated: 1,
                failed: 0
            }
        );

        let vouchers = store.rows(tables::VOUCHER).await;
        assert_eq!(row_decimal(&vouchers[0], "total_amount"), Some(Decimal::new(1205, 1)));
        assert_eq!(row_decimal(&vouchers[0], "final_amount"), Some(Decimal::new(1205, 1)));
    }

    #[tokio::test]
    async fn unreadable_amount_fails_only_that_voucher() {
        let store = InMemoryStore::new();
        let scope = TenantScope::new(Uuid::new_v4(), Uuid::new_v4());

        seed_voucher(&store, &scope, "A", Value::Null).await;
        seed_voucher(&store, &scope, "B", Value::Null).await;
        seed_line(&store, &scope, "A-1", "n/a").await;
        seed_line(&store, &scope, "B-1", "10").await;

        let report = recalculate_amounts(&store, &scope, None).await.unwrap();
        assert_eq!((report.updated, report.failed), (1, 1));
    }

    #[tokio::test]
    async fn overflowing_sum_fails_only_that_voucher() {
        let store = InMemoryStore::new();
        let scope = TenantScope::new(Uuid::new_v4(), Uuid::new_v4());
        let huge = "79228162514264337593543950335";

        seed_voucher(&store, &scope, "A", Value::Null).await;
        seed_voucher(&store, &scope, "B", Value::Null).await;
        seed_line(&store, &scope, "A-1", huge).await;
        seed_line(&store, &scope, "A-2", huge).await;
        seed_line(&store, &scope, "B-1", "10").await;

        let report = recalculate_amounts(&store, &scope, None).await.unwrap();
        assert_eq!((report.examined, report.updated, report.failed), (2, 1, 1));
    }

    #[tokio::test]
    async fn limit_is_capped() {
        let store = InMemoryStore::new();
        let scope = TenantScope::new(Uuid::new_v4(), Uuid::new_v4());
        for guid in ["A", "B", "C"] {
            seed_voucher(&store, &scope, guid, json!("1")).await;
        }

        let report = recalculate_amounts(&store, &scope, Some(2)).await.unwrap();
        assert_eq!(report.examined, 2);
        assert_eq!(report.updated, 2);
    }
}
