mod common;

use common::{scope, seed, tenant_rows};
use serde_json::json;
use tally_core::{TenantScope, row_text, tables};
use tally_store::InMemoryStore;
use tally_sync::{RelationshipRepairer, RepairStrategy};

async fn seed_vouchers(store: &InMemoryStore, scope: &TenantScope) {
    seed(
        store,
        scope,
        tables::VOUCHER,
        vec![
            json!({"guid": "V1", "voucher_number": "1"}),
            json!({"guid": "V2", "voucher_number": "2"}),
            json!({"guid": "V3a", "voucher_number": "3"}),
            json!({"guid": "V3b", "voucher_number": "3"}),
        ],
    )
    .await;
}

fn voucher_guid_of(rows: &[tally_core::Row], guid: &str) -> Option<String> {
    rows.iter()
        .find(|row| row_text(row, "guid") == Some(guid))
        .and_then(|row| row_text(row, "voucher_guid"))
        .map(str::to_string)
}

#[tokio::test]
async fn repair_links_lines_and_is_idempotent() {
    let store = InMemoryStore::new();
    let scope = scope();
    seed_vouchers(&store, &scope).await;
    seed(
        &store,
        &scope,
        tables::ACCOUNTING,
        vec![
            json!({"guid": "a1", "voucher_number": "1", "voucher_guid": ""}),
            json!({"guid": "a2", "voucher_number": "1", "voucher_guid": "V1"}),
            json!({"guid": "a3", "voucher_number": "2", "voucher_guid": "stale"}),
            json!({"guid": "a4", "voucher_number": "3", "voucher_guid": ""}),
            json!({"guid": "a5", "voucher_number": "99"}),
            json!({"guid": "a6", "voucher_number": ""}),
        ],
    )
    .await;
    seed(
        &store,
        &scope,
        tables::INVENTORY,
        vec![json!({"guid": "i1", "voucher_number": "2", "voucher_guid": null})],
    )
    .await;

    let first = RelationshipRepairer::new(&store, scope).run(None).await;
    let accounting = first.table(tables::ACCOUNTING).unwrap();
    assert_eq!(accounting.strategy, RepairStrategy::VoucherNumber);
    assert_eq!(accounting.total, 5);
    assert_eq!(accounting.fixed, 2);
    assert_eq!(accounting.skipped, 2);
    assert_eq!(first.table(tables::INVENTORY).unwrap().fixed, 1);
    assert!(first.errors.is_empty());

    let rows = tenant_rows(&store, &scope, tables::ACCOUNTING).await;
    assert_eq!(voucher_guid_of(&rows, "a1").as_deref(), Some("V1"));
    assert_eq!(voucher_guid_of(&rows, "a3").as_deref(), Some("V2"));
    assert_eq!(voucher_guid_of(&rows, "a4"), None);

    let second = RelationshipRepairer::new(&store, scope).run(None).await;
    assert!(second.tables.iter().all(|table| table.fixed == 0));
    assert_eq!(second.fixed(), 0);
}

#[tokio::test]
async fn small_batches_cover_every_page() {
    let store = InMemoryStore::new();
    let scope = scope();
    seed_vouchers(&store, &scope).await;
    let lines = (0..7)
        .map(|index| json!({"guid": format!("a{index}"), "voucher_number": "1"}))
        .collect();
    seed(&store, &scope, tables::ACCOUNTING, lines).await;

    let report = RelationshipRepairer::new(&store, scope)
        .with_batch_size(2)
        .run(None)
        .await;

    let accounting = report.table(tables::ACCOUNTING).unwrap();
    assert_eq!(accounting.total, 7);
    assert_eq!(accounting.fixed, 7);
}

#[tokio::test]
async fn legacy_inventory_schema_derives_guid_prefix() {
    let store = InMemoryStore::new().with_columns(
        tables::INVENTORY,
        &[
            "guid",
            "voucher_guid",
            "stock_item",
            "amount",
            "company_id",
            "division_id",
            "created_at",
        ],
    );
    let scope = scope();
    seed(
        &store,
        &scope,
        tables::INVENTORY,
        vec![
            json!({"guid": "V123-inventory-2", "voucher_guid": ""}),
            json!({"guid": "V9-inventory-1", "voucher_guid": "V9"}),
            json!({"guid": "orphan-line", "voucher_guid": ""}),
        ],
    )
    .await;

    let report = RelationshipRepairer::new(&store, scope).run(None).await;

    let inventory = report.table(tables::INVENTORY).unwrap();
    assert_eq!(inventory.strategy, RepairStrategy::GuidPrefix);
    assert_eq!(inventory.total, 3);
    assert_eq!(inventory.fixed, 1);
    assert_eq!(inventory.skipped, 1);

    let rows = tenant_rows(&store, &scope, tables::INVENTORY).await;
    assert_eq!(voucher_guid_of(&rows, "V123-inventory-2").as_deref(), Some("V123"));

    let again = RelationshipRepairer::new(&store, scope).run(None).await;
    assert_eq!(again.fixed(), 0);
}

#[tokio::test]
async fn repair_never_crosses_tenants() {
    let store = InMemoryStore::new();
    let tenant = scope();
    let neighbour = scope();

    seed(&store, &tenant, tables::VOUCHER, vec![json!({"guid": "T1", "voucher_number": "1"})]).await;
    seed(&store, &neighbour, tables::VOUCHER, vec![json!({"guid": "N1", "voucher_number": "1"})]).await;
    seed(&store, &tenant, tables::ACCOUNTING, vec![json!({"guid": "t-a", "voucher_number": "1"})]).await;
    seed(&store, &neighbour, tables::ACCOUNTING, vec![json!({"guid": "n-a", "voucher_number": "1"})]).await;

    let report = RelationshipRepairer::new(&store, tenant).run(None).await;
    assert_eq!(report.fixed(), 1);

    let tenant_lines = tenant_rows(&store, &tenant, tables::ACCOUNTING).await;
    assert_eq!(voucher_guid_of(&tenant_lines, "t-a").as_deref(), Some("T1"));
    let neighbour_lines = tenant_rows(&store, &neighbour, tables::ACCOUNTING).await;
    assert_eq!(voucher_guid_of(&neighbour_lines, "n-a"), None);
}

#[tokio::test]
async fn diagnostic_reports_line_counts() {
    let store = InMemoryStore::new();
    let scope = scope();
    seed_vouchers(&store, &scope).await;
    seed(
        &store,
        &scope,
        tables::ACCOUNTING,
        vec![
            json!({"guid": "a1", "voucher_number": "2", "voucher_guid": "V2"}),
            json!({"guid": "a2", "voucher_number": "2", "voucher_guid": ""}),
        ],
    )
    .await;

    let report = RelationshipRepairer::new(&store, scope).run(Some("2")).await;
    let diagnostic = report.diagnostic.unwrap();
    assert_eq!(diagnostic.voucher_guid.as_deref(), Some("V2"));
    assert_eq!(diagnostic.matching_vouchers, 1);
    assert_eq!(diagnostic.accounting_rows, 2);
    assert_eq!(diagnostic.inventory_rows, 0);

    let ambiguous = RelationshipRepairer::new(&store, scope).run(Some("3")).await;
    let diagnostic = ambiguous.diagnostic.unwrap();
    assert_eq!(diagnostic.voucher_guid, None);
    assert_eq!(diagnostic.matching_vouchers, 2);
}
