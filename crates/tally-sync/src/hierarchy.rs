use std::collections::HashSet;

use tally_core::{
    Filter, HierarchyNode, Query, RowStore, StoreError, TenantScope, build_hierarchy, row_text,
    tables,
};

const PAGE_SIZE: usize = 1000;

/// Name tree of a master table built from the tenant's rows plus global
/// defaults (rows without a tenant). A tenant row hides the default of the
/// same name.
pub async fn load_hierarchy(
    store: &dyn RowStore,
    table: &str,
    scope: &TenantScope,
) -> Result<Vec<HierarchyNode>, StoreError> {
    let query = Query::table(table)
        .filter(Filter::TenantOrGlobal(*scope))
        .filter(Filter::NotEmpty("name".to_string()))
        .order_by("name");

    let mut tenant = Vec::new();
    let mut global = Vec::new();
    let mut page = 0;
    loop {
        let rows = store.select(&query.clone().page(page, PAGE_SIZE)).await?;
        for row in &rows {
            let pair = (
                row_text(row, "name").unwrap_or_default().to_string(),
                row_text(row, "parent").unwrap_or_default().to_string(),
            );
            if scope.owns(row) {
                tenant.push(pair);
            } else {
                global.push(pair);
            }
        }
        if rows.len() < PAGE_SIZE {
            break;
        }
        page += 1;
    }

    let own: HashSet<String> = tenant.iter().map(|(name, _)| name.clone()).collect();
    global.retain(|(name, _)| !own.contains(name));

    Ok(build_hierarchy(tenant.into_iter().chain(global)))
}

pub async fn group_hierarchy(
    store: &dyn RowStore,
    scope: &TenantScope,
) -> Result<Vec<HierarchyNode>, StoreError> {
    load_hierarchy(store, tables::GROUP, scope).await
}

pub async fn voucher_type_hierarchy(
    store: &dyn RowStore,
    scope: &TenantScope,
) -> Result<Vec<HierarchyNode>, StoreError> {
    load_hierarchy(store, tables::VOUCHER_TYPE, scope).await
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use tally_core::Row;
    use tally_store::InMemoryStore;
    use uuid::Uuid;

    use super::*;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn tenant_rows_shadow_global_defaults() {
        let store = InMemoryStore::new();
        let scope = TenantScope::new(Uuid::new_v4(), Uuid::new_v4());
        let other = TenantScope::new(Uuid::new_v4(), Uuid::new_v4());

        let mut sales = row(json!({"guid": "t1", "name": "Sales", "parent": "Accounting"}));
        scope.stamp(&mut sales);
        let mut foreign = row(json!({"guid": "o1", "name": "Payroll", "parent": ""}));
        other.stamp(&mut foreign);
        let defaults = vec![
            row(json!({"guid": "d1", "name": "Accounting", "parent": ""})),
            row(json!({"guid": "d2", "name": "Sales", "parent": ""})),
        ];

        store.insert(tables::VOUCHER_TYPE, &[sales, foreign]).await.unwrap();
        store.insert(tables::VOUCHER_TYPE, &defaults).await.unwrap();

        let forest = voucher_type_hierarchy(&store, &scope).await.unwrap();
        let names: Vec<&str> = forest.iter().map(|node| node.name.as_str()).collect();
        assert_eq!(names, vec!["Accounting"]);
        assert_eq!(forest[0].children[0].name, "Sales");
        assert_eq!(forest[0].size(), 2);
    }
}
