use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde_json::Value;
use tally_core::{DataType, Row, TenantScope, decimal_value, tables};
use tally_xml::{
    ExtractedRecord, INVENTORY_ENTRIES, LEDGER_ENTRIES, parse_number, parse_tally_date,
    parse_yes_no,
};
use tracing::warn;
use uuid::Uuid;

pub const LEDGER_SEPARATOR: &str = "-ledger-";
pub const INVENTORY_SEPARATOR: &str = "-inventory-";

/// Synthesizes GUIDs for records Tally exported without one.
///
/// Shape is `{prefix}-{run id}-{n}`; the run id is random and `n` counts up
/// from 1, so values never repeat within or across runs.
#[derive(Debug)]
pub struct GuidGenerator {
    run_id: Uuid,
    counter: AtomicU64,
}

impl GuidGenerator {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            counter: AtomicU64::new(0),
        }
    }

    pub fn next(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{prefix}-{}-{n}", self.run_id)
    }
}

/// Rows produced for one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableRows {
    pub table: &'static str,
    pub rows: Vec<Row>,
}

/// A voucher split into its header row and line rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoucherRows {
    pub voucher: Row,
    pub accounting: Vec<Row>,
    pub inventory: Vec<Row>,
}

pub struct Transformer<'a> {
    scope: TenantScope,
    guids: &'a GuidGenerator,
    created_at: String,
}

impl<'a> Transformer<'a> {
    pub fn new(scope: TenantScope, guids: &'a GuidGenerator) -> Self {
        Self::at(scope, guids, Utc::now())
    }

    pub fn at(scope: TenantScope, guids: &'a GuidGenerator, now: DateTime<Utc>) -> Self {
        Self {
            scope,
            guids,
            created_at: now.to_rfc3339(),
        }
    }

    /// Rows for every table `data_type` writes, in [`DataType::tables`] order.
    pub fn transform_all(
        &self,
        data_type: DataType,
        records: &[ExtractedRecord],
    ) -> Vec<TableRows> {
        if data_type.is_transactional() {
            let mut vouchers = TableRows {
                table: tables::VOUCHER,
                rows: Vec::with_capacity(records.len()),
            };
            let mut accounting = TableRows {
                table: tables::ACCOUNTING,
                rows: Vec::new(),
            };
            let mut inventory = TableRows {
                table: tables::INVENTORY,
                rows: Vec::new(),
            };

            for record in records {
                let rows = self.voucher(record);
                vouchers.rows.push(rows.voucher);
                accounting.rows.extend(rows.accounting);
                inventory.rows.extend(rows.inventory);
            }

            return vec![vouchers, accounting, inventory];
        }

        let rows = records
            .iter()
            .map(|record| self.master(data_type, record))
            .collect();
        vec![TableRows {
            table: data_type.tables()[0],
            rows,
        }]
    }

    /// Master record row. Vouchers go through [`Transformer::voucher`].
    pub fn master(&self, data_type: DataType, record: &ExtractedRecord) -> Row {
        let mut row = self.base_row(data_type, record);
        put_text(&mut row, "name", record.get("NAME"));

        match data_type {
            DataType::Groups => {
                put_text(&mut row, "parent", record.get("PARENT"));
                put_flag(&mut row, "is_revenue", record.get("ISREVENUE"));
                put_flag(&mut row, "is_deemedpositive", record.get("ISDEEMEDPOSITIVE"));
                put_flag(&mut row, "affects_gross_profit", record.get("AFFECTSGROSSPROFIT"));
            }
            DataType::Ledgers => {
                put_text(&mut row, "parent", record.get("PARENT"));
                put_number(&mut row, "opening_balance", record.get("OPENINGBALANCE"));
                put_number(&mut row, "closing_balance", record.get("CLOSINGBALANCE"));
                put_flag(&mut row, "is_billwise_on", record.get("ISBILLWISEON"));
                put_text(&mut row, "gstin", record.get("PARTYGSTIN"));
                put_text(&mut row, "email", record.get("EMAIL"));
                put_text(&mut row, "mailing_address", record.get("address"));
            }
            DataType::StockItems => {
                put_text(&mut row, "parent", record.get("PARENT"));
                put_text(&mut row, "base_units", record.get("BASEUNITS"));
                put_number(&mut row, "opening_quantity", record.get("OPENINGBALANCE"));
                put_number(&mut row, "opening_rate", record.get("OPENINGRATE"));
                put_number(&mut row, "opening_value", record.get("OPENINGVALUE"));
                put_text(&mut row, "gst_hsn_code", record.get("hsn_code"));
            }
            DataType::Godowns => {
                put_text(&mut row, "parent", record.get("PARENT"));
                put_text(&mut row, "address", record.get("address"));
            }
            DataType::VoucherTypes => {
                put_text(&mut row, "parent", record.get("PARENT"));
                put_text(&mut row, "numbering_method", record.get("NUMBERINGMETHOD"));
                put_flag(&mut row, "is_active", record.get("ISACTIVE"));
            }
            DataType::Units => {
                put_text(&mut row, "formal_name", record.get("ORIGINALNAME"));
                put_flag(&mut row, "is_simple_unit", record.get("ISSIMPLEUNIT"));
                let places = parse_number(record.get("DECIMALPLACES")).trunc();
                row.insert(
                    "decimal_places".to_string(),
                    Value::from(places.to_i64().unwrap_or(0)),
                );
            }
            DataType::CostCategories => {
                put_flag(&mut row, "allocate_revenue", record.get("ALLOCATEREVENUE"));
                put_flag(&mut row, "allocate_non_revenue", record.get("ALLOCATENONREVENUE"));
            }
            DataType::CostCentres => {
                put_text(&mut row, "parent", record.get("PARENT"));
                put_text(&mut row, "category", record.get("CATEGORY"));
            }
            DataType::Employees => {
                put_text(&mut row, "parent", record.get("PARENT"));
                put_text(&mut row, "employee_number", record.get("EMPLOYEENUMBER"));
                put_text(&mut row, "designation", record.get("DESIGNATION"));
                put_date(&mut row, "date_of_joining", record.get("DATEOFJOIN"));
            }
            DataType::Payheads => {
                put_text(&mut row, "parent", record.get("PARENT"));
                put_text(&mut row, "pay_type", record.get("PAYTYPE"));
                put_text(&mut row, "calculation_type", record.get("CALCULATIONTYPE"));
            }
            DataType::Vouchers => {}
        }

        row
    }

    /// Voucher header plus accounting/inventory lines. Line GUIDs are
    /// `{voucher guid}-ledger-{n}` and `{voucher guid}-inventory-{n}`, 1-based.
    pub fn voucher(&self, record: &ExtractedRecord) -> VoucherRows {
        let mut voucher = self.base_row(DataType::Vouchers, record);
        let voucher_guid = text_of(&voucher, "guid");
        let voucher_number = record.get("VOUCHERNUMBER").to_string();

        put_text(&mut voucher, "voucher_number", &voucher_number);
        put_text(&mut voucher, "voucher_type", record.get("VOUCHERTYPENAME"));
        put_date(&mut voucher, "date", record.get("DATE"));
        put_text(&mut voucher, "party_name", record.get("PARTYLEDGERNAME"));
        put_text(&mut voucher, "narration", record.get("NARRATION"));
        put_text(&mut voucher, "reference", record.get("REFERENCE"));
        put_flag(&mut voucher, "is_cancelled", record.get("ISCANCELLED"));

        let mut total = Some(Decimal::ZERO);
        let accounting: Vec<Row> = record
            .list(LEDGER_ENTRIES)
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let amount = debit_amount(entry.get("AMOUNT"));
                if amount > Decimal::ZERO {
                    total = total.and_then(|sum| sum.checked_add(amount));
                }

                let mut row =
                    self.line_row(&voucher_guid, LEDGER_SEPARATOR, index, &voucher_number);
                put_text(&mut row, "ledger", entry.get("LEDGERNAME"));
                row.insert("amount".to_string(), decimal_value(amount));
                put_flag(&mut row, "is_deemed_positive", entry.get("ISDEEMEDPOSITIVE"));
                put_text(&mut row, "cost_centre", entry.get("cost_centre"));
                put_text(&mut row, "cost_category", entry.get("cost_category"));
                row
            })
            .collect();

        let inventory: Vec<Row> = record
            .list(INVENTORY_ENTRIES)
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let actual = parse_number(entry.get("ACTUALQTY"));
                let quantity = if actual.is_zero() {
                    parse_number(entry.get("BILLEDQTY"))
                } else {
                    actual
                };

                let mut row =
                    self.line_row(&voucher_guid, INVENTORY_SEPARATOR, index, &voucher_number);
                put_text(&mut row, "stock_item", entry.get("STOCKITEMNAME"));
                row.insert("quantity".to_string(), decimal_value(quantity));
                put_number(&mut row, "rate", entry.get("RATE"));
                row.insert(
                    "amount".to_string(),
                    decimal_value(debit_amount(entry.get("AMOUNT"))),
                );
                put_text(&mut row, "godown", entry.get("godown"));
                put_text(&mut row, "batch_name", entry.get("batch_name"));
                row
            })
            .collect();

        let total = total.unwrap_or_else(|| {
            warn!(voucher = %voucher_guid, "voucher total overflows, stored as zero");
            Decimal::ZERO
        });
        voucher.insert("total_amount".to_string(), decimal_value(total));
        voucher.insert("final_amount".to_string(), decimal_value(total));

        VoucherRows {
            voucher,
            accounting,
            inventory,
        }
    }

    fn base_row(&self, data_type: DataType, record: &ExtractedRecord) -> Row {
        let guid = match record.get("GUID") {
            "" => self.guids.next(data_type.guid_prefix()),
            guid => guid.to_string(),
        };

        let mut row = Row::new();
        row.insert("guid".to_string(), Value::String(guid));
        self.scope.stamp(&mut row);
        row.insert(
            "created_at".to_string(),
            Value::String(self.created_at.clone()),
        );
        row
    }

    fn line_row(&self, voucher_guid: &str, separator: &str, index: usize, number: &str) -> Row {
        let mut row = Row::new();
        row.insert(
            "guid".to_string(),
            Value::String(format!("{voucher_guid}{separator}{}", index + 1)),
        );
        row.insert(
            "voucher_guid".to_string(),
            Value::String(voucher_guid.to_string()),
        );
        put_text(&mut row, "voucher_number", number);
        self.scope.stamp(&mut row);
        row.insert(
            "created_at".to_string(),
            Value::String(self.created_at.clone()),
        );
        row
    }
}

fn text_of(row: &Row, column: &str) -> String {
    row.get(column)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn put_text(row: &mut Row, column: &str, value: &str) {
    row.insert(column.to_string(), Value::String(value.to_string()));
}

fn put_number(row: &mut Row, column: &str, value: &str) {
    row.insert(column.to_string(), decimal_value(parse_number(value)));
}

/// Tally exports debits as negative amounts; stored lines keep the debit side
/// positive, matching `LedgerLine` on the import path.
fn debit_amount(value: &str) -> Decimal {
    -parse_number(value)
}

fn put_flag(row: &mut Row, column: &str, value: &str) {
    row.insert(column.to_string(), Value::Bool(parse_yes_no(value)));
}

fn put_date(row: &mut Row, column: &str, value: &str) {
    let date = parse_tally_date(value)
        .map(|date| Value::String(date.format("%Y-%m-%d").to_string()))
        .unwrap_or(Value::Null);
    row.insert(column.to_string(), date);
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tally_core::{row_decimal, row_text};

    use super::*;

    fn record(fields: &[(&str, &str)]) -> ExtractedRecord {
        ExtractedRecord {
            fields: fields
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
            lists: HashMap::new(),
        }
    }

    fn scope() -> TenantScope {
        TenantScope::new(Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn synthesized_guids_are_unique_per_run() {
        let run_id = Uuid::new_v4();
        let guids = GuidGenerator::new(run_id);
        let first = guids.next("ledger");
        let second = guids.next("ledger");

        assert_eq!(first, format!("ledger-{run_id}-1"));
        assert_ne!(first, second);
    }

    #[test]
    fn master_rows_are_stamped_and_typed() {
        let scope = scope();
        let guids = GuidGenerator::new(Uuid::new_v4());
        let transformer = Transformer::new(scope, &guids);

        let row = transformer.master(
            DataType::Ledgers,
            &record(&[
                ("NAME", "Cash"),
                ("PARENT", ""),
                ("OPENINGBALANCE", "-1,250.50"),
                ("ISBILLWISEON", "Yes"),
            ]),
        );

        assert!(scope.owns(&row));
        assert!(row_text(&row, "guid").is_some_and(|guid| guid.starts_with("ledger-")));
        assert_eq!(row["parent"], "");
        assert_eq!(row_decimal(&row, "opening_balance"), Some(Decimal::new(-125050, 2)));
        assert_eq!(row["is_billwise_on"], true);
        assert!(row.contains_key("created_at"));
    }

    #[test]
    fn voucher_lines_carry_derived_guids_and_positive_total() {
        let guids = GuidGenerator::new(Uuid::new_v4());
        let transformer = Transformer::new(scope(), &guids);

        let mut voucher = record(&[
            ("GUID", "V001"),
            ("VOUCHERNUMBER", "1"),
            ("DATE", "20240415"),
        ]);
        voucher.lists.insert(
            LEDGER_ENTRIES.to_string(),
            vec![
                record(&[("LEDGERNAME", "Cash"), ("AMOUNT", "-500")]),
                record(&[("LEDGERNAME", "Sales"), ("AMOUNT", "500")]),
            ],
        );
        voucher.lists.insert(
            INVENTORY_ENTRIES.to_string(),
            vec![record(&[
                ("STOCKITEMNAME", "Widget"),
                ("ACTUALQTY", "0"),
                ("BILLEDQTY", "5 Nos"),
            ])],
        );

        let rows = transformer.voucher(&voucher);
        assert_eq!(rows.voucher["date"], "2024-04-15");
        assert_eq!(row_decimal(&rows.voucher, "total_amount"), Some(Decimal::new(500, 0)));
        assert_eq!(rows.voucher["final_amount"], rows.voucher["total_amount"]);

        let guids: Vec<&str> = rows
            .accounting
            .iter()
            .filter_map(|row| row_text(row, "guid"))
            .collect();
        assert_eq!(guids, vec!["V001-ledger-1", "V001-ledger-2"]);
        assert_eq!(rows.accounting[1]["voucher_guid"], "V001");
        assert_eq!(row_decimal(&rows.accounting[0], "amount"), Some(Decimal::new(500, 0)));
        assert_eq!(row_decimal(&rows.accounting[1], "amount"), Some(Decimal::new(-500, 0)));

        assert_eq!(rows.inventory[0]["guid"], "V001-inventory-1");
        assert_eq!(row_decimal(&rows.inventory[0], "quantity"), Some(Decimal::new(5, 0)));
    }

    #[test]
    fn overflowing_voucher_total_falls_back_to_zero() {
        let guids = GuidGenerator::new(Uuid::new_v4());
        let transformer = Transformer::new(scope(), &guids);

        let huge = "-79228162514264337593543950335";
        let mut voucher = record(&[("GUID", "V-big")]);
        voucher.lists.insert(
            LEDGER_ENTRIES.to_string(),
            vec![
                record(&[("LEDGERNAME", "Cash"), ("AMOUNT", huge)]),
                record(&[("LEDGERNAME", "Bank"), ("AMOUNT", huge)]),
            ],
        );

        let rows = transformer.voucher(&voucher);
        assert_eq!(row_decimal(&rows.voucher, "total_amount"), Some(Decimal::ZERO));
        assert_eq!(rows.accounting.len(), 2);
        assert_eq!(row_decimal(&rows.accounting[0], "amount"), Some(Decimal::MAX));
    }

    #[test]
    fn transform_all_routes_vouchers_to_three_tables() {
        let guids = GuidGenerator::new(Uuid::new_v4());
        let transformer = Transformer::new(scope(), &guids);

        let batches = transformer.transform_all(DataType::Vouchers, &[record(&[("GUID", "V9")])]);
        let tables: Vec<&str> = batches.iter().map(|batch| batch.table).collect();
        assert_eq!(tables, DataType::Vouchers.tables());
        assert_eq!(batches[0].rows.len(), 1);
        assert!(batches[1].rows.is_empty());
    }
}
