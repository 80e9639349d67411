use std::{fmt, str::FromStr};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A storage row: column name to JSON value.
pub type Row = Map<String, Value>;

pub const COMPANY_ID: &str = "company_id";
pub const DIVISION_ID: &str = "division_id";

pub mod tables {
    pub const GROUP: &str = "mst_group";
    pub const LEDGER: &str = "mst_ledger";
    pub const STOCK_ITEM: &str = "mst_stock_item";
    pub const GODOWN: &str = "mst_godown";
    pub const VOUCHER_TYPE: &str = "mst_vouchertype";
    pub const UOM: &str = "mst_uom";
    pub const COST_CATEGORY: &str = "mst_cost_category";
    pub const COST_CENTRE: &str = "mst_cost_centre";
    pub const EMPLOYEE: &str = "mst_employee";
    pub const PAYHEAD: &str = "mst_payhead";
    pub const VOUCHER: &str = "trn_voucher";
    pub const ACCOUNTING: &str = "trn_accounting";
    pub const INVENTORY: &str = "trn_inventory";

    pub const ALL: [&str; 13] = [
        GROUP,
        LEDGER,
        STOCK_ITEM,
        GODOWN,
        VOUCHER_TYPE,
        UOM,
        COST_CATEGORY,
        COST_CENTRE,
        EMPLOYEE,
        PAYHEAD,
        VOUCHER,
        ACCOUNTING,
        INVENTORY,
    ];

    pub fn is_known(table: &str) -> bool {
        ALL.contains(&table)
    }
}

/// The `(company_id, division_id)` pair every row and query is partitioned by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantScope {
    pub company_id: Uuid,
    pub division_id: Uuid,
}

impl TenantScope {
    pub fn new(company_id: Uuid, division_id: Uuid) -> Self {
        Self {
            company_id,
            division_id,
        }
    }

    /// Writes the scope columns into `row`, replacing whatever was there.
    pub fn stamp(&self, row: &mut Row) {
        row.insert(
            COMPANY_ID.to_string(),
            Value::String(self.company_id.to_string()),
        );
        row.insert(
            DIVISION_ID.to_string(),
            Value::String(self.division_id.to_string()),
        );
    }

    pub fn owns(&self, row: &Row) -> bool {
        row_text(row, COMPANY_ID) == Some(self.company_id.to_string().as_str())
            && row_text(row, DIVISION_ID) == Some(self.division_id.to_string().as_str())
    }
}

impl fmt::Display for TenantScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.company_id, self.division_id)
    }
}

/// Record categories that can be exported from Tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataType {
    Groups,
    Ledgers,
    StockItems,
    Godowns,
    VoucherTypes,
    Units,
    CostCategories,
    CostCentres,
    Employees,
    Payheads,
    Vouchers,
}

impl DataType {
    pub const DEFAULT: [DataType; 4] = [
        DataType::Groups,
        DataType::Ledgers,
        DataType::StockItems,
        DataType::Vouchers,
    ];

    /// Masters come first so vouchers load after the records they reference.
    pub const ALL: [DataType; 11] = [
        DataType::Groups,
        DataType::Ledgers,
        DataType::StockItems,
        DataType::Godowns,
        DataType::VoucherTypes,
        DataType::Units,
        DataType::CostCategories,
        DataType::CostCentres,
        DataType::Employees,
        DataType::Payheads,
        DataType::Vouchers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Groups => "groups",
            DataType::Ledgers => "ledgers",
            DataType::StockItems => "stockItems",
            DataType::Godowns => "godowns",
            DataType::VoucherTypes => "voucherTypes",
            DataType::Units => "units",
            DataType::CostCategories => "costCategories",
            DataType::CostCentres => "costCentres",
            DataType::Employees => "employees",
            DataType::Payheads => "payheads",
            DataType::Vouchers => "vouchers",
        }
    }

    /// Collection id used in the export envelope `<ID>`.
    pub fn collection_id(&self) -> &'static str {
        match self {
            DataType::Groups => "ListOfGroups",
            DataType::Ledgers => "ListOfLedgers",
            DataType::StockItems => "ListOfStockItems",
            DataType::Godowns => "ListOfGodowns",
            DataType::VoucherTypes => "ListOfVoucherTypes",
            DataType::Units => "ListOfUnits",
            DataType::CostCategories => "ListOfCostCategories",
            DataType::CostCentres => "ListOfCostCentres",
            DataType::Employees => "ListOfEmployees",
            DataType::Payheads => "ListOfPayheads",
            DataType::Vouchers => "ListOfVouchers",
        }
    }

    /// Element name of one record in the export response.
    pub fn record_tag(&self) -> &'static str {
        match self {
            DataType::Groups => "GROUP",
            DataType::Ledgers => "LEDGER",
            DataType::StockItems => "STOCKITEM",
            DataType::Godowns => "GODOWN",
            DataType::VoucherTypes => "VOUCHERTYPE",
            DataType::Units => "UNIT",
            DataType::CostCategories => "COSTCATEGORY",
            DataType::CostCentres => "COSTCENTRE",
            DataType::Employees => "EMPLOYEE",
            DataType::Payheads => "PAYHEAD",
            DataType::Vouchers => "VOUCHER",
        }
    }

    /// Tables written when this category is loaded.
    pub fn tables(&self) -> &'static [&'static str] {
        match self {
            DataType::Groups => &[tables::GROUP],
            DataType::Ledgers => &[tables::LEDGER],
            DataType::StockItems => &[tables::STOCK_ITEM],
            DataType::Godowns => &[tables::GODOWN],
            DataType::VoucherTypes => &[tables::VOUCHER_TYPE],
            DataType::Units => &[tables::UOM],
            DataType::CostCategories => &[tables::COST_CATEGORY],
            DataType::CostCentres => &[tables::COST_CENTRE],
            DataType::Employees => &[tables::EMPLOYEE],
            DataType::Payheads => &[tables::PAYHEAD],
            DataType::Vouchers => &[tables::VOUCHER, tables::ACCOUNTING, tables::INVENTORY],
        }
    }

    /// Prefix for synthesized GUIDs.
    pub fn guid_prefix(&self) -> &'static str {
        match self {
            DataType::Groups => "group",
            DataType::Ledgers => "ledger",
            DataType::StockItems => "stockitem",
            DataType::Godowns => "godown",
            DataType::VoucherTypes => "vouchertype",
            DataType::Units => "unit",
            DataType::CostCategories => "costcategory",
            DataType::CostCentres => "costcentre",
            DataType::Employees => "employee",
            DataType::Payheads => "payhead",
            DataType::Vouchers => "voucher",
        }
    }

    pub fn is_transactional(&self) -> bool {
        matches!(self, DataType::Vouchers)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized: String = value
            .trim()
            .chars()
            .filter(|character| *character != '_' && *character != '-')
            .collect::<String>()
            .to_ascii_lowercase();

        DataType::ALL
            .into_iter()
            .find(|data_type| data_type.as_str().to_ascii_lowercase() == normalized)
            .ok_or_else(|| format!("unsupported data type: {value}"))
    }
}

/// How the bulk loader writes a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    Insert,
    Upsert,
    Replace,
}

impl LoadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadMode::Insert => "insert",
            LoadMode::Upsert => "upsert",
            LoadMode::Replace => "replace",
        }
    }
}

/// Non-empty trimmed text value of a column.
pub fn row_text<'a>(row: &'a Row, column: &str) -> Option<&'a str> {
    match row.get(column) {
        Some(Value::String(value)) => {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then_some(trimmed)
        }
        _ => None,
    }
}

/// Numeric value of a column whether it was stored as a string or a JSON number.
pub fn row_decimal(row: &Row, column: &str) -> Option<Decimal> {
    match row.get(column)? {
        Value::String(value) => parse_decimal(value),
        Value::Number(number) => parse_decimal(&number.to_string()),
        _ => None,
    }
}

pub fn decimal_value(value: Decimal) -> Value {
    Value::String(value.normalize().to_string())
}

fn parse_decimal(value: &str) -> Option<Decimal> {
    let trimmed = value.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .ok()
}
