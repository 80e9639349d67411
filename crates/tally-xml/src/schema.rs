use tally_core::DataType;

use crate::extract::{FieldSpec, ListSpec, RecordSchema};

pub const LEDGER_ENTRIES: &str = "ledger_entries";
pub const INVENTORY_ENTRIES: &str = "inventory_entries";

pub static GROUP_SCHEMA: RecordSchema = RecordSchema {
    tag: "GROUP",
    fields: &[
        FieldSpec::text("GUID"),
        FieldSpec::text("NAME"),
        FieldSpec::text("PARENT"),
        FieldSpec::flag("ISREVENUE"),
        FieldSpec::flag("ISDEEMEDPOSITIVE"),
        FieldSpec::flag("AFFECTSGROSSPROFIT"),
    ],
    lists: &[],
};

pub static LEDGER_SCHEMA: RecordSchema = RecordSchema {
    tag: "LEDGER",
    fields: &[
        FieldSpec::text("GUID"),
        FieldSpec::text("NAME"),
        FieldSpec::text("PARENT"),
        FieldSpec::number("OPENINGBALANCE"),
        FieldSpec::number("CLOSINGBALANCE"),
        FieldSpec::flag("ISBILLWISEON"),
        FieldSpec::text("PARTYGSTIN"),
        FieldSpec::text("EMAIL"),
        FieldSpec::text("ADDRESS").within("ADDRESS.LIST").key("address"),
    ],
    lists: &[],
};

pub static STOCK_ITEM_SCHEMA: RecordSchema = RecordSchema {
    tag: "STOCKITEM",
    fields: &[
        FieldSpec::text("GUID"),
        FieldSpec::text("NAME"),
        FieldSpec::text("PARENT").or("Primary"),
        FieldSpec::text("BASEUNITS").or("PCS"),
        FieldSpec::number("OPENINGBALANCE"),
        FieldSpec::number("OPENINGRATE"),
        FieldSpec::number("OPENINGVALUE"),
        FieldSpec::text("HSNCODE").within("GSTDETAILS.LIST").key("hsn_code"),
    ],
    lists: &[],
};

pub static GODOWN_SCHEMA: RecordSchema = RecordSchema {
    tag: "GODOWN",
    fields: &[
        FieldSpec::text("GUID"),
        FieldSpec::text("NAME"),
        FieldSpec::text("PARENT"),
        FieldSpec::text("ADDRESS").within("ADDRESS.LIST").key("address"),
    ],
    lists: &[],
};

pub static VOUCHER_TYPE_SCHEMA: RecordSchema = RecordSchema {
    tag: "VOUCHERTYPE",
    fields: &[
        FieldSpec::text("GUID"),
        FieldSpec::text("NAME"),
        FieldSpec::text("PARENT"),
        FieldSpec::text("NUMBERINGMETHOD"),
        FieldSpec::flag("ISACTIVE").or("Yes"),
    ],
    lists: &[],
};

pub static UNIT_SCHEMA: RecordSchema = RecordSchema {
    tag: "UNIT",
    fields: &[
        FieldSpec::text("GUID"),
        FieldSpec::text("NAME"),
        FieldSpec::text("ORIGINALNAME"),
        FieldSpec::flag("ISSIMPLEUNIT").or("Yes"),
        FieldSpec::number("DECIMALPLACES"),
    ],
    lists: &[],
};

pub static COST_CATEGORY_SCHEMA: RecordSchema = RecordSchema {
    tag: "COSTCATEGORY",
    fields: &[
        FieldSpec::text("GUID"),
        FieldSpec::text("NAME"),
        FieldSpec::flag("ALLOCATEREVENUE"),
        FieldSpec::flag("ALLOCATENONREVENUE"),
    ],
    lists: &[],
};

pub static COST_CENTRE_SCHEMA: RecordSchema = RecordSchema {
    tag: "COSTCENTRE",
    fields: &[
        FieldSpec::text("GUID"),
        FieldSpec::text("NAME"),
        FieldSpec::text("PARENT"),
        FieldSpec::text("CATEGORY").or("Primary Cost Category"),
    ],
    lists: &[],
};

pub static EMPLOYEE_SCHEMA: RecordSchema = RecordSchema {
    tag: "EMPLOYEE",
    fields: &[
        FieldSpec::text("GUID"),
        FieldSpec::text("NAME"),
        FieldSpec::text("PARENT"),
        FieldSpec::text("EMPLOYEENUMBER"),
        FieldSpec::text("DESIGNATION"),
        FieldSpec::text("DATEOFJOIN"),
    ],
    lists: &[],
};

pub static PAYHEAD_SCHEMA: RecordSchema = RecordSchema {
    tag: "PAYHEAD",
    fields: &[
        FieldSpec::text("GUID"),
        FieldSpec::text("NAME"),
        FieldSpec::text("PARENT"),
        FieldSpec::text("PAYTYPE"),
        FieldSpec::text("CALCULATIONTYPE"),
    ],
    lists: &[],
};

pub static VOUCHER_SCHEMA: RecordSchema = RecordSchema {
    tag: "VOUCHER",
    fields: &[
        FieldSpec::text("GUID"),
        FieldSpec::text("DATE"),
        FieldSpec::text("VOUCHERTYPENAME"),
        FieldSpec::text("VOUCHERNUMBER"),
        FieldSpec::text("PARTYLEDGERNAME"),
        FieldSpec::text("NARRATION"),
        FieldSpec::text("REFERENCE"),
        FieldSpec::flag("ISCANCELLED"),
    ],
    lists: &[
        ListSpec {
            key: LEDGER_ENTRIES,
            tags: &["ALLLEDGERENTRIES.LIST", "LEDGERENTRIES.LIST"],
            fields: &[
                FieldSpec::text("LEDGERNAME"),
                FieldSpec::number("AMOUNT"),
                FieldSpec::flag("ISDEEMEDPOSITIVE"),
                FieldSpec::text("NAME")
                    .within("COSTCENTREALLOCATIONS.LIST")
                    .key("cost_centre"),
                FieldSpec::text("CATEGORY")
                    .within("CATEGORYALLOCATIONS.LIST")
                    .key("cost_category"),
            ],
        },
        ListSpec {
            key: INVENTORY_ENTRIES,
            tags: &["ALLINVENTORYENTRIES.LIST", "INVENTORYENTRIES.LIST"],
            fields: &[
                FieldSpec::text("STOCKITEMNAME"),
                FieldSpec::number("ACTUALQTY"),
                FieldSpec::number("BILLEDQTY"),
                FieldSpec::number("RATE"),
                FieldSpec::number("AMOUNT"),
                FieldSpec::text("GODOWNNAME")
                    .within("BATCHALLOCATIONS.LIST")
                    .key("godown"),
                FieldSpec::text("BATCHNAME")
                    .within("BATCHALLOCATIONS.LIST")
                    .key("batch_name"),
            ],
        },
    ],
};

pub fn schema_for(data_type: DataType) -> &'static RecordSchema {
    match data_type {
        DataType::Groups => &GROUP_SCHEMA,
        DataType::Ledgers => &LEDGER_SCHEMA,
        DataType::StockItems => &STOCK_ITEM_SCHEMA,
        DataType::Godowns => &GODOWN_SCHEMA,
        DataType::VoucherTypes => &VOUCHER_TYPE_SCHEMA,
        DataType::Units => &UNIT_SCHEMA,
        DataType::CostCategories => &COST_CATEGORY_SCHEMA,
        DataType::CostCentres => &COST_CENTRE_SCHEMA,
        DataType::Employees => &EMPLOYEE_SCHEMA,
        DataType::Payheads => &PAYHEAD_SCHEMA,
        DataType::Vouchers => &VOUCHER_SCHEMA,
    }
}
