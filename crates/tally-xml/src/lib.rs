//! Tally XML dialect: export/import envelopes and pattern-based record extraction.

pub mod error;
pub mod extract;
pub mod import;
pub mod request;
pub mod schema;

pub use error::XmlError;
pub use extract::{
    ExtractedRecord, Extractor, FieldSpec, ListSpec, RecordSchema, extract_records,
    parse_number, parse_tally_date, parse_yes_no,
};
pub use import::{
    ImportResponse, InventoryLine, LedgerLine, VoucherDraft, education_mode_date, import_envelope,
    is_success,
};
pub use request::ExportRequest;
pub use schema::{INVENTORY_ENTRIES, LEDGER_ENTRIES, schema_for};
