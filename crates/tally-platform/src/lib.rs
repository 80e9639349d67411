pub mod config;
pub mod contracts;
pub mod db;
pub mod redis_bus;

pub use config::ServiceConfig;
pub use contracts::{
    BulkImportRequest, BulkImportResponse, RecalcRequest, RepairRequest, SyncRequest, TableImport,
    TenantQuery, VoucherImportRequest,
};
pub use db::connect_database;
pub use redis_bus::{COMPLETED_CHANNEL, PROGRESS_CHANNEL, RedisBus};
