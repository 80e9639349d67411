//! The Tally to Postgres pipeline: fetch, extract, transform, load, then
//! repair voucher links and recompute voucher totals.

pub mod amounts;
pub mod client;
pub mod hierarchy;
pub mod loader;
pub mod orchestrator;
pub mod push;
pub mod repair;
pub mod transform;

pub use amounts::{MAX_VOUCHERS, RecalcReport, recalculate_amounts};
pub use client::{ClientError, DEFAULT_TIMEOUT, HttpTallyClient, TallyResponse, TallySource};
pub use hierarchy::{group_hierarchy, load_hierarchy, voucher_type_hierarchy};
pub use loader::{LoadSummary, RowFailure, load};
pub use orchestrator::{
    SyncMode, SyncOrchestrator, SyncPlan, SyncProgress, SyncReport, SyncSession, SyncStage,
    TypeOutcome, TypeStatus,
};
pub use push::{PushError, push_vouchers};
pub use repair::{
    RelationshipRepairer, RepairReport, RepairStrategy, TableRepair, VoucherDiagnostic,
    voucher_guid_from_line,
};
pub use transform::{GuidGenerator, TableRows, Transformer, VoucherRows};
