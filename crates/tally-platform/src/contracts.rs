use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tally_core::{DataType, LoadMode, Row, TenantScope};
use tally_sync::{LoadSummary, SyncMode, SyncPlan};
use tally_xml::VoucherDraft;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableImport {
    pub table_name: String,
    #[serde(default = "default_operation")]
    pub operation: LoadMode,
    #[serde(default)]
    pub data: Vec<Row>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkImportRequest {
    pub company_id: Uuid,
    pub division_id: Uuid,
    #[serde(default = "default_import_type")]
    pub import_type: String,
    pub tables: Vec<TableImport>,
}

impl BulkImportRequest {
    pub fn scope(&self) -> TenantScope {
        TenantScope::new(self.company_id, self.division_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkImportResponse {
    pub success: bool,
    pub import_type: String,
    pub total_processed: usize,
    pub total_failed: usize,
    pub tables: Vec<LoadSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub company_id: Uuid,
    pub division_id: Uuid,
    #[serde(default = "default_sync_mode")]
    pub mode: SyncMode,
    pub data_types: Option<Vec<DataType>>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub company: Option<String>,
}

impl SyncRequest {
    pub fn scope(&self) -> TenantScope {
        TenantScope::new(self.company_id, self.division_id)
    }

    /// Validated plan; `default_company` applies when the request names none.
    pub fn into_plan(self, default_company: Option<&str>) -> Result<SyncPlan, String> {
        let scope = self.scope();
        let plan = match (self.mode, self.from_date, self.to_date) {
            (SyncMode::Full, _, _) => SyncPlan::full(scope),
            (SyncMode::Incremental, Some(from), Some(to)) if from <= to => {
                SyncPlan::incremental(scope, from, to)
            }
            (SyncMode::Incremental, Some(_), Some(_)) => {
                return Err("from_date must not be after to_date".to_string());
            }
            (SyncMode::Incremental, _, _) => {
                return Err("incremental sync requires from_date and to_date".to_string());
            }
        };

        let plan = match self.data_types {
            Some(types) if types.is_empty() => {
                return Err("data_types must not be empty".to_string());
            }
            Some(types) => plan.with_types(types),
            None => plan,
        };

        let company = self.company.or_else(|| default_company.map(str::to_string));
        Ok(plan.with_company(company))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TenantQuery {
    pub company_id: Uuid,
    pub division_id: Uuid,
}

impl TenantQuery {
    pub fn scope(&self) -> TenantScope {
        TenantScope::new(self.company_id, self.division_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairRequest {
    pub company_id: Uuid,
    pub division_id: Uuid,
    pub voucher_number: Option<String>,
}

impl RepairRequest {
    pub fn scope(&self) -> TenantScope {
        TenantScope::new(self.company_id, self.division_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecalcRequest {
    pub company_id: Uuid,
    pub division_id: Uuid,
    pub limit: Option<usize>,
}

impl RecalcRequest {
    pub fn scope(&self) -> TenantScope {
        TenantScope::new(self.company_id, self.division_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoucherImportRequest {
    pub company: Option<String>,
    pub education_mode: Option<bool>,
    pub vouchers: Vec<VoucherDraft>,
}

fn default_operation() -> LoadMode {
    LoadMode::Upsert
}

fn default_import_type() -> String {
    "manual".to_string()
}

fn default_sync_mode() -> SyncMode {
    SyncMode::Full
}
