use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tally_core::{DataType, Filter, LoadMode, RowStore, TenantScope, row_text, tables};
use tally_xml::{ExportRequest, extract_records, schema_for};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    amounts::{RecalcReport, recalculate_amounts},
    client::TallySource,
    loader::{LoadSummary, load},
    repair::{RelationshipRepairer, RepairReport},
    transform::{GuidGenerator, Transformer},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Clear and reload every table for the tenant.
    Full,
    /// Upsert, with vouchers limited to the date range.
    Incremental,
}

impl SyncMode {
    pub fn load_mode(&self) -> LoadMode {
        match self {
            SyncMode::Full => LoadMode::Replace,
            SyncMode::Incremental => LoadMode::Upsert,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
    pub scope: TenantScope,
    pub mode: SyncMode,
    pub data_types: Vec<DataType>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub company: Option<String>,
}

impl SyncPlan {
    pub fn full(scope: TenantScope) -> Self {
        Self {
            scope,
            mode: SyncMode::Full,
            data_types: DataType::DEFAULT.to_vec(),
            from_date: None,
            to_date: None,
            company: None,
        }
    }

    pub fn incremental(scope: TenantScope, from_date: NaiveDate, to_date: NaiveDate) -> Self {
        Self {
            mode: SyncMode::Incremental,
            from_date: Some(from_date),
            to_date: Some(to_date),
            ..Self::full(scope)
        }
    }

    pub fn with_types(mut self, data_types: impl IntoIterator<Item = DataType>) -> Self {
        self.data_types = data_types.into_iter().collect();
        self
    }

    pub fn with_company(mut self, company: Option<String>) -> Self {
        self.company = company.filter(|name| !name.trim().is_empty());
        self
    }

    fn request(&self, data_type: DataType) -> ExportRequest {
        let mut request = ExportRequest::new(data_type);
        if let (Some(from), Some(to)) = (self.from_date, self.to_date) {
            request = request.date_range(from, to);
        }
        if let Some(company) = &self.company {
            request = request.company(company.clone());
        }
        request
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    Fetching,
    Extracting,
    Loading,
    Repairing,
    Recalculating,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub run_id: Uuid,
    pub stage: SyncStage,
    pub data_type: Option<DataType>,
    pub current: usize,
    pub total: usize,
    pub records_processed: usize,
}

/// State of one sync run, owned by the caller and handed to
/// [`SyncOrchestrator::run`].
#[derive(Debug)]
pub struct SyncSession {
    run_id: Uuid,
    guids: GuidGenerator,
    progress: Option<mpsc::UnboundedSender<SyncProgress>>,
    records_processed: usize,
}

impl SyncSession {
    pub fn new() -> Self {
        let run_id = Uuid::new_v4();
        Self {
            run_id,
            guids: GuidGenerator::new(run_id),
            progress: None,
            records_processed: 0,
        }
    }

    pub fn with_progress(mut self, sender: mpsc::UnboundedSender<SyncProgress>) -> Self {
        self.progress = Some(sender);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Fire and forget: a dropped receiver never affects the run.
    fn report(&self, stage: SyncStage, data_type: Option<DataType>, current: usize, total: usize) {
        if let Some(sender) = &self.progress {
            let _ = sender.send(SyncProgress {
                run_id: self.run_id,
                stage,
                data_type,
                current,
                total,
                records_processed: self.records_processed,
            });
        }
    }
}

impl Default for SyncSession {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeStatus {
    Succeeded,
    Partial,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeOutcome {
    pub data_type: DataType,
    pub status: TypeStatus,
    pub records: usize,
    pub tables: Vec<LoadSummary>,
    pub error: Option<String>,
}

impl TypeOutcome {
    fn failed(data_type: DataType, error: impl ToString) -> Self {
        Self {
            data_type,
            status: TypeStatus::Failed,
            records: 0,
            tables: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub scope: TenantScope,
    pub mode: SyncMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub types: Vec<TypeOutcome>,
    pub repair: Option<RepairReport>,
    pub amounts: Option<RecalcReport>,
    pub amounts_error: Option<String>,
}

impl SyncReport {
    pub fn succeeded(&self) -> bool {
        self.types
            .iter()
            .all(|outcome| outcome.status == TypeStatus::Succeeded)
            && self.amounts_error.is_none()
    }

    pub fn outcome(&self, data_type: DataType) -> Option<&TypeOutcome> {
        self.types
            .iter()
            .find(|outcome| outcome.data_type == data_type)
    }
}

/// Runs fetch, extract, transform and load per data type, then repair and
/// amount recalculation when vouchers were loaded.
#[derive(Clone)]
pub struct SyncOrchestrator {
    source: Arc<dyn TallySource>,
    store: Arc<dyn RowStore>,
}

impl SyncOrchestrator {
    pub fn new(source: Arc<dyn TallySource>, store: Arc<dyn RowStore>) -> Self {
        Self { source, store }
    }

    pub async fn run(&self, plan: &SyncPlan, mut session: SyncSession) -> SyncReport {
        let started_at = Utc::now();
        info!(
            run_id = %session.run_id,
            scope = %plan.scope,
            mode = ?plan.mode,
            types = plan.data_types.len(),
            "sync started"
        );

        let total = plan.data_types.len();
        let mut types = Vec::with_capacity(total);
        for (index, data_type) in plan.data_types.iter().copied().enumerate() {
            let outcome = self.sync_type(plan, &mut session, data_type, index, total).await;
            match &outcome.error {
                Some(err) => warn!(
                    data_type = %data_type,
                    status = ?outcome.status,
                    "sync step failed: {err}"
                ),
                None => info!(data_type = %data_type, records = outcome.records, "sync step finished"),
            }
            types.push(outcome);
        }

        let vouchers_loaded = types.iter().any(|outcome| {
            outcome.data_type == DataType::Vouchers && outcome.status != TypeStatus::Failed
        });

        let (mut repair, mut amounts, mut amounts_error) = (None, None, None);
        if vouchers_loaded {
            session.report(SyncStage::Repairing, Some(DataType::Vouchers), total, total);
            repair = Some(
                RelationshipRepairer::new(self.store.as_ref(), plan.scope)
                    .run(None)
                    .await,
            );

            session.report(SyncStage::Recalculating, Some(DataType::Vouchers), total, total);
            match recalculate_amounts(self.store.as_ref(), &plan.scope, None).await {
                Ok(report) => amounts = Some(report),
                Err(err) => {
                    error!(scope = %plan.scope, "amount recalculation failed: {err}");
                    amounts_error = Some(err.to_string());
                }
            }
        }

        session.report(SyncStage::Completed, None, total, total);
        let report = SyncReport {
            run_id: session.run_id,
            scope: plan.scope,
            mode: plan.mode,
            started_at,
            finished_at: Utc::now(),
            types,
            repair,
            amounts,
            amounts_error,
        };
        info!(
            run_id = %report.run_id,
            succeeded = report.succeeded(),
            records = session.records_processed,
            "sync finished"
        );
        report
    }

    async fn sync_type(
        &self,
        plan: &SyncPlan,
        session: &mut SyncSession,
        data_type: DataType,
        index: usize,
        total: usize,
    ) -> TypeOutcome {
        session.report(SyncStage::Fetching, Some(data_type), index, total);
        let xml = match self.source.post_xml(&plan.request(data_type).to_xml()).await {
            Ok(xml) => xml,
            Err(err) => return TypeOutcome::failed(data_type, err),
        };

        session.report(SyncStage::Extracting, Some(data_type), index, total);
        let records = extract_records(&xml, schema_for(data_type));
        let batches =
            Transformer::new(plan.scope, &session.guids).transform_all(data_type, &records);

        session.report(SyncStage::Loading, Some(data_type), index, total);
        let mode = plan.mode.load_mode();
        let reloaded: Vec<String> = match (data_type, mode) {
            (DataType::Vouchers, LoadMode::Upsert) => batches
                .iter()
                .filter(|batch| batch.table == tables::VOUCHER)
                .flat_map(|batch| batch.rows.iter())
                .filter_map(|row| row_text(row, "guid"))
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };

        let mut summaries = Vec::with_capacity(batches.len());
        for batch in batches {
            let cleared = match batch.table {
                tables::ACCOUNTING | tables::INVENTORY => {
                    self.clear_lines(batch.table, &reloaded, &plan.scope).await
                }
                _ => 0,
            };
            let mut summary =
                load(self.store.as_ref(), batch.table, mode, batch.rows, &plan.scope).await;
            summary.deleted += cleared;
            session.records_processed += summary.inserted;
            summaries.push(summary);
        }
        session.report(SyncStage::Loading, Some(data_type), index + 1, total);

        let attempted: usize = summaries.iter().map(|summary| summary.total).sum();
        let failed: usize = summaries.iter().map(|summary| summary.failed).sum();
        let status = match failed {
            0 => TypeStatus::Succeeded,
            _ if failed == attempted => TypeStatus::Failed,
            _ => TypeStatus::Partial,
        };
        let error = summaries
            .iter()
            .find_map(|summary| summary.errors.first())
            .map(|failure| failure.error.clone());

        TypeOutcome {
            data_type,
            status,
            records: records.len(),
            tables: summaries,
            error,
        }
    }

    /// Deletes the existing lines of vouchers about to be upserted again, so
    /// lines removed in Tally since the last sync do not linger.
    async fn clear_lines(&self, table: &str, vouchers: &[String], scope: &TenantScope) -> u64 {
        let mut deleted = 0;
        for voucher in vouchers {
            let mut filters = Filter::tenant(scope).to_vec();
            filters.push(Filter::eq("voucher_guid", voucher.as_str()));
            match self.store.delete(table, &filters).await {
                Ok(count) => deleted += count,
                Err(err) => warn!(table, voucher = %voucher, "stale line cleanup failed: {err}"),
            }
        }
        deleted
    }
}
