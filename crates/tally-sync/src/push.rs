use tally_xml::{ImportResponse, VoucherDraft, XmlError, import_envelope};
use thiserror::Error;
use tracing::{info, warn};

use crate::client::{ClientError, TallySource};

#[derive(Debug, Error)]
pub enum PushError {
    #[error(transparent)]
    Invalid(#[from] XmlError),

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Creates `drafts` in Tally. Dates are normalized first when the target
/// company runs in education mode.
pub async fn push_vouchers(
    source: &dyn TallySource,
    company: Option<&str>,
    drafts: &[VoucherDraft],
    education_mode: bool,
) -> Result<ImportResponse, PushError> {
    let envelope = import_envelope(company, drafts, education_mode)?;
    let response = source.send(&envelope).await?;
    let parsed = ImportResponse::parse(response.status, &response.body);

    if parsed.success {
        info!(created = parsed.created, altered = parsed.altered, "vouchers imported");
    } else {
        warn!(
            status = parsed.http_status,
            errors = parsed.errors,
            line_errors = ?parsed.line_errors,
            "voucher import rejected"
        );
    }
    Ok(parsed)
}
