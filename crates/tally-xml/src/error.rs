use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum XmlError {
    #[error("invalid record pattern for <{tag}>: {reason}")]
    Pattern { tag: String, reason: String },

    #[error("voucher {0} has no ledger entries")]
    EmptyVoucher(String),

    #[error("voucher {number} is not balanced: ledger amounts sum to {difference}")]
    Unbalanced { number: String, difference: Decimal },

    #[error("voucher {0} is missing a voucher type")]
    MissingVoucherType(String),
}
