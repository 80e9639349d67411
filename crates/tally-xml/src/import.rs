use chrono::{Datelike, Months, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    error::XmlError,
    extract::{all_elements, first_element},
    request::escape_text,
};

/// One ledger line. Positive amounts are the debit side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerLine {
    pub ledger: String,
    pub amount: Decimal,
}

/// One stock line. Positive amounts are inward (debit side).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryLine {
    pub stock_item: String,
    pub quantity: Decimal,
    pub rate: Decimal,
    pub amount: Decimal,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub godown: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoucherDraft {
    pub voucher_type: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub party: Option<String>,
    #[serde(default)]
    pub narration: Option<String>,
    pub ledger_entries: Vec<LedgerLine>,
    #[serde(default)]
    pub inventory_entries: Vec<InventoryLine>,
}

impl VoucherDraft {
    fn label(&self) -> String {
        self.number
            .clone()
            .unwrap_or_else(|| format!("{} {}", self.voucher_type, self.date))
    }

    pub fn validate(&self) -> Result<(), XmlError> {
        if self.voucher_type.trim().is_empty() {
            return Err(XmlError::MissingVoucherType(self.label()));
        }
        if self.ledger_entries.is_empty() {
            return Err(XmlError::EmptyVoucher(self.label()));
        }

        let difference: Decimal = self.ledger_entries.iter().map(|line| line.amount).sum();
        if !difference.is_zero() {
            return Err(XmlError::Unbalanced {
                number: self.label(),
                difference,
            });
        }

        Ok(())
    }
}

pub fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1)
        .and_then(|first| first.checked_add_months(Months::new(1)))
        .and_then(|next| next.pred_opt())
        .unwrap_or(date)
}

/// Education-mode Tally only accepts the 1st, 2nd or last day of a month.
/// Other days move to the nearest allowed day; ties go to the 2nd.
pub fn education_mode_date(date: NaiveDate) -> NaiveDate {
    let last = last_day_of_month(date);
    let day = date.day();
    if day <= 2 || day == last.day() {
        return date;
    }

    if day - 2 <= last.day() - day {
        date.with_day(2).unwrap_or(date)
    } else {
        last
    }
}

/// Tally records debits as negative amounts flagged `ISDEEMEDPOSITIVE=Yes`.
fn tally_amount(amount: Decimal) -> (&'static str, String) {
    let deemed_positive = if amount > Decimal::ZERO { "Yes" } else { "No" };
    (deemed_positive, (-amount).normalize().to_string())
}

fn optional_element(buffer: &mut String, tag: &str, value: Option<&str>) {
    if let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) {
        buffer.push_str(&format!("<{tag}>{}</{tag}>", escape_text(value)));
    }
}

fn render_voucher(draft: &VoucherDraft, education_mode: bool) -> String {
    let date = if education_mode {
        education_mode_date(draft.date)
    } else {
        draft.date
    };
    let voucher_type = escape_text(draft.voucher_type.trim());

    let mut xml = format!(
        "<VOUCHER VCHTYPE=\"{voucher_type}\" ACTION=\"Create\"><DATE>{}</DATE><VOUCHERTYPENAME>{voucher_type}</VOUCHERTYPENAME>",
        date.format("%Y%m%d")
    );
    optional_element(&mut xml, "VOUCHERNUMBER", draft.number.as_deref());
    optional_element(&mut xml, "PARTYLEDGERNAME", draft.party.as_deref());
    optional_element(&mut xml, "NARRATION", draft.narration.as_deref());

    for line in &draft.ledger_entries {
        let (deemed_positive, amount) = tally_amount(line.amount);
        xml.push_str(&format!(
            "<ALLLEDGERENTRIES.LIST><LEDGERNAME>{}</LEDGERNAME><ISDEEMEDPOSITIVE>{deemed_positive}</ISDEEMEDPOSITIVE><AMOUNT>{amount}</AMOUNT></ALLLEDGERENTRIES.LIST>",
            escape_text(line.ledger.trim())
        ));
    }

    for line in &draft.inventory_entries {
        let (deemed_positive, amount) = tally_amount(line.amount);
        let unit = line.unit.as_deref().unwrap_or("Nos");
        let quantity = format!("{} {}", line.quantity.normalize(), escape_text(unit));
        xml.push_str(&format!(
            "<ALLINVENTORYENTRIES.LIST><STOCKITEMNAME>{}</STOCKITEMNAME><ISDEEMEDPOSITIVE>{deemed_positive}</ISDEEMEDPOSITIVE><RATE>{}/{}</RATE><AMOUNT>{amount}</AMOUNT><ACTUALQTY>{quantity}</ACTUALQTY><BILLEDQTY>{quantity}</BILLEDQTY>",
            escape_text(line.stock_item.trim()),
            line.rate.normalize(),
            escape_text(unit)
        ));
        if let Some(godown) = line.godown.as_deref().filter(|godown| !godown.trim().is_empty()) {
            xml.push_str(&format!(
                "<BATCHALLOCATIONS.LIST><GODOWNNAME>{}</GODOWNNAME><AMOUNT>{amount}</AMOUNT><ACTUALQTY>{quantity}</ACTUALQTY><BILLEDQTY>{quantity}</BILLEDQTY></BATCHALLOCATIONS.LIST>",
                escape_text(godown.trim())
            ));
        }
        xml.push_str("</ALLINVENTORYENTRIES.LIST>");
    }

    xml.push_str("</VOUCHER>");
    xml
}

/// Import envelope creating every draft. Fails on the first invalid draft.
pub fn import_envelope(
    company: Option<&str>,
    drafts: &[VoucherDraft],
    education_mode: bool,
) -> Result<String, XmlError> {
    for draft in drafts {
        draft.validate()?;
    }

    let mut variables = String::new();
    optional_element(&mut variables, "SVCURRENTCOMPANY", company);

    let vouchers: String = drafts
        .iter()
        .map(|draft| render_voucher(draft, education_mode))
        .collect();

    Ok(format!(
        "<ENVELOPE><HEADER><TALLYREQUEST>Import Data</TALLYREQUEST></HEADER><BODY><IMPORTDATA><REQUESTDESC><REPORTNAME>Vouchers</REPORTNAME><STATICVARIABLES>{variables}</STATICVARIABLES></REQUESTDESC><REQUESTDATA><TALLYMESSAGE xmlns:UDF=\"TallyUDF\">{vouchers}</TALLYMESSAGE></REQUESTDATA></IMPORTDATA></BODY></ENVELOPE>"
    ))
}

/// HTTP 200, `<STATUS>1</STATUS>` and `<ERRORS>0</ERRORS>`.
pub fn is_success(http_status: u16, body: &str) -> bool {
    http_status == 200
        && body.contains("<STATUS>1</STATUS>")
        && body.contains("<ERRORS>0</ERRORS>")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportResponse {
    pub success: bool,
    pub http_status: u16,
    pub created: u64,
    pub altered: u64,
    pub errors: u64,
    pub line_errors: Vec<String>,
}

impl ImportResponse {
    pub fn parse(http_status: u16, body: &str) -> Self {
        let count = |tag: &str| {
            first_element(body, tag)
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(0)
        };

        Self {
            success: is_success(http_status, body),
            http_status,
            created: count("CREATED"),
            altered: count("ALTERED"),
            errors: count("ERRORS"),
            line_errors: all_elements(body, "LINEERROR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default()
    }

    fn sales_draft() -> VoucherDraft {
        VoucherDraft {
            voucher_type: "Sales".to_string(),
            date: day(2024, 4, 15),
            number: Some("S/001".to_string()),
            party: Some("Customer & Co".to_string()),
            narration: None,
            ledger_entries: vec![
                LedgerLine {
                    ledger: "Customer & Co".to_string(),
                    amount: Decimal::new(500, 0),
                },
                LedgerLine {
                    ledger: "Sales".to_string(),
                    amount: Decimal::new(-500, 0),
                },
            ],
            inventory_entries: vec![InventoryLine {
                stock_item: "Widget".to_string(),
                quantity: Decimal::new(5, 0),
                rate: Decimal::new(100, 0),
                amount: Decimal::new(-500, 0),
                unit: None,
                godown: Some("Main Location".to_string()),
            }],
        }
    }

    #[test]
    fn education_mode_keeps_allowed_days() {
        assert_eq!(education_mode_date(day(2024, 4, 1)), day(2024, 4, 1));
        assert_eq!(education_mode_date(day(2024, 4, 2)), day(2024, 4, 2));
        assert_eq!(education_mode_date(day(2024, 4, 30)), day(2024, 4, 30));
        assert_eq!(education_mode_date(day(2024, 2, 29)), day(2024, 2, 29));
    }

    #[test]
    fn education_mode_moves_to_nearest_allowed_day() {
        assert_eq!(education_mode_date(day(2024, 4, 10)), day(2024, 4, 2));
        assert_eq!(education_mode_date(day(2024, 4, 16)), day(2024, 4, 2));
        assert_eq!(education_mode_date(day(2024, 4, 17)), day(2024, 4, 30));
        assert_eq!(education_mode_date(day(2023, 12, 28)), day(2023, 12, 31));
    }

    #[test]
    fn envelope_renders_voucher_with_tally_signs() {
        let xml = import_envelope(Some("Demo Co"), &[sales_draft()], false).unwrap_or_default();

        assert!(xml.contains("<TALLYREQUEST>Import Data</TALLYREQUEST>"));
        assert!(xml.contains("<SVCURRENTCOMPANY>Demo Co</SVCURRENTCOMPANY>"));
        assert!(xml.contains("<VOUCHER VCHTYPE=\"Sales\" ACTION=\"Create\"><DATE>20240415</DATE>"));
        assert!(xml.contains(
            "<LEDGERNAME>Customer &amp; Co</LEDGERNAME><ISDEEMEDPOSITIVE>Yes</ISDEEMEDPOSITIVE><AMOUNT>-500</AMOUNT>"
        ));
        assert!(xml.contains(
            "<LEDGERNAME>Sales</LEDGERNAME><ISDEEMEDPOSITIVE>No</ISDEEMEDPOSITIVE><AMOUNT>500</AMOUNT>"
        ));
        assert!(xml.contains("<ACTUALQTY>5 Nos</ACTUALQTY>"));
        assert!(xml.contains("<GODOWNNAME>Main Location</GODOWNNAME>"));
    }

    #[test]
    fn education_mode_rewrites_voucher_date() {
        let xml = import_envelope(None, &[sales_draft()], true).unwrap_or_default();
        assert!(xml.contains("<DATE>20240402</DATE>"));
    }

    #[test]
    fn rejects_unbalanced_and_empty_drafts() {
        let mut unbalanced = sales_draft();
        unbalanced.ledger_entries[1].amount = Decimal::new(-400, 0);
        assert_eq!(
            import_envelope(None, &[unbalanced], false),
            Err(XmlError::Unbalanced {
                number: "S/001".to_string(),
                difference: Decimal::new(100, 0),
            })
        );

        let mut empty = sales_draft();
        empty.ledger_entries.clear();
        assert!(matches!(
            empty.validate(),
            Err(XmlError::EmptyVoucher(_))
        ));
    }

    #[test]
    fn detects_success_and_parses_counts() {
        let ok = "<RESPONSE><STATUS>1</STATUS><CREATED>2</CREATED><ALTERED>0</ALTERED><ERRORS>0</ERRORS></RESPONSE>";
        let response = ImportResponse::parse(200, ok);
        assert!(response.success);
        assert_eq!(response.created, 2);

        assert!(!is_success(500, ok));

        let failed = "<RESPONSE><STATUS>1</STATUS><CREATED>0</CREATED><ERRORS>1</ERRORS><LINEERROR>Ledger 'X' does not exist!</LINEERROR></RESPONSE>";
        let response = ImportResponse::parse(200, failed);
        assert!(!response.success);
        assert_eq!(response.errors, 1);
        assert_eq!(response.line_errors, vec!["Ledger 'X' does not exist!".to_string()]);
    }
}
