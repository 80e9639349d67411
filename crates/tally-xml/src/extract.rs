use std::{collections::HashMap, str::FromStr, sync::LazyLock};

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::error::XmlError;

static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[-+]?(?:\d+(?:\.\d+)?|\.\d+)").expect("number pattern is valid")
});

static NAME_ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bNAME="([^"]*)""#).expect("name attribute pattern is valid"));

static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(amp|lt|gt|quot|apos|#x[0-9A-Fa-f]+|#\d+);").expect("entity pattern is valid")
});

/// One named leaf field of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Key in the extracted map.
    pub key: &'static str,
    /// Element searched for.
    pub tag: &'static str,
    /// Restricts the search to the first `<within>` block of the record.
    pub within: Option<&'static str>,
    /// Value used when the element is absent or empty.
    pub default: &'static str,
}

impl FieldSpec {
    pub const fn text(tag: &'static str) -> Self {
        Self {
            key: tag,
            tag,
            within: None,
            default: "",
        }
    }

    pub const fn number(tag: &'static str) -> Self {
        Self::text(tag).or("0")
    }

    pub const fn flag(tag: &'static str) -> Self {
        Self::text(tag).or("No")
    }

    pub const fn or(mut self, default: &'static str) -> Self {
        self.default = default;
        self
    }

    pub const fn within(mut self, block: &'static str) -> Self {
        self.within = Some(block);
        self
    }

    pub const fn key(mut self, key: &'static str) -> Self {
        self.key = key;
        self
    }
}

/// A repeated child list such as `ALLLEDGERENTRIES.LIST`. Alternative tags are
/// merged in document order.
#[derive(Debug, Clone, Copy)]
pub struct ListSpec {
    pub key: &'static str,
    pub tags: &'static [&'static str],
    pub fields: &'static [FieldSpec],
}

#[derive(Debug, Clone, Copy)]
pub struct RecordSchema {
    pub tag: &'static str,
    pub fields: &'static [FieldSpec],
    pub lists: &'static [ListSpec],
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedRecord {
    pub fields: HashMap<String, String>,
    pub lists: HashMap<String, Vec<ExtractedRecord>>,
}

impl ExtractedRecord {
    pub fn get(&self, key: &str) -> &str {
        self.fields.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn list(&self, key: &str) -> &[ExtractedRecord] {
        self.lists.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
}

struct CompiledField {
    spec: FieldSpec,
    pattern: Regex,
    within: Option<Regex>,
}

struct CompiledList {
    key: &'static str,
    patterns: Vec<Regex>,
    fields: Vec<CompiledField>,
}

/// Pattern-based extractor for one record schema. Compile once per document.
pub struct Extractor {
    tag: &'static str,
    record: Regex,
    fields: Vec<CompiledField>,
    lists: Vec<CompiledList>,
}

impl Extractor {
    pub fn new(schema: &RecordSchema) -> Result<Self, XmlError> {
        let fields = compile_fields(schema.fields)?;
        let lists = schema
            .lists
            .iter()
            .map(|list| -> Result<CompiledList, XmlError> {
                Ok(CompiledList {
                    key: list.key,
                    patterns: list
                        .tags
                        .iter()
                        .map(|tag| element_pattern(tag))
                        .collect::<Result<_, _>>()?,
                    fields: compile_fields(list.fields)?,
                })
            })
            .collect::<Result<Vec<_>, XmlError>>()?;

        Ok(Self {
            tag: schema.tag,
            record: element_pattern(schema.tag)?,
            fields,
            lists,
        })
    }

    /// Records in document order. Truncated or unclosed records are dropped.
    pub fn extract(&self, xml: &str) -> Vec<ExtractedRecord> {
        let records: Vec<ExtractedRecord> = self
            .record
            .captures_iter(xml)
            .map(|captures| {
                let attributes = captures.get(1).map(|m| m.as_str()).unwrap_or("");
                let body = captures.get(2).map(|m| m.as_str()).unwrap_or("");
                self.extract_record(attributes, body)
            })
            .collect();

        if records.is_empty() && !xml.trim().is_empty() {
            warn!(tag = self.tag, "no complete <{}> records in response", self.tag);
        } else {
            debug!(tag = self.tag, count = records.len(), "extracted records");
        }

        records
    }

    fn extract_record(&self, attributes: &str, body: &str) -> ExtractedRecord {
        let mut lists = HashMap::new();
        let mut own_body = body.to_string();

        for list in &self.lists {
            let mut matches: Vec<(usize, &str)> = list
                .patterns
                .iter()
                .flat_map(|pattern| {
                    pattern.captures_iter(body).filter_map(|captures| {
                        let whole = captures.get(0)?;
                        let inner = captures.get(2).map(|m| m.as_str()).unwrap_or("");
                        Some((whole.start(), inner))
                    })
                })
                .collect();
            matches.sort_by_key(|(start, _)| *start);

            let children = matches
                .into_iter()
                .map(|(_, inner)| ExtractedRecord {
                    fields: read_fields(&list.fields, inner),
                    lists: HashMap::new(),
                })
                .collect();
            lists.insert(list.key.to_string(), children);

            for pattern in &list.patterns {
                own_body = pattern.replace_all(&own_body, "").into_owned();
            }
        }

        let mut fields = read_fields(&self.fields, &own_body);
        if let Some(name) = fields.get_mut("NAME") {
            if name.is_empty() {
                if let Some(attribute) = NAME_ATTRIBUTE.captures(attributes) {
                    *name = decode_entities(attribute.get(1).map(|m| m.as_str()).unwrap_or(""))
                        .trim()
                        .to_string();
                }
            }
        }

        ExtractedRecord { fields, lists }
    }
}

/// Extracts every `<tag>` record of `schema`. Never fails: a schema that cannot
/// compile or a document without complete records yields an empty sequence.
pub fn extract_records(xml: &str, schema: &RecordSchema) -> Vec<ExtractedRecord> {
    match Extractor::new(schema) {
        Ok(extractor) => extractor.extract(xml),
        Err(err) => {
            warn!("extraction skipped: {err}");
            Vec::new()
        }
    }
}

fn compile_fields(specs: &[FieldSpec]) -> Result<Vec<CompiledField>, XmlError> {
    specs
        .iter()
        .map(|spec| {
            Ok(CompiledField {
                spec: *spec,
                pattern: element_pattern(spec.tag)?,
                within: spec.within.map(element_pattern).transpose()?,
            })
        })
        .collect()
}

fn read_fields(fields: &[CompiledField], body: &str) -> HashMap<String, String> {
    fields
        .iter()
        .map(|field| {
            let scope = match &field.within {
                Some(block) => block
                    .captures(body)
                    .and_then(|captures| captures.get(2))
                    .map(|m| m.as_str()),
                None => Some(body),
            };

            let value = scope
                .and_then(|scope| field.pattern.captures(scope))
                .and_then(|captures| captures.get(2))
                .map(|m| decode_entities(m.as_str()).trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| field.spec.default.to_string());

            (field.spec.key.to_string(), value)
        })
        .collect()
}

/// Text of the first `<tag>` element anywhere in `xml`.
pub fn first_element(xml: &str, tag: &str) -> Option<String> {
    element_pattern(tag)
        .ok()?
        .captures(xml)
        .and_then(|captures| captures.get(2))
        .map(|m| decode_entities(m.as_str()).trim().to_string())
}

/// Text of every `<tag>` element in document order.
pub fn all_elements(xml: &str, tag: &str) -> Vec<String> {
    match element_pattern(tag) {
        Ok(pattern) => pattern
            .captures_iter(xml)
            .filter_map(|captures| captures.get(2))
            .map(|m| decode_entities(m.as_str()).trim().to_string())
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// `<TAG attrs>body</TAG>`; group 1 holds attributes, group 2 the body.
/// Self-closing elements never match.
fn element_pattern(tag: &str) -> Result<Regex, XmlError> {
    let escaped = regex::escape(tag);
    Regex::new(&format!(
        r"(?s)<{escaped}(\s(?:[^>/]|/[^>])*)?>(.*?)</{escaped}\s*>"
    ))
    .map_err(|err| XmlError::Pattern {
        tag: tag.to_string(),
        reason: err.to_string(),
    })
}

pub fn decode_entities(value: &str) -> String {
    ENTITY
        .replace_all(value, |captures: &regex::Captures<'_>| {
            let entity = captures.get(1).map(|m| m.as_str()).unwrap_or("");
            match entity {
                "amp" => "&".to_string(),
                "lt" => "<".to_string(),
                "gt" => ">".to_string(),
                "quot" => "\"".to_string(),
                "apos" => "'".to_string(),
                numeric => {
                    let code = match numeric.strip_prefix("#x") {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => numeric.trim_start_matches('#').parse::<u32>().ok(),
                    };
                    code.and_then(char::from_u32)
                        .filter(|character| !character.is_control() || *character == '\n')
                        .map(String::from)
                        .unwrap_or_default()
                }
            }
        })
        .into_owned()
}

/// Permissive numeric parse: tolerates unit suffixes (`10 Nos`, `100.00/Nos`),
/// thousands separators and Tally's `(-)` sign. Anything else becomes zero.
pub fn parse_number(value: &str) -> Decimal {
    let cleaned = value.replace(',', "");
    let negative_marker = cleaned.contains("(-)");

    let parsed = NUMBER
        .find(&cleaned)
        .and_then(|m| Decimal::from_str(m.as_str().trim_start_matches('+')).ok())
        .unwrap_or(Decimal::ZERO);

    if negative_marker && parsed > Decimal::ZERO {
        -parsed
    } else {
        parsed
    }
}

/// Accepts Tally's `YYYYMMDD` as well as `YYYY-MM-DD`.
pub fn parse_tally_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    NaiveDate::parse_from_str(trimmed, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y-%m-%d"))
        .ok()
}

pub fn parse_yes_no(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "yes" | "true" | "1"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{LEDGER_SCHEMA, VOUCHER_SCHEMA};

    const LEDGERS: &str = r#"<ENVELOPE><BODY><DATA><TALLYMESSAGE>
        <LEDGER NAME="Cash" RESERVEDNAME="">
            <GUID>g-cash</GUID>
            <PARENT>Cash-in-Hand</PARENT>
            <OPENINGBALANCE>-1,250.50</OPENINGBALANCE>
        </LEDGER>
        <LEDGER NAME="Bank">
            <NAME.LIST><NAME>HDFC Bank</NAME></NAME.LIST>
            <OPENINGBALANCE>abc</OPENINGBALANCE>
        </LEDGER>
        <LEDGER NAME="Stub"/>
        <LEDGER NAME="Sales &amp; Services">
            <PARENT>Sales Accounts</PARENT>
        </LEDGER>
    </TALLYMESSAGE></DATA></BODY></ENVELOPE>"#;

    #[test]
    fn extracts_ledgers_in_document_order() {
        let records = extract_records(LEDGERS, &LEDGER_SCHEMA);

        let names: Vec<&str> = records.iter().map(|record| record.get("NAME")).collect();
        assert_eq!(names, vec!["Cash", "HDFC Bank", "Sales & Services"]);
        assert_eq!(records[0].get("GUID"), "g-cash");
        assert_eq!(parse_number(records[0].get("OPENINGBALANCE")), Decimal::new(-125050, 2));
    }

    #[test]
    fn missing_and_garbage_fields_take_defaults() {
        let records = extract_records(LEDGERS, &LEDGER_SCHEMA);

        assert_eq!(records[1].get("PARENT"), "");
        assert_eq!(records[1].get("OPENINGBALANCE"), "abc");
        assert_eq!(parse_number(records[1].get("OPENINGBALANCE")), Decimal::ZERO);
        assert_eq!(records[2].get("OPENINGBALANCE"), "0");
    }

    #[test]
    fn malformed_document_yields_no_records() {
        let truncated = "<ENVELOPE><LEDGER NAME=\"Cash\"><PARENT>Cash-in-Hand</PARENT>";
        assert!(extract_records(truncated, &LEDGER_SCHEMA).is_empty());
        assert!(extract_records("", &LEDGER_SCHEMA).is_empty());
        assert!(extract_records("not xml at all <<<", &LEDGER_SCHEMA).is_empty());
    }

    #[test]
    fn voucher_lists_do_not_leak_into_voucher_fields() {
        let xml = r#"<VOUCHER VCHTYPE="Sales" ACTION="Create">
            <DATE>20240415</DATE>
            <GUID>v-guid-1</GUID>
            <VOUCHERTYPENAME>Sales</VOUCHERTYPENAME>
            <VOUCHERNUMBER>S/001</VOUCHERNUMBER>
            <ALLLEDGERENTRIES.LIST>
                <LEDGERNAME>Customer A</LEDGERNAME>
                <ISDEEMEDPOSITIVE>Yes</ISDEEMEDPOSITIVE>
                <AMOUNT>-1180.00</AMOUNT>
            </ALLLEDGERENTRIES.LIST>
            <LEDGERENTRIES.LIST>
                <LEDGERNAME>Sales</LEDGERNAME>
                <AMOUNT>1180.00</AMOUNT>
            </LEDGERENTRIES.LIST>
            <ALLINVENTORYENTRIES.LIST>
                <STOCKITEMNAME>Widget</STOCKITEMNAME>
                <RATE>118.00/Nos</RATE>
                <AMOUNT>1180.00</AMOUNT>
                <ACTUALQTY> 10 Nos</ACTUALQTY>
                <BATCHALLOCATIONS.LIST>
                    <GODOWNNAME>Main Location</GODOWNNAME>
                    <BATCHNAME>Primary Batch</BATCHNAME>
                </BATCHALLOCATIONS.LIST>
            </ALLINVENTORYENTRIES.LIST>
            <PARTYLEDGERNAME>Customer A</PARTYLEDGERNAME>
        </VOUCHER>"#;

        let records = extract_records(xml, &VOUCHER_SCHEMA);
        assert_eq!(records.len(), 1);
        let voucher = &records[0];
        assert_eq!(voucher.get("VOUCHERNUMBER"), "S/001");
        assert_eq!(voucher.get("PARTYLEDGERNAME"), "Customer A");

        let ledgers = voucher.list("ledger_entries");
        assert_eq!(ledgers.len(), 2);
        assert_eq!(ledgers[0].get("LEDGERNAME"), "Customer A");
        assert_eq!(ledgers[1].get("ISDEEMEDPOSITIVE"), "No");

        let inventory = voucher.list("inventory_entries");
        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory[0].get("godown"), "Main Location");
        assert_eq!(parse_number(inventory[0].get("ACTUALQTY")), Decimal::new(10, 0));
        assert_eq!(parse_number(inventory[0].get("RATE")), Decimal::new(118, 0));
    }

    #[test]
    fn parse_number_handles_tally_notation() {
        assert_eq!(parse_number("(-)500.25"), Decimal::new(-50025, 2));
        assert_eq!(parse_number("+12"), Decimal::new(12, 0));
        assert_eq!(parse_number("NaN"), Decimal::ZERO);
        assert_eq!(parse_number(""), Decimal::ZERO);
    }

    #[test]
    fn parses_both_date_shapes() {
        let expected = NaiveDate::from_ymd_opt(2024, 4, 1);
        assert_eq!(parse_tally_date("20240401"), expected);
        assert_eq!(parse_tally_date("2024-04-01"), expected);
        assert_eq!(parse_tally_date("1-Apr-24"), None);
    }

    #[test]
    fn decodes_numeric_entities() {
        assert_eq!(decode_entities("A&#38;B &lt;x&gt;"), "A&B <x>");
        assert_eq!(decode_entities("tab&#4;"), "tab");
    }
}
