use chrono::NaiveDate;
use tally_core::DataType;

/// An export request for one record category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    data_type: DataType,
    from_date: Option<NaiveDate>,
    to_date: Option<NaiveDate>,
    company: Option<String>,
}

impl ExportRequest {
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            from_date: None,
            to_date: None,
            company: None,
        }
    }

    /// Only voucher exports carry the range; masters are always exported whole.
    pub fn date_range(mut self, from_date: NaiveDate, to_date: NaiveDate) -> Self {
        self.from_date = Some(from_date);
        self.to_date = Some(to_date);
        self
    }

    pub fn company(mut self, company: impl Into<String>) -> Self {
        let company = company.into();
        if !company.trim().is_empty() {
            self.company = Some(company.trim().to_string());
        }
        self
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn to_xml(&self) -> String {
        let mut variables = String::from("<SVEXPORTFORMAT>$$SysName:XML</SVEXPORTFORMAT>");

        if self.data_type.is_transactional() {
            if let (Some(from_date), Some(to_date)) = (self.from_date, self.to_date) {
                variables.push_str(&format!(
                    "<SVFROMDATE>{}</SVFROMDATE><SVTODATE>{}</SVTODATE>",
                    from_date.format("%Y-%m-%d"),
                    to_date.format("%Y-%m-%d")
                ));
            }
        }

        if let Some(company) = &self.company {
            variables.push_str(&format!(
                "<SVCURRENTCOMPANY>{}</SVCURRENTCOMPANY>",
                escape_text(company)
            ));
        }

        format!(
            "<ENVELOPE><HEADER><VERSION>1</VERSION><TALLYREQUEST>Export</TALLYREQUEST><TYPE>Data</TYPE><ID>{}</ID></HEADER><BODY><DESC><STATICVARIABLES>{}</STATICVARIABLES></DESC></BODY></ENVELOPE>",
            self.data_type.collection_id(),
            variables
        )
    }
}

pub fn escape_text(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for character in value.chars() {
        match character {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}
