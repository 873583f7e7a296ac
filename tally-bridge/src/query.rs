//! TDL collection export request builders
//!
//! Every request is an `ENVELOPE` with an export `HEADER` and a `BODY`
//! carrying static variables plus an inline TDL collection definition.
//! Builders are pure; they never perform I/O.

use chrono::{Datelike, NaiveDate};
use quick_xml::escape::partial_escape;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;

use crate::error::{Error, Result};
use crate::types::FiscalMonth;

/// Collection id of the company handshake query
pub const COMPANY_COLLECTION: &str = "CurrentCompany";
/// Collection id of the trial balance query
pub const TRIAL_BALANCE_COLLECTION: &str = "LedgerCollection";
/// Collection id of the bulk month-wise query
pub const MONTH_WISE_COLLECTION: &str = "MonthWiseLedgers";
/// Collection id of the per-month balance snapshot query
pub const LEDGER_BALANCE_COLLECTION: &str = "LedgerBalances";
/// Collection id of the GST registration query
pub const GST_COLLECTION: &str = "LedgerGSTInfo";

/// A closing-balance date for one fiscal month.
///
/// Kept as plain year/day rather than `NaiveDate` because February uses the
/// divisible-by-four leap rule, which yields 29 Feb for 2100 and similar
/// dates that do not exist in the proleptic calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthEnd {
    /// Fiscal month
    pub month: FiscalMonth,
    /// Calendar year
    pub year: i32,
    /// Last day of the month
    pub day: u32,
}

impl MonthEnd {
    /// Last day of `month` in the financial year starting April `fy_start_year`
    pub fn new(fy_start_year: i32, month: FiscalMonth) -> Self {
        let year = month.calendar_year(fy_start_year);
        let day = match month {
            FiscalMonth::Feb => {
                if year % 4 == 0 {
                    29
                } else {
                    28
                }
            }
            FiscalMonth::Apr | FiscalMonth::Jun | FiscalMonth::Sep | FiscalMonth::Nov => 30,
            _ => 31,
        };
        Self { month, year, day }
    }

    /// Formula date literal, e.g. `30-Apr-2024`
    pub fn formula_date(&self) -> String {
        format!("{:02}-{}-{}", self.day, self.month.abbrev(), self.year)
    }

    /// Static-variable date token, e.g. `20240430`
    pub fn compact_date(&self) -> String {
        format!("{:04}{:02}{:02}", self.year, self.month.calendar_month(), self.day)
    }

    /// As a calendar date, when it exists
    pub fn as_date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month.calendar_month(), self.day)
    }
}

/// Month-end dates from April through `target`, in fiscal order
pub fn month_schedule(fy_start_year: i32, target: FiscalMonth) -> Vec<MonthEnd> {
    target
        .through()
        .iter()
        .map(|m| MonthEnd::new(fy_start_year, *m))
        .collect()
}

/// Name of the formula computing the closing balance of `month`
pub fn month_formula_name(month: FiscalMonth) -> String {
    format!("{}Bal", month.abbrev())
}

/// Compact `YYYYMMDD` token used in `SVCURRENTDATE`
pub fn compact_date(date: NaiveDate) -> String {
    format!("{:04}{:02}{:02}", date.year(), date.month(), date.day())
}

/// Normalize a user-supplied date.
///
/// Accepts `YYYY-MM-DD`, `YYYYMMDD`, `DD-MM-YYYY`, `DD/MM/YYYY` and
/// `DD-Mon-YYYY`.
pub fn normalize_date(input: &str) -> Result<NaiveDate> {
    const FORMATS: [&str; 5] = ["%Y-%m-%d", "%Y%m%d", "%d-%m-%Y", "%d/%m/%Y", "%d-%b-%Y"];

    let trimmed = input.trim();
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| Error::Validation(format!("Unrecognized date: {:?}", input)))
}

#[derive(Debug, Clone)]
enum Directive {
    NativeMethod(String),
    Fetch(String),
    Formula { name: String, expr: String },
}

/// An inline TDL collection export request
#[derive(Debug, Clone)]
pub struct CollectionRequest {
    id: String,
    object_type: String,
    current_date: Option<String>,
    is_modify: Option<bool>,
    directives: Vec<Directive>,
}

impl CollectionRequest {
    /// New request exporting collection `id` over objects of `object_type`
    pub fn new(id: impl Into<String>, object_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object_type: object_type.into(),
            current_date: None,
            is_modify: None,
            directives: Vec::new(),
        }
    }

    /// Evaluate balances as of this `YYYYMMDD` token
    pub fn current_date(mut self, token: impl Into<String>) -> Self {
        self.current_date = Some(token.into());
        self
    }

    /// Mark the collection definition as new (`ISMODIFY="No"`) or an override
    pub fn is_modify(mut self, modify: bool) -> Self {
        self.is_modify = Some(modify);
        self
    }

    /// Request native methods (comma-separated list)
    pub fn native_method(mut self, methods: impl Into<String>) -> Self {
        self.directives.push(Directive::NativeMethod(methods.into()));
        self
    }

    /// Request fetched fields (comma-separated list)
    pub fn fetch(mut self, fields: impl Into<String>) -> Self {
        self.directives.push(Directive::Fetch(fields.into()));
        self
    }

    /// Define a computed formula on each object
    pub fn formula(mut self, name: impl Into<String>, expr: impl Into<String>) -> Self {
        self.directives.push(Directive::Formula {
            name: name.into(),
            expr: expr.into(),
        });
        self
    }

    /// Collection id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Serialize to the XML envelope sent to Tally
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

        emit(
            &mut writer,
            Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
        )?;
        start(&mut writer, "ENVELOPE")?;

        start(&mut writer, "HEADER")?;
        write_element(&mut writer, "VERSION", "1")?;
        write_element(&mut writer, "TALLYREQUEST", "Export")?;
        write_element(&mut writer, "TYPE", "Collection")?;
        write_element(&mut writer, "ID", &self.id)?;
        end(&mut writer, "HEADER")?;

        start(&mut writer, "BODY")?;
        start(&mut writer, "DESC")?;

        start(&mut writer, "STATICVARIABLES")?;
        write_element(&mut writer, "SVEXPORTFORMAT", "$$SysName:XML")?;
        if let Some(date) = &self.current_date {
            write_element(&mut writer, "SVCURRENTDATE", date)?;
        }
        end(&mut writer, "STATICVARIABLES")?;

        start(&mut writer, "TDL")?;
        start(&mut writer, "TDLMESSAGE")?;

        let mut collection = BytesStart::new("COLLECTION");
        collection.push_attribute(("NAME", self.id.as_str()));
        if let Some(modify) = self.is_modify {
            collection.push_attribute(("ISMODIFY", if modify { "Yes" } else { "No" }));
        }
        emit(&mut writer, Event::Start(collection))?;

        write_element(&mut writer, "TYPE", &self.object_type)?;
        for directive in &self.directives {
            match directive {
                Directive::NativeMethod(m) => write_element(&mut writer, "NATIVEMETHOD", m)?,
                Directive::Fetch(f) => write_element(&mut writer, "FETCH", f)?,
                Directive::Formula { name, expr } => {
                    let mut formula = BytesStart::new("FORMULA");
                    formula.push_attribute(("NAME", name.as_str()));
                    emit(&mut writer, Event::Start(formula))?;
                    text(&mut writer, expr)?;
                    end(&mut writer, "FORMULA")?;
                }
            }
        }

        end(&mut writer, "COLLECTION")?;
        end(&mut writer, "TDLMESSAGE")?;
        end(&mut writer, "TDL")?;
        end(&mut writer, "DESC")?;
        end(&mut writer, "BODY")?;
        end(&mut writer, "ENVELOPE")?;

        let bytes = writer.into_inner().into_inner();
        String::from_utf8(bytes).map_err(|e| Error::XmlWrite(e.to_string()))
    }
}

/// Company handshake query
pub fn company_info_request() -> Result<String> {
    CollectionRequest::new(COMPANY_COLLECTION, "Company")
        .native_method("Name, StartingFrom, BooksFrom")
        .to_xml()
}

/// Ledger balances as of `as_of`, with debit/credit totals
pub fn trial_balance_request(as_of: NaiveDate) -> Result<String> {
    CollectionRequest::new(TRIAL_BALANCE_COLLECTION, "Ledger")
        .current_date(compact_date(as_of))
        .native_method("Name, Parent, OpeningBalance, ClosingBalance, IsRevenue")
        .native_method("DebitTotals, CreditTotals")
        .native_method("_PrimaryGroup")
        .to_xml()
}

/// Bulk month-wise query: one closing-balance formula per month through `target`
pub fn month_wise_request(fy_start_year: i32, target: FiscalMonth) -> Result<String> {
    let schedule = month_schedule(fy_start_year, target);

    let mut request = CollectionRequest::new(MONTH_WISE_COLLECTION, "Ledger")
        .native_method("Name")
        .native_method("Parent")
        .native_method("_PrimaryGroup")
        .native_method("OpeningBalance")
        .native_method("IsRevenue");

    for end in &schedule {
        request = request.formula(
            month_formula_name(end.month),
            format!("$$ToValue:\"{}\":$ClosingBalance", end.formula_date()),
        );
    }
    for end in &schedule {
        request = request.fetch(month_formula_name(end.month));
    }

    request.to_xml()
}

/// Balance snapshot of every ledger as of one month end
pub fn ledger_balance_request(month_end: &MonthEnd) -> Result<String> {
    CollectionRequest::new(LEDGER_BALANCE_COLLECTION, "Ledger")
        .current_date(month_end.compact_date())
        .native_method("Name")
        .native_method("Parent")
        .native_method("_PrimaryGroup")
        .native_method("IsRevenue")
        .native_method("OpeningBalance")
        .native_method("ClosingBalance")
        .to_xml()
}

/// GST registration type and party GSTIN of every ledger
pub fn gst_audit_request() -> Result<String> {
    CollectionRequest::new(GST_COLLECTION, "Ledger")
        .is_modify(false)
        .fetch("NAME, GSTREGISTRATIONTYPE, PARTYGSTIN")
        .to_xml()
}

fn emit(writer: &mut Writer<Cursor<Vec<u8>>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| Error::XmlWrite(e.to_string()))
}

fn start(writer: &mut Writer<Cursor<Vec<u8>>>, tag: &str) -> Result<()> {
    emit(writer, Event::Start(BytesStart::new(tag)))
}

fn end(writer: &mut Writer<Cursor<Vec<u8>>>, tag: &str) -> Result<()> {
    emit(writer, Event::End(BytesEnd::new(tag)))
}

// Only markup characters are escaped; TDL expressions keep their quotes.
fn text(writer: &mut Writer<Cursor<Vec<u8>>>, content: &str) -> Result<()> {
    emit(
        writer,
        Event::Text(BytesText::from_escaped(partial_escape(content))),
    )
}

fn write_element(writer: &mut Writer<Cursor<Vec<u8>>>, tag: &str, content: &str) -> Result<()> {
    start(writer, tag)?;
    text(writer, content)?;
    end(writer, tag)
}
