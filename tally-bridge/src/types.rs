//! Domain types shared across the bridge client

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Month of an Indian financial year (April through March)
///
/// Declaration order is fiscal order, so `Ord` and `BTreeMap` iteration run
/// Apr..Mar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FiscalMonth {
    /// April
    Apr,
    /// May
    May,
    /// June
    Jun,
    /// July
    Jul,
    /// August
    Aug,
    /// September
    Sep,
    /// October
    Oct,
    /// November
    Nov,
    /// December
    Dec,
    /// January
    Jan,
    /// February
    Feb,
    /// March
    Mar,
}

impl FiscalMonth {
    /// All months in fiscal order
    pub const ALL: [FiscalMonth; 12] = [
        FiscalMonth::Apr,
        FiscalMonth::May,
        FiscalMonth::Jun,
        FiscalMonth::Jul,
        FiscalMonth::Aug,
        FiscalMonth::Sep,
        FiscalMonth::Oct,
        FiscalMonth::Nov,
        FiscalMonth::Dec,
        FiscalMonth::Jan,
        FiscalMonth::Feb,
        FiscalMonth::Mar,
    ];

    /// Three-letter abbreviation ("Apr", "May", ...)
    pub fn abbrev(self) -> &'static str {
        match self {
            FiscalMonth::Apr => "Apr",
            FiscalMonth::May => "May",
            FiscalMonth::Jun => "Jun",
            FiscalMonth::Jul => "Jul",
            FiscalMonth::Aug => "Aug",
            FiscalMonth::Sep => "Sep",
            FiscalMonth::Oct => "Oct",
            FiscalMonth::Nov => "Nov",
            FiscalMonth::Dec => "Dec",
            FiscalMonth::Jan => "Jan",
            FiscalMonth::Feb => "Feb",
            FiscalMonth::Mar => "Mar",
        }
    }

    /// Zero-based position within the financial year
    pub fn fiscal_index(self) -> usize {
        self as usize
    }

    /// Calendar month number (1-12)
    pub fn calendar_month(self) -> u32 {
        ((self.fiscal_index() as u32 + 3) % 12) + 1
    }

    /// Calendar year this month falls in for a financial year starting in
    /// April of `fy_start_year`
    pub fn calendar_year(self, fy_start_year: i32) -> i32 {
        if self.fiscal_index() >= FiscalMonth::Jan.fiscal_index() {
            fy_start_year + 1
        } else {
            fy_start_year
        }
    }

    /// Months from April through `self`, inclusive
    pub fn through(self) -> &'static [FiscalMonth] {
        &Self::ALL[..=self.fiscal_index()]
    }
}

impl fmt::Display for FiscalMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abbrev())
    }
}

impl FromStr for FiscalMonth {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim();
        if needle.len() < 3 {
            return Err(Error::Validation(format!("Unknown month: {:?}", s)));
        }
        Self::ALL
            .iter()
            .copied()
            .find(|m| {
                needle.get(..3).is_some_and(|p| p.eq_ignore_ascii_case(m.abbrev()))
                    && full_name(*m)
                        .get(..needle.len())
                        .is_some_and(|p| p.eq_ignore_ascii_case(needle))
            })
            .ok_or_else(|| Error::Validation(format!("Unknown month: {:?}", s)))
    }
}

fn full_name(month: FiscalMonth) -> &'static str {
    match month {
        FiscalMonth::Apr => "April",
        FiscalMonth::May => "May",
        FiscalMonth::Jun => "June",
        FiscalMonth::Jul => "July",
        FiscalMonth::Aug => "August",
        FiscalMonth::Sep => "September",
        FiscalMonth::Oct => "October",
        FiscalMonth::Nov => "November",
        FiscalMonth::Dec => "December",
        FiscalMonth::Jan => "January",
        FiscalMonth::Feb => "February",
        FiscalMonth::Mar => "March",
    }
}

/// Company currently open in Tally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyInfo {
    /// Company name
    pub name: String,
    /// Label such as "FY 2024-25", or "N/A"
    pub financial_year_label: String,
    /// Books-from date as reported by Tally (YYYYMMDD)
    pub books_from_date: String,
    /// Books-to date (not reported by the company collection; usually empty)
    #[serde(default)]
    pub books_to_date: String,
}

impl CompanyInfo {
    /// Placeholder used when the company response carries no name
    pub fn placeholder() -> Self {
        Self {
            name: "Tally Connected".to_string(),
            financial_year_label: "N/A".to_string(),
            books_from_date: String::new(),
            books_to_date: String::new(),
        }
    }
}

/// One ledger line of a trial balance.
///
/// Each opening/closing pair has at most one non-zero side; debit and credit
/// totals are magnitudes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerBalanceRecord {
    /// Ledger name
    pub account_name: String,
    /// Immediate parent group
    pub parent_group: String,
    /// Tally primary group (parent when not reported)
    pub primary_group: String,
    /// Revenue (P&L) ledger flag as reported by Tally
    pub is_revenue: bool,
    /// Opening balance, debit side
    pub opening_dr: Decimal,
    /// Opening balance, credit side
    pub opening_cr: Decimal,
    /// Period debit turnover
    pub debit_totals: Decimal,
    /// Period credit turnover
    pub credit_totals: Decimal,
    /// Closing balance, debit side
    pub closing_dr: Decimal,
    /// Closing balance, credit side
    pub closing_cr: Decimal,
}

impl LedgerBalanceRecord {
    /// Whether every numeric field is zero
    pub fn is_all_zero(&self) -> bool {
        [
            self.opening_dr,
            self.opening_cr,
            self.debit_totals,
            self.credit_totals,
            self.closing_dr,
            self.closing_cr,
        ]
        .iter()
        .all(Decimal::is_zero)
    }

    /// Signed closing balance (debit negative, Tally convention)
    pub fn closing_signed(&self) -> Decimal {
        self.closing_cr - self.closing_dr
    }
}

/// One ledger with closing balances per fiscal month
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthWiseLedgerRecord {
    /// Ledger name
    pub account_name: String,
    /// Primary group
    pub primary_group: String,
    /// Opening balance for the financial year
    pub opening_balance: Decimal,
    /// Closing balance at the end of each requested month
    pub monthly_balances: BTreeMap<FiscalMonth, Decimal>,
    /// Profit and loss ledger (otherwise balance sheet)
    pub is_revenue: bool,
}

impl MonthWiseLedgerRecord {
    /// Whether opening or any monthly balance is non-zero
    pub fn has_activity(&self) -> bool {
        !self.opening_balance.is_zero() || self.monthly_balances.values().any(|v| !v.is_zero())
    }

    /// Balance for `month`, zero when absent
    pub fn balance(&self, month: FiscalMonth) -> Decimal {
        self.monthly_balances.get(&month).copied().unwrap_or(Decimal::ZERO)
    }
}

/// GST registration details for one ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GstLedgerRecord {
    /// Ledger name
    pub ledger_name: String,
    /// Registration type as reported by Tally
    pub gst_registration_type: String,
    /// Party GSTIN as reported by Tally
    #[serde(rename = "partyGSTIN")]
    pub party_gstin: String,
}

/// Trial balance for a period
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialBalanceReport {
    /// Period start (informational)
    pub period_from: chrono::NaiveDate,
    /// Period end; balances are as of this date
    pub period_to: chrono::NaiveDate,
    /// Ledgers with at least one non-zero amount
    pub lines: Vec<LedgerBalanceRecord>,
    /// Raw XML response as received
    #[serde(skip_serializing)]
    pub raw_xml: String,
}

impl TrialBalanceReport {
    /// Sum of closing debit balances
    pub fn total_closing_dr(&self) -> Decimal {
        self.lines.iter().map(|l| l.closing_dr).sum()
    }

    /// Sum of closing credit balances
    pub fn total_closing_cr(&self) -> Decimal {
        self.lines.iter().map(|l| l.closing_cr).sum()
    }
}

/// Which path produced a month-wise report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonthWiseSource {
    /// Single bulk query with per-month formulas
    Bulk,
    /// One balance snapshot per month
    Fallback,
}

/// Month-wise ledger balances for part of a financial year
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthWiseReport {
    /// Financial year start (April of this year)
    pub fy_start_year: i32,
    /// Last month included
    pub target_month: FiscalMonth,
    /// Months covered, in fiscal order
    pub months: Vec<FiscalMonth>,
    /// Ledgers with activity
    pub lines: Vec<MonthWiseLedgerRecord>,
    /// Path that produced the data
    pub source: MonthWiseSource,
}

impl MonthWiseReport {
    /// Profit and loss ledgers
    pub fn pl_lines(&self) -> impl Iterator<Item = &MonthWiseLedgerRecord> {
        self.lines.iter().filter(|l| l.is_revenue)
    }

    /// Balance sheet ledgers
    pub fn bs_lines(&self) -> impl Iterator<Item = &MonthWiseLedgerRecord> {
        self.lines.iter().filter(|l| !l.is_revenue)
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session
    Disconnected,
    /// Handshake or restore probe in flight
    Connecting,
    /// Session verified; liveness monitor running
    Connected,
}

/// Observable session snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeSession {
    /// Session code shown by the desktop bridge
    pub session_code: String,
    /// Lifecycle state
    pub state: ConnectionState,
    /// Company info (present once connected or while restoring)
    pub company_info: Option<CompanyInfo>,
    /// Last user-facing error
    pub last_error: Option<String>,
}

impl BridgeSession {
    /// Fresh disconnected session
    pub fn disconnected() -> Self {
        Self {
            session_code: String::new(),
            state: ConnectionState::Disconnected,
            company_info: None,
            last_error: None,
        }
    }

    /// True once the handshake has succeeded
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// True while a handshake or restore probe is in flight
    pub fn is_connecting(&self) -> bool {
        self.state == ConnectionState::Connecting
    }
}

impl Default for BridgeSession {
    fn default() -> Self {
        Self::disconnected()
    }
}
