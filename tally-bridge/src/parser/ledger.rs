use rust_decimal::Decimal;
use std::collections::BTreeMap;

use super::amount::{parse_amount, parse_flag};
use super::{parse_document, FieldTable};
use crate::error::Result;
use crate::types::{FiscalMonth, LedgerBalanceRecord, MonthWiseLedgerRecord};

/// Primary-group name fragments that mark a profit and loss ledger
pub const PL_GROUP_KEYWORDS: [&str; 9] = [
    "Sales Accounts",
    "Purchase Accounts",
    "Direct Expenses",
    "Indirect Expenses",
    "Direct Incomes",
    "Indirect Incomes",
    "Expense",
    "Income",
    "Interest",
];

const TRIAL_BALANCE_TAGS: [&str; 1] = ["LEDGER"];
const SNAPSHOT_TAGS: [&str; 2] = ["LEDGER", "LEDGERBALANCES"];
const MONTH_WISE_TAGS: [&str; 2] = ["LEDGER", "MONTHWISELEDGERS"];

/// Profit and loss when Tally flags the ledger as revenue or its group name
/// contains a P&L keyword
pub fn is_profit_and_loss(revenue_flag: bool, primary_group: &str) -> bool {
    if revenue_flag {
        return true;
    }
    let group = primary_group.to_lowercase();
    PL_GROUP_KEYWORDS
        .iter()
        .any(|kw| group.contains(&kw.to_lowercase()))
}

fn primary_group(fields: &FieldTable<'_>, parent: &str) -> String {
    fields
        .first_of(&["PRIMARYGROUP", "_PRIMARYGROUP"])
        .unwrap_or(parent)
        .to_string()
}

// Tally sign convention: negative is debit
fn split_signed(value: Decimal) -> (Decimal, Decimal) {
    if value.is_sign_negative() {
        (-value, Decimal::ZERO)
    } else {
        (Decimal::ZERO, value)
    }
}

/// Parse a trial balance export into ledger lines.
///
/// Nameless ledgers and ledgers whose six amounts are all zero are dropped.
pub fn parse_trial_balance(xml: &str) -> Result<Vec<LedgerBalanceRecord>> {
    let doc = parse_document(xml)?;

    Ok(doc
        .find_all(&TRIAL_BALANCE_TAGS)
        .into_iter()
        .filter_map(|ledger| {
            let fields = ledger.fields();
            let account_name = fields.name();
            if account_name.is_empty() {
                return None;
            }

            let parent_group = fields.text("PARENT").to_string();
            let primary_group = primary_group(&fields, &parent_group);
            let (opening_dr, opening_cr) = split_signed(parse_amount(fields.text("OPENINGBALANCE")));
            let (closing_dr, closing_cr) = split_signed(parse_amount(fields.text("CLOSINGBALANCE")));

            let record = LedgerBalanceRecord {
                account_name,
                parent_group,
                primary_group,
                is_revenue: parse_flag(fields.text("ISREVENUE")),
                opening_dr,
                opening_cr,
                debit_totals: parse_amount(fields.text("DEBITTOTALS")).abs(),
                credit_totals: parse_amount(fields.text("CREDITTOTALS")).abs(),
                closing_dr,
                closing_cr,
            };

            (!record.is_all_zero()).then_some(record)
        })
        .collect())
}

/// Signed balances of one ledger as of a single date
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSnapshot {
    /// Ledger name
    pub name: String,
    /// Primary group (parent when not reported)
    pub primary_group: String,
    /// Revenue flag or P&L group keyword
    pub is_revenue: bool,
    /// Signed opening balance
    pub opening: Decimal,
    /// Signed closing balance as of the requested date
    pub closing: Decimal,
}

/// Parse a per-date balance snapshot, keeping every named ledger.
pub fn parse_ledger_snapshots(xml: &str) -> Result<Vec<LedgerSnapshot>> {
    let doc = parse_document(xml)?;

    Ok(doc
        .find_all(&SNAPSHOT_TAGS)
        .into_iter()
        .filter_map(|ledger| {
            let fields = ledger.fields();
            let name = fields.name();
            if name.is_empty() {
                return None;
            }
            let parent = fields.text("PARENT").to_string();
            let primary_group = primary_group(&fields, &parent);
            let is_revenue = is_profit_and_loss(parse_flag(fields.text("ISREVENUE")), &primary_group);

            Some(LedgerSnapshot {
                name,
                primary_group,
                is_revenue,
                opening: parse_amount(fields.text("OPENINGBALANCE")),
                closing: parse_amount(fields.text("CLOSINGBALANCE")),
            })
        })
        .collect())
}

/// Result of parsing a bulk month-wise export, with the signals used to
/// judge whether the per-month formulas evaluated
#[derive(Debug, Clone, Default)]
pub struct MonthWiseParse {
    /// Named ledger elements in the response
    pub ledger_count: usize,
    /// Whether any ledger carried any month field
    pub month_tag_found: bool,
    /// Whether any month field held a non-zero value
    pub nonzero_month_found: bool,
    /// Ledgers with activity
    pub lines: Vec<MonthWiseLedgerRecord>,
}

fn month_value(fields: &FieldTable<'_>, month: FiscalMonth) -> Option<Decimal> {
    let abbrev = month.abbrev();
    [format!("{}Bal", abbrev), format!("{}Balance", abbrev)]
        .iter()
        .find_map(|tag| fields.get(tag))
        .map(parse_amount)
}

/// Parse a bulk month-wise export for `months`.
pub fn parse_month_wise(xml: &str, months: &[FiscalMonth]) -> Result<MonthWiseParse> {
    let doc = parse_document(xml)?;
    let mut parsed = MonthWiseParse::default();

    for ledger in doc.find_all(&MONTH_WISE_TAGS) {
        let fields = ledger.fields();
        let account_name = fields.name();
        if account_name.is_empty() {
            continue;
        }
        parsed.ledger_count += 1;

        let parent = fields.text("PARENT").to_string();
        let primary_group = primary_group(&fields, &parent);
        let is_revenue = is_profit_and_loss(parse_flag(fields.text("ISREVENUE")), &primary_group);

        let mut monthly_balances = BTreeMap::new();
        for month in months {
            let value = match month_value(&fields, *month) {
                Some(v) => {
                    parsed.month_tag_found = true;
                    if !v.is_zero() {
                        parsed.nonzero_month_found = true;
                    }
                    v
                }
                None => Decimal::ZERO,
            };
            monthly_balances.insert(*month, value);
        }

        let record = MonthWiseLedgerRecord {
            account_name,
            primary_group,
            opening_balance: parse_amount(fields.text("OPENINGBALANCE")),
            monthly_balances,
            is_revenue,
        };
        if record.has_activity() {
            parsed.lines.push(record);
        }
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const TRIAL_BALANCE: &str = r#"<ENVELOPE>
        <LEDGER NAME="Cash">
            <NAME>Cash</NAME>
            <PARENT>Cash-in-Hand</PARENT>
            <_PRIMARYGROUP>Current Assets</_PRIMARYGROUP>
            <OPENINGBALANCE>-1,000.00</OPENINGBALANCE>
            <CLOSINGBALANCE>-2500.00</CLOSINGBALANCE>
            <DEBITTOTALS>-3000.00</DEBITTOTALS>
            <CREDITTOTALS>1500.00</CREDITTOTALS>
            <ISREVENUE>No</ISREVENUE>
        </LEDGER>
        <LEDGER NAME="Sales">
            <PARENT>Sales Accounts</PARENT>
            <CLOSINGBALANCE>12000.00</CLOSINGBALANCE>
            <ISREVENUE>Yes</ISREVENUE>
        </LEDGER>
        <LEDGER NAME="Dormant">
            <PARENT>Sundry Debtors</PARENT>
            <OPENINGBALANCE>0</OPENINGBALANCE>
            <CLOSINGBALANCE>0.00</CLOSINGBALANCE>
        </LEDGER>
        <LEDGER>
            <CLOSINGBALANCE>99</CLOSINGBALANCE>
        </LEDGER>
    </ENVELOPE>"#;

    #[test]
    fn test_trial_balance_lines() {
        let lines = parse_trial_balance(TRIAL_BALANCE).unwrap();
        assert_eq!(lines.len(), 2);

        let cash = &lines[0];
        assert_eq!(cash.account_name, "Cash");
        assert_eq!(cash.parent_group, "Cash-in-Hand");
        assert_eq!(cash.primary_group, "Current Assets");
        assert_eq!(cash.opening_dr, dec!(1000.00));
        assert_eq!(cash.opening_cr, Decimal::ZERO);
        assert_eq!(cash.closing_dr, dec!(2500.00));
        assert_eq!(cash.closing_cr, Decimal::ZERO);
        assert_eq!(cash.debit_totals, dec!(3000.00));
        assert_eq!(cash.credit_totals, dec!(1500.00));
        assert!(!cash.is_revenue);

        let sales = &lines[1];
        assert_eq!(sales.primary_group, "Sales Accounts");
        assert_eq!(sales.closing_cr, dec!(12000.00));
        assert_eq!(sales.closing_dr, Decimal::ZERO);
        assert!(sales.is_revenue);
    }

    #[test]
    fn test_balance_pairs_are_exclusive() {
        for line in parse_trial_balance(TRIAL_BALANCE).unwrap() {
            assert!(line.opening_dr.is_zero() || line.opening_cr.is_zero());
            assert!(line.closing_dr.is_zero() || line.closing_cr.is_zero());
        }
    }

    #[test]
    fn test_dr_cr_suffix_amounts() {
        let xml = r#"<ENVELOPE><LEDGER NAME="Capital">
            <PARENT>Capital Account</PARENT>
            <CLOSINGBALANCE>5,00,000.00 Cr</CLOSINGBALANCE>
        </LEDGER></ENVELOPE>"#;
        let lines = parse_trial_balance(xml).unwrap();
        assert_eq!(lines[0].closing_dr, dec!(500000.00));
        assert_eq!(lines[0].closing_cr, Decimal::ZERO);
    }

    #[test]
    fn test_profit_and_loss_classification() {
        assert!(is_profit_and_loss(true, "Current Assets"));
        assert!(is_profit_and_loss(false, "Indirect Expenses"));
        assert!(is_profit_and_loss(false, "interest received"));
        assert!(!is_profit_and_loss(false, "Sundry Creditors"));
        assert!(!is_profit_and_loss(false, ""));
    }

    #[test]
    fn test_snapshots_keep_zero_ledgers() {
        let xml = r#"<ENVELOPE>
            <LEDGERBALANCES NAME="Rent"><PARENT>Indirect Expenses</PARENT>
                <CLOSINGBALANCE>-1200</CLOSINGBALANCE></LEDGERBALANCES>
            <LEDGER NAME="Idle"><PARENT>Bank Accounts</PARENT></LEDGER>
        </ENVELOPE>"#;
        let snapshots = parse_ledger_snapshots(xml).unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].name, "Rent");
        assert_eq!(snapshots[0].closing, dec!(-1200));
        assert!(snapshots[0].is_revenue);
        assert_eq!(snapshots[1].closing, Decimal::ZERO);
        assert!(!snapshots[1].is_revenue);
    }

    #[test]
    fn test_month_wise_tag_spellings() {
        let xml = r#"<ENVELOPE>
            <LEDGER NAME="Rent">
                <PARENT>Indirect Expenses</PARENT>
                <OPENINGBALANCE>0</OPENINGBALANCE>
                <AprBal>-100</AprBal>
                <MAYBAL>-200</MAYBAL>
                <JUNBALANCE>-300</JUNBALANCE>
            </LEDGER>
        </ENVELOPE>"#;
        let months = FiscalMonth::Jun.through();
        let parsed = parse_month_wise(xml, months).unwrap();

        assert_eq!(parsed.ledger_count, 1);
        assert!(parsed.month_tag_found);
        assert!(parsed.nonzero_month_found);
        let rent = &parsed.lines[0];
        assert!(rent.is_revenue);
        assert_eq!(rent.balance(FiscalMonth::Apr), dec!(-100));
        assert_eq!(rent.balance(FiscalMonth::May), dec!(-200));
        assert_eq!(rent.balance(FiscalMonth::Jun), dec!(-300));
        assert_eq!(
            rent.monthly_balances.keys().copied().collect::<Vec<_>>(),
            months.to_vec()
        );
    }

    #[test]
    fn test_month_wise_without_formula_fields() {
        let xml = r#"<ENVELOPE>
            <LEDGER NAME="Cash"><PARENT>Cash-in-Hand</PARENT>
                <OPENINGBALANCE>-500</OPENINGBALANCE></LEDGER>
            <LEDGER NAME="Idle"><PARENT>Bank Accounts</PARENT></LEDGER>
        </ENVELOPE>"#;
        let parsed = parse_month_wise(xml, FiscalMonth::May.through()).unwrap();
        assert_eq!(parsed.ledger_count, 2);
        assert!(!parsed.month_tag_found);
        assert!(!parsed.nonzero_month_found);
        assert_eq!(parsed.lines.len(), 1);
        assert_eq!(parsed.lines[0].balance(FiscalMonth::May), Decimal::ZERO);
    }
}
