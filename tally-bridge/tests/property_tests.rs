//! Property-based tests for response handling invariants
//!
//! - Sanitizing is idempotent and leaves nothing a strict parser rejects
//! - Amounts survive Tally's formatting variants
//! - Every trial balance line is Dr or Cr, never both

use proptest::prelude::*;
use rust_decimal::Decimal;
use tally_bridge::parser::{parse_amount, parse_trial_balance};
use tally_bridge::sanitize::{needs_sanitizing, sanitize_xml};

/// Text mixing ordinary characters, control characters and character
/// references (some allowed, some not)
fn noisy_text() -> impl Strategy<Value = String> {
    let piece = prop_oneof![
        "[a-zA-Z0-9 <>/=\"]{1,8}",
        (0u32..32).prop_map(|c| char::from_u32(c).map(String::from).unwrap_or_default()),
        (0u32..40).prop_map(|c| format!("&#{};", c)),
        (0u32..40).prop_map(|c| format!("&#x{:x};", c)),
        (0u32..40).prop_map(|c| format!("&#X{:02X};", c)),
        Just("&#".to_string()),
        Just(";".to_string()),
        Just("\u{FFFE}".to_string()),
    ];
    prop::collection::vec(piece, 0..24).prop_map(|pieces| pieces.concat())
}

/// Signed amount with two decimal places
fn amount() -> impl Strategy<Value = Decimal> {
    (-1_000_000_000i64..1_000_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

proptest! {
    #[test]
    fn sanitize_is_idempotent(input in noisy_text()) {
        let once = sanitize_xml(&input).into_owned();
        let twice = sanitize_xml(&once).into_owned();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn sanitize_removes_everything_forbidden(input in noisy_text()) {
        let out = sanitize_xml(&input);
        prop_assert!(!needs_sanitizing(&out));
        prop_assert!(out
            .chars()
            .all(|c| matches!(c, '\t' | '\n' | '\r') || (c as u32) >= 0x20));
    }

    #[test]
    fn sanitize_keeps_clean_text(input in "[a-zA-Z0-9 .,;:()&#-]{0,64}") {
        prop_assume!(!needs_sanitizing(&input));
        prop_assert_eq!(sanitize_xml(&input), input.as_str());
    }

    #[test]
    fn amount_formats_agree(value in amount()) {
        let magnitude = value.abs();
        prop_assert_eq!(parse_amount(&value.to_string()), value);
        prop_assert_eq!(parse_amount(&format!("{} Dr", magnitude)), magnitude);
        prop_assert_eq!(parse_amount(&format!("{} Cr", magnitude)), -magnitude);
        prop_assert_eq!(parse_amount(&format!("({})", magnitude)), -magnitude);
    }

    #[test]
    fn trial_balance_lines_are_dr_or_cr(
        opening in amount(),
        closing in amount(),
        debits in amount(),
        credits in amount(),
    ) {
        let xml = format!(
            "<ENVELOPE><LEDGER><NAME>Ledger</NAME><PARENT>Sundry Debtors</PARENT>\
             <OPENINGBALANCE>{}</OPENINGBALANCE><CLOSINGBALANCE>{}</CLOSINGBALANCE>\
             <DEBITTOTALS>{}</DEBITTOTALS><CREDITTOTALS>{}</CREDITTOTALS></LEDGER></ENVELOPE>",
            opening, closing, debits, credits
        );
        let lines = parse_trial_balance(&xml).unwrap();

        let all_zero = opening.is_zero() && closing.is_zero() && debits.is_zero() && credits.is_zero();
        prop_assert_eq!(lines.len(), if all_zero { 0 } else { 1 });

        for line in lines {
            prop_assert!(line.opening_dr.is_zero() || line.opening_cr.is_zero());
            prop_assert!(line.closing_dr.is_zero() || line.closing_cr.is_zero());
            prop_assert!(line.closing_dr >= Decimal::ZERO && line.closing_cr >= Decimal::ZERO);
            prop_assert!(line.debit_totals >= Decimal::ZERO && line.credit_totals >= Decimal::ZERO);
            prop_assert_eq!(line.closing_signed(), closing);
        }
    }
}
