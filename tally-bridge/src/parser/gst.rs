use super::parse_document;
use crate::error::Result;
use crate::types::GstLedgerRecord;

const GSTIN_PLACEHOLDERS: [&str; 9] = [
    "null",
    "na",
    "n/a",
    "nil",
    "0",
    "-",
    "--",
    "not available",
    "not applicable",
];

/// Parse the GST registration export into one record per ledger
pub fn parse_gst_ledgers(xml: &str) -> Result<Vec<GstLedgerRecord>> {
    let doc = parse_document(xml)?;

    Ok(doc
        .find_all(&["LEDGER"])
        .into_iter()
        .map(|ledger| {
            let fields = ledger.fields();
            GstLedgerRecord {
                ledger_name: fields.name(),
                gst_registration_type: fields.text("GSTREGISTRATIONTYPE").to_string(),
                party_gstin: fields.text("PARTYGSTIN").to_string(),
            }
        })
        .collect())
}

fn is_regular(registration_type: &str) -> bool {
    let reg = registration_type.trim().to_lowercase();
    reg == "regular" || (reg.starts_with("regular") && !reg.contains("unregistered"))
}

/// Whether a regular-registration ledger lacks a usable GSTIN
pub fn is_gstin_missing(record: &GstLedgerRecord) -> bool {
    if !is_regular(&record.gst_registration_type) {
        return false;
    }

    let gstin = record.party_gstin.trim().to_uppercase();
    if gstin.is_empty() {
        return true;
    }
    if GSTIN_PLACEHOLDERS
        .iter()
        .any(|p| gstin.eq_ignore_ascii_case(p))
    {
        return true;
    }

    let compact: String = gstin.chars().filter(|c| !c.is_whitespace()).collect();
    let alphanumeric = compact.chars().all(|c| c.is_ascii_alphanumeric());
    let looks_like_gstin = alphanumeric && (compact.len() == 15 || compact.len() >= 10);
    !looks_like_gstin
}

/// Ledgers registered as regular whose GSTIN is blank, a placeholder, or
/// malformed
pub fn parse_gst_not_feeded(xml: &str) -> Result<Vec<GstLedgerRecord>> {
    Ok(parse_gst_ledgers(xml)?
        .into_iter()
        .filter(is_gstin_missing)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(reg: &str, gstin: &str) -> GstLedgerRecord {
        GstLedgerRecord {
            ledger_name: "Party".to_string(),
            gst_registration_type: reg.to_string(),
            party_gstin: gstin.to_string(),
        }
    }

    #[test]
    fn test_regular_with_blank_or_placeholder_is_missing() {
        assert!(is_gstin_missing(&record("Regular", "")));
        assert!(is_gstin_missing(&record("Regular", "N/A")));
        assert!(is_gstin_missing(&record("regular", "  nil ")));
        assert!(is_gstin_missing(&record("Regular", "--")));
        assert!(is_gstin_missing(&record("Regular", "Not Applicable")));
    }

    #[test]
    fn test_regular_with_valid_gstin_is_not_missing() {
        assert!(!is_gstin_missing(&record("Regular", "27AAPFU0939F1ZV")));
        assert!(!is_gstin_missing(&record("Regular", "27AAPF U0939F1ZV")));
        assert!(!is_gstin_missing(&record("Regular", "ABCDE12345")));
    }

    #[test]
    fn test_regular_with_malformed_gstin_is_missing() {
        assert!(is_gstin_missing(&record("Regular", "ABC123")));
        assert!(is_gstin_missing(&record("Regular", "27AAPFU0939F1Z#")));
    }

    #[test]
    fn test_non_regular_types_are_ignored() {
        assert!(!is_gstin_missing(&record("Unregistered", "")));
        assert!(!is_gstin_missing(&record("Composition", "")));
        assert!(!is_gstin_missing(&record("Consumer", "")));
        assert!(!is_gstin_missing(&record("Regular - Unregistered", "")));
        assert!(!is_gstin_missing(&record("", "")));
        assert!(is_gstin_missing(&record("Regular (SEZ)", "")));
    }

    #[test]
    fn test_parse_gst_not_feeded() {
        let xml = r#"<ENVELOPE>
            <LEDGER NAME="Acme Traders">
                <GSTREGISTRATIONTYPE>Regular</GSTREGISTRATIONTYPE>
                <PARTYGSTIN></PARTYGSTIN>
            </LEDGER>
            <LEDGER NAME="Globex">
                <GSTREGISTRATIONTYPE>Regular</GSTREGISTRATIONTYPE>
                <PARTYGSTIN>29ABCDE1234F1Z5</PARTYGSTIN>
            </LEDGER>
            <LEDGER NAME="Walk-in">
                <GSTREGISTRATIONTYPE>Unregistered</GSTREGISTRATIONTYPE>
            </LEDGER>
        </ENVELOPE>"#;

        assert_eq!(parse_gst_ledgers(xml).unwrap().len(), 3);

        let missing = parse_gst_not_feeded(xml).unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].ledger_name, "Acme Traders");
    }
}
