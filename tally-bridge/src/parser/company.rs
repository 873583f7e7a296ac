use super::parse_document;
use crate::error::Result;
use crate::types::CompanyInfo;

/// Parse the company handshake response.
///
/// Falls back to [`CompanyInfo::placeholder`] when no `NAME` is present.
pub fn parse_company_info(xml: &str) -> Result<CompanyInfo> {
    let doc = parse_document(xml)?;
    let fields = doc.fields();

    let Some(name) = fields.get("NAME") else {
        return Ok(CompanyInfo::placeholder());
    };

    let books_from_date = fields
        .first_of(&["BOOKSFROM", "STARTINGFROM"])
        .unwrap_or("")
        .to_string();

    Ok(CompanyInfo {
        name: if name.is_empty() {
            "Tally Company".to_string()
        } else {
            name.to_string()
        },
        financial_year_label: financial_year_label(&books_from_date),
        books_from_date,
        books_to_date: String::new(),
    })
}

/// `FY 2024-25` from a `YYYYMMDD` books-from date, `N/A` otherwise
pub fn financial_year_label(books_from: &str) -> String {
    books_from
        .get(..4)
        .and_then(|y| y.parse::<i32>().ok())
        .map(|year| format!("FY {}-{:02}", year, (year + 1) % 100))
        .unwrap_or_else(|| "N/A".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_company_info() {
        let xml = r#"<ENVELOPE><COLLECTION>
            <COMPANY NAME="Acme Industries Pvt Ltd">
                <NAME>Acme Industries Pvt Ltd</NAME>
                <STARTINGFROM>20230401</STARTINGFROM>
                <BOOKSFROM>20240401</BOOKSFROM>
            </COMPANY>
        </COLLECTION></ENVELOPE>"#;

        let info = parse_company_info(xml).unwrap();
        assert_eq!(info.name, "Acme Industries Pvt Ltd");
        assert_eq!(info.books_from_date, "20240401");
        assert_eq!(info.financial_year_label, "FY 2024-25");
        assert!(info.books_to_date.is_empty());
    }

    #[test]
    fn test_starting_from_fallback() {
        let xml = "<ENVELOPE><COMPANY><NAME>Acme</NAME>\
                   <STARTINGFROM>19990401</STARTINGFROM></COMPANY></ENVELOPE>";
        let info = parse_company_info(xml).unwrap();
        assert_eq!(info.books_from_date, "19990401");
        assert_eq!(info.financial_year_label, "FY 1999-00");
    }

    #[test]
    fn test_missing_name_yields_placeholder() {
        let info = parse_company_info("<ENVELOPE><COMPANY/></ENVELOPE>").unwrap();
        assert_eq!(info, CompanyInfo::placeholder());
        assert_eq!(info.financial_year_label, "N/A");
    }

    #[test]
    fn test_financial_year_label() {
        assert_eq!(financial_year_label("20240401"), "FY 2024-25");
        assert_eq!(financial_year_label(""), "N/A");
        assert_eq!(financial_year_label("abcd0401"), "N/A");
    }
}
