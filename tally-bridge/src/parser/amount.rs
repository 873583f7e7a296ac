use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

lazy_static! {
    static ref DR_CR_TOKEN: Regex = Regex::new(r"(?i)\b(dr|cr)\b\.?").unwrap();
    static ref NUMERIC_PREFIX: Regex =
        Regex::new(r"^[+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?").unwrap();
}

/// Parse a Tally amount, tolerating formatting noise.
///
/// Thousands separators are stripped, a parenthesized value is negative and a
/// `Cr` token flips the sign (`Dr` is dropped). Anything unparseable yields
/// zero.
pub fn parse_amount(text: &str) -> Decimal {
    let mut negate = false;
    let without_commas = text.replace(',', "");
    let mut cleaned = without_commas.trim().to_string();

    if DR_CR_TOKEN.is_match(&cleaned) {
        let has_cr = DR_CR_TOKEN
            .captures_iter(&cleaned)
            .filter_map(|c| c.get(1))
            .any(|t| t.as_str().eq_ignore_ascii_case("cr"));
        if has_cr {
            negate = !negate;
        }
        let stripped = DR_CR_TOKEN.replace_all(&cleaned, "").trim().to_string();
        cleaned = stripped;
    }

    if cleaned.starts_with('(') && cleaned.ends_with(')') && cleaned.len() >= 2 {
        negate = !negate;
        cleaned = cleaned[1..cleaned.len() - 1].trim().to_string();
    }

    let Some(number) = NUMERIC_PREFIX.find(&cleaned) else {
        return Decimal::ZERO;
    };

    let raw = number.as_str();
    let value = Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .unwrap_or(Decimal::ZERO);

    if negate {
        -value
    } else {
        value
    }
}

/// Tally boolean: `Yes`, `1` or `true` in any case
pub fn parse_flag(text: &str) -> bool {
    let t = text.trim();
    t.eq_ignore_ascii_case("yes") || t == "1" || t.eq_ignore_ascii_case("true")
}
