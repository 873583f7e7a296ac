//! Removal of characters and character references that XML 1.0 forbids
//!
//! Tally emits control-character references such as `&#4;` inside ledger
//! names and narrations, which strict XML parsers reject. Every response is
//! passed through [`sanitize_xml`] before parsing.

use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;

lazy_static! {
    /// Decimal references to code points 0-8, 11-12 and 14-31
    static ref DECIMAL_CONTROL_REF: Regex =
        Regex::new(r"&#0*(?:[0-8]|1[1-2]|1[4-9]|2[0-9]|3[0-1]);").unwrap();

    /// Hexadecimal references to the same code points
    static ref HEX_CONTROL_REF: Regex =
        Regex::new(r"&#[xX]0*(?:[0-8]|[bBcC]|[eEfF]|1[0-9a-fA-F]);").unwrap();

    /// Raw control characters except tab, LF and CR
    static ref RAW_CONTROL: Regex = Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F]").unwrap();

    /// Anything outside the XML 1.0 Char production restricted to the BMP
    static ref NOT_XML_CHAR: Regex =
        Regex::new(r"[^\x09\x0A\x0D\x20-\x{D7FF}\x{E000}-\x{FFFD}]").unwrap();
}

/// Strip disallowed references and characters from `input`.
///
/// Returns the input borrowed when nothing needs removing. Removal repeats
/// until a fixed point, so fragments that join into a new forbidden reference
/// (`&#&#4;4;`) are removed as well and the function is idempotent.
pub fn sanitize_xml(input: &str) -> Cow<'_, str> {
    if !needs_sanitizing(input) {
        return Cow::Borrowed(input);
    }

    let mut current = input.to_string();
    loop {
        let next = strip_once(&current);
        if next.len() == current.len() {
            return Cow::Owned(next);
        }
        current = next;
    }
}

/// True when `input` contains anything [`sanitize_xml`] would remove
pub fn needs_sanitizing(input: &str) -> bool {
    DECIMAL_CONTROL_REF.is_match(input)
        || HEX_CONTROL_REF.is_match(input)
        || NOT_XML_CHAR.is_match(input)
}

fn strip_once(input: &str) -> String {
    let step = DECIMAL_CONTROL_REF.replace_all(input, "");
    let step = HEX_CONTROL_REF.replace_all(&step, "");
    let step = RAW_CONTROL.replace_all(&step, "");
    NOT_XML_CHAR.replace_all(&step, "").into_owned()
}
