//! Tolerant parsing of Tally XML responses
//!
//! Responses are sanitized, read into a light element tree, and each object
//! element (`LEDGER`, `COMPANY`, ...) is flattened into a case-insensitive
//! [`FieldTable`] from which typed records are extracted.

mod amount;
mod company;
mod gst;
mod ledger;

pub use amount::{parse_amount, parse_flag};
pub use company::parse_company_info;
pub use gst::{is_gstin_missing, parse_gst_ledgers, parse_gst_not_feeded};
pub use ledger::{
    is_profit_and_loss, parse_ledger_snapshots, parse_month_wise, parse_trial_balance,
    LedgerSnapshot, MonthWiseParse, PL_GROUP_KEYWORDS,
};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::sanitize::sanitize_xml;

/// Element of a parsed response
#[derive(Debug, Clone, Default)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    fn from_start(start: &BytesStart<'_>) -> Self {
        let mut element = Self::new(String::from_utf8_lossy(start.name().as_ref()));
        for attr in start.attributes().with_checks(false).flatten() {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = match attr.unescape_value() {
                Ok(v) => v.into_owned(),
                Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
            };
            element.attributes.push((key, value));
        }
        element
    }

    /// Tag name as written
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attribute value, matched case-insensitively
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Concatenated text of this element and all descendants
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        out.push_str(&self.text);
        for child in &self.children {
            child.collect_text(out);
        }
    }

    /// Outermost descendants whose tag is one of `tags` (case-insensitive),
    /// in document order
    pub fn find_all<'a>(&'a self, tags: &[&str]) -> Vec<&'a Element> {
        let mut found = Vec::new();
        self.collect_matching(tags, &mut found);
        found
    }

    fn collect_matching<'a>(&'a self, tags: &[&str], found: &mut Vec<&'a Element>) {
        for child in &self.children {
            if tags.iter().any(|t| child.name.eq_ignore_ascii_case(t)) {
                found.push(child);
            } else {
                child.collect_matching(tags, found);
            }
        }
    }

    /// Flatten descendants into a field table
    pub fn fields(&self) -> FieldTable<'_> {
        let mut values = HashMap::new();
        for child in &self.children {
            child.index_into(&mut values);
        }
        FieldTable {
            element: self,
            values,
        }
    }

    fn index_into(&self, values: &mut HashMap<String, String>) {
        values
            .entry(self.name.to_ascii_uppercase())
            .or_insert_with(|| self.text_content().trim().to_string());
        for child in &self.children {
            child.index_into(values);
        }
    }
}

/// Case-insensitive lookup of the first descendant with a given tag
#[derive(Debug)]
pub struct FieldTable<'a> {
    element: &'a Element,
    values: HashMap<String, String>,
}

impl<'a> FieldTable<'a> {
    /// Text of the first descendant named `tag`
    pub fn get(&self, tag: &str) -> Option<&str> {
        self.values.get(&tag.to_ascii_uppercase()).map(String::as_str)
    }

    /// Whether a descendant named `tag` exists, even if empty
    pub fn contains(&self, tag: &str) -> bool {
        self.values.contains_key(&tag.to_ascii_uppercase())
    }

    /// First non-empty value among `tags`
    pub fn first_of(&self, tags: &[&str]) -> Option<&str> {
        tags.iter()
            .filter_map(|t| self.get(t))
            .find(|v| !v.is_empty())
    }

    /// Text of `tag`, or empty
    pub fn text(&self, tag: &str) -> &str {
        self.get(tag).unwrap_or("")
    }

    /// Object name from the `NAME` child, else the `NAME` attribute
    pub fn name(&self) -> String {
        self.get("NAME")
            .filter(|v| !v.is_empty())
            .or_else(|| self.element.attribute("NAME"))
            .unwrap_or("")
            .trim()
            .to_string()
    }
}

/// Sanitize and parse a response into an element tree rooted at a synthetic
/// document node.
pub fn parse_document(xml: &str) -> Result<Element> {
    let clean = sanitize_xml(xml);
    let mut reader = Reader::from_str(&clean);
    reader.trim_text(true);

    let mut stack = vec![Element::new("#document")];

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(Element::from_start(&e)),
            Ok(Event::Empty(e)) => {
                let element = Element::from_start(&e);
                attach(&mut stack, element);
            }
            Ok(Event::End(_)) => {
                if stack.len() > 1 {
                    if let Some(element) = stack.pop() {
                        attach(&mut stack, element);
                    }
                }
            }
            Ok(Event::Text(t)) => {
                let text = match t.unescape() {
                    Ok(v) => v.into_owned(),
                    Err(_) => String::from_utf8_lossy(&t).into_owned(),
                };
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(Error::Parse(format!(
                    "at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }

    // Truncated documents: close whatever is still open
    while stack.len() > 1 {
        if let Some(element) = stack.pop() {
            attach(&mut stack, element);
        }
    }

    let root = stack.pop().unwrap_or_else(|| Element::new("#document"));
    if root.children.is_empty() {
        return Err(Error::Parse("response contains no elements".to_string()));
    }
    Ok(root)
}

fn attach(stack: &mut [Element], element: Element) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
    }
}
