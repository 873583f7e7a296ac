//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use tally_bridge::backend::{MockBridgeBackend, MockReply};
use tally_bridge::notify::ChannelListener;
use tally_bridge::query::COMPANY_COLLECTION;
use tally_bridge::{BridgeClient, BridgeEvent, Config, MemorySessionStore};
use tokio::sync::mpsc::UnboundedReceiver;

pub const SESSION_CODE: &str = "AB12CD";

pub const COMPANY_XML: &str = r#"<ENVELOPE>
    <COMPANY NAME="Acme Industries">
        <NAME>Acme Industries</NAME>
        <BOOKSFROM>20240401</BOOKSFROM>
    </COMPANY>
</ENVELOPE>"#;

/// Text of the first `<tag>` in a request payload
pub fn tag_value<'a>(payload: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    payload
        .split_once(open.as_str())
        .and_then(|(_, rest)| rest.split_once(close.as_str()))
        .map(|(value, _)| value.trim())
}

pub struct Harness {
    pub mock: Arc<MockBridgeBackend>,
    pub store: Arc<MemorySessionStore>,
    pub events: UnboundedReceiver<BridgeEvent>,
    pub client: BridgeClient,
}

impl Harness {
    /// Events received so far
    pub fn drain(&mut self) -> Vec<BridgeEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Connect with the fixture code and discard the connect event
    pub async fn connected(mut self) -> Self {
        assert!(self.client.connect(SESSION_CODE).await);
        self.drain();
        self
    }
}

/// Client over a mock backend. `route` receives the collection id and the
/// full payload of every data request; the company handshake is answered
/// with [`COMPANY_XML`].
pub fn harness<F>(route: F) -> Harness
where
    F: Fn(&str, &str) -> MockReply + Send + Sync + 'static,
{
    let mock = Arc::new(MockBridgeBackend::new(move |payload: &str| {
        match tag_value(payload, "ID") {
            Some(COMPANY_COLLECTION) => MockReply::Data(COMPANY_XML.to_string()),
            Some(collection) => route(collection, payload),
            None => MockReply::Failed("request without collection id".to_string()),
        }
    }));
    let store = Arc::new(MemorySessionStore::new());
    let (listener, events) = ChannelListener::new();
    let client = BridgeClient::new(
        &Config::default(),
        mock.clone(),
        store.clone(),
        Arc::new(listener),
    );

    Harness {
        mock,
        store,
        events,
        client,
    }
}

/// One `<LEDGER>` element with the given child fields
pub fn ledger(name: &str, fields: &[(&str, &str)]) -> String {
    let mut xml = format!("<LEDGER NAME=\"{}\"><NAME>{}</NAME>", name, name);
    for (tag, value) in fields {
        xml.push_str(&format!("<{}>{}</{}>", tag, value, tag));
    }
    xml.push_str("</LEDGER>");
    xml
}

/// Wrap ledger elements in an export envelope
pub fn envelope(ledgers: &[String]) -> String {
    format!("<ENVELOPE><COLLECTION>{}</COLLECTION></ENVELOPE>", ledgers.concat())
}
