//! Bridge client: session lifecycle plus the data operations
//!
//! Every fetch resolves to `Option`: `None` means the operation failed and a
//! [`BridgeEvent::FetchFailed`] carrying the reason has been emitted. No
//! fetch panics or leaks an error past this boundary.

use chrono::NaiveDate;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, instrument};

use crate::backend::{BridgeBackend, HttpBridgeBackend};
use crate::config::Config;
use crate::metrics::FETCH_OUTCOMES;
use crate::monthwise::MonthWiseFetcher;
use crate::notify::{BridgeEvent, BridgeListener, Operation, TracingListener};
use crate::session::{SessionHandle, SessionManager};
use crate::store::{FileSessionStore, SessionStore};
use crate::transport::{Delivery, RequestTransport};
use crate::types::{
    BridgeSession, FiscalMonth, GstLedgerRecord, MonthWiseReport, TrialBalanceReport,
};
use crate::{parser, query, Error, Result};

/// Number of records a fetch produced, for notifications
trait RecordCount {
    fn record_count(&self) -> usize;
}

impl RecordCount for TrialBalanceReport {
    fn record_count(&self) -> usize {
        self.lines.len()
    }
}

impl RecordCount for MonthWiseReport {
    fn record_count(&self) -> usize {
        self.lines.len()
    }
}

impl RecordCount for Vec<GstLedgerRecord> {
    fn record_count(&self) -> usize {
        self.len()
    }
}

/// Client for one Tally bridge session
#[derive(Clone)]
pub struct BridgeClient {
    session: SessionManager,
    transport: RequestTransport,
    month_wise: MonthWiseFetcher,
    listener: Arc<dyn BridgeListener>,
}

impl BridgeClient {
    /// Assemble a client from its collaborators
    pub fn new(
        config: &Config,
        backend: Arc<dyn BridgeBackend>,
        store: Arc<dyn SessionStore>,
        listener: Arc<dyn BridgeListener>,
    ) -> Self {
        let transport = RequestTransport::new(backend, &config.transport);
        let session = SessionManager::new(
            transport.clone(),
            store,
            listener.clone(),
            config.session.clone(),
        );
        let month_wise = MonthWiseFetcher::new(transport.clone(), config.anomaly.clone());

        Self {
            session,
            transport,
            month_wise,
            listener,
        }
    }

    /// HTTP backend, file session store and tracing notifications
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend = HttpBridgeBackend::new(config.endpoint.clone())?;
        let store = FileSessionStore::new(&config.session.state_dir);

        info!(
            service = %config.service_name,
            endpoint = %config.endpoint.url,
            state_dir = %config.session.state_dir.display(),
            "Tally bridge client configured"
        );

        Ok(Self::new(
            config,
            Arc::new(backend),
            Arc::new(store),
            Arc::new(TracingListener),
        ))
    }

    /// Session manager
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Current session snapshot
    pub fn state(&self) -> BridgeSession {
        self.session.state()
    }

    /// Receiver that observes every session state change
    pub fn subscribe(&self) -> watch::Receiver<BridgeSession> {
        self.session.subscribe()
    }

    /// Connect with a session code shown by the desktop bridge
    pub async fn connect(&self, session_code: &str) -> bool {
        self.session.connect(session_code).await
    }

    /// Restore the persisted session, if it still verifies
    pub async fn restore(&self) -> bool {
        self.session.restore().await
    }

    /// Disconnect and forget the persisted session
    pub async fn disconnect(&self) {
        self.session.disconnect().await
    }

    /// Stop the session, keeping the persisted record for the next run
    pub async fn shutdown(&self) {
        self.session.shutdown().await
    }

    /// Send a prebuilt request envelope and return the raw response
    pub async fn send_raw(&self, payload: &str) -> Result<String> {
        let handle = self.require_session()?;
        self.deliver(&handle, payload).await
    }

    /// Trial balance as of `to`. `from` is carried into the report.
    #[instrument(skip(self))]
    pub async fn fetch_trial_balance(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Option<TrialBalanceReport> {
        let result = self.trial_balance(from, to).await;
        self.finish(Operation::TrialBalance, result).await
    }

    /// Month-end balances from April through `target` of the financial
    /// year starting in `fy_start_year`
    #[instrument(skip(self))]
    pub async fn fetch_month_wise_data(
        &self,
        fy_start_year: i32,
        target: FiscalMonth,
    ) -> Option<MonthWiseReport> {
        let result = self.month_wise(fy_start_year, target).await;
        self.finish(Operation::MonthWise, result).await
    }

    /// Ledgers registered as Regular under GST but missing a usable GSTIN
    #[instrument(skip(self))]
    pub async fn fetch_gst_not_feeded(&self) -> Option<Vec<GstLedgerRecord>> {
        let result = self.gst_not_feeded().await;
        self.finish(Operation::GstAudit, result).await
    }

    async fn trial_balance(&self, from: NaiveDate, to: NaiveDate) -> Result<TrialBalanceReport> {
        let handle = self.require_session()?;
        if from > to {
            return Err(Error::Validation(format!(
                "Period start {} is after period end {}",
                from, to
            )));
        }

        let request = query::trial_balance_request(to)?;
        let raw_xml = self.deliver(&handle, &request).await?;
        let lines = parser::parse_trial_balance(&raw_xml)?;

        Ok(TrialBalanceReport {
            period_from: from,
            period_to: to,
            lines,
            raw_xml,
        })
    }

    async fn month_wise(&self, fy_start_year: i32, target: FiscalMonth) -> Result<MonthWiseReport> {
        let handle = self.require_session()?;
        self.month_wise
            .fetch(&handle.session_code, &handle.cancel, fy_start_year, target)
            .await
    }

    async fn gst_not_feeded(&self) -> Result<Vec<GstLedgerRecord>> {
        let handle = self.require_session()?;
        let request = query::gst_audit_request()?;
        let xml = self.deliver(&handle, &request).await?;
        parser::parse_gst_not_feeded(&xml)
    }

    fn require_session(&self) -> Result<SessionHandle> {
        self.session.handle().ok_or(Error::NotConnected)
    }

    async fn deliver(&self, handle: &SessionHandle, payload: &str) -> Result<String> {
        match self
            .transport
            .send(&handle.session_code, payload, &handle.cancel)
            .await?
        {
            Delivery::Response(xml) => Ok(xml),
            Delivery::Cancelled => Err(Error::Cancelled),
        }
    }

    async fn finish<T: RecordCount>(&self, operation: Operation, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => {
                let records = value.record_count();
                FETCH_OUTCOMES
                    .with_label_values(&[operation.as_str(), "completed"])
                    .inc();
                self.listener
                    .on_event(BridgeEvent::FetchCompleted { operation, records })
                    .await;
                Some(value)
            }
            Err(Error::Cancelled) => {
                FETCH_OUTCOMES
                    .with_label_values(&[operation.as_str(), "cancelled"])
                    .inc();
                debug!(%operation, "Fetch cancelled by session teardown");
                None
            }
            Err(e) => {
                FETCH_OUTCOMES
                    .with_label_values(&[operation.as_str(), e.kind()])
                    .inc();
                self.listener
                    .on_event(BridgeEvent::FetchFailed {
                        operation,
                        reason: e.to_string(),
                    })
                    .await;
                None
            }
        }
    }
}
