//! Session lifecycle with periodic liveness verification
//!
//! ```text
//! Disconnected ──connect/restore──► Connecting ──probe+handshake ok──► Connected
//!      ▲                                 │                                │
//!      └────────── failure ──────────────┘◄── liveness failure/disconnect─┘
//! ```
//!
//! Each attempt gets a generation number and a child cancellation token.
//! A newer attempt, a disconnect, or a failed probe cancels the token, which
//! stops the liveness worker and every poll loop started for that session.
//! Results from a superseded generation are discarded.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::metrics::LIVENESS_FAILURES;
use crate::notify::{BridgeEvent, BridgeListener};
use crate::store::{PersistedSession, SessionStore};
use crate::transport::{Delivery, RequestTransport};
use crate::types::{BridgeSession, CompanyInfo, ConnectionState};
use crate::{parser, query, Error, Result};

const BRIDGE_NOT_FOUND: &str =
    "Bridge not found. Make sure the desktop app is running and connected.";
const SESSION_EXPIRED: &str = "Session expired. Desktop app may have disconnected.";
const WORKER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Code and cancellation token of the connected session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Session code
    pub session_code: String,
    /// Cancelled when the session is torn down
    pub cancel: CancellationToken,
}

struct ActiveSession {
    generation: u64,
    session_code: String,
    phase: ConnectionState,
    cancel: CancellationToken,
    liveness: Option<JoinHandle<()>>,
}

struct SessionInner {
    transport: RequestTransport,
    store: Arc<dyn SessionStore>,
    listener: Arc<dyn BridgeListener>,
    settings: SessionConfig,
    state: watch::Sender<BridgeSession>,
    active: Mutex<Option<ActiveSession>>,
    generation: AtomicU64,
    root: CancellationToken,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

/// Owns the bridge session: connect, restore, liveness and teardown
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    /// Create a manager in the disconnected state
    pub fn new(
        transport: RequestTransport,
        store: Arc<dyn SessionStore>,
        listener: Arc<dyn BridgeListener>,
        settings: SessionConfig,
    ) -> Self {
        let (state, _) = watch::channel(BridgeSession::disconnected());
        Self {
            inner: Arc::new(SessionInner {
                transport,
                store,
                listener,
                settings,
                state,
                active: Mutex::new(None),
                generation: AtomicU64::new(0),
                root: CancellationToken::new(),
            }),
        }
    }

    /// Current session snapshot
    pub fn state(&self) -> BridgeSession {
        self.inner.state.borrow().clone()
    }

    /// Receiver that observes every state change
    pub fn subscribe(&self) -> watch::Receiver<BridgeSession> {
        self.inner.state.subscribe()
    }

    /// Handle of the connected session, if any
    pub fn handle(&self) -> Option<SessionHandle> {
        self.inner
            .active
            .lock()
            .as_ref()
            .filter(|a| a.phase == ConnectionState::Connected)
            .map(|a| SessionHandle {
                session_code: a.session_code.clone(),
                cancel: a.cancel.clone(),
            })
    }

    /// Whether the liveness worker of the current session is running
    pub fn is_monitoring(&self) -> bool {
        self.inner
            .active
            .lock()
            .as_ref()
            .and_then(|a| a.liveness.as_ref())
            .is_some_and(|h| !h.is_finished())
    }

    /// Connect with a session code shown by the desktop bridge.
    ///
    /// Codes shorter than the configured minimum are rejected without I/O.
    /// On success the session is persisted and liveness monitoring starts.
    pub async fn connect(&self, session_code: &str) -> bool {
        let code = session_code.trim().to_string();
        let min = self.inner.settings.min_code_length;

        if code.chars().count() < min {
            let reason = format!("Session code must be at least {} characters", min);
            debug!(reason = %reason, "Rejected session code");
            self.inner
                .listener
                .on_event(BridgeEvent::ConnectFailed { reason })
                .await;
            return false;
        }

        let (generation, cancel) = self.inner.begin(&code, None);
        info!(session_code = %code, generation, "Connecting to Tally bridge");

        match self.inner.handshake(&code, &cancel).await {
            Ok(company_info) => {
                let company_name = company_info.name.clone();
                if !self.inner.promote(generation, company_info, true) {
                    debug!(generation, "Connect superseded");
                    return false;
                }
                self.inner
                    .listener
                    .on_event(BridgeEvent::Connected {
                        session_code: code,
                        company_name,
                    })
                    .await;
                true
            }
            Err(Error::Cancelled) => {
                self.inner.abandon(generation, None);
                false
            }
            Err(e) => {
                let reason = e.to_string();
                if self.inner.abandon(generation, Some(reason.clone())) {
                    warn!(session_code = %code, error = %e, "Connection failed");
                    self.inner
                        .listener
                        .on_event(BridgeEvent::ConnectFailed { reason })
                        .await;
                }
                false
            }
        }
    }

    /// Restore a persisted session after re-verifying it with a probe.
    ///
    /// The saved company info is shown while the probe runs. A record that
    /// is unreadable or fails verification is discarded silently. A session
    /// that is already connected is kept as is.
    pub async fn restore(&self) -> bool {
        if self.handle().is_some() {
            debug!("Session already connected, skipping restore");
            return true;
        }

        let record = match self.inner.store.load() {
            Ok(Some(record)) => record,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable session record");
                self.inner.clear_store();
                return false;
            }
        };

        if record.session_code.trim().chars().count() < self.inner.settings.min_code_length {
            self.inner.clear_store();
            return false;
        }

        let PersistedSession {
            session_code,
            company_info,
        } = record;
        let (generation, cancel) = self.inner.begin(&session_code, Some(company_info.clone()));
        debug!(session_code = %session_code, "Verifying persisted session");

        let probe = tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            probe = self.inner.transport.check_session(&session_code) => probe,
        };

        match probe {
            Ok(true) => {
                let company_name = company_info.name.clone();
                if !self.inner.promote(generation, company_info, false) {
                    return false;
                }
                self.inner
                    .listener
                    .on_event(BridgeEvent::Restored {
                        session_code,
                        company_name,
                    })
                    .await;
                true
            }
            Ok(false) | Err(_) => {
                debug!(session_code = %session_code, "Persisted session is stale; discarding");
                self.inner.discard(generation);
                false
            }
        }
    }

    /// End the session, clear the persisted record and stop monitoring
    pub async fn disconnect(&self) {
        let previous = self.inner.teardown(true);
        if let Some(handle) = previous {
            join_worker(handle).await;
        }
        info!("Disconnected from Tally bridge");
        self.inner.listener.on_event(BridgeEvent::Disconnected).await;
    }

    /// Stop the session without touching the persisted record
    pub async fn shutdown(&self) {
        if let Some(handle) = self.inner.teardown(false) {
            join_worker(handle).await;
        }
    }
}

impl SessionInner {
    fn begin(&self, code: &str, company_info: Option<CompanyInfo>) -> (u64, CancellationToken) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = self.root.child_token();

        let mut active = self.active.lock();
        if let Some(previous) = active.take() {
            debug!(generation = previous.generation, "Superseding session attempt");
            previous.cancel.cancel();
        }
        *active = Some(ActiveSession {
            generation,
            session_code: code.to_string(),
            phase: ConnectionState::Connecting,
            cancel: cancel.clone(),
            liveness: None,
        });
        self.state.send_replace(BridgeSession {
            session_code: code.to_string(),
            state: ConnectionState::Connecting,
            company_info,
            last_error: None,
        });

        (generation, cancel)
    }

    async fn handshake(&self, code: &str, cancel: &CancellationToken) -> Result<CompanyInfo> {
        let alive = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            alive = self.transport.check_session(code) => alive?,
        };
        if !alive {
            return Err(Error::Transport(BRIDGE_NOT_FOUND.to_string()));
        }

        let request = query::company_info_request()?;
        match self.transport.send(code, &request, cancel).await? {
            Delivery::Cancelled => Err(Error::Cancelled),
            Delivery::Response(xml) => Ok(parser::parse_company_info(&xml).unwrap_or_else(|e| {
                warn!(error = %e, "Company response unreadable; using placeholder");
                CompanyInfo::placeholder()
            })),
        }
    }

    /// Mark `generation` connected, optionally persist it, and start the
    /// liveness worker. False when the attempt was superseded.
    fn promote(self: &Arc<Self>, generation: u64, company_info: CompanyInfo, persist: bool) -> bool {
        let mut guard = self.active.lock();
        let Some(active) = guard.as_mut().filter(|a| a.generation == generation) else {
            return false;
        };

        if persist {
            let record = PersistedSession {
                session_code: active.session_code.clone(),
                company_info: company_info.clone(),
            };
            if let Err(e) = self.store.save(&record) {
                warn!(error = %e, "Failed to persist session");
            }
        }

        active.phase = ConnectionState::Connected;
        active.liveness = Some(tokio::spawn(liveness_worker(
            Arc::downgrade(self),
            generation,
            active.session_code.clone(),
            active.cancel.clone(),
            self.settings.liveness_interval(),
            self.settings.probe_timeout(),
        )));

        self.state.send_replace(BridgeSession {
            session_code: active.session_code.clone(),
            state: ConnectionState::Connected,
            company_info: Some(company_info),
            last_error: None,
        });
        true
    }

    /// Failed attempt: back to disconnected, keeping the code and error.
    fn abandon(&self, generation: u64, error: Option<String>) -> bool {
        let mut active = self.active.lock();
        if active.as_ref().map(|a| a.generation) != Some(generation) {
            return false;
        }
        if let Some(previous) = active.take() {
            previous.cancel.cancel();
        }
        self.state.send_modify(|s| {
            s.state = ConnectionState::Disconnected;
            s.company_info = None;
            s.last_error = error;
        });
        true
    }

    /// Stale persisted session: back to a clean state, record removed.
    fn discard(&self, generation: u64) {
        let mut active = self.active.lock();
        if active.as_ref().map(|a| a.generation) != Some(generation) {
            return;
        }
        if let Some(previous) = active.take() {
            previous.cancel.cancel();
        }
        self.clear_store();
        self.state.send_replace(BridgeSession::disconnected());
    }

    fn teardown(&self, clear_record: bool) -> Option<JoinHandle<()>> {
        let mut active = self.active.lock();
        let previous = active.take();
        if let Some(previous) = &previous {
            previous.cancel.cancel();
        }
        if clear_record {
            self.clear_store();
        }
        self.state.send_replace(BridgeSession::disconnected());
        previous.and_then(|p| p.liveness)
    }

    async fn connection_lost(&self, generation: u64, session_code: &str, reason: String) {
        let lost = {
            let mut active = self.active.lock();
            if active.as_ref().map(|a| a.generation) == Some(generation) {
                if let Some(previous) = active.take() {
                    previous.cancel.cancel();
                }
                self.clear_store();
                self.state.send_modify(|s| {
                    s.state = ConnectionState::Disconnected;
                    s.last_error = Some(reason.clone());
                });
                true
            } else {
                false
            }
        };

        if lost {
            LIVENESS_FAILURES.inc();
            warn!(session_code, reason = %reason, "Tally bridge connection lost");
            self.listener
                .on_event(BridgeEvent::ConnectionLost {
                    session_code: session_code.to_string(),
                    reason,
                })
                .await;
        }
    }

    fn clear_store(&self) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear persisted session");
        }
    }
}

async fn join_worker(handle: JoinHandle<()>) {
    match tokio::time::timeout(WORKER_STOP_TIMEOUT, handle).await {
        Ok(Ok(())) => debug!("Liveness worker stopped"),
        Ok(Err(e)) => warn!(error = %e, "Liveness worker join failed"),
        Err(_) => warn!("Liveness worker shutdown timeout"),
    }
}

/// Probe the bridge every `interval` until cancelled or the probe fails.
///
/// A `false` result, a backend error and a probe timeout all count as
/// failure and demote the session.
async fn liveness_worker(
    inner: Weak<SessionInner>,
    generation: u64,
    session_code: String,
    cancel: CancellationToken,
    interval: Duration,
    probe_timeout: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(generation, "Liveness worker shutting down");
                break;
            }
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };

                let probe = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    probe = tokio::time::timeout(
                        probe_timeout,
                        inner.transport.check_session(&session_code),
                    ) => probe,
                };

                let reason = match probe {
                    Ok(Ok(true)) => {
                        debug!(session_code = %session_code, "Liveness probe ok");
                        continue;
                    }
                    Ok(Ok(false)) => SESSION_EXPIRED.to_string(),
                    Ok(Err(e)) => {
                        warn!(error = %e, "Liveness probe error");
                        format!("{} ({})", SESSION_EXPIRED, e)
                    }
                    Err(_) => {
                        warn!(timeout_secs = probe_timeout.as_secs(), "Liveness probe timeout");
                        format!("{} (probe timed out)", SESSION_EXPIRED)
                    }
                };

                inner.connection_lost(generation, &session_code, reason).await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBridgeBackend, MockReply};
    use crate::config::TransportConfig;
    use crate::notify::ChannelListener;
    use crate::store::MemorySessionStore;
    use tokio::sync::mpsc::UnboundedReceiver;

    const COMPANY_XML: &str = "<ENVELOPE><COMPANY><NAME>Acme</NAME>\
                               <BOOKSFROM>20240401</BOOKSFROM></COMPANY></ENVELOPE>";

    struct Fixture {
        mock: Arc<MockBridgeBackend>,
        store: Arc<MemorySessionStore>,
        events: UnboundedReceiver<BridgeEvent>,
        manager: SessionManager,
    }

    fn fixture(store: MemorySessionStore) -> Fixture {
        let mock = Arc::new(MockBridgeBackend::new(|_| MockReply::Data(COMPANY_XML.into())));
        let store = Arc::new(store);
        let (listener, events) = ChannelListener::new();
        let transport = RequestTransport::new(mock.clone(), &TransportConfig::default());
        let manager = SessionManager::new(
            transport,
            store.clone(),
            Arc::new(listener),
            SessionConfig::default(),
        );
        Fixture {
            mock,
            store,
            events,
            manager,
        }
    }

    #[tokio::test]
    async fn test_short_code_rejected_without_io() {
        let mut f = fixture(MemorySessionStore::new());

        assert!(!f.manager.connect("abc").await);
        assert_eq!(f.mock.total_calls(), 0);
        assert_eq!(f.manager.state().state, ConnectionState::Disconnected);
        assert!(matches!(
            f.events.recv().await,
            Some(BridgeEvent::ConnectFailed { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_persists_and_monitors() {
        let mut f = fixture(MemorySessionStore::new());

        assert!(f.manager.connect("  AB12CD ").await);

        let state = f.manager.state();
        assert!(state.is_connected());
        assert_eq!(state.session_code, "AB12CD");
        assert_eq!(state.company_info.as_ref().unwrap().name, "Acme");
        assert_eq!(
            state.company_info.unwrap().financial_year_label,
            "FY 2024-25"
        );
        assert!(f.manager.is_monitoring());
        assert_eq!(f.store.load().unwrap().unwrap().session_code, "AB12CD");
        assert!(matches!(
            f.events.recv().await,
            Some(BridgeEvent::Connected { .. })
        ));
        assert!(f.manager.handle().is_some());
    }

    #[tokio::test]
    async fn test_connect_fails_when_bridge_offline() {
        let mut f = fixture(MemorySessionStore::new());
        f.mock.set_alive(false);

        assert!(!f.manager.connect("AB12CD").await);

        let state = f.manager.state();
        assert_eq!(state.state, ConnectionState::Disconnected);
        assert!(state.last_error.unwrap().contains("Bridge not found"));
        assert!(f.store.is_empty());
        assert_eq!(f.mock.create_calls(), 0);
        assert!(matches!(
            f.events.recv().await,
            Some(BridgeEvent::ConnectFailed { .. })
        ));
        assert!(f.manager.handle().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_failure_demotes_session() {
        let mut f = fixture(MemorySessionStore::new());
        assert!(f.manager.connect("AB12CD").await);
        let handle = f.manager.handle().unwrap();
        let _ = f.events.recv().await;

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(f.manager.state().is_connected());

        f.mock.set_alive(false);
        tokio::time::sleep(Duration::from_secs(30)).await;

        let state = f.manager.state();
        assert_eq!(state.state, ConnectionState::Disconnected);
        assert_eq!(state.last_error.as_deref(), Some(SESSION_EXPIRED));
        assert!(f.store.is_empty());
        assert!(handle.cancel.is_cancelled());
        assert!(matches!(
            f.events.recv().await,
            Some(BridgeEvent::ConnectionLost { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_error_counts_as_failure() {
        let mut f = fixture(MemorySessionStore::new());
        assert!(f.manager.connect("AB12CD").await);
        let _ = f.events.recv().await;

        f.mock.set_probe_error(true);
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert!(!f.manager.state().is_connected());
        assert!(matches!(
            f.events.recv().await,
            Some(BridgeEvent::ConnectionLost { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_stops_liveness() {
        let f = fixture(MemorySessionStore::new());
        assert!(f.manager.connect("AB12CD").await);

        f.manager.disconnect().await;
        assert!(!f.manager.is_monitoring());
        assert!(f.store.is_empty());
        assert_eq!(f.manager.state(), BridgeSession::disconnected());

        let probes = f.mock.check_calls();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(f.mock.check_calls(), probes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_verified_session() {
        let seeded = MemorySessionStore::new();
        seeded
            .save(&PersistedSession {
                session_code: "AB12CD".into(),
                company_info: CompanyInfo {
                    name: "Saved Co".into(),
                    financial_year_label: "FY 2023-24".into(),
                    books_from_date: "20230401".into(),
                    books_to_date: String::new(),
                },
            })
            .unwrap();
        let mut f = fixture(seeded);

        assert!(f.manager.restore().await);
        assert!(f.manager.state().is_connected());
        assert_eq!(f.manager.state().company_info.unwrap().name, "Saved Co");
        assert_eq!(f.mock.create_calls(), 0);
        assert!(matches!(
            f.events.recv().await,
            Some(BridgeEvent::Restored { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_keeps_live_session() {
        let mut f = fixture(MemorySessionStore::new());
        assert!(f.manager.connect("AB12CD").await);
        let before = f.manager.handle().unwrap();
        let checks = f.mock.check_calls();
        while f.events.try_recv().is_ok() {}

        assert!(f.manager.restore().await);
        assert_eq!(f.mock.check_calls(), checks);
        assert!(!before.cancel.is_cancelled());
        assert!(f.manager.is_monitoring());
        assert_eq!(f.manager.handle().unwrap().session_code, "AB12CD");
        assert!(f.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_restore_stale_session_is_silent() {
        let seeded = MemorySessionStore::new();
        seeded
            .save(&PersistedSession {
                session_code: "AB12CD".into(),
                company_info: CompanyInfo::placeholder(),
            })
            .unwrap();
        let mut f = fixture(seeded);
        f.mock.set_alive(false);

        assert!(!f.manager.restore().await);
        assert_eq!(f.manager.state(), BridgeSession::disconnected());
        assert!(f.store.is_empty());
        assert!(f.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_restore_corrupt_record_is_discarded() {
        let f = fixture(MemorySessionStore::from_raw("{broken"));
        assert!(!f.manager.restore().await);
        assert!(f.store.is_empty());
        assert_eq!(f.mock.total_calls(), 0);
    }
}
