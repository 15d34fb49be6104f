//! The orchestrator: a bounded registry of sessions keyed by tab id.
//!
//! Locking order is registry, then session. The registry lock is only held
//! for map lookups and edits, never across a driver call.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use conductor_pty::{Driver, DriverError, DriverFactory, Key};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::approval::ApprovalDetector;
use crate::config::{ExistingTabPolicy, OrchestratorConfig};
use crate::error::{OrchestratorError, Result};
use crate::events::{CloseReason, EventBus, OrchestratorEvent};
use crate::extract::{parse_usage, ResponseExtractor, ScreenScrapeExtractor, ScreenText};
use crate::memory;
use crate::readiness::wait_until_settled;
use crate::session::{content_hash, Message, Role, Session, SessionInfo, SessionState};
use crate::store::SessionStore;

type SessionRef = Arc<Mutex<Session>>;

/// Pause between keys when several are sent in a row.
const KEY_DELAY: Duration = Duration::from_millis(100);

#[derive(Default)]
struct Registry {
    by_tab: HashMap<String, SessionRef>,
    /// session id -> tab id
    by_id: HashMap<String, String>,
    /// Tabs whose driver is being spawned. They count toward the limit.
    reserved: HashSet<String>,
}

impl Registry {
    fn live(&self) -> usize {
        self.by_tab.len() + self.reserved.len()
    }

    /// Move a reserved tab into the live maps in one step, so it is never
    /// counted twice.
    fn admit(&mut self, tab_id: &str, session_id: &str, session: SessionRef) {
        self.reserved.remove(tab_id);
        self.by_id.insert(session_id.to_string(), tab_id.to_string());
        self.by_tab.insert(tab_id.to_string(), session);
    }
}

/// Releases a spawn reservation however `create_session` exits.
struct Reservation<'a> {
    orchestrator: &'a Orchestrator,
    tab_id: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.orchestrator.registry().reserved.remove(&self.tab_id);
    }
}

fn lock_session(session: &SessionRef) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    factory: Arc<dyn DriverFactory>,
    store: Option<SessionStore>,
    extractor: Box<dyn ResponseExtractor>,
    approvals: ApprovalDetector,
    events: EventBus,
    registry: Mutex<Registry>,
}

impl Orchestrator {
    /// Build an orchestrator. With a store, sessions left active by a
    /// previous run are marked inactive and rows past retention are pruned.
    pub fn new(
        config: OrchestratorConfig,
        factory: Arc<dyn DriverFactory>,
        store: Option<SessionStore>,
    ) -> Result<Self> {
        let approvals = ApprovalDetector::with_extra(&config.approval.extra_patterns)?;
        if let Some(store) = &store {
            store.mark_all_inactive();
            store.prune(config.retention());
        }
        Ok(Self {
            config,
            factory,
            store,
            extractor: Box::new(ScreenScrapeExtractor),
            approvals,
            events: EventBus::new(),
            registry: Mutex::new(Registry::default()),
        })
    }

    pub fn with_extractor(mut self, extractor: Box<dyn ResponseExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn by_tab(&self, tab_id: &str) -> Option<SessionRef> {
        self.registry().by_tab.get(tab_id).cloned()
    }

    fn by_session_id(&self, session_id: &str) -> Option<SessionRef> {
        let registry = self.registry();
        let tab_id = registry.by_id.get(session_id)?;
        registry.by_tab.get(tab_id).cloned()
    }

    fn snapshot(&self) -> Vec<SessionRef> {
        self.registry().by_tab.values().cloned().collect()
    }

    fn backend_name(&self) -> String {
        self.factory.backend().to_string()
    }

    fn persist(&self, session: &Session) {
        if let Some(store) = &self.store {
            store.save_session(&session.to_record(&self.backend_name()));
        }
    }

    /// Number of live sessions, not counting tabs still spawning.
    pub fn session_count(&self) -> usize {
        self.registry().by_tab.len()
    }

    /// Start a session for `tab_id` and return its session id.
    ///
    /// Blocks until the new process's screen settles (bounded by
    /// `ready_timeout_ms`) and any remembered context has been replayed.
    pub fn create_session(&self, tab_id: &str, label: Option<&str>) -> Result<String> {
        if let Some(existing) = self.by_tab(tab_id) {
            match self.config.existing_tab {
                ExistingTabPolicy::Reuse => return Ok(lock_session(&existing).session_id.clone()),
                ExistingTabPolicy::Respawn => {
                    self.close_tab(tab_id, CloseReason::Replaced);
                }
            }
        }

        let _reservation = {
            let mut registry = self.registry();
            if let Some(existing) = registry.by_tab.get(tab_id).cloned() {
                drop(registry);
                return Ok(lock_session(&existing).session_id.clone());
            }
            if registry.reserved.contains(tab_id) {
                return Err(OrchestratorError::SpawnInProgress(tab_id.to_string()));
            }
            if registry.live() >= self.config.max_sessions {
                return Err(OrchestratorError::CapacityExceeded {
                    max: self.config.max_sessions,
                });
            }
            registry.reserved.insert(tab_id.to_string());
            Reservation {
                orchestrator: self,
                tab_id: tab_id.to_string(),
            }
        };

        let session = self.spawn_session(tab_id, label)?;
        let session_id = session.session_id.clone();
        let label = session.label.clone();
        self.registry()
            .admit(tab_id, &session_id, Arc::new(Mutex::new(session)));

        log::info!("session {session_id} created for tab {tab_id}");
        self.events.publish(OrchestratorEvent::SessionCreated {
            session_id: session_id.clone(),
            tab_id: tab_id.to_string(),
            label,
        });
        Ok(session_id)
    }

    fn spawn_driver(
        &self,
        tab_id: &str,
        session_id: &str,
    ) -> std::result::Result<Box<dyn Driver>, DriverError> {
        let spec = self.config.driver.spawn_spec();
        let short_id: String = session_id.chars().take(8).collect();
        let mut driver = self.factory.spawn(&spec, &format!("{tab_id}-{short_id}"))?;

        let settled = wait_until_settled(
            driver.as_mut(),
            self.config.poll_interval(),
            self.config.ready_timeout(),
            self.config.capture_lines,
        );
        if !settled {
            log::warn!(
                "tab {tab_id}: screen did not settle within {:?}, continuing",
                self.config.ready_timeout()
            );
        }

        for key in &self.config.driver.startup_keys {
            driver.send_key(*key)?;
            thread::sleep(KEY_DELAY);
        }
        Ok(driver)
    }

    fn spawn_session(&self, tab_id: &str, label: Option<&str>) -> Result<Session> {
        let session_id = Uuid::new_v4().to_string();
        let driver = self
            .spawn_driver(tab_id, &session_id)
            .map_err(|source| OrchestratorError::Spawn {
                tab_id: tab_id.to_string(),
                source,
            })?;

        let mut session = Session::new(
            session_id,
            tab_id,
            label,
            driver,
            self.config.history_limit,
        );

        if let Some(store) = &self.store {
            let recent = store.recent_for_tab(tab_id, self.config.context_messages);
            session.memory_context =
                memory::build_context(recent.iter().map(|m| (m.role.as_str(), m.content.as_str())));
        }
        self.replay_context(&mut session);

        session.state = SessionState::Ready;
        self.persist(&session);
        Ok(session)
    }

    /// Send the session's remembered context as a priming message.
    fn replay_context(&self, session: &mut Session) {
        let Some(priming) = memory::priming_message(&session.memory_context) else {
            return;
        };
        match session.driver.send_line(&priming) {
            Ok(()) => log::info!(
                "tab {}: replayed conversation context ({} chars)",
                session.tab_id,
                session.memory_context.len()
            ),
            Err(e) => {
                log::warn!("tab {}: context replay failed: {e}", session.tab_id);
                session.record_error(e.to_string());
            }
        }
    }

    /// Type `text` into the tab's session. Returns the session id.
    pub fn route_message(&self, tab_id: &str, text: &str) -> Result<String> {
        let session_ref = self
            .by_tab(tab_id)
            .ok_or_else(|| OrchestratorError::NoSuchSession(tab_id.to_string()))?;
        let mut session = lock_session(&session_ref);
        if session.state == SessionState::Evicted {
            return Err(OrchestratorError::NoSuchSession(tab_id.to_string()));
        }

        if let Err(source) = session.driver.send_line(text) {
            self.note_failure(&mut session, &source);
            return Err(OrchestratorError::SendFailure {
                tab_id: tab_id.to_string(),
                source,
            });
        }

        session.clear_errors();
        session.begin_turn(text);
        session.state = SessionState::Busy;
        if let Some(store) = &self.store {
            store.append_message(&session.session_id, Role::User, text);
        }
        self.persist(&session);

        log::debug!("tab {tab_id}: routed {} chars", text.len());
        self.events.publish(OrchestratorEvent::MessageRouted {
            session_id: session.session_id.clone(),
            tab_id: tab_id.to_string(),
            text: text.to_string(),
        });
        Ok(session.session_id.clone())
    }

    /// Scrape the session's screen for a reply not returned before.
    ///
    /// `Ok(None)` means nothing new is on screen yet.
    pub fn capture_response(&self, session_id: &str) -> Result<Option<String>> {
        let session_ref = self
            .by_session_id(session_id)
            .ok_or_else(|| OrchestratorError::NoSuchSession(session_id.to_string()))?;
        let mut session = lock_session(&session_ref);
        if session.state == SessionState::Evicted {
            return Err(OrchestratorError::NoSuchSession(session_id.to_string()));
        }

        let screen = match session.driver.capture(self.config.capture_lines) {
            Ok(Some(screen)) => screen,
            Ok(None) => {
                let source = DriverError::Capture("process exited".to_string());
                self.note_failure(&mut session, &source);
                return Err(OrchestratorError::CaptureFailure {
                    session_id: session_id.to_string(),
                    source,
                });
            }
            Err(source) => {
                self.note_failure(&mut session, &source);
                return Err(OrchestratorError::CaptureFailure {
                    session_id: session_id.to_string(),
                    source,
                });
            }
        };
        session.clear_errors();
        if let Some(usage) = parse_usage(&screen) {
            session.usage = Some(usage);
        }

        let extracted = self.extractor.extract(&ScreenText {
            text: screen,
            last_input: session.last_input.clone(),
        });
        let Some(text) = extracted else {
            return Ok(None);
        };
        if !session.remember_response(&text) {
            return Ok(None);
        }

        let replaced = session.record_reply(&text);
        session.state = SessionState::Idle;
        if let Some(store) = &self.store {
            match session.reply_row {
                Some(row) if replaced => store.replace_message(row, &text),
                _ => {
                    session.reply_row =
                        store.append_message(&session.session_id, Role::Assistant, &text);
                }
            }
        }
        self.persist(&session);

        self.events.publish(OrchestratorEvent::ResponseCaptured {
            session_id: session.session_id.clone(),
            tab_id: session.tab_id.clone(),
            text: text.clone(),
        });
        Ok(Some(text))
    }

    /// Poll for a reply until `timeout`. Once text appears, polling continues
    /// until one poll brings nothing new, so a reply still being written is
    /// returned in its latest form. `Ok(None)` on timeout.
    pub fn await_response(&self, session_id: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        let poll = self.config.poll_interval();
        let mut latest: Option<String> = None;

        loop {
            match self.capture_response(session_id) {
                Ok(Some(text)) => latest = Some(text),
                Ok(None) if latest.is_some() => return Ok(latest),
                Ok(None) => {}
                Err(OrchestratorError::CaptureFailure { source, .. }) => {
                    log::debug!("session {session_id}: capture failed while waiting: {source}");
                }
                Err(e) => return Err(e),
            }
            if Instant::now() + poll > deadline {
                return Ok(latest);
            }
            thread::sleep(poll);
        }
    }

    fn note_failure(&self, session: &mut Session, error: &DriverError) {
        let count = session.record_error(error.to_string());
        log::warn!(
            "tab {}: driver failure {count}/{}: {error}",
            session.tab_id,
            self.config.error_threshold
        );
        if count > self.config.error_threshold {
            self.recover(session);
        }
        self.persist(session);
    }

    /// Replace a failing driver: kill it, spawn a new one from the same
    /// spawn spec, and replay the conversation so far. Ids are unchanged.
    fn recover(&self, session: &mut Session) -> bool {
        log::warn!(
            "tab {}: recovering session {} after {} failures",
            session.tab_id,
            session.session_id,
            session.error_count
        );
        session.state = SessionState::Recovering;
        session.driver.terminate();

        match self.spawn_driver(&session.tab_id, &session.session_id) {
            Ok(driver) => {
                session.driver = driver;
                let history = session.history();
                let skip = history.len().saturating_sub(self.config.context_messages);
                let context = memory::build_context(
                    history[skip..]
                        .iter()
                        .map(|m| (m.role.as_str(), m.text.as_str())),
                );
                if !context.is_empty() {
                    session.memory_context = context;
                }
                session.clear_errors();
                self.replay_context(session);
                session.state = SessionState::Ready;
                session.touch();

                log::info!("tab {}: session recovered", session.tab_id);
                self.events.publish(OrchestratorEvent::SessionRecovered {
                    session_id: session.session_id.clone(),
                    tab_id: session.tab_id.clone(),
                });
                true
            }
            Err(e) => {
                log::error!("tab {}: recovery failed: {e}", session.tab_id);
                session.last_error = Some(format!("recovery failed: {e}"));
                session.state = SessionState::Idle;
                false
            }
        }
    }

    /// Remove a tab from the registry and terminate its driver.
    fn close_tab(&self, tab_id: &str, reason: CloseReason) -> Option<String> {
        let session_ref = {
            let mut registry = self.registry();
            let session_ref = registry.by_tab.remove(tab_id)?;
            registry.by_id.retain(|_, tab| tab != tab_id);
            session_ref
        };

        let mut session = lock_session(&session_ref);
        session.driver.terminate();
        session.state = SessionState::Evicted;
        if let Some(store) = &self.store {
            store.save_session(&session.to_record(&self.backend_name()));
            store.mark_inactive(&session.session_id);
        }

        log::info!("session {} for tab {tab_id} closed ({reason:?})", session.session_id);
        self.events.publish(OrchestratorEvent::SessionClosed {
            session_id: session.session_id.clone(),
            tab_id: tab_id.to_string(),
            reason,
        });
        Some(session.session_id.clone())
    }

    pub fn cleanup_session(&self, tab_id: &str) -> Result<()> {
        self.close_tab(tab_id, CloseReason::Requested)
            .map(|_| ())
            .ok_or_else(|| OrchestratorError::NoSuchSession(tab_id.to_string()))
    }

    /// Close sessions idle for at least `idle_timeout_secs`. Sessions busy
    /// in a driver call are skipped. Returns the closed tab ids.
    pub fn evict_idle(&self) -> Vec<String> {
        let timeout = self.config.idle_timeout();
        let idle: Vec<String> = self
            .snapshot()
            .iter()
            .filter_map(|session_ref| {
                let session = session_ref.try_lock().ok()?;
                (session.idle_for() >= timeout).then(|| session.tab_id.clone())
            })
            .collect();

        idle.into_iter()
            .filter(|tab_id| self.close_tab(tab_id, CloseReason::Idle).is_some())
            .collect()
    }

    /// Periodic housekeeping: idle eviction plus storage retention.
    pub fn sweep(&self) -> Vec<String> {
        let evicted = self.evict_idle();
        if let Some(store) = &self.store {
            store.prune(self.config.retention());
        }
        evicted
    }

    /// Answer any visible permission prompt with "1" + Enter. Returns how
    /// many sessions were answered.
    pub fn scan_approvals(&self) -> usize {
        if !self.config.approval.enabled {
            return 0;
        }
        self.snapshot()
            .iter()
            .filter(|session_ref| match session_ref.try_lock() {
                Ok(mut session) => self.answer_prompt(&mut session),
                Err(_) => false,
            })
            .count()
    }

    fn answer_prompt(&self, session: &mut Session) -> bool {
        if session.state == SessionState::Evicted {
            return false;
        }
        if let Some(last) = session.last_approval {
            if last.elapsed() < self.config.approval_cooldown() {
                return false;
            }
        }

        let scan_lines = self.config.approval.scan_lines;
        let screen = match session.driver.capture(scan_lines) {
            Ok(Some(screen)) => screen,
            _ => return false,
        };
        let screen_hash = content_hash(&screen);
        if session.last_approved_screen == Some(screen_hash) {
            return false;
        }
        let typed = session.last_input.as_deref();
        let Some(prompt) = self.approvals.detect_after_input(&screen, scan_lines, typed) else {
            return false;
        };

        let sent = session
            .driver
            .send_literal("1")
            .and_then(|()| session.driver.send_key(Key::Enter));
        if let Err(e) = sent {
            log::warn!("tab {}: answering prompt failed: {e}", session.tab_id);
            return false;
        }

        session.last_approval = Some(Instant::now());
        session.last_approved_screen = Some(screen_hash);
        log::info!(
            "tab {}: auto-approved prompt matching {:?}",
            session.tab_id,
            prompt.pattern
        );
        self.events.publish(OrchestratorEvent::ApprovalSent {
            session_id: session.session_id.clone(),
            tab_id: session.tab_id.clone(),
            matched: prompt.matched,
        });
        true
    }

    pub fn session_info(&self, tab_id: &str) -> Option<SessionInfo> {
        self.by_tab(tab_id).map(|s| lock_session(&s).info())
    }

    /// Every live session, oldest first.
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .snapshot()
            .iter()
            .map(|s| lock_session(s).info())
            .collect();
        infos.sort_by_key(|info| info.created_at);
        infos
    }

    /// The in-memory message window for `tab_id`.
    pub fn history(&self, tab_id: &str) -> Result<Vec<Message>> {
        self.by_tab(tab_id)
            .map(|s| lock_session(&s).history())
            .ok_or_else(|| OrchestratorError::NoSuchSession(tab_id.to_string()))
    }

    /// Terminate every session and mark them inactive in storage.
    pub fn shutdown(&self) {
        let tabs: Vec<String> = self.registry().by_tab.keys().cloned().collect();
        for tab_id in &tabs {
            self.close_tab(tab_id, CloseReason::Shutdown);
        }
        if let Some(store) = &self.store {
            store.mark_all_inactive();
        }
        log::info!("orchestrator shut down ({} sessions closed)", tabs.len());
    }
}
