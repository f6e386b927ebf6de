//! Relay Auth Manager - coordinates NIP-42 authentication across relays
//!
//! The manager owns the state table (one `RelayAuthState` per monitored relay,
//! keyed by normalized URL), the preference store, the session-rejection set
//! and one `RelayMonitor` per relay. Every state change goes through the pure
//! state machine and is followed by a re-derivation of the published views.
//!
//! Everything runs on one thread: the manager spawns local tasks and must be
//! created inside a `tokio::task::LocalSet`.
//!
//! # Example
//!
//! ```rust,ignore
//! use nipworker_auth::{ManagerOptions, RelayAuthManager};
//! use tokio::task::LocalSet;
//!
//! LocalSet::new().run_until(async {
//!     let manager = RelayAuthManager::new(signer_feed, ManagerOptions::default());
//!     manager.monitor_relay(relay);
//!
//!     let mut pending = manager.subscribe_pending();
//!     while pending.changed().await.is_ok() {
//!         for challenge in pending.borrow_and_update().iter() {
//!             println!("{} wants us to authenticate", challenge.relay_url);
//!         }
//!     }
//! }).await;
//! ```

mod monitor;

use crate::config::{AuthConfig, ManagerOptions};
use crate::pending::{derive_pending_challenges, PendingInputs};
use crate::preferences::PreferenceStore;
use crate::relays::utils::normalize_relay_url;
use crate::relays::{PoolEvent, Relay, RelayPool, RelaySignal, Signer, SignerFeed};
use crate::state_machine::{transition, AuthEvent, Transition};
use crate::types::{
    AuthError, AuthPreference, AuthStatus, PendingChallenge, RelayAuthState, StateSnapshot,
};
use futures::future::{AbortHandle, Abortable};
use futures::StreamExt;
use monitor::{RelayMonitor, SignalWriter};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use tokio::sync::watch;
use tokio::task::spawn_local;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

pub struct RelayAuthManager {
    shared: Rc<Shared>,
}

struct Shared {
    config: AuthConfig,
    signer: SignerFeed,

    states: RefCell<StateSnapshot>,
    monitors: RefCell<FxHashMap<String, RelayMonitor>>,
    preferences: RefCell<PreferenceStore>,
    session_rejections: RefCell<FxHashSet<String>>,
    // Last generation handed to a `RelayMonitor`
    generation: Cell<u64>,

    // Signer listener, expiry ticker, pool follower
    background: RefCell<Vec<AbortHandle>>,

    // Senders are taken on destroy; the receivers are cloned for subscribers.
    states_tx: RefCell<Option<watch::Sender<StateSnapshot>>>,
    states_rx: watch::Receiver<StateSnapshot>,
    pending_tx: RefCell<Option<watch::Sender<Vec<PendingChallenge>>>>,
    pending_rx: watch::Receiver<Vec<PendingChallenge>>,

    destroyed: Cell<bool>,
}

impl Drop for RelayAuthManager {
    fn drop(&mut self) {
        self.shared.destroy();
    }
}

impl RelayAuthManager {
    /// Creates the manager, loads saved preferences and starts monitoring
    /// `options.initial_relays`. Must be called inside a `LocalSet`.
    pub fn new(signer: SignerFeed, options: ManagerOptions) -> Self {
        let ManagerOptions {
            config,
            storage,
            initial_relays,
        } = options;

        let preferences = PreferenceStore::load(storage, &config.storage_key);
        let (states_tx, states_rx) = watch::channel(StateSnapshot::default());
        let (pending_tx, pending_rx) = watch::channel(Vec::new());

        let shared = Rc::new(Shared {
            config,
            signer,
            states: RefCell::new(StateSnapshot::default()),
            monitors: RefCell::new(FxHashMap::default()),
            preferences: RefCell::new(preferences),
            session_rejections: RefCell::new(FxHashSet::default()),
            generation: Cell::new(0),
            background: RefCell::new(Vec::new()),
            states_tx: RefCell::new(Some(states_tx)),
            states_rx,
            pending_tx: RefCell::new(Some(pending_tx)),
            pending_rx,
            destroyed: Cell::new(false),
        });

        shared.spawn_signer_listener();
        shared.spawn_expiry_ticker();

        info!(
            relays = initial_relays.len(),
            ttl_ms = shared.config.challenge_ttl,
            "Relay auth manager created"
        );

        for relay in initial_relays {
            shared.monitor(relay);
        }

        Self { shared }
    }

    /// Starts tracking `relay`. Returns false if it was already monitored
    /// (or the manager is destroyed).
    pub fn monitor_relay(&self, relay: Rc<dyn Relay>) -> bool {
        self.shared.monitor(relay)
    }

    /// Stops tracking the relay and removes its state entirely.
    pub fn unmonitor_relay(&self, url: &str) -> bool {
        self.shared.unmonitor(url)
    }

    /// Monitors every relay in `pool` and follows its add/remove notifications.
    pub fn watch_pool(&self, pool: &RelayPool) {
        if self.shared.destroyed.get() {
            warn!("Relay auth manager destroyed, not watching pool");
            return;
        }

        let mut events = pool.subscribe();
        for relay in pool.relays() {
            self.shared.monitor(relay);
        }

        let weak = Rc::downgrade(&self.shared);
        self.shared.spawn_background(async move {
            while let Some(event) = events.next().await {
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                match event {
                    PoolEvent::Added(relay) => {
                        shared.monitor(relay);
                    }
                    PoolEvent::Removed(url) => {
                        shared.unmonitor(&url);
                    }
                }
            }
            debug!("Relay pool closed");
        });
    }

    pub fn get_relay_state(&self, url: &str) -> Option<RelayAuthState> {
        let key = self.shared.resolve_key(url)?;
        self.shared.states.borrow().get(&key).cloned()
    }

    pub fn get_all_states(&self) -> StateSnapshot {
        self.shared.states.borrow().clone()
    }

    pub fn monitored_urls(&self) -> Vec<String> {
        self.shared.states.borrow().keys().cloned().collect()
    }

    pub fn set_preference(&self, url: &str, preference: AuthPreference) {
        self.shared.set_preference(url, preference);
    }

    /// Drops the saved preference for `url`, which then behaves as "ask".
    pub fn clear_preference(&self, url: &str) {
        let removed = self.shared.preferences.borrow_mut().remove(url);
        if removed.is_some() {
            info!(relay = %normalize_relay_url(url), "Auth preference cleared");
            self.shared.publish_pending();
        }
    }

    pub fn get_preference(&self, url: &str) -> AuthPreference {
        self.shared.preferences.borrow().get(url)
    }

    pub fn get_all_preferences(&self) -> FxHashMap<String, AuthPreference> {
        self.shared.preferences.borrow().all()
    }

    /// Answers the relay's current challenge with the current signer.
    ///
    /// Usage errors (`NotMonitored`, `NoChallenge`, `NoSigner`) are returned
    /// before anything is sent. A failed attempt moves the relay to `failed`
    /// and returns the relay's error. Success only means the auth event was
    /// sent; `authenticated` follows from the relay's own signal.
    pub async fn authenticate(&self, url: &str) -> Result<(), AuthError> {
        self.shared.authenticate(url).await
    }

    /// Declines the relay's challenge. With `remember_for_session` the relay
    /// is no longer surfaced as pending until the manager is destroyed, even
    /// for new challenges.
    pub fn reject(&self, url: &str, remember_for_session: bool) {
        self.shared.reject(url, remember_for_session);
    }

    pub fn is_session_rejected(&self, url: &str) -> bool {
        let rejections = self.shared.session_rejections.borrow();
        rejections.contains(url) || rejections.contains(&normalize_relay_url(url))
    }

    /// Pending challenges derived right now; expired entries are dropped on read.
    pub fn pending_challenges(&self) -> Vec<PendingChallenge> {
        self.shared.publish_pending()
    }

    /// Snapshot of every relay state, re-sent after each mutation.
    pub fn subscribe_states(&self) -> watch::Receiver<StateSnapshot> {
        self.shared.states_rx.clone()
    }

    /// Challenges waiting for a user decision, sent whenever the list changes.
    pub fn subscribe_pending(&self) -> watch::Receiver<Vec<PendingChallenge>> {
        self.shared.pending_rx.clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.destroyed.get()
    }

    /// Stops every task, empties the state table and closes both streams.
    pub fn destroy(&self) {
        self.shared.destroy();
    }
}

impl Shared {
    fn spawn_background<F>(&self, task: F)
    where
        F: Future<Output = ()> + 'static,
    {
        let (handle, registration) = AbortHandle::new_pair();
        spawn_local(Abortable::new(task, registration));
        self.background.borrow_mut().push(handle);
    }

    fn spawn_signer_listener(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        let mut signer = self.signer.clone();
        let mut was_available = signer.borrow_and_update().is_some();

        self.spawn_background(async move {
            while signer.changed().await.is_ok() {
                let available = signer.borrow_and_update().is_some();
                let Some(shared) = weak.upgrade() else {
                    break;
                };

                if available != was_available {
                    info!(available, "Signer availability changed");
                }
                if available && !was_available {
                    shared.auto_authenticate_waiting();
                }
                was_available = available;
                shared.publish_pending();
            }
        });
    }

    fn spawn_expiry_ticker(self: &Rc<Self>) {
        let Some(period) = self.config.expiry_check_interval() else {
            debug!("Periodic challenge expiry disabled");
            return;
        };
        let weak = Rc::downgrade(self);

        self.spawn_background(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                shared.publish_pending();
            }
        });
    }

    fn signal_writer(self: &Rc<Self>) -> SignalWriter {
        let weak = Rc::downgrade(self);
        Rc::new(move |url: &str, signal: RelaySignal| {
            if let Some(shared) = weak.upgrade() {
                shared.handle_signal(url, signal);
            }
        })
    }

    fn current_signer(&self) -> Option<Rc<dyn Signer>> {
        self.signer.borrow().clone()
    }

    fn signer_available(&self) -> bool {
        self.signer.borrow().is_some()
    }

    /// Exact key first, then the normalized form.
    fn resolve_key(&self, url: &str) -> Option<String> {
        let states = self.states.borrow();
        if states.contains_key(url) {
            return Some(url.to_string());
        }
        let normalized = normalize_relay_url(url);
        states.contains_key(&normalized).then_some(normalized)
    }

    fn monitor(self: &Rc<Self>, relay: Rc<dyn Relay>) -> bool {
        if self.destroyed.get() {
            warn!(relay = relay.url(), "Relay auth manager destroyed, ignoring relay");
            return false;
        }

        let url = normalize_relay_url(relay.url());
        if self.monitors.borrow().contains_key(&url) {
            debug!(relay = %url, "Relay already monitored");
            return false;
        }

        // Current values and the subscription are taken in one step, so no
        // signal falls between them.
        let connected = relay.is_connected();
        let challenge = relay.current_challenge();
        let authenticated = relay.is_authenticated();
        let signals = relay.signals();

        let generation = self.generation.get() + 1;
        self.generation.set(generation);

        self.states
            .borrow_mut()
            .insert(url.clone(), RelayAuthState::new(url.clone(), connected));
        let monitor = RelayMonitor::spawn(
            url.clone(),
            relay,
            generation,
            signals,
            self.signal_writer(),
        );
        self.monitors.borrow_mut().insert(url.clone(), monitor);

        info!(relay = %url, connected, "Monitoring relay auth");
        self.publish();

        // Replay what the relay already holds.
        if challenge.is_some() {
            self.handle_signal(&url, RelaySignal::Challenge(challenge));
        }
        if authenticated {
            self.handle_signal(&url, RelaySignal::Authenticated(true));
        }
        true
    }

    fn unmonitor(&self, url: &str) -> bool {
        let Some(key) = self.resolve_key(url) else {
            debug!(relay = url, "Relay not monitored");
            return false;
        };

        // Dropping the monitor aborts its feed task and any automatic attempt.
        let monitor = self.monitors.borrow_mut().remove(&key);
        drop(monitor);
        self.states.borrow_mut().remove(&key);

        info!(relay = %key, "Stopped monitoring relay auth");
        self.publish();
        true
    }

    fn handle_signal(self: &Rc<Self>, url: &str, signal: RelaySignal) {
        if self.destroyed.get() || !self.states.borrow().contains_key(url) {
            return;
        }

        match signal {
            RelaySignal::Connectivity(true) => {
                self.set_connected(url, true);
                self.publish();
            }
            RelaySignal::Connectivity(false) => {
                self.set_connected(url, false);
                self.dispatch(url, AuthEvent::Disconnected);
            }
            RelaySignal::Challenge(Some(challenge)) => {
                let is_new = self
                    .states
                    .borrow()
                    .get(url)
                    .is_some_and(|s| s.challenge.as_deref() != Some(challenge.as_str()));
                if !is_new {
                    trace!(relay = %url, "Challenge unchanged");
                    return;
                }

                let preference = self.effective_preference(url);
                debug!(relay = %url, %preference, "Challenge received");
                let event = AuthEvent::ChallengeReceived {
                    challenge,
                    preference: Some(preference),
                };
                if let Some(t) = self.dispatch(url, event) {
                    if t.should_auto_auth {
                        self.spawn_auto_auth(url);
                    }
                }
            }
            RelaySignal::Challenge(None) => {
                trace!(relay = %url, "Relay cleared its challenge");
            }
            RelaySignal::Authenticated(true) => {
                self.dispatch(url, AuthEvent::AuthSuccess);
            }
            RelaySignal::Authenticated(false) => {}
        }
    }

    /// "always" only holds while a signer is usable; without one the challenge
    /// waits in `challenge_received` until the signer shows up.
    fn effective_preference(&self, url: &str) -> AuthPreference {
        match self.preferences.borrow().get(url) {
            AuthPreference::Always if !self.signer_available() => AuthPreference::Ask,
            preference => preference,
        }
    }

    fn set_connected(&self, url: &str, connected: bool) {
        if let Some(state) = self.states.borrow_mut().get_mut(url) {
            state.connected = connected;
        }
    }

    /// Runs `event` through the state machine for `url` and applies the result.
    /// Returns `None` if the relay is not monitored.
    fn dispatch(&self, url: &str, event: AuthEvent) -> Option<Transition> {
        if self.destroyed.get() {
            return None;
        }

        let t = {
            let mut states = self.states.borrow_mut();
            let state = states.get_mut(url)?;
            let t = transition(state.status, &event);

            if t.status != state.status {
                debug!(
                    relay = %url,
                    event = event.name(),
                    from = %state.status,
                    to = %t.status,
                    "Auth transition"
                );
            }
            state.status = t.status;

            if t.clear_challenge {
                state.challenge = None;
                state.challenge_received_at = None;
            } else if let AuthEvent::ChallengeReceived { challenge, .. } = event {
                if state.challenge.as_ref() != Some(&challenge) {
                    state.challenge = Some(challenge);
                    state.challenge_received_at = Some(Instant::now());
                }
            }
            t
        };

        self.publish();
        Some(t)
    }

    fn spawn_auto_auth(self: &Rc<Self>, url: &str) {
        if !self.signer_available() {
            debug!(relay = %url, "No signer, skipping automatic authentication");
            return;
        }

        let (handle, registration) = AbortHandle::new_pair();
        let generation = {
            let mut monitors = self.monitors.borrow_mut();
            let Some(monitor) = monitors.get_mut(url) else {
                return;
            };
            if monitor.attempt_in_flight() {
                debug!(relay = %url, "Automatic authentication already in flight");
                return;
            }
            monitor.start_attempt(handle);
            monitor.generation()
        };

        let shared = Rc::clone(self);
        let url = url.to_string();
        let attempt = async move {
            // No caller to report to.
            if let Err(e) = shared.authenticate(&url).await {
                warn!(relay = %url, "Automatic authentication failed: {}", e);
            }
            if let Some(monitor) = shared.monitors.borrow_mut().get_mut(&url) {
                if monitor.generation() == generation {
                    monitor.finish_attempt();
                }
            }
        };
        spawn_local(Abortable::new(attempt, registration));
    }

    /// Whether `key` is still monitored by the entry of `generation`.
    fn is_current(&self, key: &str, generation: u64) -> bool {
        self.monitors
            .borrow()
            .get(key)
            .is_some_and(|m| m.generation() == generation)
    }

    /// Authenticates every relay waiting in `challenge_received` under "always".
    fn auto_authenticate_waiting(self: &Rc<Self>) {
        if !self.signer_available() {
            return;
        }

        let waiting: Vec<String> = {
            let states = self.states.borrow();
            let preferences = self.preferences.borrow();
            states
                .values()
                .filter(|s| s.status == AuthStatus::ChallengeReceived && s.challenge.is_some())
                .filter(|s| preferences.get(&s.url) == AuthPreference::Always)
                .map(|s| s.url.clone())
                .collect()
        };

        for url in waiting {
            info!(relay = %url, "Authenticating waiting relay");
            self.spawn_auto_auth(&url);
        }
    }

    async fn authenticate(&self, url: &str) -> Result<(), AuthError> {
        let key = self
            .resolve_key(url)
            .ok_or_else(|| AuthError::NotMonitored(url.to_string()))?;

        let has_challenge = self
            .states
            .borrow()
            .get(&key)
            .is_some_and(|s| s.challenge.is_some());
        if !has_challenge {
            return Err(AuthError::NoChallenge(key));
        }

        let signer = self.current_signer().ok_or(AuthError::NoSigner)?;
        let (relay, generation) = self
            .monitors
            .borrow()
            .get(&key)
            .map(|m| (m.relay(), m.generation()))
            .ok_or_else(|| AuthError::NotMonitored(key.clone()))?;

        self.dispatch(&key, AuthEvent::UserAccepted);
        info!(relay = %key, "Authenticating with relay");

        let result = relay.authenticate(signer).await;
        if !self.is_current(&key, generation) {
            // The relay was removed (or replaced) while we waited.
            debug!(relay = %key, "Relay no longer monitored, dropping auth result");
            return result.map_err(|source| AuthError::Relay { url: key, source });
        }

        match result {
            Ok(()) => {
                debug!(relay = %key, "Auth event sent, waiting for relay confirmation");
                Ok(())
            }
            Err(source) => {
                warn!(relay = %key, "Authentication failed: {}", source);
                self.dispatch(&key, AuthEvent::AuthFailed);
                Err(AuthError::Relay { url: key, source })
            }
        }
    }

    fn reject(&self, url: &str, remember_for_session: bool) {
        let key = self
            .resolve_key(url)
            .unwrap_or_else(|| normalize_relay_url(url));

        if remember_for_session {
            self.session_rejections.borrow_mut().insert(key.clone());
        }
        info!(relay = %key, remember_for_session, "Challenge rejected");

        if self.dispatch(&key, AuthEvent::UserRejected).is_none() {
            self.publish_pending();
        }
    }

    fn set_preference(self: &Rc<Self>, url: &str, preference: AuthPreference) {
        self.preferences.borrow_mut().set(url, preference);
        info!(relay = %normalize_relay_url(url), %preference, "Auth preference set");

        if preference == AuthPreference::Always {
            self.auto_authenticate_waiting();
        }
        self.publish_pending();
    }

    fn publish(&self) {
        if let Some(tx) = self.states_tx.borrow().as_ref() {
            tx.send_replace(self.states.borrow().clone());
        }
        self.publish_pending();
    }

    /// Re-derives the pending list, sends it if it changed, and returns it.
    fn publish_pending(&self) -> Vec<PendingChallenge> {
        let pending = self.derive_pending();
        if let Some(tx) = self.pending_tx.borrow().as_ref() {
            tx.send_if_modified(|current| {
                if *current == pending {
                    false
                } else {
                    *current = pending.clone();
                    true
                }
            });
        }
        pending
    }

    fn derive_pending(&self) -> Vec<PendingChallenge> {
        let states = self.states.borrow();
        let preferences = self.preferences.borrow();
        let session_rejections = self.session_rejections.borrow();

        derive_pending_challenges(&PendingInputs {
            states: &states,
            preferences: &preferences,
            session_rejections: &session_rejections,
            signer_available: self.signer_available(),
            now: Instant::now(),
            ttl: self.config.challenge_ttl(),
        })
    }

    fn destroy(&self) {
        if self.destroyed.replace(true) {
            return;
        }

        for handle in self.background.borrow_mut().drain(..) {
            handle.abort();
        }
        let monitors: Vec<RelayMonitor> = self
            .monitors
            .borrow_mut()
            .drain()
            .map(|(_, monitor)| monitor)
            .collect();
        drop(monitors);

        self.states.borrow_mut().clear();

        // Final empty value, then close both channels.
        if let Some(tx) = self.states_tx.borrow_mut().take() {
            tx.send_replace(StateSnapshot::default());
        }
        if let Some(tx) = self.pending_tx.borrow_mut().take() {
            tx.send_replace(Vec::new());
        }

        info!("Relay auth manager destroyed");
    }
}
