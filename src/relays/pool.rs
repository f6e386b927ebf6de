//! Relay Pool - registry of live relays
//!
//! Holds one relay per normalized URL and notifies subscribers when relays
//! appear or disappear, so the auth manager can follow the pool.

use crate::relays::interface::Relay;
use crate::relays::utils::normalize_relay_url;
use futures::channel::mpsc;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, info};

#[derive(Clone)]
pub enum PoolEvent {
    Added(Rc<dyn Relay>),
    /// Normalized URL of the removed relay
    Removed(String),
}

impl fmt::Debug for PoolEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolEvent::Added(relay) => f.debug_tuple("Added").field(&relay.url()).finish(),
            PoolEvent::Removed(url) => f.debug_tuple("Removed").field(url).finish(),
        }
    }
}

pub struct RelayPool {
    relays: Rc<RefCell<FxHashMap<String, Rc<dyn Relay>>>>,
    listeners: Rc<RefCell<Vec<mpsc::UnboundedSender<PoolEvent>>>>,
}

impl Drop for RelayPool {
    fn drop(&mut self) {
        if Rc::strong_count(&self.relays) == 1 {
            info!("Dropping RelayPool - listeners will be closed");
        }
    }
}

impl Default for RelayPool {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayPool {
    pub fn new() -> Self {
        Self {
            relays: Rc::new(RefCell::new(FxHashMap::default())),
            listeners: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Adds a relay. Returns false if a relay with the same normalized URL is
    /// already registered; the existing one is kept.
    pub fn add(&self, relay: Rc<dyn Relay>) -> bool {
        let url = normalize_relay_url(relay.url());
        {
            let mut relays = self.relays.borrow_mut();
            if relays.contains_key(&url) {
                debug!(relay = %url, "Relay already in pool");
                return false;
            }
            relays.insert(url.clone(), relay.clone());
        }
        debug!(relay = %url, "Relay added to pool");
        self.notify(PoolEvent::Added(relay));
        true
    }

    pub fn remove(&self, url: &str) -> Option<Rc<dyn Relay>> {
        let url = normalize_relay_url(url);
        let removed = self.relays.borrow_mut().remove(&url)?;
        debug!(relay = %url, "Relay removed from pool");
        self.notify(PoolEvent::Removed(url));
        Some(removed)
    }

    pub fn get(&self, url: &str) -> Option<Rc<dyn Relay>> {
        self.relays
            .borrow()
            .get(&normalize_relay_url(url))
            .cloned()
    }

    pub fn relays(&self) -> Vec<Rc<dyn Relay>> {
        self.relays.borrow().values().cloned().collect()
    }

    pub fn urls(&self) -> Vec<String> {
        self.relays.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.relays.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.borrow().is_empty()
    }

    /// Add/remove notifications from now on. Current members are not replayed.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<PoolEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.listeners.borrow_mut().push(tx);
        rx
    }

    fn notify(&self, event: PoolEvent) {
        // Closed receivers are pruned here.
        self.listeners
            .borrow_mut()
            .retain(|tx| tx.unbounded_send(event.clone()).is_ok());
    }
}

impl Clone for RelayPool {
    fn clone(&self) -> Self {
        Self {
            relays: self.relays.clone(),
            listeners: self.listeners.clone(),
        }
    }
}
