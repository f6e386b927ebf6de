//! Per-relay auth preferences
//!
//! The whole map is persisted as one JSON object (`{"wss://relay": "always"}`)
//! under a single storage key, rewritten on every change. A missing or
//! unreadable blob starts the store empty.

use crate::relays::utils::normalize_relay_url;
use crate::types::{AuthPreference, StorageError};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{debug, warn};

/// Minimal string key-value storage, shaped like the browser's `localStorage`.
pub trait KeyValueStorage {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// In-process storage backed by a hash map
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RefCell<FxHashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.borrow().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.items
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

pub struct PreferenceStore {
    storage: Option<Rc<dyn KeyValueStorage>>,
    storage_key: String,
    preferences: FxHashMap<String, AuthPreference>,
}

impl PreferenceStore {
    /// Loads saved preferences. Never fails: corrupt data is logged and ignored.
    pub fn load(storage: Option<Rc<dyn KeyValueStorage>>, storage_key: &str) -> Self {
        let preferences = storage
            .as_ref()
            .and_then(|s| s.get_item(storage_key))
            .map(|raw| parse_preferences(storage_key, &raw))
            .unwrap_or_default();

        debug!(
            key = storage_key,
            count = preferences.len(),
            "Loaded relay auth preferences"
        );

        Self {
            storage,
            storage_key: storage_key.to_string(),
            preferences,
        }
    }

    /// Preference for `url`, "ask" when none was set.
    pub fn get(&self, url: &str) -> AuthPreference {
        self.get_explicit(url).unwrap_or_default()
    }

    pub fn get_explicit(&self, url: &str) -> Option<AuthPreference> {
        self.preferences
            .get(url)
            .or_else(|| self.preferences.get(&normalize_relay_url(url)))
            .copied()
    }

    pub fn set(&mut self, url: &str, preference: AuthPreference) {
        self.preferences
            .insert(normalize_relay_url(url), preference);
        self.persist();
    }

    pub fn remove(&mut self, url: &str) -> Option<AuthPreference> {
        let removed = self.preferences.remove(&normalize_relay_url(url))?;
        self.persist();
        Some(removed)
    }

    pub fn all(&self) -> FxHashMap<String, AuthPreference> {
        self.preferences.clone()
    }

    fn persist(&self) {
        let Some(storage) = &self.storage else {
            return;
        };

        let ordered: BTreeMap<&String, &AuthPreference> = self.preferences.iter().collect();
        let json = match serde_json::to_string(&ordered) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize auth preferences: {}", e);
                return;
            }
        };

        if let Err(e) = storage.set_item(&self.storage_key, &json) {
            warn!(key = %self.storage_key, "Failed to persist auth preferences: {}", e);
        }
    }
}

fn parse_preferences(key: &str, raw: &str) -> FxHashMap<String, AuthPreference> {
    match serde_json::from_str::<FxHashMap<String, AuthPreference>>(raw) {
        Ok(saved) => saved
            .into_iter()
            .map(|(url, pref)| (normalize_relay_url(&url), pref))
            .collect(),
        Err(e) => {
            warn!(key = %key, "Ignoring unreadable auth preferences: {}", e);
            FxHashMap::default()
        }
    }
}
