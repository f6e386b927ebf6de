use crate::preferences::KeyValueStorage;
use crate::relays::Relay;
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use std::time::Duration;

pub const DEFAULT_STORAGE_KEY: &str = "nostr-relay-auth-preferences";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Storage key holding the JSON preference map
    pub storage_key: String,
    pub challenge_ttl: u64,         // milliseconds
    pub expiry_check_interval: u64, // milliseconds, 0 disables the periodic check
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            challenge_ttl: 5 * 60 * 1000,
            expiry_check_interval: 10_000,
        }
    }
}

impl AuthConfig {
    pub fn challenge_ttl(&self) -> Duration {
        Duration::from_millis(self.challenge_ttl)
    }

    pub fn expiry_check_interval(&self) -> Option<Duration> {
        (self.expiry_check_interval > 0).then(|| Duration::from_millis(self.expiry_check_interval))
    }
}

/// Everything `RelayAuthManager::new` accepts besides the signer feed.
#[derive(Default)]
pub struct ManagerOptions {
    pub config: AuthConfig,
    /// Without storage, preferences only live for the manager's lifetime.
    pub storage: Option<Rc<dyn KeyValueStorage>>,
    /// Relays monitored right after construction
    pub initial_relays: Vec<Rc<dyn Relay>>,
}
