//! NIP-42 relay authentication coordinator
//!
//! Tracks many relays at once and decides, per relay, what to do with the
//! AUTH challenges they send:
//!
//! - `state_machine`: pure (status, event) -> (status, hints) function
//! - `preferences`: per-relay always/never/ask policy, persisted as JSON
//! - `pending`: derivation of the challenges waiting for the user
//! - `manager`: `RelayAuthManager`, which monitors relays and drives the above
//! - `relays`: the `Relay`/`Signer` seams and a `RelayPool` registry
//!
//! The wire protocol, signing and storage backends live outside this crate.

pub mod config;
pub mod manager;
pub mod pending;
pub mod preferences;
pub mod relays;
pub mod state_machine;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{AuthConfig, ManagerOptions, DEFAULT_STORAGE_KEY};
pub use manager::RelayAuthManager;
pub use preferences::{KeyValueStorage, MemoryStorage, PreferenceStore};
pub use relays::{PoolEvent, Relay, RelayPool, RelaySignal, Signer, SignerFeed};
pub use state_machine::{transition, AuthEvent, Transition};
pub use types::{
    AuthError, AuthPreference, AuthStatus, PendingChallenge, RelayAuthState, RelayError,
    SignerError, StateSnapshot, StorageError,
};
