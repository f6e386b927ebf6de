//! Relay collaborators
//!
//! The coordinator does not speak the relay protocol. It consumes relays
//! through the `Relay` trait, which exposes its three feeds as one ordered
//! signal stream plus an `authenticate` capability, and signers through the `Signer` trait.
//!
//! - `interface`: the `Relay` and `Signer` seams
//! - `pool`: a registry of relays that notifies listeners on add/remove

pub mod interface;
pub mod pool;

pub use interface::{Relay, RelaySignal, Signer, SignerFeed};
pub use pool::{PoolEvent, RelayPool};

/// Utility functions for relay URLs
pub mod utils {
    /// Normalize relay URL (trim, lowercase, remove trailing slash)
    pub fn normalize_relay_url(url: &str) -> String {
        let mut normalized = url.trim().to_lowercase();
        if normalized.ends_with('/') && normalized.len() > 1 {
            normalized.pop();
        }
        normalized
    }
}
