//! Pending challenge derivation
//!
//! The list is rebuilt from scratch on every input change instead of being
//! patched incrementally. Expiry depends on `now`, so callers re-derive on a
//! timer and on read.

use crate::preferences::PreferenceStore;
use crate::types::{AuthPreference, AuthStatus, PendingChallenge, StateSnapshot};
use rustc_hash::FxHashSet;
use std::time::Duration;
use tokio::time::Instant;

pub struct PendingInputs<'a> {
    pub states: &'a StateSnapshot,
    pub preferences: &'a PreferenceStore,
    pub session_rejections: &'a FxHashSet<String>,
    pub signer_available: bool,
    pub now: Instant,
    pub ttl: Duration,
}

/// Relays whose challenge should be surfaced to the user, oldest first.
pub fn derive_pending_challenges(inputs: &PendingInputs<'_>) -> Vec<PendingChallenge> {
    if !inputs.signer_available {
        return Vec::new();
    }

    let mut pending: Vec<PendingChallenge> = inputs
        .states
        .values()
        .filter(|state| state.connected && state.status == AuthStatus::ChallengeReceived)
        .filter(|state| inputs.preferences.get(&state.url) != AuthPreference::Never)
        .filter(|state| !inputs.session_rejections.contains(&state.url))
        .filter_map(|state| {
            let challenge = state.challenge.clone()?;
            let received_at = state.challenge_received_at?;
            let age = inputs.now.saturating_duration_since(received_at);
            (age < inputs.ttl).then(|| PendingChallenge {
                relay_url: state.url.clone(),
                challenge,
                received_at,
            })
        })
        .collect();

    pending.sort_by(|a, b| {
        a.received_at
            .cmp(&b.received_at)
            .then_with(|| a.relay_url.cmp(&b.relay_url))
    });
    pending
}
