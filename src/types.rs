//! Types for relay authentication (NIP-42)
//!
//! Status and preference enums, the per-relay state record, the derived
//! pending-challenge view, and the error types shared across the crate.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::time::Instant;

/// Authentication status of a single relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    /// No challenge outstanding
    #[default]
    None,
    /// Relay sent a challenge that is waiting for a decision
    ChallengeReceived,
    /// Authentication attempt in flight
    Authenticating,
    /// Relay confirmed the authentication
    Authenticated,
    /// Last attempt failed
    Failed,
    /// Challenge was declined by the user or by a "never" preference
    Rejected,
}

impl AuthStatus {
    pub const ALL: [AuthStatus; 6] = [
        AuthStatus::None,
        AuthStatus::ChallengeReceived,
        AuthStatus::Authenticating,
        AuthStatus::Authenticated,
        AuthStatus::Failed,
        AuthStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthStatus::None => "none",
            AuthStatus::ChallengeReceived => "challenge_received",
            AuthStatus::Authenticating => "authenticating",
            AuthStatus::Authenticated => "authenticated",
            AuthStatus::Failed => "failed",
            AuthStatus::Rejected => "rejected",
        }
    }

    /// Whether a challenge is still open for this status.
    pub fn is_unresolved(&self) -> bool {
        matches!(
            self,
            AuthStatus::ChallengeReceived | AuthStatus::Authenticating
        )
    }
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-relay policy for incoming challenges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthPreference {
    /// Surface the challenge and wait for the user
    #[default]
    Ask,
    /// Authenticate automatically when a signer is available
    Always,
    /// Decline every challenge
    Never,
}

impl AuthPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthPreference::Ask => "ask",
            AuthPreference::Always => "always",
            AuthPreference::Never => "never",
        }
    }
}

impl fmt::Display for AuthPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication state of one monitored relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayAuthState {
    /// Normalized relay URL
    pub url: String,
    pub status: AuthStatus,
    /// Challenge waiting to be signed, only set while the status is unresolved
    pub challenge: Option<String>,
    /// When the current challenge string was first recorded
    pub challenge_received_at: Option<Instant>,
    pub connected: bool,
}

impl RelayAuthState {
    pub fn new(url: String, connected: bool) -> Self {
        Self {
            url,
            status: AuthStatus::None,
            challenge: None,
            challenge_received_at: None,
            connected,
        }
    }
}

/// Snapshot of every monitored relay, keyed by normalized URL
pub type StateSnapshot = FxHashMap<String, RelayAuthState>;

/// A challenge that should be shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChallenge {
    pub relay_url: String,
    pub challenge: String,
    pub received_at: Instant,
}

/// Errors returned by `RelayAuthManager::authenticate`
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Relay is not monitored: {0}")]
    NotMonitored(String),

    #[error("No pending challenge for relay: {0}")]
    NoChallenge(String),

    #[error("No signer available")]
    NoSigner,

    #[error("Authentication failed for {url}: {source}")]
    Relay {
        url: String,
        #[source]
        source: RelayError,
    },
}

/// Errors produced by a relay while authenticating
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Relay rejected authentication: {0}")]
    Rejected(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Authentication timeout")]
    Timeout,

    #[error("Signer error: {0}")]
    Signer(#[from] SignerError),

    #[error("Other error: {0}")]
    Other(String),
}

/// Error types reported by signer implementations
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("No signer available")]
    NoSigner,

    #[error("Signing request rejected: {0}")]
    Rejected(String),

    #[error("Other error: {0}")]
    Other(String),
}

/// Errors from a key-value storage backend
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage write failed: {0}")]
    Write(String),
}
