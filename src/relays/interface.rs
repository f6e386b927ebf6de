use crate::types::{RelayError, SignerError};
use async_trait::async_trait;
use futures::channel::mpsc;
use std::rc::Rc;
use tokio::sync::watch;

/// Current signer, or `None` while no signer is usable.
pub type SignerFeed = watch::Receiver<Option<Rc<dyn Signer>>>;

/// Signer defines the capability used to answer relay challenges.
/// The coordinator only checks that one is present and hands it to the relay.
#[async_trait(?Send)]
pub trait Signer {
    /// Returns the public key for this signer
    fn public_key(&self) -> Result<String, SignerError>;

    /// Signs a kind 22242 auth event for `relay_url` over `challenge` and
    /// returns the serialized event.
    async fn sign_auth(&self, relay_url: &str, challenge: &str) -> Result<String, SignerError>;
}

/// A change on one of a relay's three feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelaySignal {
    /// Socket opened or closed
    Connectivity(bool),
    /// AUTH challenge received, or cleared by the relay
    Challenge(Option<String>),
    /// Relay accepted (or forgot) our AUTH event
    Authenticated(bool),
}

/// A relay connection as seen by the coordinator.
///
/// The accessors return the current values. `signals` yields every later
/// change on any of the three feeds, in the order it happened; nothing is
/// coalesced, so a drop and reconnect arrives as two signals.
#[async_trait(?Send)]
pub trait Relay {
    fn url(&self) -> &str;

    /// Whether the socket is currently open
    fn is_connected(&self) -> bool;

    /// Latest AUTH challenge received from the relay
    fn current_challenge(&self) -> Option<String>;

    /// Whether the relay accepted our AUTH event
    fn is_authenticated(&self) -> bool;

    /// Subscribes to the relay's signals. The stream ends when the relay
    /// goes away.
    fn signals(&self) -> mpsc::UnboundedReceiver<RelaySignal>;

    /// Answers the current challenge with `signer`. Resolves once the auth
    /// event has been sent; acceptance arrives as `RelaySignal::Authenticated`.
    async fn authenticate(&self, signer: Rc<dyn Signer>) -> Result<(), RelayError>;
}
