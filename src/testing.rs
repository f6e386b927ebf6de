//! Fakes for the relay and signer seams. `MockRelay` fans every change out to
//! its subscribers, in call order.

use crate::relays::{Relay, RelaySignal, Signer};
use crate::types::{RelayError, SignerError};
use async_trait::async_trait;
use futures::channel::mpsc;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

pub(crate) struct MockSigner {
    pubkey: String,
}

impl MockSigner {
    pub(crate) fn new(pubkey: &str) -> Rc<dyn Signer> {
        Rc::new(Self {
            pubkey: pubkey.to_string(),
        })
    }
}

#[async_trait(?Send)]
impl Signer for MockSigner {
    fn public_key(&self) -> Result<String, SignerError> {
        Ok(self.pubkey.clone())
    }

    async fn sign_auth(&self, relay_url: &str, challenge: &str) -> Result<String, SignerError> {
        Ok(format!("{}:{}:{}", self.pubkey, relay_url, challenge))
    }
}

pub(crate) struct MockRelay {
    url: String,
    connected: Cell<bool>,
    challenge: RefCell<Option<String>>,
    authenticated: Cell<bool>,
    listeners: RefCell<Vec<mpsc::UnboundedSender<RelaySignal>>>,
    /// Public keys of the signers passed to `authenticate`
    auth_calls: RefCell<Vec<String>>,
    /// Signed payloads produced during `authenticate`
    signed: RefCell<Vec<String>>,
    fail_with: RefCell<Option<String>>,
    delay: RefCell<Option<Duration>>,
}

impl MockRelay {
    pub(crate) fn new(url: &str) -> Rc<Self> {
        Rc::new(Self {
            url: url.to_string(),
            connected: Cell::new(false),
            challenge: RefCell::new(None),
            authenticated: Cell::new(false),
            listeners: RefCell::new(Vec::new()),
            auth_calls: RefCell::new(Vec::new()),
            signed: RefCell::new(Vec::new()),
            fail_with: RefCell::new(None),
            delay: RefCell::new(None),
        })
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.set(connected);
        self.emit(RelaySignal::Connectivity(connected));
    }

    pub(crate) fn send_challenge(&self, challenge: &str) {
        *self.challenge.borrow_mut() = Some(challenge.to_string());
        self.emit(RelaySignal::Challenge(Some(challenge.to_string())));
    }

    pub(crate) fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.set(authenticated);
        self.emit(RelaySignal::Authenticated(authenticated));
    }

    fn emit(&self, signal: RelaySignal) {
        self.listeners
            .borrow_mut()
            .retain(|tx| tx.unbounded_send(signal.clone()).is_ok());
    }

    pub(crate) fn fail_next_auth(&self, reason: &str) {
        *self.fail_with.borrow_mut() = Some(reason.to_string());
    }

    pub(crate) fn set_auth_delay(&self, delay: Duration) {
        *self.delay.borrow_mut() = Some(delay);
    }

    pub(crate) fn auth_calls(&self) -> Vec<String> {
        self.auth_calls.borrow().clone()
    }

    pub(crate) fn signed(&self) -> Vec<String> {
        self.signed.borrow().clone()
    }
}

#[async_trait(?Send)]
impl Relay for MockRelay {
    fn url(&self) -> &str {
        &self.url
    }

    fn is_connected(&self) -> bool {
        self.connected.get()
    }

    fn current_challenge(&self) -> Option<String> {
        self.challenge.borrow().clone()
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.get()
    }

    fn signals(&self) -> mpsc::UnboundedReceiver<RelaySignal> {
        let (tx, rx) = mpsc::unbounded();
        self.listeners.borrow_mut().push(tx);
        rx
    }

    async fn authenticate(&self, signer: Rc<dyn Signer>) -> Result<(), RelayError> {
        self.auth_calls.borrow_mut().push(signer.public_key()?);

        let delay = *self.delay.borrow();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self.fail_with.borrow_mut().take();
        if let Some(reason) = failure {
            return Err(RelayError::Rejected(reason));
        }

        let challenge = self.current_challenge().unwrap_or_default();
        let signed = signer.sign_auth(&self.url, &challenge).await?;
        self.signed.borrow_mut().push(signed);
        Ok(())
    }
}

/// Lets spawned local tasks run until they are all parked again.
pub(crate) async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
