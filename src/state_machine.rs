//! Relay authentication state machine
//!
//! `transition` is a total, pure function over (status, event). Combinations
//! without a rule leave the status unchanged and raise neither hint.

use crate::types::{AuthPreference, AuthStatus};

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// Relay issued a challenge. `preference` is the policy resolved for the relay
    /// at the time the challenge arrived; `None` behaves like "ask".
    ChallengeReceived {
        challenge: String,
        preference: Option<AuthPreference>,
    },
    UserAccepted,
    UserRejected,
    AuthSuccess,
    AuthFailed,
    Disconnected,
}

impl AuthEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AuthEvent::ChallengeReceived { .. } => "CHALLENGE_RECEIVED",
            AuthEvent::UserAccepted => "USER_ACCEPTED",
            AuthEvent::UserRejected => "USER_REJECTED",
            AuthEvent::AuthSuccess => "AUTH_SUCCESS",
            AuthEvent::AuthFailed => "AUTH_FAILED",
            AuthEvent::Disconnected => "DISCONNECTED",
        }
    }
}

/// Result of applying one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub status: AuthStatus,
    /// Caller should authenticate right away, provided a signer is available.
    pub should_auto_auth: bool,
    /// Caller must drop the stored challenge.
    pub clear_challenge: bool,
}

impl Transition {
    fn to(status: AuthStatus) -> Self {
        Self {
            status,
            should_auto_auth: false,
            clear_challenge: false,
        }
    }

    fn clearing(mut self) -> Self {
        self.clear_challenge = true;
        self
    }

    fn auto_auth(mut self) -> Self {
        self.should_auto_auth = true;
        self
    }
}

pub fn transition(status: AuthStatus, event: &AuthEvent) -> Transition {
    match (status, event) {
        (_, AuthEvent::Disconnected) => Transition::to(AuthStatus::None).clearing(),

        // Attempt already in flight.
        (AuthStatus::Authenticating, AuthEvent::ChallengeReceived { .. }) => {
            Transition::to(status)
        }
        (_, AuthEvent::ChallengeReceived { preference, .. }) => on_challenge(*preference),

        (AuthStatus::ChallengeReceived, AuthEvent::UserAccepted) => {
            Transition::to(AuthStatus::Authenticating)
        }
        (AuthStatus::ChallengeReceived, AuthEvent::UserRejected) => {
            Transition::to(AuthStatus::Rejected).clearing()
        }
        // The relay may confirm while a prompt is still open.
        (
            AuthStatus::ChallengeReceived | AuthStatus::Authenticating,
            AuthEvent::AuthSuccess,
        ) => Transition::to(AuthStatus::Authenticated).clearing(),
        (AuthStatus::Authenticating, AuthEvent::AuthFailed) => {
            Transition::to(AuthStatus::Failed).clearing()
        }

        _ => Transition::to(status),
    }
}

fn on_challenge(preference: Option<AuthPreference>) -> Transition {
    match preference.unwrap_or_default() {
        AuthPreference::Always => Transition::to(AuthStatus::Authenticating).auto_auth(),
        AuthPreference::Never => Transition::to(AuthStatus::Rejected).clearing(),
        AuthPreference::Ask => Transition::to(AuthStatus::ChallengeReceived),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge(preference: Option<AuthPreference>) -> AuthEvent {
        AuthEvent::ChallengeReceived {
            challenge: "abc".to_string(),
            preference,
        }
    }

    fn all_events() -> Vec<AuthEvent> {
        vec![
            challenge(None),
            challenge(Some(AuthPreference::Ask)),
            challenge(Some(AuthPreference::Always)),
            challenge(Some(AuthPreference::Never)),
            AuthEvent::UserAccepted,
            AuthEvent::UserRejected,
            AuthEvent::AuthSuccess,
            AuthEvent::AuthFailed,
            AuthEvent::Disconnected,
        ]
    }

    #[test]
    fn test_every_pair_yields_a_valid_transition() {
        for status in AuthStatus::ALL {
            for event in all_events() {
                let t = transition(status, &event);
                assert!(AuthStatus::ALL.contains(&t.status), "{status} / {}", event.name());
                if t.should_auto_auth {
                    assert!(matches!(event, AuthEvent::ChallengeReceived { .. }));
                    assert_eq!(t.status, AuthStatus::Authenticating);
                }
            }
        }
    }

    #[test]
    fn test_disconnect_always_resets_and_clears() {
        for status in AuthStatus::ALL {
            let t = transition(status, &AuthEvent::Disconnected);
            assert_eq!(t.status, AuthStatus::None);
            assert!(t.clear_challenge);
            assert!(!t.should_auto_auth);
        }
    }

    #[test]
    fn test_challenge_from_idle_statuses_follows_preference() {
        for status in [
            AuthStatus::None,
            AuthStatus::Authenticated,
            AuthStatus::Failed,
            AuthStatus::Rejected,
        ] {
            let t = transition(status, &challenge(Some(AuthPreference::Always)));
            assert_eq!(t.status, AuthStatus::Authenticating);
            assert!(t.should_auto_auth);
            assert!(!t.clear_challenge);

            let t = transition(status, &challenge(Some(AuthPreference::Never)));
            assert_eq!(t.status, AuthStatus::Rejected);
            assert!(!t.should_auto_auth);
            assert!(t.clear_challenge);

            for pref in [None, Some(AuthPreference::Ask)] {
                let t = transition(status, &challenge(pref));
                assert_eq!(t.status, AuthStatus::ChallengeReceived);
                assert!(!t.should_auto_auth);
                assert!(!t.clear_challenge);
            }
        }
    }

    #[test]
    fn test_challenge_received_decisions() {
        let s = AuthStatus::ChallengeReceived;

        let t = transition(s, &AuthEvent::UserAccepted);
        assert_eq!(t.status, AuthStatus::Authenticating);
        assert!(!t.clear_challenge);

        let t = transition(s, &AuthEvent::UserRejected);
        assert_eq!(t.status, AuthStatus::Rejected);
        assert!(t.clear_challenge);
    }

    #[test]
    fn test_challenge_received_tolerates_relay_races() {
        let s = AuthStatus::ChallengeReceived;

        let t = transition(s, &AuthEvent::AuthSuccess);
        assert_eq!(t.status, AuthStatus::Authenticated);
        assert!(t.clear_challenge);

        let t = transition(s, &AuthEvent::AuthFailed);
        assert_eq!(t.status, s);
        assert!(!t.clear_challenge);
        assert!(!t.should_auto_auth);
    }

    #[test]
    fn test_authenticating_outcomes() {
        let s = AuthStatus::Authenticating;

        let t = transition(s, &AuthEvent::AuthSuccess);
        assert_eq!(t.status, AuthStatus::Authenticated);
        assert!(t.clear_challenge);

        let t = transition(s, &AuthEvent::AuthFailed);
        assert_eq!(t.status, AuthStatus::Failed);
        assert!(t.clear_challenge);

        for event in [AuthEvent::UserAccepted, challenge(Some(AuthPreference::Always))] {
            let t = transition(s, &event);
            assert_eq!(t.status, s);
            assert!(!t.should_auto_auth);
            assert!(!t.clear_challenge);
        }
    }

    #[test]
    fn test_clear_challenge_only_for_resolving_events() {
        for status in AuthStatus::ALL {
            for event in all_events() {
                let t = transition(status, &event);
                if !t.clear_challenge {
                    continue;
                }
                let expected = match &event {
                    AuthEvent::Disconnected => true,
                    AuthEvent::AuthSuccess | AuthEvent::AuthFailed | AuthEvent::UserRejected => {
                        t.status != status
                    }
                    AuthEvent::ChallengeReceived { preference, .. } => {
                        *preference == Some(AuthPreference::Never)
                    }
                    AuthEvent::UserAccepted => false,
                };
                assert!(expected, "unexpected clear for {status} / {}", event.name());
            }
        }
    }

    #[test]
    fn test_undefined_pairs_are_noops() {
        let cases = [
            (AuthStatus::None, AuthEvent::UserAccepted),
            (AuthStatus::None, AuthEvent::AuthSuccess),
            (AuthStatus::Authenticated, AuthEvent::AuthFailed),
            (AuthStatus::Failed, AuthEvent::UserRejected),
            (AuthStatus::Rejected, AuthEvent::UserAccepted),
        ];
        for (status, event) in cases {
            let t = transition(status, &event);
            assert_eq!(t.status, status);
            assert!(!t.should_auto_auth);
            assert!(!t.clear_challenge);
        }
    }
}
