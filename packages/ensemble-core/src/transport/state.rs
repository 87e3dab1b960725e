//! Connection state machine.

use serde::Serialize;

/// State of the transport session.
///
/// Normal progress is `Disconnected → Connecting → (Authenticating →
/// Authenticated →) Connected`. `Error` and `Disconnected` are reachable from
/// any state; a new connection attempt may start from either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Authenticating,
    Authenticated,
    Connected,
    Error,
}

impl ConnectionState {
    /// Returns true if moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, next) {
            (_, Disconnected) | (_, Error) => true,
            (Disconnected, Connecting) | (Error, Connecting) => true,
            (Connecting, Authenticating) | (Connecting, Connected) => true,
            (Authenticating, Authenticated) => true,
            (Authenticated, Connected) => true,
            _ => false,
        }
    }

    /// Commands may only be dispatched in these states.
    #[must_use]
    pub fn accepts_commands(self) -> bool {
        matches!(self, Self::Authenticated | Self::Connected)
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;
    use super::*;

    #[test]
    fn forward_path_is_legal() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Authenticating));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Authenticating.can_transition_to(Authenticated));
        assert!(Authenticated.can_transition_to(Connected));
    }

    #[test]
    fn backward_moves_are_rejected() {
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Authenticated.can_transition_to(Authenticating));
        assert!(!Authenticating.can_transition_to(Connected));
        assert!(!Disconnected.can_transition_to(Connected));
    }

    #[test]
    fn error_and_disconnected_reachable_from_anywhere() {
        for state in [
            Disconnected,
            Connecting,
            Authenticating,
            Authenticated,
            Connected,
            Error,
        ] {
            assert!(state.can_transition_to(Error));
            assert!(state.can_transition_to(Disconnected));
        }
        assert!(Error.can_transition_to(Connecting));
    }

    #[test]
    fn only_established_states_accept_commands() {
        assert!(Connected.accepts_commands());
        assert!(Authenticated.accepts_commands());
        assert!(!Authenticating.accepts_commands());
        assert!(!Connecting.accepts_commands());
        assert!(!Error.accepts_commands());
    }
}
