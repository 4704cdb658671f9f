//! Connection state machine.
//!
//! ## State Transitions
//!
//! ```text
//! Disconnected -> Connecting      (transport open, handshake sent)
//! Connecting -> Authenticating    (server answered the handshake)
//! Connecting -> Idle              (HTTP: nothing to exchange up front)
//! Authenticating -> Idle          (ReadyForCommand)
//! Idle -> Executing               (command batch sent)
//! Executing -> Idle               (ReadyForCommand, including after a server error)
//! any -> Disconnected             (transport failure, fatal error, timeout, close)
//! ```
//!
//! A connection released to the pool in any state but `Idle` or
//! `Disconnected` was abandoned mid-command and is discarded.

use std::fmt;

/// Protocol state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No transport.
    #[default]
    Disconnected,
    /// Opening the transport and exchanging the handshake.
    Connecting,
    /// Exchanging credentials.
    Authenticating,
    /// Ready for a command.
    Idle,
    /// A command batch is in flight.
    Executing,
}

impl ConnectionState {
    /// Whether a command can be issued without connecting first.
    #[must_use]
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Whether the connection is between a request and its final reply.
    #[must_use]
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Connecting | Self::Authenticating | Self::Executing)
    }

    /// Whether `next` is a legal successor of this state.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (_, Disconnected)
                | (Disconnected, Connecting)
                | (Connecting, Authenticating)
                | (Connecting, Idle)
                | (Authenticating, Idle)
                | (Idle, Executing)
                | (Executing, Idle)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Idle => "idle",
            Self::Executing => "executing",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        use ConnectionState::*;
        let path = [Disconnected, Connecting, Authenticating, Idle, Executing, Idle];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(Executing.can_transition_to(Disconnected));
        assert!(!Disconnected.can_transition_to(Idle));
        assert!(Connecting.can_transition_to(Idle));
        assert!(!Connecting.can_transition_to(Executing));
    }

    #[test]
    fn test_usable_and_busy() {
        assert!(ConnectionState::Idle.is_usable());
        assert!(!ConnectionState::Executing.is_usable());
        assert!(ConnectionState::Executing.is_busy());
        assert!(!ConnectionState::Disconnected.is_busy());
    }
}
