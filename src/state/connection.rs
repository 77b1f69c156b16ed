//! Client connection state.

/// State of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Transport not yet opened
    #[default]
    Uninitialized,
    /// Waiting for the first `Ready`
    Connecting,
    /// Operations may be sent
    ReadyToSend,
    /// An error was reported and the peer has not signaled `Ready` since
    Error,
    /// Closed, every operation fails
    Closed,
}

impl ConnectionState {
    pub fn description(self) -> &'static str {
        match self {
            ConnectionState::Uninitialized => "The connection is not initialized.",
            ConnectionState::Connecting => "The connection is being established.",
            ConnectionState::ReadyToSend => "The connection is ready.",
            ConnectionState::Error => "An error occurred and the server did not recover yet.",
            ConnectionState::Closed => "The connection is closed.",
        }
    }

    /// Whether a new operation may be sent.
    pub fn can_send(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::ReadyToSend
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_open_states_send() {
        assert!(ConnectionState::Connecting.can_send());
        assert!(ConnectionState::ReadyToSend.can_send());
        assert!(!ConnectionState::Error.can_send());
        assert!(!ConnectionState::Closed.can_send());
        assert!(!ConnectionState::Uninitialized.can_send());
    }
}
