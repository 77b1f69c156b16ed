//! Proxy session states and their legality table.
//!
//! Each state declares which inbound items it can process and whether it is
//! blocking. A blocking state defers items it cannot process yet; a
//! non-blocking state rejects them with the state's error action.

use crate::error::ErrorAction;
use crate::protocol::decoder::Inbound;
use crate::protocol::message::MessageType;

/// Kind of an inbound item, as seen by the legality table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundKind {
    Message(MessageType),
    /// Raw LOB bytes following an announcement
    LobPayload,
}

impl From<&Inbound> for InboundKind {
    fn from(inbound: &Inbound) -> Self {
        match inbound {
            Inbound::Message(message) => InboundKind::Message(message.message_type()),
            Inbound::Lob(_) => InboundKind::LobPayload,
        }
    }
}

impl std::fmt::Display for InboundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InboundKind::Message(ty) => write!(f, "{}", ty),
            InboundKind::LobPayload => f.write_str("LOB payload"),
        }
    }
}

/// What to do with an inbound item in a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handle it now
    Process,
    /// Leave it queued until the state changes
    Defer,
    /// Drop it and raise an error with this action
    Reject(ErrorAction),
}

/// Proxy session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Authenticating,
    Connecting,
    Ready,
    Executing { simple: bool },
    Preparing,
    Fetching,
    Releasing,
    SettingFeature,
    RequestingInformation,
    RegisteringTypeMapping,
    FinishingTransaction,
    WaitingForLob,
    GettingLob,
    Closing,
    Dead,
}

const UNINITIALIZED: &[InboundKind] = &[
    InboundKind::Message(MessageType::Hello),
    InboundKind::Message(MessageType::Close),
];

const AUTHENTICATING: &[InboundKind] = &[
    InboundKind::Message(MessageType::AuthenticationResponse),
    InboundKind::Message(MessageType::Close),
];

const CONNECTING: &[InboundKind] = &[InboundKind::Message(MessageType::Close)];

const READY: &[InboundKind] = &[
    InboundKind::Message(MessageType::SimpleQuery),
    InboundKind::Message(MessageType::PrepareQuery),
    InboundKind::Message(MessageType::ExecuteQuery),
    InboundKind::Message(MessageType::FetchData),
    InboundKind::Message(MessageType::Release),
    InboundKind::Message(MessageType::SetFeature),
    InboundKind::Message(MessageType::Rollback),
    InboundKind::Message(MessageType::Commit),
    InboundKind::Message(MessageType::InformationRequest),
    InboundKind::Message(MessageType::TypeMapping),
    InboundKind::Message(MessageType::LobAnnouncement),
    InboundKind::Message(MessageType::LobRequest),
    InboundKind::Message(MessageType::Close),
];

const WAITING_FOR_LOB: &[InboundKind] = &[
    InboundKind::LobPayload,
    InboundKind::Message(MessageType::Close),
];

impl SessionState {
    /// Inbound items this state can process.
    pub fn processable(self) -> &'static [InboundKind] {
        match self {
            SessionState::Uninitialized => UNINITIALIZED,
            SessionState::Authenticating => AUTHENTICATING,
            SessionState::Connecting => CONNECTING,
            SessionState::Ready => READY,
            SessionState::WaitingForLob => WAITING_FOR_LOB,
            _ => &[],
        }
    }

    /// Whether unprocessable items are deferred instead of rejected.
    pub fn is_blocking(self) -> bool {
        !matches!(
            self,
            SessionState::Uninitialized
                | SessionState::Authenticating
                | SessionState::Ready
                | SessionState::WaitingForLob
                | SessionState::Dead
        )
    }

    /// Action of errors raised while in this state.
    pub fn error_action(self) -> ErrorAction {
        match self {
            SessionState::Uninitialized
            | SessionState::Authenticating
            | SessionState::Connecting
            | SessionState::Closing
            | SessionState::Dead => ErrorAction::Abort,
            _ => ErrorAction::Recover,
        }
    }

    /// Whether a backend connection is established.
    pub fn is_established(self) -> bool {
        !matches!(
            self,
            SessionState::Uninitialized
                | SessionState::Authenticating
                | SessionState::Connecting
                | SessionState::Closing
                | SessionState::Dead
        )
    }

    /// Whether an operation is in flight.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            SessionState::Executing { .. }
                | SessionState::Preparing
                | SessionState::Fetching
                | SessionState::Releasing
                | SessionState::SettingFeature
                | SessionState::RequestingInformation
                | SessionState::RegisteringTypeMapping
                | SessionState::FinishingTransaction
                | SessionState::GettingLob
        )
    }

    pub fn can_process(self, kind: InboundKind) -> bool {
        self.processable().contains(&kind)
    }

    /// Look up the table entry for `kind` in this state.
    pub fn disposition(self, kind: InboundKind) -> Disposition {
        if self.can_process(kind) {
            Disposition::Process
        } else if self.is_blocking() {
            Disposition::Defer
        } else {
            Disposition::Reject(self.error_action())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const fn msg(ty: MessageType) -> InboundKind {
        InboundKind::Message(ty)
    }

    #[test]
    fn execute_before_hello_is_rejected() {
        assert_eq!(
            SessionState::Uninitialized.disposition(msg(MessageType::ExecuteQuery)),
            Disposition::Reject(ErrorAction::Abort)
        );
        assert_eq!(
            SessionState::Uninitialized.disposition(msg(MessageType::Hello)),
            Disposition::Process
        );
    }

    #[test]
    fn execute_while_executing_is_deferred() {
        let executing = SessionState::Executing { simple: false };
        assert_eq!(
            executing.disposition(msg(MessageType::ExecuteQuery)),
            Disposition::Defer
        );
        assert_eq!(executing.disposition(msg(MessageType::Close)), Disposition::Defer);
    }

    #[test]
    fn ready_rejects_with_recover() {
        assert_eq!(
            SessionState::Ready.disposition(msg(MessageType::Hello)),
            Disposition::Reject(ErrorAction::Recover)
        );
        assert_eq!(
            SessionState::Ready.disposition(msg(MessageType::Ready)),
            Disposition::Reject(ErrorAction::Recover)
        );
        assert_eq!(
            SessionState::Ready.disposition(InboundKind::LobPayload),
            Disposition::Reject(ErrorAction::Recover)
        );
    }

    #[test]
    fn waiting_for_lob_takes_only_payload() {
        let state = SessionState::WaitingForLob;
        assert_eq!(state.disposition(InboundKind::LobPayload), Disposition::Process);
        assert_eq!(
            state.disposition(msg(MessageType::ExecuteQuery)),
            Disposition::Reject(ErrorAction::Recover)
        );
        assert!(!state.is_blocking());
    }

    #[test]
    fn close_is_processed_while_connecting() {
        assert_eq!(
            SessionState::Connecting.disposition(msg(MessageType::Close)),
            Disposition::Process
        );
        assert_eq!(
            SessionState::Connecting.disposition(msg(MessageType::SimpleQuery)),
            Disposition::Defer
        );
    }

    #[test]
    fn busy_states_block_and_recover() {
        let busy = [
            SessionState::Executing { simple: true },
            SessionState::Preparing,
            SessionState::Fetching,
            SessionState::Releasing,
            SessionState::SettingFeature,
            SessionState::RequestingInformation,
            SessionState::RegisteringTypeMapping,
            SessionState::FinishingTransaction,
            SessionState::GettingLob,
        ];
        for state in busy {
            assert!(state.is_busy());
            assert!(state.is_blocking());
            assert!(state.processable().is_empty());
            assert_eq!(state.error_action(), ErrorAction::Recover);
        }
    }

    #[test]
    fn lifecycle_states_abort() {
        for state in [
            SessionState::Uninitialized,
            SessionState::Authenticating,
            SessionState::Connecting,
            SessionState::Closing,
        ] {
            assert_eq!(state.error_action(), ErrorAction::Abort);
            assert!(!state.is_established());
        }
    }
}
