//! Proxy session controller.
//!
//! A sans-I/O state machine per client connection. Inbound items are
//! queued and processed in arrival order whenever the current state allows
//! it; backend work is requested through [`Effect::Dispatch`] and its
//! outcome comes back through [`Session::complete`]. Entering `Ready` drains
//! the queue before anything new is accepted.

use std::collections::{HashMap, VecDeque};

use tracing::{info, trace, warn};

use crate::backend::{FeatureSetting, InformationResult};
use crate::error::{Error, ErrorAction, ErrorType, Result};
use crate::protocol::decoder::{Inbound, LobPayload};
use crate::protocol::message::{
    EndOfData, ExecuteComplete, ExecuteQuery, LobAnnouncement, LobRequest, Message, RowData,
    SetFeature, TypeMappingRegistered,
};
use crate::protocol::types::{DataFormat, InformationSubject};
use crate::state::action::{BackendRequest, Completion, Effect};
use crate::state::session::{Disposition, InboundKind, SessionState};

use super::info::{CustomType, TypeCatalog};
use super::params::decode_parameters;

/// Transaction mode of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    AutoCommit,
    NoActiveTransaction,
    Committed,
    Aborted,
}

/// Queued input with the format it arrived in. Replies use that format.
enum Queued {
    Item(Inbound, DataFormat),
    /// A frame that could not be decoded, reported in arrival order
    Failure(Error, DataFormat),
}

/// Context of the operation in flight.
enum Pending {
    Feature { auto_commit: Option<bool> },
    Mapping { name: String, custom: CustomType },
    Transaction { commit: bool },
    Information { subject: InformationSubject, detail: Option<String> },
    Lob { id: String },
}

pub struct Session {
    state: SessionState,
    mode: TransactionMode,
    queue: VecDeque<Queued>,
    lobs: HashMap<String, LobPayload>,
    catalog: TypeCatalog,
    pending: Option<Pending>,
    /// Format of the item being answered
    reply_format: DataFormat,
    effects: VecDeque<Effect>,
}

fn non_negative<T: TryFrom<i64>>(value: i64) -> Option<T> {
    T::try_from(value).ok()
}

impl Session {
    pub fn new(catalog: TypeCatalog) -> Self {
        Self {
            state: SessionState::Uninitialized,
            mode: TransactionMode::AutoCommit,
            queue: VecDeque::new(),
            lobs: HashMap::new(),
            catalog,
            pending: None,
            reply_format: DataFormat::Text,
            effects: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transaction_mode(&self) -> TransactionMode {
        self.mode
    }

    /// Number of queued inbound items.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Ids of the LOBs received and not yet consumed.
    pub fn lob_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.lobs.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_dead(&self) -> bool {
        self.state == SessionState::Dead
    }

    /// Next effect to perform.
    pub fn next_effect(&mut self) -> Option<Effect> {
        self.effects.pop_front()
    }

    /// Accept a decoded inbound item that arrived in `format`.
    pub fn receive(&mut self, inbound: Inbound, format: DataFormat) {
        self.queue.push_back(Queued::Item(inbound, format));
        self.drain();
    }

    /// Report a frame that could not be decoded.
    pub fn decode_failed(&mut self, error: Error, format: DataFormat) {
        self.queue.push_back(Queued::Failure(error, format));
        self.drain();
    }

    /// Outcome of an [`Effect::Connect`].
    pub fn connected(&mut self, result: Result<()>) {
        if self.state != SessionState::Connecting {
            return;
        }
        match result {
            Ok(()) => {
                self.send(Message::Ready);
                self.transition(SessionState::Ready);
            }
            Err(e) => self.raise(e),
        }
        self.drain();
    }

    /// Outcome of an [`Effect::Dispatch`].
    pub fn complete(&mut self, result: Result<Completion>) {
        let state = self.state;
        if !state.is_busy() {
            self.raise(Error::abort(
                ErrorType::InvalidState,
                format!("Received a backend result in state {:?}", state),
            ));
            return;
        }
        if state == (SessionState::Executing { simple: false }) {
            self.lobs.clear();
        }
        let pending = self.pending.take();
        let outcome = result.and_then(|completion| self.finish(state, pending, completion));
        match outcome {
            Ok(()) => self.transition(SessionState::Ready),
            Err(e) => self.raise(e),
        }
        self.drain();
    }

    /// The client transport ended.
    pub fn client_closed(&mut self) {
        if matches!(self.state, SessionState::Closing | SessionState::Dead) {
            return;
        }
        self.transition(SessionState::Dead);
        self.queue.clear();
        self.effects.push_back(Effect::Close);
    }

    /// The backend connection went away.
    pub fn backend_disconnected(&mut self, reason: &str) {
        self.raise(Error::abort(ErrorType::BackendDisconnected, reason));
    }

    fn transition(&mut self, next: SessionState) {
        trace!(from = ?self.state, to = ?next, "session: transition");
        self.state = next;
    }

    fn send(&mut self, message: Message) {
        self.effects.push_back(Effect::Send(message, self.reply_format));
    }

    fn dispatch(&mut self, next: SessionState, request: BackendRequest) {
        self.transition(next);
        self.effects.push_back(Effect::Dispatch(request));
    }

    fn drain(&mut self) {
        while let Some(head) = self.queue.front() {
            if self.state == SessionState::Dead {
                self.queue.clear();
                return;
            }
            let disposition = match head {
                Queued::Item(inbound, _) => self.state.disposition(InboundKind::from(inbound)),
                Queued::Failure(..) if self.state.is_blocking() => Disposition::Defer,
                Queued::Failure(..) => Disposition::Process,
            };
            match disposition {
                Disposition::Defer => {
                    trace!(state = ?self.state, queued = self.queue.len(), "session: deferred");
                    return;
                }
                Disposition::Process => {
                    if let Some(item) = self.queue.pop_front() {
                        self.process(item);
                    }
                }
                Disposition::Reject(action) => {
                    if let Some(Queued::Item(inbound, format)) = self.queue.pop_front() {
                        self.reply_format = format;
                        let error = self.unexpected(InboundKind::from(&inbound), action);
                        self.raise(error);
                    }
                }
            }
        }
    }

    fn unexpected(&self, kind: InboundKind, action: ErrorAction) -> Error {
        let allowed: Vec<String> = self
            .state
            .processable()
            .iter()
            .map(ToString::to_string)
            .collect();
        Error::new(
            ErrorType::UnexpectedMessage,
            action,
            format!(
                "Cannot process {} in state {:?}; expected one of [{}]",
                kind,
                self.state,
                allowed.join(", ")
            ),
        )
    }

    /// Report an error to the client and recover or abort.
    fn raise(&mut self, error: Error) {
        let error = if self.state.is_established() || error.action() == ErrorAction::Abort {
            error
        } else {
            error.with_action(ErrorAction::Abort)
        };
        self.send(Message::Error(error.to_server_error()));
        match error.action() {
            ErrorAction::Recover => {
                info!(state = ?self.state, error = %error, "session: recovering");
                self.pending = None;
                self.send(Message::Ready);
                self.transition(SessionState::Ready);
            }
            ErrorAction::Abort => {
                warn!(state = ?self.state, error = %error, "session: aborting");
                self.transition(SessionState::Dead);
                self.pending = None;
                self.queue.clear();
                self.lobs.clear();
                self.effects.push_back(Effect::Close);
            }
        }
    }

    fn process(&mut self, item: Queued) {
        match item {
            Queued::Failure(error, format) => {
                self.reply_format = format;
                self.raise(error);
            }
            Queued::Item(Inbound::Lob(payload), format) => {
                self.reply_format = format;
                trace!(id = %payload.id, len = payload.data.len(), "session: LOB received");
                self.lobs.insert(payload.id.clone(), payload);
                self.send(Message::LobReceived);
                self.transition(SessionState::Ready);
            }
            Queued::Item(Inbound::Message(message), format) => {
                self.reply_format = format;
                self.process_message(message);
            }
        }
    }

    fn process_message(&mut self, message: Message) {
        match message {
            Message::Hello(hello) => {
                self.transition(SessionState::Authenticating);
                self.transition(SessionState::Connecting);
                self.effects.push_back(Effect::Connect {
                    database: hello.database,
                });
            }
            Message::AuthenticationResponse(_) => self.raise(Error::abort(
                ErrorType::NotImplemented,
                "Authentication is not implemented",
            )),
            Message::Close => {
                self.transition(SessionState::Closing);
                self.effects.push_back(Effect::Close);
            }
            Message::SimpleQuery(query) => self.dispatch(
                SessionState::Executing { simple: true },
                BackendRequest::SimpleQuery {
                    sql: query.query,
                    cursor_id: query.cursor_id,
                    scrollable: query.scrollable,
                    max_fetch: non_negative(query.max_fetch),
                },
            ),
            Message::PrepareQuery(prepare) => self.dispatch(
                SessionState::Preparing,
                BackendRequest::Prepare {
                    statement_id: prepare.id,
                    sql: prepare.query,
                },
            ),
            Message::ExecuteQuery(query) => self.execute(query),
            Message::FetchData(fetch) => self.dispatch(
                SessionState::Fetching,
                BackendRequest::Fetch {
                    cursor_id: fetch.cursor_id,
                    position: non_negative(fetch.position),
                    count: non_negative(fetch.max_fetch),
                    forward: fetch.forward,
                },
            ),
            Message::Release(release) => self.dispatch(
                SessionState::Releasing,
                BackendRequest::Release {
                    cursors: release.cursors,
                    statements: release.statements,
                },
            ),
            Message::SetFeature(feature) => self.set_feature(feature),
            Message::Commit => self.finish_transaction(true),
            Message::Rollback => self.finish_transaction(false),
            Message::InformationRequest(request) => match self.catalog.answer(&request) {
                Ok(Some(response)) => self.send(Message::InformationResponse(response)),
                Ok(None) => {
                    self.pending = Some(Pending::Information {
                        subject: request.subject,
                        detail: request.detail.clone(),
                    });
                    self.dispatch(
                        SessionState::RequestingInformation,
                        BackendRequest::Information {
                            subject: request.subject,
                            detail: request.detail,
                        },
                    );
                }
                Err(e) => self.raise(e),
            },
            Message::TypeMapping(mapping) => match self.catalog.match_type(&mapping) {
                Ok(custom) => {
                    let native = custom.native().to_string();
                    self.pending = Some(Pending::Mapping {
                        name: mapping.name,
                        custom,
                    });
                    self.dispatch(
                        SessionState::RegisteringTypeMapping,
                        BackendRequest::SetFeatures(vec![FeatureSetting::AllowNativeTypes(vec![
                            native,
                        ])]),
                    );
                }
                Err(e) => self.raise(e),
            },
            Message::LobAnnouncement(announcement) => {
                trace!(id = %announcement.id, size = announcement.size, "session: LOB announced");
                self.transition(SessionState::WaitingForLob);
            }
            Message::LobRequest(request) => self.get_lob(request),
            other => {
                let error =
                    self.unexpected(InboundKind::Message(other.message_type()), ErrorAction::Recover);
                self.raise(error);
            }
        }
    }

    fn execute(&mut self, query: ExecuteQuery) {
        let parameters = match decode_parameters(&query, &self.lobs, &self.catalog) {
            Ok(parameters) => parameters,
            Err(e) => {
                self.lobs.clear();
                self.raise(e);
                return;
            }
        };
        self.dispatch(
            SessionState::Executing { simple: false },
            BackendRequest::Execute {
                statement_id: query.statement_id,
                cursor_id: query.cursor_id,
                scrollable: query.scrollable,
                parameters,
            },
        );
    }

    fn set_feature(&mut self, feature: SetFeature) {
        let mut settings = Vec::new();
        if let Some(auto_commit) = feature.auto_commit {
            settings.push(FeatureSetting::AutoCommit(auto_commit));
        }
        if let Some(types) = feature.allowed_native_types {
            settings.push(FeatureSetting::AllowNativeTypes(types));
        }
        if settings.is_empty() {
            self.send(Message::SetFeatureComplete);
            return;
        }
        self.pending = Some(Pending::Feature {
            auto_commit: feature.auto_commit,
        });
        self.dispatch(
            SessionState::SettingFeature,
            BackendRequest::SetFeatures(settings),
        );
    }

    fn finish_transaction(&mut self, commit: bool) {
        if self.mode == TransactionMode::AutoCommit {
            let verb = if commit { "commit" } else { "roll back" };
            self.raise(Error::recover(
                ErrorType::InvalidOperation,
                format!("Cannot {} while auto-commit is enabled", verb),
            ));
            return;
        }
        self.pending = Some(Pending::Transaction { commit });
        let request = if commit {
            BackendRequest::Commit
        } else {
            BackendRequest::Rollback
        };
        self.dispatch(SessionState::FinishingTransaction, request);
    }

    fn get_lob(&mut self, request: LobRequest) {
        self.pending = Some(Pending::Lob {
            id: request.id.clone(),
        });
        self.dispatch(
            SessionState::GettingLob,
            BackendRequest::GetLob {
                id: request.id,
                offset: non_negative(request.offset).unwrap_or(0),
                length: non_negative(request.size),
            },
        );
    }

    /// Reply to a successful backend result.
    fn finish(
        &mut self,
        state: SessionState,
        pending: Option<Pending>,
        completion: Completion,
    ) -> Result<()> {
        match (state, completion, pending) {
            (SessionState::Executing { .. }, Completion::Update(affected_rows), _) => {
                self.send(Message::ExecuteComplete(ExecuteComplete { affected_rows }));
            }
            (SessionState::Executing { simple: false }, Completion::CursorOpened(description), _) => {
                self.send(Message::CursorDescription(description));
            }
            (
                SessionState::Executing { simple: true },
                Completion::Query {
                    description,
                    rows,
                    more,
                },
                _,
            ) => {
                self.send(Message::CursorDescription(description));
                self.send_rows(rows, more);
            }
            (SessionState::Fetching, Completion::Fetched { rows, more }, _) => {
                self.send_rows(rows, more);
            }
            (SessionState::Preparing, Completion::Prepared, _) => {
                self.send(Message::PrepareComplete);
            }
            (SessionState::Releasing, Completion::Released, _) => {
                self.send(Message::ReleaseComplete);
            }
            (
                SessionState::SettingFeature,
                Completion::FeaturesSet,
                Some(Pending::Feature { auto_commit }),
            ) => {
                match auto_commit {
                    Some(true) => self.mode = TransactionMode::AutoCommit,
                    Some(false) => self.mode = TransactionMode::NoActiveTransaction,
                    None => {}
                }
                self.send(Message::SetFeatureComplete);
            }
            (
                SessionState::RegisteringTypeMapping,
                Completion::FeaturesSet,
                Some(Pending::Mapping { name, custom }),
            ) => {
                let native = custom.native().to_string();
                self.catalog.register(&name, custom);
                self.send(Message::TypeMappingRegistered(TypeMappingRegistered {
                    native,
                }));
            }
            (
                SessionState::FinishingTransaction,
                Completion::TransactionFinished,
                Some(Pending::Transaction { commit }),
            ) => {
                self.mode = if commit {
                    TransactionMode::Committed
                } else {
                    TransactionMode::Aborted
                };
                self.send(Message::TransactionFinished);
            }
            (
                SessionState::RequestingInformation,
                Completion::Information(result),
                Some(Pending::Information { subject, detail }),
            ) => {
                let response = match result {
                    InformationResult::Answer(response) => response,
                    InformationResult::Unknown => TypeCatalog::fallback(subject, detail.as_deref()),
                };
                self.send(Message::InformationResponse(response));
            }
            (SessionState::GettingLob, Completion::Lob(chunk), Some(Pending::Lob { id })) => {
                self.send(Message::LobAnnouncement(LobAnnouncement {
                    id: id.clone(),
                    size: chunk.total_size,
                }));
                self.effects.push_back(Effect::SendLob(LobPayload {
                    id,
                    format: chunk.format,
                    data: chunk.data,
                }));
            }
            (state, completion, _) => {
                return Err(Error::abort(
                    ErrorType::InvalidState,
                    format!("Unexpected backend result {:?} in state {:?}", completion, state),
                ));
            }
        }
        Ok(())
    }

    fn send_rows(&mut self, rows: Vec<crate::backend::Row>, more: bool) {
        for data in rows {
            self.send(Message::RowData(RowData { data }));
        }
        self.send(Message::EndOfData(EndOfData { more }));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::backend::{LobChunk, MemoryBackend};
    use crate::protocol::message::{
        FetchData, Hello, InformationRequest, MessageType, PrepareQuery, Release, SimpleQuery,
    };
    use crate::protocol::types::DataFormat;

    fn session() -> Session {
        Session::new(TypeCatalog::new(Arc::new(MemoryBackend::new())))
    }

    fn msg(message: Message) -> Inbound {
        Inbound::Message(message)
    }

    fn effects(session: &mut Session) -> Vec<Effect> {
        std::iter::from_fn(|| session.next_effect()).collect()
    }

    fn sent(effects: &[Effect]) -> Vec<&Message> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Send(m, _) => Some(m),
                _ => None,
            })
            .collect()
    }

    fn ready_session() -> Session {
        let mut s = session();
        s.receive(msg(Message::Hello(Hello {
            database: "db".into(),
        })), DataFormat::Text);
        let fx = effects(&mut s);
        assert!(matches!(&fx[..], [Effect::Connect { database }] if database == "db"));
        s.connected(Ok(()));
        assert!(matches!(&effects(&mut s)[..], [Effect::Send(Message::Ready, _)]));
        s
    }

    fn prepare(id: &str) -> Inbound {
        msg(Message::PrepareQuery(PrepareQuery {
            query: "select 1".into(),
            id: id.into(),
        }))
    }

    fn execute(statement: &str) -> Inbound {
        msg(Message::ExecuteQuery(ExecuteQuery {
            statement_id: statement.into(),
            cursor_id: "c".into(),
            scrollable: false,
            parameter_types: Vec::new(),
            custom_types: Vec::new(),
            parameters: Vec::new(),
        }))
    }

    #[test]
    fn execute_before_hello_aborts() {
        let mut s = session();
        s.receive(execute("s"), DataFormat::Text);
        let fx = effects(&mut s);
        let messages = sent(&fx);
        let Message::Error(error) = messages[0] else {
            panic!("expected an error, got {:?}", messages[0]);
        };
        assert_eq!(error.error_type, ErrorType::UnexpectedMessage);
        assert_eq!(error.action, ErrorAction::Abort);
        assert!(matches!(fx.last(), Some(Effect::Close)));
        assert!(s.is_dead());

        // anything after is dropped
        s.receive(prepare("s"), DataFormat::Text);
        assert!(effects(&mut s).is_empty());
    }

    #[test]
    fn second_operation_waits_for_the_first() {
        let mut s = ready_session();
        s.receive(prepare("s1"), DataFormat::Text);
        s.receive(prepare("s2"), DataFormat::Text);
        let fx = effects(&mut s);
        assert_eq!(fx.len(), 1);
        assert_eq!(s.state(), SessionState::Preparing);
        assert_eq!(s.queued(), 1);

        s.complete(Ok(Completion::Prepared));
        let fx = effects(&mut s);
        assert!(matches!(fx[0], Effect::Send(Message::PrepareComplete, _)));
        assert!(matches!(
            &fx[1],
            Effect::Dispatch(BackendRequest::Prepare { statement_id, .. }) if statement_id == "s2"
        ));
        assert_eq!(s.queued(), 0);
    }

    #[test]
    fn backend_failure_recovers() {
        let mut s = ready_session();
        s.receive(prepare("s1"), DataFormat::Text);
        effects(&mut s);
        s.complete(Err(Error::recover(ErrorType::PrepareFailed, "syntax")));
        let fx = effects(&mut s);
        let messages = sent(&fx);
        assert!(matches!(messages[0], Message::Error(e) if e.message == "syntax"));
        assert!(matches!(messages[1], Message::Ready));
        assert_eq!(s.state(), SessionState::Ready);
    }

    #[test]
    fn ready_rejects_with_recover() {
        let mut s = ready_session();
        s.receive(msg(Message::Hello(Hello {
            database: "db".into(),
        })), DataFormat::Text);
        let fx = effects(&mut s);
        let messages = sent(&fx);
        assert!(matches!(
            messages[0],
            Message::Error(e) if e.error_type == ErrorType::UnexpectedMessage && e.action == ErrorAction::Recover
        ));
        assert_eq!(s.state(), SessionState::Ready);
    }

    #[test]
    fn commit_in_auto_commit_is_invalid() {
        let mut s = ready_session();
        s.receive(msg(Message::Commit), DataFormat::Text);
        let fx = effects(&mut s);
        assert!(matches!(
            sent(&fx)[0],
            Message::Error(e) if e.error_type == ErrorType::InvalidOperation
        ));

        s.receive(msg(Message::SetFeature(SetFeature {
            auto_commit: Some(false),
            allowed_native_types: None,
        })), DataFormat::Text);
        effects(&mut s);
        s.complete(Ok(Completion::FeaturesSet));
        assert_eq!(s.transaction_mode(), TransactionMode::NoActiveTransaction);
        effects(&mut s);

        s.receive(msg(Message::Rollback), DataFormat::Text);
        assert!(matches!(
            &effects(&mut s)[..],
            [Effect::Dispatch(BackendRequest::Rollback)]
        ));
        s.complete(Ok(Completion::TransactionFinished));
        assert_eq!(s.transaction_mode(), TransactionMode::Aborted);
    }

    #[test]
    fn empty_set_feature_completes_immediately() {
        let mut s = ready_session();
        s.receive(msg(Message::SetFeature(SetFeature::default())), DataFormat::Text);
        assert!(matches!(
            &effects(&mut s)[..],
            [Effect::Send(Message::SetFeatureComplete, _)]
        ));
        assert_eq!(s.state(), SessionState::Ready);
    }

    #[test]
    fn lob_upload_then_execute_clears_lobs() {
        let mut s = ready_session();
        s.receive(msg(Message::LobAnnouncement(LobAnnouncement {
            id: "BLOB_1".into(),
            size: 3,
        })), DataFormat::Text);
        assert_eq!(s.state(), SessionState::WaitingForLob);
        s.receive(Inbound::Lob(LobPayload {
            id: "BLOB_1".into(),
            format: DataFormat::Binary,
            data: vec![1, 2, 3],
        }), DataFormat::Text);
        assert!(matches!(
            &effects(&mut s)[..],
            [Effect::Send(Message::LobReceived, _)]
        ));
        assert_eq!(s.lob_ids(), vec!["BLOB_1"]);

        s.receive(msg(Message::ExecuteQuery(ExecuteQuery {
            statement_id: "s".into(),
            cursor_id: "c".into(),
            scrollable: false,
            parameter_types: vec![crate::protocol::types::TypeCode::Blob],
            custom_types: Vec::new(),
            parameters: vec![vec![json!({"id": "BLOB_1", "size": 3})]],
        })), DataFormat::Text);
        effects(&mut s);
        s.complete(Ok(Completion::Update(1)));
        assert!(s.lob_ids().is_empty());
        assert!(matches!(
            &effects(&mut s)[..],
            [Effect::Send(Message::ExecuteComplete(ExecuteComplete { affected_rows: 1 }), _)]
        ));
    }

    #[test]
    fn lob_request_announces_then_sends_payload() {
        let mut s = ready_session();
        s.receive(msg(Message::LobRequest(LobRequest {
            id: "CLOB_1".into(),
            offset: -1,
            size: 4,
        })), DataFormat::Text);
        let fx = effects(&mut s);
        assert!(matches!(
            &fx[..],
            [Effect::Dispatch(BackendRequest::GetLob { offset: 0, length: Some(4), .. })]
        ));
        s.complete(Ok(Completion::Lob(LobChunk {
            format: DataFormat::Text,
            total_size: 10,
            data: b"abcd".to_vec(),
        })));
        let fx = effects(&mut s);
        assert!(matches!(
            &fx[0],
            Effect::Send(Message::LobAnnouncement(a), _) if a.id == "CLOB_1" && a.size == 10
        ));
        assert!(matches!(&fx[1], Effect::SendLob(p) if p.data == b"abcd"));
    }

    #[test]
    fn simple_query_streams_rows() {
        let mut s = ready_session();
        s.receive(msg(Message::SimpleQuery(SimpleQuery {
            query: "q".into(),
            cursor_id: "c".into(),
            scrollable: false,
            max_fetch: 2,
        })), DataFormat::Text);
        assert!(matches!(
            &effects(&mut s)[..],
            [Effect::Dispatch(BackendRequest::SimpleQuery { max_fetch: Some(2), .. })]
        ));
        s.complete(Ok(Completion::Query {
            description: crate::protocol::message::CursorDescription {
                cursor_id: "c".into(),
                scrollable: false,
                columns: Vec::new(),
            },
            rows: vec![vec![json!(1)], vec![json!(2)]],
            more: true,
        }));
        let fx = effects(&mut s);
        let messages = sent(&fx);
        assert_eq!(messages.len(), 4);
        assert!(matches!(messages[3], Message::EndOfData(EndOfData { more: true })));
    }

    #[test]
    fn fetch_negative_values_mean_defaults() {
        let mut s = ready_session();
        s.receive(msg(Message::FetchData(FetchData {
            cursor_id: "c".into(),
            position: -1,
            max_fetch: -1,
            forward: true,
        })), DataFormat::Text);
        assert!(matches!(
            &effects(&mut s)[..],
            [Effect::Dispatch(BackendRequest::Fetch { position: None, count: None, forward: true, .. })]
        ));
    }

    #[test]
    fn information_falls_back_when_backend_does_not_know() {
        let mut s = ready_session();
        s.receive(msg(Message::InformationRequest(InformationRequest {
            subject: InformationSubject::MaxPrecision,
            detail: Some("Integer".into()),
        })), DataFormat::Text);
        effects(&mut s);
        s.complete(Ok(Completion::Information(InformationResult::Unknown)));
        let fx = effects(&mut s);
        assert!(matches!(sent(&fx)[0], Message::InformationResponse(r) if r.value == json!(4)));
    }

    #[test]
    fn mismatched_completion_aborts() {
        let mut s = ready_session();
        s.receive(msg(Message::Release(Release::default())), DataFormat::Text);
        effects(&mut s);
        s.complete(Ok(Completion::Prepared));
        assert!(s.is_dead());
        s.complete(Ok(Completion::Released));
        assert!(s.is_dead());
    }

    #[test]
    fn overloaded_pool_aborts() {
        let mut s = session();
        s.receive(msg(Message::Hello(Hello {
            database: "db".into(),
        })), DataFormat::Text);
        s.receive(prepare("s"), DataFormat::Text);
        effects(&mut s);
        s.connected(Err(Error::abort(ErrorType::OverloadedServer, "full")));
        let fx = effects(&mut s);
        assert!(matches!(
            sent(&fx)[0],
            Message::Error(e) if e.error_type == ErrorType::OverloadedServer
        ));
        assert!(matches!(fx.last(), Some(Effect::Close)));
        assert_eq!(s.queued(), 0);
    }

    #[test]
    fn queued_message_runs_after_connect() {
        let mut s = session();
        s.receive(msg(Message::Hello(Hello {
            database: "db".into(),
        })), DataFormat::Text);
        s.receive(prepare("s"), DataFormat::Text);
        effects(&mut s);
        assert_eq!(s.queued(), 1);
        s.connected(Ok(()));
        let fx = effects(&mut s);
        assert!(matches!(fx[0], Effect::Send(Message::Ready, _)));
        assert!(matches!(fx[1], Effect::Dispatch(BackendRequest::Prepare { .. })));
    }

    #[test]
    fn decode_failure_waits_for_idle() {
        let mut s = ready_session();
        s.receive(prepare("s"), DataFormat::Text);
        s.decode_failed(Error::recover(ErrorType::DecodingError, "garbage"), DataFormat::Text);
        effects(&mut s);
        s.complete(Ok(Completion::Prepared));
        let fx = effects(&mut s);
        let messages = sent(&fx);
        assert!(matches!(messages[0], Message::PrepareComplete));
        assert!(matches!(messages[1], Message::Error(e) if e.error_type == ErrorType::DecodingError));
        assert!(matches!(messages[2], Message::Ready));
    }

    #[test]
    fn second_execute_waits_for_the_first() {
        let mut s = ready_session();
        s.receive(execute("s1"), DataFormat::Text);
        s.receive(execute("s2"), DataFormat::Text);
        let fx = effects(&mut s);
        assert!(matches!(
            &fx[..],
            [Effect::Dispatch(BackendRequest::Execute { statement_id, .. })] if statement_id == "s1"
        ));
        assert_eq!(s.state(), SessionState::Executing { simple: false });
        assert_eq!(s.queued(), 1);

        s.complete(Ok(Completion::Update(2)));
        let fx = effects(&mut s);
        assert!(matches!(
            fx[0],
            Effect::Send(Message::ExecuteComplete(ExecuteComplete { affected_rows: 2 }), _)
        ));
        assert!(matches!(
            &fx[1],
            Effect::Dispatch(BackendRequest::Execute { statement_id, .. }) if statement_id == "s2"
        ));
        assert_eq!(s.queued(), 0);
    }

    #[test]
    fn replies_keep_the_format_of_their_request() {
        let mut s = ready_session();
        s.receive(prepare("s1"), DataFormat::Binary);
        s.receive(msg(Message::Commit), DataFormat::Text);
        effects(&mut s);

        s.complete(Ok(Completion::Prepared));
        let formats: Vec<(MessageType, DataFormat)> = effects(&mut s)
            .iter()
            .filter_map(|e| match e {
                Effect::Send(m, format) => Some((m.message_type(), *format)),
                _ => None,
            })
            .collect();
        assert_eq!(
            formats,
            vec![
                (MessageType::PrepareComplete, DataFormat::Binary),
                (MessageType::Error, DataFormat::Text),
                (MessageType::Ready, DataFormat::Text),
            ]
        );
    }
}
