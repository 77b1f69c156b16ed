//! Client protocol engine (sans-I/O).
//!
//! Routes inbound items to the FIFO of response handlers and tracks the
//! connection state. A recoverable error puts the connection into
//! [`ConnectionState::Error`]; the failed handler is only notified once the
//! proxy's `Ready` arrives, so the caller observes a connection that can
//! send again.

use std::collections::VecDeque;

use tracing::{debug, trace, warn};

use crate::error::{Error, ErrorAction, ErrorType, Result};
use crate::protocol::decoder::Inbound;
use crate::protocol::message::Message;
use crate::state::connection::ConnectionState;

use super::handler::{Handled, ResponseHandler};

/// Whether the transport should stay open after an inbound item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

pub struct Dispatcher {
    state: ConnectionState,
    handlers: VecDeque<Box<dyn ResponseHandler>>,
    /// Handler failed by a recoverable error, notified on `Ready`
    failing: Option<(Box<dyn ResponseHandler>, Error)>,
    /// Error nobody was waiting for; fails the next operation
    pending_error: Option<Error>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Uninitialized,
            handlers: VecDeque::new(),
            failing: None,
            pending_error: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Number of handlers waiting for a reply.
    pub fn in_flight(&self) -> usize {
        self.handlers.len()
    }

    /// Transport opened, waiting for the first `Ready`.
    pub fn start(&mut self) {
        if self.state == ConnectionState::Uninitialized {
            self.state = ConnectionState::Connecting;
        }
    }

    /// Check that a new operation may be sent.
    pub fn check_ready(&mut self) -> Result<()> {
        if let Some(error) = self.pending_error.take() {
            return Err(error);
        }
        match self.state {
            ConnectionState::Closed => Err(Error::ConnectionClosed),
            state if state.can_send() => Ok(()),
            state => Err(Error::InvalidUsage(state.description().to_string())),
        }
    }

    /// Register the handler of an operation that was just sent.
    pub fn push(&mut self, handler: Box<dyn ResponseHandler>) {
        if self.state == ConnectionState::Closed {
            handler.fail(Error::ConnectionClosed);
            return;
        }
        self.handlers.push_back(handler);
    }

    pub fn on_inbound(&mut self, inbound: Inbound) -> Flow {
        if self.state == ConnectionState::Closed {
            return Flow::Close;
        }
        match inbound {
            Inbound::Message(Message::Error(error)) => self.on_error(Error::Server(error)),
            Inbound::Message(Message::Ready) => {
                self.on_ready();
                Flow::Continue
            }
            Inbound::Message(message) => {
                trace!(message = %message.message_type(), "client: received");
                let Some(head) = self.handlers.front_mut() else {
                    self.unsolicited(format!(
                        "Unexpected {} without a pending request",
                        message.message_type()
                    ));
                    return Flow::Continue;
                };
                let handled = head.handle(message);
                self.after_handle(handled)
            }
            Inbound::Lob(payload) => {
                let Some(head) = self.handlers.front_mut() else {
                    self.unsolicited(format!("Unexpected LOB payload for '{}'", payload.id));
                    return Flow::Continue;
                };
                let handled = head.handle_lob(payload);
                self.after_handle(handled)
            }
        }
    }

    /// Tear down: every waiting handler fails with a copy of `error`.
    pub fn close(&mut self, error: Error) {
        if self.state == ConnectionState::Closed {
            return;
        }
        debug!(error = %error, in_flight = self.handlers.len(), "client: closing");
        self.state = ConnectionState::Closed;
        if let Some((handler, failure)) = self.failing.take() {
            handler.fail(failure);
        }
        while let Some(handler) = self.handlers.pop_front() {
            handler.fail(error.duplicate());
        }
    }

    fn after_handle(&mut self, handled: Result<Handled>) -> Flow {
        match handled {
            Ok(Handled::Continue) => Flow::Continue,
            Ok(Handled::Complete) => {
                self.handlers.pop_front();
                Flow::Continue
            }
            Err(error) => {
                warn!(error = %error, "client: protocol violation");
                if let Some(head) = self.handlers.pop_front() {
                    head.fail(error.duplicate());
                }
                self.close(error);
                Flow::Close
            }
        }
    }

    fn on_error(&mut self, error: Error) -> Flow {
        if error.action() == ErrorAction::Abort {
            if let Some(head) = self.handlers.pop_front() {
                head.fail(error.duplicate());
            }
            self.close(error);
            return Flow::Close;
        }
        debug!(error = %error, "client: recoverable error");
        self.state = ConnectionState::Error;
        if let Some((handler, previous)) = self.failing.take() {
            handler.fail(previous);
        }
        match self.handlers.pop_front() {
            Some(head) => self.failing = Some((head, error)),
            None => self.pending_error = Some(error),
        }
        Flow::Continue
    }

    fn on_ready(&mut self) {
        if self.state == ConnectionState::Error {
            self.state = ConnectionState::ReadyToSend;
            if let Some((handler, error)) = self.failing.take() {
                handler.fail(error);
            }
            return;
        }
        if self.handlers.front().is_some_and(|head| head.expects_ready()) {
            self.state = ConnectionState::ReadyToSend;
            let handled = self
                .handlers
                .front_mut()
                .map(|head| head.handle(Message::Ready));
            if let Some(handled) = handled {
                self.after_handle(handled);
            }
            return;
        }
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::ReadyToSend;
        }
    }

    fn unsolicited(&mut self, message: String) {
        warn!(%message, "client: unsolicited message");
        self.pending_error = Some(Error::recover(ErrorType::UnexpectedMessage, message));
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::client::handler::{ExecuteHandler, ExecuteOutcome, confirmation};
    use crate::error::ServerError;
    use crate::protocol::message::{ExecuteComplete, MessageType, RowData};

    fn server_error(action: ErrorAction) -> Inbound {
        Inbound::Message(Message::Error(ServerError {
            error_type: ErrorType::ExecutionFailed,
            message: "boom".into(),
            action,
        }))
    }

    fn connected() -> Dispatcher {
        let mut dispatcher = Dispatcher::new();
        dispatcher.start();
        let (hello, _rx) = confirmation(MessageType::Ready);
        dispatcher.push(Box::new(hello));
        dispatcher.on_inbound(Inbound::Message(Message::Ready));
        assert_eq!(dispatcher.state(), ConnectionState::ReadyToSend);
        dispatcher
    }

    #[test]
    fn replies_resolve_in_send_order() {
        let mut dispatcher = connected();
        let (first, mut first_rx) = ExecuteHandler::new(false);
        let (second, mut second_rx) = confirmation(MessageType::PrepareComplete);
        dispatcher.push(Box::new(first));
        dispatcher.push(Box::new(second));

        dispatcher.on_inbound(Inbound::Message(Message::ExecuteComplete(ExecuteComplete {
            affected_rows: 2,
        })));
        assert_eq!(first_rx.try_recv().unwrap().unwrap(), ExecuteOutcome::Update(2));
        assert!(second_rx.try_recv().is_err());

        dispatcher.on_inbound(Inbound::Message(Message::PrepareComplete));
        assert!(second_rx.try_recv().unwrap().is_ok());
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[test]
    fn recoverable_error_fails_head_on_ready() {
        let mut dispatcher = connected();
        let (first, mut first_rx) = confirmation(MessageType::PrepareComplete);
        let (second, mut second_rx) = confirmation(MessageType::PrepareComplete);
        dispatcher.push(Box::new(first));
        dispatcher.push(Box::new(second));

        assert_eq!(dispatcher.on_inbound(server_error(ErrorAction::Recover)), Flow::Continue);
        assert_eq!(dispatcher.state(), ConnectionState::Error);
        assert!(dispatcher.check_ready().is_err());
        assert!(first_rx.try_recv().is_err());

        dispatcher.on_inbound(Inbound::Message(Message::Ready));
        assert_eq!(dispatcher.state(), ConnectionState::ReadyToSend);
        let err = first_rx.try_recv().unwrap().unwrap_err();
        assert_eq!(err.message(), "boom");

        dispatcher.on_inbound(Inbound::Message(Message::PrepareComplete));
        assert!(second_rx.try_recv().unwrap().is_ok());
    }

    #[test]
    fn abort_fails_everything() {
        let mut dispatcher = connected();
        let (first, mut first_rx) = confirmation(MessageType::PrepareComplete);
        let (second, mut second_rx) = confirmation(MessageType::ReleaseComplete);
        dispatcher.push(Box::new(first));
        dispatcher.push(Box::new(second));

        assert_eq!(dispatcher.on_inbound(server_error(ErrorAction::Abort)), Flow::Close);
        assert_eq!(dispatcher.state(), ConnectionState::Closed);
        assert!(first_rx.try_recv().unwrap().is_err());
        assert!(second_rx.try_recv().unwrap().unwrap_err().is_connection_broken());
        assert!(matches!(dispatcher.check_ready(), Err(Error::ConnectionClosed)));
    }

    #[test]
    fn unsolicited_message_fails_next_operation() {
        let mut dispatcher = connected();
        dispatcher.on_inbound(Inbound::Message(Message::RowData(RowData {
            data: vec![json!(1)],
        })));
        let err = dispatcher.check_ready().unwrap_err();
        assert_eq!(err.error_type(), ErrorType::UnexpectedMessage);
        assert!(dispatcher.check_ready().is_ok());
    }

    #[test]
    fn handler_protocol_violation_aborts() {
        let mut dispatcher = connected();
        let (handler, mut rx) = confirmation(MessageType::PrepareComplete);
        dispatcher.push(Box::new(handler));
        let flow = dispatcher.on_inbound(Inbound::Message(Message::SetFeatureComplete));
        assert_eq!(flow, Flow::Close);
        assert!(rx.try_recv().unwrap().is_err());
    }

    #[test]
    fn close_fails_pending_handlers() {
        let mut dispatcher = connected();
        let (handler, mut rx) = confirmation(MessageType::ReleaseComplete);
        dispatcher.push(Box::new(handler));
        dispatcher.close(Error::ConnectionClosed);
        assert!(matches!(rx.try_recv().unwrap(), Err(Error::ConnectionClosed)));

        let (late, mut late_rx) = confirmation(MessageType::ReleaseComplete);
        dispatcher.push(Box::new(late));
        assert!(matches!(late_rx.try_recv().unwrap(), Err(Error::ConnectionClosed)));
    }
}
