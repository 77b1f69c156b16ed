//! Inbound frame decoder.
//!
//! Reassembles continuation frames into complete payloads and decodes them.
//! After a `LobAnnouncement` is decoded, the next complete payload is
//! delivered as raw LOB bytes instead of a structured message.

use crate::error::{Error, ErrorType, Result};

use super::codec::decode_message;
use super::frame::{Frame, Opcode};
use super::message::Message;
use super::types::DataFormat;

/// Raw LOB bytes following an announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobPayload {
    /// Id from the preceding announcement
    pub id: String,
    pub format: DataFormat,
    pub data: Vec<u8>,
}

/// A complete inbound item.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(Message),
    Lob(LobPayload),
}

/// What the next complete payload is.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DecoderState {
    /// A structured message
    #[default]
    Normal,
    /// Raw bytes of the announced LOB
    AwaitingRawPayload { lob_id: String },
}

struct Partial {
    format: DataFormat,
    data: Vec<u8>,
}

/// Decoder for one direction of a connection.
pub struct FrameDecoder {
    state: DecoderState,
    partial: Option<Partial>,
    max_message_size: usize,
}

impl FrameDecoder {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            state: DecoderState::Normal,
            partial: None,
            max_message_size,
        }
    }

    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    /// Whether a message is partially received.
    pub fn has_partial(&self) -> bool {
        self.partial.is_some()
    }

    /// Drop any partial message and leave LOB mode.
    pub fn reset(&mut self) {
        self.state = DecoderState::Normal;
        self.partial = None;
    }

    /// Feed one frame. Returns the decoded item once a FIN frame completes it.
    ///
    /// On error the decoder is reset.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Inbound>> {
        let result = self.push_inner(frame);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn push_inner(&mut self, frame: Frame) -> Result<Option<Inbound>> {
        match (frame.opcode, self.partial.as_mut()) {
            (Opcode::Continuation, None) => {
                return Err(Error::recover(
                    ErrorType::InvalidFrame,
                    "Received a continuation frame without an open message",
                ));
            }
            (Opcode::Continuation, Some(partial)) => {
                if partial.data.len() + frame.payload.len() > self.max_message_size {
                    return Err(too_large(self.max_message_size));
                }
                partial.data.extend_from_slice(&frame.payload);
            }
            (Opcode::Text | Opcode::Binary, Some(_)) => {
                return Err(Error::recover(
                    ErrorType::InvalidFrame,
                    "Received a new message while the previous one is not finished",
                ));
            }
            (Opcode::Text | Opcode::Binary, None) => {
                if frame.payload.len() > self.max_message_size {
                    return Err(too_large(self.max_message_size));
                }
                let format = if frame.opcode == Opcode::Text {
                    DataFormat::Text
                } else {
                    DataFormat::Binary
                };
                self.partial = Some(Partial {
                    format,
                    data: frame.payload,
                });
            }
        }

        if !frame.fin {
            return Ok(None);
        }
        let Some(Partial { format, data }) = self.partial.take() else {
            return Ok(None);
        };

        match std::mem::take(&mut self.state) {
            DecoderState::AwaitingRawPayload { lob_id } => {
                if format == DataFormat::Text && simdutf8::basic::from_utf8(&data).is_err() {
                    return Err(Error::recover(
                        ErrorType::DecodingError,
                        format!("Character LOB '{}' is not valid UTF-8", lob_id),
                    ));
                }
                Ok(Some(Inbound::Lob(LobPayload {
                    id: lob_id,
                    format,
                    data,
                })))
            }
            DecoderState::Normal => {
                let message = decode_message(format, &data)?;
                if let Message::LobAnnouncement(announcement) = &message {
                    self.state = DecoderState::AwaitingRawPayload {
                        lob_id: announcement.id.clone(),
                    };
                }
                Ok(Some(Inbound::Message(message)))
            }
        }
    }
}

fn too_large(limit: usize) -> Error {
    Error::abort(
        ErrorType::InvalidFrame,
        format!("Message exceeds the limit of {} bytes", limit),
    )
}
