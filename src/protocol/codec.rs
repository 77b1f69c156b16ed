//! Message encoding and decoding.
//!
//! A message is its type id byte followed, for types with content, by the
//! JSON body. The frame opcode declares the format; text payloads must be
//! valid UTF-8.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, ErrorType, Result};

use super::message::{Message, MessageType};
use super::types::DataFormat;

/// Append the encoded message to `buf`.
pub fn encode_message(message: &Message, buf: &mut Vec<u8>) -> Result<()> {
    buf.push(message.message_type().id());
    match message {
        Message::Error(body) => write_body(buf, body),
        Message::Hello(body) => write_body(buf, body),
        Message::AuthenticationResponse(body) => write_body(buf, body),
        Message::SimpleQuery(body) => write_body(buf, body),
        Message::PrepareQuery(body) => write_body(buf, body),
        Message::ExecuteQuery(body) => write_body(buf, body),
        Message::ExecuteComplete(body) => write_body(buf, body),
        Message::FetchData(body) => write_body(buf, body),
        Message::CursorDescription(body) => write_body(buf, body),
        Message::RowData(body) => write_body(buf, body),
        Message::EndOfData(body) => write_body(buf, body),
        Message::Release(body) => write_body(buf, body),
        Message::SetFeature(body) => write_body(buf, body),
        Message::InformationRequest(body) => write_body(buf, body),
        Message::InformationResponse(body) => write_body(buf, body),
        Message::TypeMapping(body) => write_body(buf, body),
        Message::TypeMappingRegistered(body) => write_body(buf, body),
        Message::LobAnnouncement(body) => write_body(buf, body),
        Message::LobRequest(body) => write_body(buf, body),
        Message::Close
        | Message::Ready
        | Message::PrepareComplete
        | Message::ReleaseComplete
        | Message::SetFeatureComplete
        | Message::Commit
        | Message::Rollback
        | Message::TransactionFinished
        | Message::LobReceived => Ok(()),
    }
}

/// Encode a message into a fresh buffer.
pub fn encode_to_vec(message: &Message) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode_message(message, &mut buf)?;
    Ok(buf)
}

fn write_body<T: Serialize>(buf: &mut Vec<u8>, body: &T) -> Result<()> {
    serde_json::to_writer(buf, body)?;
    Ok(())
}

/// Decode a complete message payload.
pub fn decode_message(format: DataFormat, data: &[u8]) -> Result<Message> {
    let Some((&id, body)) = data.split_first() else {
        return Err(Error::recover(
            ErrorType::InvalidFrame,
            "Received an empty message",
        ));
    };
    if format == DataFormat::Text && simdutf8::basic::from_utf8(body).is_err() {
        return Err(Error::recover(
            ErrorType::DecodingError,
            "Text message is not valid UTF-8",
        ));
    }
    let ty = MessageType::from_id(id).ok_or_else(|| {
        Error::recover(
            ErrorType::DecodingError,
            format!("Unknown message type id '{}'", id.escape_ascii()),
        )
    })?;

    let message = match ty {
        MessageType::Error => Message::Error(read_body(ty, body)?),
        MessageType::Close => Message::Close,
        MessageType::Ready => Message::Ready,
        MessageType::Hello => Message::Hello(read_body(ty, body)?),
        MessageType::AuthenticationResponse => {
            Message::AuthenticationResponse(read_body(ty, body)?)
        }
        MessageType::SimpleQuery => Message::SimpleQuery(read_body(ty, body)?),
        MessageType::PrepareQuery => Message::PrepareQuery(read_body(ty, body)?),
        MessageType::PrepareComplete => Message::PrepareComplete,
        MessageType::ExecuteQuery => Message::ExecuteQuery(read_body(ty, body)?),
        MessageType::ExecuteComplete => Message::ExecuteComplete(read_body(ty, body)?),
        MessageType::FetchData => Message::FetchData(read_body(ty, body)?),
        MessageType::CursorDescription => Message::CursorDescription(read_body(ty, body)?),
        MessageType::RowData => Message::RowData(read_body(ty, body)?),
        MessageType::EndOfData => Message::EndOfData(read_body(ty, body)?),
        MessageType::Release => Message::Release(read_body(ty, body)?),
        MessageType::ReleaseComplete => Message::ReleaseComplete,
        MessageType::SetFeature => Message::SetFeature(read_body(ty, body)?),
        MessageType::SetFeatureComplete => Message::SetFeatureComplete,
        MessageType::Commit => Message::Commit,
        MessageType::Rollback => Message::Rollback,
        MessageType::TransactionFinished => Message::TransactionFinished,
        MessageType::InformationRequest => Message::InformationRequest(read_body(ty, body)?),
        MessageType::InformationResponse => Message::InformationResponse(read_body(ty, body)?),
        MessageType::TypeMapping => Message::TypeMapping(read_body(ty, body)?),
        MessageType::TypeMappingRegistered => {
            Message::TypeMappingRegistered(read_body(ty, body)?)
        }
        MessageType::LobAnnouncement => Message::LobAnnouncement(read_body(ty, body)?),
        MessageType::LobReceived => Message::LobReceived,
        MessageType::LobRequest => Message::LobRequest(read_body(ty, body)?),
    };
    Ok(message)
}

fn read_body<T: DeserializeOwned>(ty: MessageType, body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| {
        Error::recover(
            ErrorType::DecodingError,
            format!("Failed to decode {} message: {}", ty, e),
        )
    })
}
