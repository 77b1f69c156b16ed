//! SQP wire protocol.
//!
//! # Structure
//!
//! - `message`: message types and bodies
//! - `codec`: message encoding/decoding
//! - `frame`: transport frames and async frame I/O
//! - `decoder`: frame reassembly and the LOB raw-payload mode
//! - `types`: common protocol types (DataFormat, TypeCode, ColumnMetadata)

pub mod codec;
pub mod decoder;
pub mod frame;
pub mod message;
pub mod types;

pub use decoder::{DecoderState, FrameDecoder, Inbound, LobPayload};
pub use frame::{Frame, Opcode};
pub use message::{Message, MessageType};
pub use types::{ColumnMetadata, DataFormat, TypeCode};
