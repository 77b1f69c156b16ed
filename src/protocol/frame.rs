//! Transport frames.
//!
//! A frame is a [`FrameHeader`] followed by `len` payload bytes. A message
//! starts with a text or binary frame and may continue in continuation
//! frames; the FIN flag marks its last frame.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zerocopy::{FromBytes, IntoBytes};

use crate::error::{Error, ErrorType, Result};

use super::types::{DataFormat, FrameHeader, U32BE};

const FIN: u8 = 0x80;
const OPCODE_MASK: u8 = 0x0f;
const HEADER_LEN: usize = size_of::<FrameHeader>();

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
}

impl Opcode {
    fn to_bits(self) -> u8 {
        match self {
            Opcode::Continuation => 0,
            Opcode::Text => 1,
            Opcode::Binary => 2,
        }
    }

    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Opcode::Continuation),
            1 => Some(Opcode::Text),
            2 => Some(Opcode::Binary),
            _ => None,
        }
    }

    /// Opcode starting a message in the given format.
    pub fn for_format(format: DataFormat) -> Self {
        match format {
            DataFormat::Text => Opcode::Text,
            DataFormat::Binary => Opcode::Binary,
        }
    }
}

/// One transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: Opcode,
    pub fin: bool,
    pub payload: Vec<u8>,
}

impl Frame {
    /// A single-frame message.
    pub fn whole(format: DataFormat, payload: Vec<u8>) -> Self {
        Self {
            opcode: Opcode::for_format(format),
            fin: true,
            payload,
        }
    }

    /// Split a payload into frames of at most `max_frame_size` bytes.
    ///
    /// An empty payload still produces one (empty) frame.
    pub fn split(format: DataFormat, payload: &[u8], max_frame_size: usize) -> Vec<Frame> {
        let size = max_frame_size.max(1);
        if payload.len() <= size {
            return vec![Frame::whole(format, payload.to_vec())];
        }
        let chunks: Vec<&[u8]> = payload.chunks(size).collect();
        let last = chunks.len() - 1;
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| Frame {
                opcode: if i == 0 {
                    Opcode::for_format(format)
                } else {
                    Opcode::Continuation
                },
                fin: i == last,
                payload: chunk.to_vec(),
            })
            .collect()
    }

    /// Append the wire form of this frame to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        let len = u32::try_from(self.payload.len()).map_err(|_| {
            Error::recover(ErrorType::InvalidFrame, "Frame payload exceeds 4 GiB")
        })?;
        let header = FrameHeader {
            flags: self.opcode.to_bits() | if self.fin { FIN } else { 0 },
            len: U32BE::new(len),
        };
        buf.extend_from_slice(header.as_bytes());
        buf.extend_from_slice(&self.payload);
        Ok(())
    }
}

/// Read one frame. Returns `Ok(None)` on a clean end of stream before a header.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_size: usize,
) -> Result<Option<Frame>> {
    let mut header_buf = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let header = FrameHeader::read_from_bytes(&header_buf).map_err(|e| {
        Error::recover(ErrorType::InvalidFrame, format!("Bad frame header: {e:?}"))
    })?;
    let opcode = Opcode::from_bits(header.flags & OPCODE_MASK).ok_or_else(|| {
        Error::abort(
            ErrorType::InvalidFrame,
            format!("Unknown frame opcode {}", header.flags & OPCODE_MASK),
        )
    })?;
    let len = header.len.get() as usize;
    if len > max_frame_size {
        return Err(Error::abort(
            ErrorType::InvalidFrame,
            format!("Frame of {} bytes exceeds the limit of {}", len, max_frame_size),
        ));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(Frame {
        opcode,
        fin: header.flags & FIN != 0,
        payload,
    }))
}

/// Write frames and flush.
pub async fn write_frames<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frames: &[Frame],
    buf: &mut Vec<u8>,
) -> Result<()> {
    buf.clear();
    for frame in frames {
        frame.encode(buf)?;
    }
    writer.write_all(buf).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_marks_continuations() {
        let frames = Frame::split(DataFormat::Binary, b"abcdefg", 3);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].opcode, Opcode::Binary);
        assert!(!frames[0].fin);
        assert_eq!(frames[1].opcode, Opcode::Continuation);
        assert_eq!(frames[2].payload, b"g");
        assert!(frames[2].fin);
    }

    #[test]
    fn split_empty_payload() {
        let frames = Frame::split(DataFormat::Text, b"", 16);
        assert_eq!(frames, vec![Frame::whole(DataFormat::Text, Vec::new())]);
    }

    #[tokio::test]
    async fn write_then_read() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let frames = Frame::split(DataFormat::Text, b"hello world", 4);
        let mut buf = Vec::new();
        write_frames(&mut a, &frames, &mut buf).await.unwrap();
        drop(a);

        let mut read = Vec::new();
        while let Some(frame) = read_frame(&mut b, 64).await.unwrap() {
            read.push(frame);
        }
        assert_eq!(read, frames);
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let mut buf = Vec::new();
        write_frames(&mut a, &[Frame::whole(DataFormat::Binary, vec![0; 32])], &mut buf)
            .await
            .unwrap();
        let err = read_frame(&mut b, 16).await.unwrap_err();
        assert!(err.is_connection_broken());
    }
}
