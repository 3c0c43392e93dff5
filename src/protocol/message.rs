//! Framed message type and wire format.
//!
//! Every unit on the wire is one self-delimiting frame:
//!
//! ```text
//! u32 BE   frame length (everything after this prefix)
//! u8       status code
//! u32 LE   auth data length, then auth data bytes
//! u32 LE   payload length, then payload bytes
//! ```

use std::io;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::common::error::CodecError;
use crate::protocol::codec::{get_bytes_max, get_u8, put_bytes};

/// Smallest legal frame: status byte plus two empty length-prefixed fields.
const MIN_FRAME_BYTES: usize = 1 + 4 + 4;

/// Message status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Ordinary data message
    Normal,
    /// Server prompt for credentials, or a client reply carrying them
    AuthRequired,
    /// Credentials accepted
    AuthSuccess,
    /// Credentials rejected or missing
    AuthFailure,
    /// Peer announces it is going away
    Disconnect,
}

impl Status {
    /// Wire representation of this status.
    pub fn as_u8(self) -> u8 {
        match self {
            Status::Normal => 0x00,
            Status::AuthRequired => 0x01,
            Status::AuthSuccess => 0x02,
            Status::AuthFailure => 0x03,
            Status::Disconnect => 0x04,
        }
    }

    /// Parse a wire status byte.
    pub fn from_u8(b: u8) -> Result<Self, CodecError> {
        match b {
            0x00 => Ok(Status::Normal),
            0x01 => Ok(Status::AuthRequired),
            0x02 => Ok(Status::AuthSuccess),
            0x03 => Ok(Status::AuthFailure),
            0x04 => Ok(Status::Disconnect),
            _ => Err(CodecError::Invalid("unknown status code")),
        }
    }
}

/// One framed message: payload bytes, a status code, and optional
/// authentication material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub status: Status,
    pub auth_data: Vec<u8>,
    pub payload: Vec<u8>,
}

impl Message {
    /// Build an ordinary data message.
    pub fn normal(payload: Vec<u8>) -> Self {
        Self::with_status(Status::Normal, payload)
    }

    /// Build a message with an explicit status and no auth material.
    pub fn with_status(status: Status, payload: Vec<u8>) -> Self {
        Self {
            status,
            auth_data: Vec::new(),
            payload,
        }
    }

    /// Serialize into a wire frame.
    pub fn serialize(&self) -> BytesMut {
        let body = 1 + 4 + self.auth_data.len() + 4 + self.payload.len();
        let mut buf = BytesMut::with_capacity(4 + body);

        buf.put_u32(body as u32);
        buf.put_u8(self.status.as_u8());
        put_bytes(&mut buf, &self.auth_data);
        put_bytes(&mut buf, &self.payload);

        buf
    }

    /// Parse one message body (the bytes following the length prefix).
    pub fn parse(mut src: &[u8]) -> Result<Self, CodecError> {
        let frame_len = src.len();
        let status = Status::from_u8(get_u8(&mut src)?)?;
        let auth_data = get_bytes_max(&mut src, frame_len)?;
        let payload = get_bytes_max(&mut src, frame_len)?;

        if !src.is_empty() {
            return Err(CodecError::Invalid("trailing bytes"));
        }

        Ok(Self {
            status,
            auth_data,
            payload,
        })
    }

    /// Read one full framed message from the stream.
    ///
    /// Blocks until a whole frame arrives. Peer close surfaces as
    /// `io::ErrorKind::UnexpectedEof`; a length field above `max_frame_bytes`
    /// or a malformed body is `io::ErrorKind::InvalidData`.
    pub async fn read_from<R: AsyncRead + Unpin>(
        r: &mut R,
        max_frame_bytes: usize,
    ) -> io::Result<Self> {
        let mut head = [0u8; 4];
        r.read_exact(&mut head).await?;
        let len = u32::from_be_bytes(head) as usize;

        if len > max_frame_bytes {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
        }
        if len < MIN_FRAME_BYTES {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too small"));
        }

        let mut body = vec![0u8; len];
        r.read_exact(&mut body).await?;

        Ok(Self::parse(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_parse_roundtrip() {
        let msg = Message {
            status: Status::AuthRequired,
            auth_data: b"s3cr3t".to_vec(),
            payload: vec![0x01, 0x02, 0x03],
        };

        let frame = msg.serialize();
        let body = &frame[4..];
        assert_eq!(Message::parse(body).unwrap(), msg);
    }

    #[test]
    fn test_unknown_status_rejected() {
        let msg = Message::normal(vec![]);
        let mut frame = msg.serialize();
        frame[4] = 0x7F;
        assert!(Message::parse(&frame[4..]).is_err());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut frame = Message::normal(vec![0xAA]).serialize();
        frame.extend_from_slice(&[0x00]);
        assert!(Message::parse(&frame[4..]).is_err());
    }

    #[tokio::test]
    async fn test_read_from_enforces_frame_limit() {
        let frame = Message::normal(vec![0u8; 64]).serialize();
        let mut src: &[u8] = &frame;
        let err = Message::read_from(&mut src, 32).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_read_from_eof_on_closed_stream() {
        let mut src: &[u8] = &[];
        let err = Message::read_from(&mut src, 1024).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
