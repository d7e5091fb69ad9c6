//! Tokio codec for framed tunnel messages
//!
//! Frames are a 4-byte big-endian length prefix followed by a bincode-encoded
//! [`Frame`]. The codec is transport-agnostic: it runs equally over a virtual
//! pipe pair or a process's stdio.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::message::{FramePayload, TunnelRequest, TunnelResponse};

/// Length prefix size in bytes
const LENGTH_PREFIX_SIZE: usize = 4;

/// Maximum encoded frame payload size.
///
/// Credential payloads and log lines are tiny; anything near this bound
/// indicates a corrupted stream rather than a legitimate message.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// A single tunnel RPC frame
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Frame {
    /// Correlates a response with its request
    pub id: u64,
    /// The message payload
    pub payload: FramePayload,
}

impl Frame {
    pub fn request(id: u64, request: TunnelRequest) -> Self {
        Self {
            id,
            payload: FramePayload::Request(request),
        }
    }

    pub fn response(id: u64, response: TunnelResponse) -> Self {
        Self {
            id,
            payload: FramePayload::Response(response),
        }
    }
}

/// Codec for encoding/decoding tunnel frames
#[derive(Debug, Default)]
pub struct FrameCodec {
    _private: (),
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let mut length_bytes = [0u8; LENGTH_PREFIX_SIZE];
        length_bytes.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
        let payload_len = u32::from_be_bytes(length_bytes) as usize;

        if payload_len > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: MAX_FRAME_SIZE,
            });
        }

        if src.len() < LENGTH_PREFIX_SIZE + payload_len {
            // Reserve for the rest of the frame and wait for more data
            src.reserve(LENGTH_PREFIX_SIZE + payload_len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let payload_bytes = src.split_to(payload_len).freeze();

        let frame: Frame = bincode::deserialize(&payload_bytes)?;
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = bincode::serialize(&frame)?;

        if payload.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::LogLevel;

    #[test]
    fn codec_roundtrip_request() {
        let mut codec = FrameCodec::new();

        let frame = Frame::request(
            7,
            TunnelRequest::Log {
                level: LogLevel::Info,
                message: "configuring git credentials".to_string(),
            },
        );

        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn codec_roundtrip_response() {
        let mut codec = FrameCodec::new();

        let frame = Frame::response(
            42,
            TunnelResponse::GitUser {
                message: r#"{"name":"R","email":"a@b"}"#.to_string(),
            },
        );

        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.id, 42);
        assert_eq!(decoded, frame);
    }

    #[test]
    fn codec_partial_read() {
        let mut codec = FrameCodec::new();

        let frame = Frame::request(1, TunnelRequest::Ping);

        let mut full_buf = BytesMut::new();
        codec.encode(frame.clone(), &mut full_buf).unwrap();

        // Feed in the length prefix minus one byte
        let mut partial = full_buf.split_to(LENGTH_PREFIX_SIZE - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        // Feed in the rest
        partial.extend_from_slice(&full_buf);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn codec_rejects_oversized_frame() {
        let mut codec = FrameCodec::new();

        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);
        buf.extend_from_slice(&[0u8; 16]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn codec_back_to_back_frames() {
        let mut codec = FrameCodec::new();

        let first = Frame::request(1, TunnelRequest::Ping);
        let second = Frame::response(1, TunnelResponse::Pong);

        let mut buf = BytesMut::new();
        codec.encode(first.clone(), &mut buf).unwrap();
        codec.encode(second.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), first);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), second);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
