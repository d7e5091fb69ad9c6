//! pj-protocol: Wire protocol for the podjump credential tunnel
//!
//! Defines the framed RPC protocol carried over the second virtual pipe pair
//! between the operator's machine and the in-container helper process.

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{Frame, FrameCodec, MAX_FRAME_SIZE};
pub use error::ProtocolError;
pub use message::{FramePayload, LogLevel, TunnelRequest, TunnelResponse};
