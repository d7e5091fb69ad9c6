//! Tunnel error types

use thiserror::Error;

use pj_protocol::error::ProtocolError;

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("tunnel protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("tunnel closed")]
    Closed,

    #[error("remote side error: {0}")]
    Remote(String),

    #[error("unexpected response to {0}")]
    UnexpectedResponse(&'static str),

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
