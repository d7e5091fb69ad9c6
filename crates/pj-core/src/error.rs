//! Error taxonomy shared across the podjump crates
//!
//! Cluster lookup errors live in `pj-kube` and tunnel RPC errors in
//! `pj-tunnel`; this module holds the errors the top-level command boundary
//! needs to inspect for exit-code decisions.

use thiserror::Error;

/// Workspace lock errors
#[derive(Error, Debug)]
pub enum LockError {
    /// Another process held the lock for the whole acquisition window
    #[error(
        "timed out waiting to lock workspace {name}: another process on this machine is holding it"
    )]
    Timeout { name: String },

    /// The caller was cancelled while waiting for the lock
    #[error("interrupted while waiting for workspace lock")]
    Interrupted,

    /// Lock file could not be created or locked
    #[error("workspace lock I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level session errors the command boundary maps to process exit codes
#[derive(Error, Debug)]
pub enum JumpError {
    /// Lock acquisition failed before any remote resource was touched
    #[error("lock workspace: {0}")]
    Lock(#[from] LockError),

    /// The SSH handshake over the exec bridge never completed
    #[error("ssh handshake over exec bridge failed: {message}")]
    TransportHandshake { message: String },

    /// The credential tunnel never answered the initial ping
    #[error("credential tunnel handshake failed: {message}")]
    ServiceHandshake { message: String },

    /// The remote shell exited with a non-zero status; mirrored as our own
    /// exit status rather than reported as a crash
    #[error("remote shell exited with status {status}")]
    RemoteShell { status: u32 },

    /// A background stage of an established session failed
    #[error("failed to {stage}: {message}")]
    Stage {
        stage: &'static str,
        message: String,
    },

    /// The local transport failed before any remote exit status existed
    #[error("local I/O error: {0}")]
    LocalIo(#[from] std::io::Error),
}
