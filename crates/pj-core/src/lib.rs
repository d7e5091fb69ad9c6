//! pj-core: Core abstractions for podjump
//!
//! Shared building blocks used by the jump controller and the in-container
//! helper commands: the per-workspace file lock, the virtual pipe transport,
//! git credential/user types, and the common error taxonomy.

pub mod config;
pub mod error;
pub mod git;
pub mod lock;
pub mod pipes;

pub use error::{JumpError, LockError};
pub use lock::WorkspaceLock;
pub use pipes::{stdio_stream, virtual_pipe_pair, DuplexPipe, VirtualConn};

/// Where the helper binary is expected inside the target container.
///
/// The pod-exec bridge launches `<REMOTE_HELPER_PATH> ssh-server` and the
/// jump controller launches `<REMOTE_HELPER_PATH> helper credentials-server`
/// through the established SSH client.
pub const REMOTE_HELPER_PATH: &str = "/usr/local/bin/podjump";

/// Process exit code used when the local transport fails before any remote
/// exit status exists.
pub const EXIT_CODE_IO: i32 = 64;
