//! Credential tunnel for podjump
//!
//! The tunnel carries a small RPC surface between the operator's machine and
//! the helper running inside the container: a liveness probe, a git identity
//! lookup, credential fills, and leveled log forwarding. The same framed
//! codec runs over an in-process pipe pair on the operator side and over
//! stdio inside the container.
//!
//! - [`client`]: the requesting end, used by the in-container helper
//! - [`server`]: the serving end, run on the operator's machine
//! - [`logger`]: the leveled logger abstraction both ends share
//! - [`http`]: the localhost endpoint the git credential helper calls

pub mod client;
pub mod error;
pub mod http;
pub mod logger;
pub mod server;

pub use client::{connect, TunnelHandle};
pub use error::TunnelError;
pub use http::{port_available, run_credentials_server, DEFAULT_CREDENTIALS_PORT};
pub use logger::{ConsoleLogger, JumpLogger, LogWriter, TunnelLogger};
pub use server::{CredentialsOverride, ServiceOptions, TunnelService};
