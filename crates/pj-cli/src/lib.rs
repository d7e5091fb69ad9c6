//! podjump: open an interactive shell in a container running in a
//! Kubernetes pod
//!
//! The same binary plays every role. On the operator's machine `connect`
//! resolves the target pod, opens an exec stream, and runs an SSH client
//! over it. Inside the container the binary is invoked as `ssh-server` (the
//! in-container SSH endpoint the exec stream talks to) and as `helper`
//! subcommands (the credential tunnel client and the git credential helper).

pub mod agent;
pub mod commands;
pub mod jump;
pub mod session;
pub mod sshd;
