//! pj-kube: Cluster lookup and pod-exec bridge
//!
//! Resolves a service name to a live pod and bridges a pod-exec byte stream
//! to local duplex pipe ends so an SSH client can run on top of it.

pub mod client;
pub mod error;
pub mod exec;

pub use client::{ClusterClient, ClusterTarget, ServiceStatus};
pub use error::ClusterError;
pub use exec::remote_server_command;
