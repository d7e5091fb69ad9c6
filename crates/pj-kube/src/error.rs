//! Cluster error types
//!
//! Every cluster API failure is a typed error returned up the call chain;
//! only the top-level command boundary decides which ones end the process.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClusterError {
    /// The named service does not exist
    #[error("service {service} not found in namespace {namespace}")]
    TargetNotFound { namespace: String, service: String },

    /// The target workload is not in a running state, so a bridge attempt
    /// would be wasted
    #[error("service {service} in namespace {namespace} is not running")]
    TargetNotRunning { namespace: String, service: String },

    /// The service selector matched no pods
    #[error("no pods match the selector of service {service} in namespace {namespace}")]
    NoPodsForService { namespace: String, service: String },

    /// The service has no selector to resolve pods from
    #[error("service {service} has no selector; pass an explicit pod name")]
    MissingSelector { service: String },

    /// The exec stream did not expose an expected channel
    #[error("exec stream is missing its {0} channel")]
    MissingStream(&'static str),

    /// Any other cluster API failure, wrapping the cause
    #[error("cluster API error: {0}")]
    Api(#[from] kube::Error),

    /// The exec stream ended abnormally
    #[error("exec stream error: {0}")]
    Stream(String),

    /// Local side of the bridge failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
