//! Tunnel RPC message definitions
//!
//! The tunnel surface is deliberately small: a liveness probe, a git identity
//! lookup, a credential fill, and a leveled log forwarder. Both sides speak
//! the same frame type; requests flow from the container helper to the
//! operator side and responses flow back.

use serde::{Deserialize, Serialize};

/// Severity of a forwarded log message.
///
/// `Done` renders like `Info` but marks a completed step, mirroring the
/// operator-facing log vocabulary the remote helper uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Done,
    Warning,
    Error,
}

impl LogLevel {
    /// Numeric severity used for level filtering and the fatal threshold.
    /// Higher is more severe. `Done` carries informational severity.
    pub fn severity(self) -> u8 {
        match self {
            LogLevel::Debug => 0,
            LogLevel::Info | LogLevel::Done => 1,
            LogLevel::Warning => 2,
            LogLevel::Error => 3,
        }
    }

    /// Whether a message at `self` passes a filter configured at `filter`.
    pub fn passes(self, filter: LogLevel) -> bool {
        self.severity() >= filter.severity()
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Done => "done",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// Calls the container-side helper issues against the operator side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TunnelRequest {
    /// Liveness probe; must round-trip before any other traffic
    Ping,
    /// Fetch the operator's configured git identity
    GitUser,
    /// Fill a git credential request; payload is the JSON-encoded credentials
    GitCredentials { payload: String },
    /// Forward a log line to be rendered on the operator's terminal
    Log { level: LogLevel, message: String },
}

/// Responses from the operator side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TunnelResponse {
    /// Answer to `Ping`
    Pong,
    /// JSON-encoded git user identity
    GitUser { message: String },
    /// JSON-encoded filled credentials
    GitCredentials { payload: String },
    /// Acknowledgement with no payload (e.g. for `Log`)
    Ok,
    /// The operator side could not serve the request
    Error { message: String },
}

/// Direction discriminator so either side can act as server on the same codec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FramePayload {
    Request(TunnelRequest),
    Response(TunnelResponse),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(LogLevel::Debug.severity() < LogLevel::Info.severity());
        assert!(LogLevel::Info.severity() < LogLevel::Warning.severity());
        assert!(LogLevel::Warning.severity() < LogLevel::Error.severity());
        // Done is informational, not a distinct severity step
        assert_eq!(LogLevel::Done.severity(), LogLevel::Info.severity());
    }

    #[test]
    fn passes_respects_filter() {
        assert!(LogLevel::Error.passes(LogLevel::Info));
        assert!(LogLevel::Info.passes(LogLevel::Info));
        assert!(!LogLevel::Debug.passes(LogLevel::Info));
        assert!(LogLevel::Done.passes(LogLevel::Info));
        assert!(!LogLevel::Done.passes(LogLevel::Warning));
    }
}
