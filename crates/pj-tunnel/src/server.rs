//! Serving end of the credential tunnel
//!
//! Runs on the operator's machine and answers requests from the in-container
//! helper: liveness probes, git identity lookups, credential fills, and
//! forwarded log messages. The first `Ping` marks the tunnel as ready.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use pj_core::git::{self, GitCredentials};
use pj_protocol::{Frame, FrameCodec, FramePayload, LogLevel, TunnelRequest, TunnelResponse};

use crate::error::TunnelError;
use crate::logger::JumpLogger;

/// Static git credentials supplied on the command line, answering every fill
/// without consulting the local credential store
#[derive(Debug, Clone)]
pub struct CredentialsOverride {
    pub username: String,
    pub token: String,
}

/// Behavior knobs for a [`TunnelService`]
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Answer credential fills; when false every fill is refused
    pub forward_credentials: bool,
    /// Answer fills from these fixed credentials instead of the local store
    pub credentials_override: Option<CredentialsOverride>,
    /// Forwarded messages at or above this level terminate the process
    /// after being rendered; `None` disables fatal handling
    pub fatal_level: Option<LogLevel>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            forward_credentials: true,
            credentials_override: None,
            fatal_level: None,
        }
    }
}

/// Whether a forwarded message at `level` crosses the fatal threshold
pub fn is_fatal(level: LogLevel, threshold: Option<LogLevel>) -> bool {
    threshold.is_some_and(|t| level.severity() >= t.severity())
}

/// Serves tunnel requests over one framed stream
pub struct TunnelService {
    logger: Arc<dyn JumpLogger>,
    options: ServiceOptions,
    ready: Option<oneshot::Sender<()>>,
}

impl TunnelService {
    pub fn new(logger: Arc<dyn JumpLogger>, options: ServiceOptions) -> Self {
        Self {
            logger,
            options,
            ready: None,
        }
    }

    /// Resolves when the first `Ping` arrives.
    ///
    /// Call before [`serve`](Self::serve); only the most recent receiver is
    /// signalled.
    pub fn ready(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.ready = Some(tx);
        rx
    }

    /// Serve requests until the peer closes the stream or `cancel` fires.
    ///
    /// Cancellation is the normal end of a session and returns `Ok`.
    pub async fn serve<S>(mut self, cancel: &CancellationToken, stream: S) -> Result<(), TunnelError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(stream, FrameCodec::new());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                frame = framed.next() => match frame {
                    Some(Ok(frame)) => {
                        let id = frame.id;
                        if let FramePayload::Request(request) = frame.payload {
                            let response = self.handle(request).await;
                            framed.send(Frame::response(id, response)).await?;
                        }
                    }
                    Some(Err(err)) => return Err(err.into()),
                    None => return Ok(()),
                },
            }
        }
    }

    async fn handle(&mut self, request: TunnelRequest) -> TunnelResponse {
        match request {
            TunnelRequest::Ping => {
                if let Some(tx) = self.ready.take() {
                    let _ = tx.send(());
                }
                TunnelResponse::Pong
            }
            TunnelRequest::GitUser => match self.git_user().await {
                Ok(message) => TunnelResponse::GitUser { message },
                Err(message) => TunnelResponse::Error { message },
            },
            TunnelRequest::GitCredentials { payload } => match self.fill(&payload).await {
                Ok(payload) => TunnelResponse::GitCredentials { payload },
                Err(message) => TunnelResponse::Error { message },
            },
            TunnelRequest::Log { level, message } => {
                self.logger.log(level, &message);
                if is_fatal(level, self.options.fatal_level) {
                    // The message is already rendered; the peer observes the
                    // closed tunnel instead of an acknowledgement
                    use std::io::Write;
                    let _ = std::io::stderr().flush();
                    std::process::exit(1);
                }
                TunnelResponse::Ok
            }
        }
    }

    async fn git_user(&self) -> Result<String, String> {
        let user = git::get_user(None).await.map_err(|e| e.to_string())?;
        serde_json::to_string(&user).map_err(|e| e.to_string())
    }

    async fn fill(&self, payload: &str) -> Result<String, String> {
        if !self.options.forward_credentials {
            return Err("credential forwarding is disabled".to_string());
        }
        let request: GitCredentials = serde_json::from_str(payload).map_err(|e| e.to_string())?;
        let filled = match &self.options.credentials_override {
            Some(fixed) => GitCredentials {
                username: fixed.username.clone(),
                password: fixed.token.clone(),
                ..request
            },
            None => git::fill_credentials(&request)
                .await
                .map_err(|e| e.to_string())?,
        };
        serde_json::to_string(&filled).map_err(|e| e.to_string())
    }
}
