//! Requesting end of the credential tunnel
//!
//! Used by the in-container helper. A [`TunnelHandle`] is a cheap clonable
//! front over a pump task that owns the framed transport, issues one request
//! at a time, and matches responses by frame id.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use pj_core::git::{GitCredentials, GitUser};
use pj_protocol::{Frame, FrameCodec, FramePayload, LogLevel, TunnelRequest, TunnelResponse};

use crate::error::TunnelError;

struct Call {
    request: TunnelRequest,
    reply: oneshot::Sender<Result<TunnelResponse, TunnelError>>,
}

/// Handle for issuing tunnel requests
#[derive(Clone)]
pub struct TunnelHandle {
    tx: mpsc::Sender<Call>,
}

/// Start a tunnel client over `stream`.
///
/// Returns the request handle and the pump task. The pump ends when every
/// handle is dropped or the transport closes; dropping the returned
/// [`JoinHandle`] leaves the pump running.
pub fn connect<S>(stream: S) -> (TunnelHandle, JoinHandle<Result<(), TunnelError>>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    let pump = tokio::spawn(run_pump(stream, rx));
    (TunnelHandle { tx }, pump)
}

async fn run_pump<S>(stream: S, mut rx: mpsc::Receiver<Call>) -> Result<(), TunnelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, FrameCodec::new());
    let mut next_id: u64 = 1;

    loop {
        // Watch the transport while idle so EOF ends the pump promptly
        let call = tokio::select! {
            call = rx.recv() => match call {
                Some(call) => call,
                None => return Ok(()),
            },
            frame = framed.next() => match frame {
                Some(Ok(frame)) => {
                    tracing::warn!(id = frame.id, "dropping unsolicited frame");
                    continue;
                }
                Some(Err(err)) => return Err(err.into()),
                None => return Err(TunnelError::Closed),
            },
        };

        let id = next_id;
        next_id += 1;

        if let Err(err) = framed.send(Frame::request(id, call.request)).await {
            let _ = call.reply.send(Err(TunnelError::Closed));
            return Err(err.into());
        }

        loop {
            match framed.next().await {
                Some(Ok(frame)) if frame.id == id => {
                    match frame.payload {
                        FramePayload::Response(response) => {
                            let _ = call.reply.send(Ok(response));
                        }
                        FramePayload::Request(_) => {
                            // This end never serves requests
                            let _ = call.reply.send(Err(TunnelError::UnexpectedResponse(
                                "request frame from peer",
                            )));
                        }
                    }
                    break;
                }
                Some(Ok(frame)) => {
                    tracing::warn!(id = frame.id, expected = id, "dropping stray frame");
                }
                Some(Err(err)) => {
                    let _ = call.reply.send(Err(TunnelError::Closed));
                    return Err(err.into());
                }
                None => {
                    let _ = call.reply.send(Err(TunnelError::Closed));
                    return Err(TunnelError::Closed);
                }
            }
        }
    }
}

impl TunnelHandle {
    async fn call(&self, request: TunnelRequest) -> Result<TunnelResponse, TunnelError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Call { request, reply })
            .await
            .map_err(|_| TunnelError::Closed)?;
        match rx.await.map_err(|_| TunnelError::Closed)?? {
            TunnelResponse::Error { message } => Err(TunnelError::Remote(message)),
            response => Ok(response),
        }
    }

    /// Liveness probe; must succeed before the tunnel is considered up
    pub async fn ping(&self) -> Result<(), TunnelError> {
        match self.call(TunnelRequest::Ping).await? {
            TunnelResponse::Pong => Ok(()),
            _ => Err(TunnelError::UnexpectedResponse("ping")),
        }
    }

    /// Fetch the operator's configured git identity
    pub async fn git_user(&self) -> Result<GitUser, TunnelError> {
        match self.call(TunnelRequest::GitUser).await? {
            TunnelResponse::GitUser { message } => Ok(serde_json::from_str(&message)?),
            _ => Err(TunnelError::UnexpectedResponse("git user")),
        }
    }

    /// Fill a git credential request against the operator's credential store
    pub async fn git_credentials(
        &self,
        request: &GitCredentials,
    ) -> Result<GitCredentials, TunnelError> {
        let payload = serde_json::to_string(request)?;
        match self.call(TunnelRequest::GitCredentials { payload }).await? {
            TunnelResponse::GitCredentials { payload } => Ok(serde_json::from_str(&payload)?),
            _ => Err(TunnelError::UnexpectedResponse("git credentials")),
        }
    }

    /// Forward a log message to the operator's terminal
    pub async fn log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Result<(), TunnelError> {
        let request = TunnelRequest::Log {
            level,
            message: message.into(),
        };
        match self.call(request).await? {
            TunnelResponse::Ok => Ok(()),
            _ => Err(TunnelError::UnexpectedResponse("log")),
        }
    }
}
