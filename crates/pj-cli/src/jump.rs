//! The jump controller
//!
//! Orchestrates one `connect` invocation end to end: serialize on the
//! per-workspace lock, bridge an exec stream to the target pod, run an SSH
//! client over it, start the credential tunnel service, then hand the
//! foreground to the interactive session. The lock is held only until the
//! SSH handshake succeeds; after that, parallel invocations may proceed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::{ChannelId, CryptoVec};
use russh_keys::key::PublicKey;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentRelay;

use pj_core::{virtual_pipe_pair, JumpError, WorkspaceLock, REMOTE_HELPER_PATH};
use pj_kube::{ClusterClient, ClusterTarget, ServiceStatus};
use pj_protocol::LogLevel;
use pj_tunnel::{
    ConsoleLogger, CredentialsOverride, ServiceOptions, TunnelError, TunnelService,
};

/// How long the SSH handshake over the exec bridge may take
const SSH_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long the credential tunnel may take to answer the initial ping
const TUNNEL_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period for the session to surface its own error after a background
/// stage failed
const SESSION_GRACE: Duration = Duration::from_secs(2);

/// Everything a single connect invocation needs
pub struct JumpOptions {
    pub target: ClusterTarget,
    pub user: String,
    pub workdir: String,
    pub credentials_override: Option<CredentialsOverride>,
    pub forward_credentials: bool,
    pub log_filter: LogLevel,
}

/// Client-side SSH handler.
///
/// The in-container server generates an ephemeral host key per run, so
/// there is nothing to verify it against. Agent-forward channels opened by
/// the server are relayed to the local agent socket; each channel gets its
/// own [`AgentRelay`] and ids not in the map belong to ordinary channels.
pub struct JumpClientHandler {
    agents: HashMap<ChannelId, AgentRelay<tokio::net::UnixStream>>,
}

impl JumpClientHandler {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }
}

#[async_trait]
impl client::Handler for JumpClientHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn server_channel_open_agent_forward(
        &mut self,
        channel: ChannelId,
        session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        let Some(sock) = std::env::var_os("SSH_AUTH_SOCK") else {
            session.close(channel);
            return Ok(());
        };
        match tokio::net::UnixStream::connect(&sock).await {
            Ok(agent) => {
                self.agents.insert(channel, AgentRelay::new(agent));
            }
            Err(err) => {
                tracing::debug!("could not reach local agent: {}", err);
                session.close(channel);
            }
        }
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        let Some(relay) = self.agents.get_mut(&channel) else {
            return Ok(());
        };
        match relay.relay(data).await {
            Ok(replies) => {
                for reply in replies {
                    session.data(channel, CryptoVec::from_slice(&reply));
                }
            }
            Err(err) => {
                tracing::debug!("agent relay ended: {}", err);
                self.agents.remove(&channel);
                session.close(channel);
            }
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        self.agents.remove(&channel);
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        self.agents.remove(&channel);
        Ok(())
    }
}

fn handshake_error(message: impl ToString) -> JumpError {
    JumpError::TransportHandshake {
        message: message.to_string(),
    }
}

fn service_error(message: impl ToString) -> JumpError {
    JumpError::ServiceHandshake {
        message: message.to_string(),
    }
}

/// Run a connect invocation and return the remote shell's exit status
pub async fn run(options: JumpOptions) -> Result<u32, JumpError> {
    let cancel = CancellationToken::new();
    let workspace = format!("{}-{}", options.target.namespace, options.target.service);
    let lock = WorkspaceLock::new(workspace);

    lock.acquire(&cancel).await?;
    let result = run_locked(&cancel, &lock, options).await;
    // Covers every early-error path; a successful handshake released it long ago
    lock.release();
    cancel.cancel();
    result
}

async fn run_locked(
    cancel: &CancellationToken,
    lock: &WorkspaceLock,
    options: JumpOptions,
) -> Result<u32, JumpError> {
    let cluster = ClusterClient::connect().await.map_err(|e| JumpError::Stage {
        stage: "connect to server",
        message: e.to_string(),
    })?;

    // Fail fast on a dead target instead of burning the exec attempt
    match cluster.service_status(&options.target).await {
        Ok(ServiceStatus::Running) => {}
        Ok(ServiceStatus::NotFound) => {
            return Err(JumpError::Stage {
                stage: "connect to server",
                message: format!(
                    "service {} not found in namespace {}",
                    options.target.service, options.target.namespace
                ),
            });
        }
        Err(err) => {
            return Err(JumpError::Stage {
                stage: "connect to server",
                message: err.to_string(),
            });
        }
    }

    // The exec stream and the SSH client meet in the middle of a pipe pair
    let (ssh_end, bridge_end) = virtual_pipe_pair();
    let (bridge_read, bridge_write) = bridge_end.into_split();
    let (bridge_err_tx, mut bridge_err_rx) = mpsc::channel::<pj_kube::ClusterError>(1);
    let bridge_task = tokio::spawn({
        let cancel = cancel.clone();
        let target = options.target.clone();
        let workdir = options.workdir.clone();
        async move {
            if let Err(err) = cluster
                .exec(&cancel, &target, &workdir, bridge_read, bridge_write)
                .await
            {
                let _ = bridge_err_tx.try_send(err);
            }
        }
    });

    let config = Arc::new(client::Config::default());
    let mut ssh = tokio::time::timeout(
        SSH_CONNECT_TIMEOUT,
        client::connect_stream(config, ssh_end, JumpClientHandler::new()),
    )
    .await
    .map_err(|_| handshake_error("timed out"))?
    .map_err(handshake_error)?;

    let authenticated = ssh
        .authenticate_none(&options.user)
        .await
        .map_err(handshake_error)?;
    if !authenticated {
        return Err(handshake_error(format!(
            "server rejected user {}",
            options.user
        )));
    }

    // Handshake succeeded: the workspace is provably reachable, stop
    // blocking sibling invocations
    lock.release();
    tracing::debug!("ssh handshake complete, lock released");

    let (_service_err_tx, mut service_err_rx) =
        start_tunnel_service(cancel, &mut ssh, &options).await?;

    let session_result = run_session(cancel, ssh, &mut bridge_err_rx, &mut service_err_rx).await;

    cancel.cancel();
    bridge_task.abort();

    // Always drain both channels so background failures are at least visible
    if let Ok(err) = bridge_err_rx.try_recv() {
        tracing::debug!("exec bridge ended with: {}", err);
    }
    if let Ok(err) = service_err_rx.try_recv() {
        tracing::debug!("credential tunnel ended with: {}", err);
    }

    session_result
}

/// Launch the in-container credentials helper over its own SSH channel and
/// serve the tunnel RPC on this side. Returns once the helper's initial
/// ping round-trips.
async fn start_tunnel_service(
    cancel: &CancellationToken,
    ssh: &mut client::Handle<JumpClientHandler>,
    options: &JumpOptions,
) -> Result<(mpsc::Sender<TunnelError>, mpsc::Receiver<TunnelError>), JumpError> {
    let channel = ssh.channel_open_session().await.map_err(service_error)?;
    let command = format!(
        "'{}' helper credentials-server --user '{}'",
        REMOTE_HELPER_PATH, options.user
    );
    channel.exec(true, command).await.map_err(service_error)?;

    let logger = Arc::new(ConsoleLogger::new(options.log_filter));
    let mut service = TunnelService::new(
        logger,
        ServiceOptions {
            forward_credentials: options.forward_credentials,
            credentials_override: options.credentials_override.clone(),
            fatal_level: None,
        },
    );
    let ready = service.ready();

    let (service_err_tx, service_err_rx) = mpsc::channel::<TunnelError>(1);
    tokio::spawn({
        let cancel = cancel.clone();
        let service_err_tx = service_err_tx.clone();
        async move {
            let stream = channel.into_stream();
            if let Err(err) = service.serve(&cancel, stream).await {
                let _ = service_err_tx.try_send(err);
            }
        }
    });

    tokio::time::timeout(TUNNEL_READY_TIMEOUT, ready)
        .await
        .map_err(|_| service_error("helper never answered the initial ping"))?
        .map_err(|_| service_error("helper exited before the initial ping"))?;
    tracing::debug!("credential tunnel is up");

    Ok((service_err_tx, service_err_rx))
}

/// Run the foreground session while watching the background stages.
///
/// The session's own outcome wins over a background error only when it is
/// a real one: its own error, or a remote exit status. A session that was
/// merely cancelled reports the background failure that triggered the
/// cancellation.
async fn run_session(
    cancel: &CancellationToken,
    ssh: client::Handle<JumpClientHandler>,
    bridge_err_rx: &mut mpsc::Receiver<pj_kube::ClusterError>,
    service_err_rx: &mut mpsc::Receiver<TunnelError>,
) -> Result<u32, JumpError> {
    let mut session_task = tokio::spawn(crate::session::run(ssh, cancel.clone()));

    let background_error = tokio::select! {
        result = &mut session_task => {
            let outcome = result.map_err(|e| JumpError::Stage {
                stage: "tunnel to container",
                message: e.to_string(),
            })??;
            return Ok(outcome.unwrap_or(0));
        }
        Some(err) = bridge_err_rx.recv() => JumpError::Stage {
            stage: "connect to server",
            message: err.to_string(),
        },
        Some(err) = service_err_rx.recv() => JumpError::Stage {
            stage: "run in container",
            message: err.to_string(),
        },
    };

    cancel.cancel();
    match tokio::time::timeout(SESSION_GRACE, &mut session_task).await {
        Ok(Ok(session_result)) => settle(session_result, background_error),
        _ => {
            session_task.abort();
            Err(background_error)
        }
    }
}

/// Final outcome once a background stage has failed
fn settle(
    session: Result<Option<u32>, JumpError>,
    background: JumpError,
) -> Result<u32, JumpError> {
    match session {
        Ok(Some(status)) => Ok(status),
        Ok(None) => Err(background),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge_error() -> JumpError {
        JumpError::Stage {
            stage: "connect to server",
            message: "exec stream closed".to_string(),
        }
    }

    #[test]
    fn cancelled_session_reports_the_background_error() {
        let err = settle(Ok(None), bridge_error()).unwrap_err();
        assert!(err.to_string().contains("connect to server"));
    }

    #[test]
    fn remote_exit_status_outranks_the_background_error() {
        assert_eq!(settle(Ok(Some(7)), bridge_error()).unwrap(), 7);
    }

    #[test]
    fn session_error_outranks_the_background_error() {
        let session = Err(JumpError::Stage {
            stage: "run in container",
            message: "shell died".to_string(),
        });
        let err = settle(session, bridge_error()).unwrap_err();
        assert!(err.to_string().contains("run in container"));
    }
}
