//! Pod-exec bridge
//!
//! Launches podjump's own SSH server inside the target container through the
//! cluster's exec subresource and relays the exec byte stream to local pipe
//! ends. The exec channel is opened in TTY mode (stderr merges into stdout);
//! the PTY the operator actually interacts with is requested later on the
//! SSH session layered on top, not here.

use kube::api::AttachParams;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use pj_core::REMOTE_HELPER_PATH;

use crate::client::{ClusterClient, ClusterTarget};
use crate::error::ClusterError;

/// Command line that starts the in-container SSH server
pub fn remote_server_command(workdir: &str) -> Vec<String> {
    vec![
        REMOTE_HELPER_PATH.to_string(),
        "ssh-server".to_string(),
        "--workdir".to_string(),
        workdir.to_string(),
    ]
}

impl ClusterClient {
    /// Open the exec stream to the resolved pod and relay bytes until the
    /// stream ends or `cancel` fires.
    ///
    /// Cancellation is a normal termination for the bridge, not an error;
    /// the caller decides what the session outcome was.
    pub async fn exec<R, W>(
        &self,
        cancel: &CancellationToken,
        target: &ClusterTarget,
        workdir: &str,
        stdin: R,
        mut stdout: W,
    ) -> Result<(), ClusterError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin,
    {
        let pod = self.resolve_pod(target).await?;
        tracing::info!(pod = %pod, namespace = %target.namespace, "opening exec stream");

        let mut attached = self
            .pods(&target.namespace)
            .exec(
                &pod,
                remote_server_command(workdir),
                &AttachParams::interactive_tty(),
            )
            .await?;

        let mut remote_stdin = attached
            .stdin()
            .ok_or(ClusterError::MissingStream("stdin"))?;
        let mut remote_stdout = attached
            .stdout()
            .ok_or(ClusterError::MissingStream("stdout"))?;

        let mut stdin = stdin;
        let uplink = tokio::spawn(async move {
            let _ = tokio::io::copy(&mut stdin, &mut remote_stdin).await;
        });

        let stream_result = tokio::select! {
            result = tokio::io::copy(&mut remote_stdout, &mut stdout) => result,
            _ = cancel.cancelled() => {
                tracing::debug!("exec stream cancelled");
                uplink.abort();
                return Ok(());
            }
        };
        uplink.abort();
        stream_result?;

        attached
            .join()
            .await
            .map_err(|e| ClusterError::Stream(e.to_string()))?;

        tracing::debug!(pod = %pod, "exec stream closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_server_command_shape() {
        let command = remote_server_command("/workspaces");
        assert_eq!(
            command,
            vec![
                "/usr/local/bin/podjump",
                "ssh-server",
                "--workdir",
                "/workspaces"
            ]
        );
    }
}
