//! In-container credentials helper
//!
//! Launched by the jump controller through an SSH exec channel; speaks the
//! tunnel RPC over its own stdio. Adopts the operator's git identity,
//! installs this binary as the git credential helper, and serves the
//! loopback endpoint the helper calls, until the channel closes.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use pj_core::{git, stdio_stream};
use pj_protocol::LogLevel;
use pj_tunnel::{self, JumpLogger, TunnelLogger};

pub async fn credentials_server_command(user: Option<String>, port: u16) -> Result<()> {
    let (handle, pump) = pj_tunnel::connect(stdio_stream());

    handle.ping().await.context("tunnel handshake")?;
    let logger: Arc<dyn JumpLogger> =
        Arc::new(TunnelLogger::new(handle.clone(), LogLevel::Debug));
    logger.debug("credentials helper started");

    if !pj_tunnel::port_available(port).await {
        // Another session's helper already serves this container
        logger.debug(&format!("port {} is taken, leaving existing helper in place", port));
        return Ok(());
    }

    let home = user.as_deref().map(git::home_dir_for_user);
    configure_git(home.as_deref(), &handle, &logger, port).await?;

    let cancel = CancellationToken::new();
    let server = tokio::spawn(pj_tunnel::run_credentials_server(
        cancel.clone(),
        port,
        handle.clone(),
        logger.clone(),
    ));

    // The pump lives as long as the SSH channel carrying our stdio
    if let Ok(Err(err)) = pump.await {
        tracing::debug!("tunnel closed: {}", err);
    }
    cancel.cancel();
    let _ = server.await;

    if let Err(err) = git::remove_helper(home.as_deref()).await {
        tracing::debug!("could not remove credential helper: {}", err);
    }
    Ok(())
}

/// Merge the operator's git identity into the container's and install the
/// credential helper. Identity seeding failures are reported over the
/// tunnel and tolerated, but a missing credential helper ends the setup:
/// git in the container would otherwise prompt for passwords that can
/// never arrive.
async fn configure_git(
    home: Option<&std::path::Path>,
    handle: &pj_tunnel::TunnelHandle,
    logger: &Arc<dyn JumpLogger>,
    port: u16,
) -> Result<()> {
    let existing = git::get_user(home).await.unwrap_or_default();
    match handle.git_user().await {
        Ok(fetched) => {
            let merged = git::merge_user(&existing, fetched);
            match git::set_user(home, &merged).await {
                Ok(()) => logger.done("configured git user"),
                Err(err) => logger.warn(&format!("could not set git user: {}", err)),
            }
        }
        Err(err) => logger.debug(&format!("no git user from operator: {}", err)),
    }

    let binary = std::env::current_exe()
        .unwrap_or_else(|_| PathBuf::from(pj_core::REMOTE_HELPER_PATH));
    git::configure_helper(&binary, home, port)
        .await
        .context("configure git credential helper")?;
    logger.done("configured git credentials helper");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pj_core::virtual_pipe_pair;
    use pj_tunnel::{ConsoleLogger, ServiceOptions, TunnelService};

    #[tokio::test]
    async fn helper_install_failure_ends_the_setup() {
        let (local, remote) = virtual_pipe_pair();
        let service = TunnelService::new(
            Arc::new(ConsoleLogger::new(LogLevel::Error)),
            ServiceOptions::default(),
        );
        let cancel = CancellationToken::new();
        tokio::spawn(async move {
            let _ = service.serve(&cancel, remote).await;
        });

        let (handle, _pump) = pj_tunnel::connect(local);
        let logger: Arc<dyn JumpLogger> = Arc::new(ConsoleLogger::new(LogLevel::Error));
        // An unwritable gitconfig path makes the helper install fail
        let home = std::path::Path::new("/nonexistent/podjump-home");
        let err = configure_git(Some(home), &handle, &logger, 12049)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("credential helper"));
    }
}
