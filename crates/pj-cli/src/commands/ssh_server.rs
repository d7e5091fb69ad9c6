//! In-container ssh-server subcommand

use std::path::PathBuf;

use anyhow::Result;

use crate::sshd;

pub async fn ssh_server_command(workdir: PathBuf) -> Result<()> {
    tracing::debug!(workdir = %workdir.display(), "starting ssh server on stdio");
    sshd::serve_stdio(workdir).await
}
