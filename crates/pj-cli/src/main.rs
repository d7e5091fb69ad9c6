//! podjump CLI
//!
//! One binary for every role:
//! - `connect` on the operator's machine
//! - `ssh-server` inside the container, over the exec stream's stdio
//! - `helper` subcommands inside the container (credential tunnel client
//!   and git credential helper)

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pj_core::{JumpError, EXIT_CODE_IO};
use pj_tunnel::DEFAULT_CREDENTIALS_PORT;

use podjump::commands::connect::{connect_command, ConnectArgs};
use podjump::commands::credentials_server::credentials_server_command;
use podjump::commands::git_credentials::git_credentials_command;
use podjump::commands::ssh_server::ssh_server_command;

#[derive(Parser)]
#[command(name = "podjump")]
#[command(author, version, about = "SSH into a container running in a Kubernetes pod")]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open an interactive shell in a pod backing a service
    Connect {
        /// Namespace of the target service
        #[arg(long = "ns")]
        namespace: String,
        /// Service whose pods to connect to
        #[arg(long = "svc")]
        service: String,
        /// Connect to this pod instead of the first one matching the
        /// service selector
        #[arg(long)]
        pod: Option<String>,
        /// User to run as inside the container
        #[arg(long, default_value = "root")]
        user: String,
        /// Working directory for the remote shell
        #[arg(long, default_value = "/workspaces")]
        workdir: String,
        /// Answer git credential requests with this username instead of the
        /// local credential store
        #[arg(long, requires = "git_token")]
        git_username: Option<String>,
        /// Token paired with --git-username
        #[arg(long, env = "PODJUMP_GIT_TOKEN", hide_env_values = true)]
        git_token: Option<String>,
        /// Do not answer git credential requests from the container
        #[arg(long)]
        no_credential_forwarding: bool,
    },

    /// In-container helpers (not invoked by operators directly)
    Helper {
        #[command(subcommand)]
        action: HelperCommands,
    },

    /// Run the in-container SSH server over stdio
    SshServer {
        /// Working directory for spawned shells
        #[arg(long, default_value = "/workspaces")]
        workdir: PathBuf,
    },
}

#[derive(Subcommand)]
enum HelperCommands {
    /// Tunnel client: configure git and serve the credentials endpoint
    CredentialsServer {
        /// Container user whose git configuration to adjust
        #[arg(long)]
        user: Option<String>,
        /// Port of the loopback credentials endpoint
        #[arg(long, default_value_t = DEFAULT_CREDENTIALS_PORT)]
        port: u16,
    },
    /// Git credential helper: forward requests to the credentials endpoint
    GitCredentials {
        /// Port of the loopback credentials endpoint
        #[arg(long, default_value_t = DEFAULT_CREDENTIALS_PORT)]
        port: u16,
        /// Credential action git asked for (get / store / erase)
        action: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // Logs go to stderr: stdout carries protocol bytes for the in-container
    // subcommands and credential output for the git helper
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let code = match cli.command {
        Commands::Connect {
            namespace,
            service,
            pod,
            user,
            workdir,
            git_username,
            git_token,
            no_credential_forwarding,
        } => {
            let args = ConnectArgs {
                namespace,
                service,
                pod,
                user,
                workdir,
                git_username,
                git_token,
                no_credential_forwarding,
                verbose: cli.verbose > 0,
            };
            match connect_command(args).await {
                Ok(status) => status as i32,
                Err(err) => exit_code_for(&err),
            }
        }
        Commands::Helper { action } => {
            let result = match action {
                HelperCommands::CredentialsServer { user, port } => {
                    credentials_server_command(user, port).await
                }
                HelperCommands::GitCredentials { port, action } => {
                    git_credentials_command(&action, port).await
                }
            };
            match result {
                Ok(()) => 0,
                Err(err) => {
                    tracing::error!("{:#}", err);
                    1
                }
            }
        }
        Commands::SshServer { workdir } => match ssh_server_command(workdir).await {
            Ok(()) => 0,
            Err(err) => {
                tracing::error!("{:#}", err);
                1
            }
        },
    };

    std::process::exit(code);
}

/// Map a session error to the process exit code.
///
/// A remote shell's non-zero exit mirrors the remote command and is not a
/// crash of ours, so it is not reported at error level.
fn exit_code_for(err: &JumpError) -> i32 {
    match err {
        JumpError::RemoteShell { status } => {
            tracing::debug!("{}", err);
            *status as i32
        }
        JumpError::LocalIo(_) => {
            tracing::error!("{}", err);
            EXIT_CODE_IO
        }
        _ => {
            tracing::error!("{}", err);
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_shell_status_is_the_exit_code() {
        assert_eq!(exit_code_for(&JumpError::RemoteShell { status: 130 }), 130);
    }

    #[test]
    fn local_io_maps_to_the_io_exit_code() {
        let err = JumpError::LocalIo(std::io::Error::new(std::io::ErrorKind::Other, "pipe"));
        assert_eq!(exit_code_for(&err), EXIT_CODE_IO);
    }
}
