//! The operator-facing connect command

use pj_core::JumpError;
use pj_kube::ClusterTarget;
use pj_protocol::LogLevel;
use pj_tunnel::CredentialsOverride;

use crate::jump::{self, JumpOptions};

pub struct ConnectArgs {
    pub namespace: String,
    pub service: String,
    pub pod: Option<String>,
    pub user: String,
    pub workdir: String,
    pub git_username: Option<String>,
    pub git_token: Option<String>,
    pub no_credential_forwarding: bool,
    pub verbose: bool,
}

/// Run the full jump and return the remote shell's exit status
pub async fn connect_command(args: ConnectArgs) -> Result<u32, JumpError> {
    // Both halves of the override must be present; one alone is an operator
    // mistake we surface instead of guessing
    let credentials_override = match (args.git_username, args.git_token) {
        (Some(username), Some(token)) => Some(CredentialsOverride { username, token }),
        (None, None) => None,
        _ => {
            return Err(JumpError::Stage {
                stage: "parse connect options",
                message: "--git-username and --git-token must be given together".to_string(),
            })
        }
    };

    let options = JumpOptions {
        target: ClusterTarget::new(args.namespace, args.service).with_pod(args.pod),
        user: args.user,
        workdir: args.workdir,
        credentials_override,
        forward_credentials: !args.no_credential_forwarding,
        log_filter: if args.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        },
    };

    jump::run(options).await.and_then(shell_outcome)
}

/// Mirror the remote shell's exit in our own result: a non-zero status
/// becomes [`JumpError::RemoteShell`] so the command boundary can exit with
/// it without treating it as a crash
fn shell_outcome(status: u32) -> Result<u32, JumpError> {
    if status == 0 {
        Ok(status)
    } else {
        Err(JumpError::RemoteShell { status })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> ConnectArgs {
        ConnectArgs {
            namespace: "dev".to_string(),
            service: "web".to_string(),
            pod: None,
            user: "root".to_string(),
            workdir: "/workspaces".to_string(),
            git_username: None,
            git_token: None,
            no_credential_forwarding: false,
            verbose: false,
        }
    }

    #[tokio::test]
    async fn rejects_half_of_a_credential_override() {
        let args = ConnectArgs {
            git_username: Some("robot".to_string()),
            ..base_args()
        };
        let err = connect_command(args).await.unwrap_err();
        assert!(err.to_string().contains("--git-token"));
        // An operator mistake, not a pipeline stage
        assert!(!err.to_string().contains("connect to server"));
    }

    #[test]
    fn nonzero_shell_exit_becomes_remote_shell_error() {
        assert!(matches!(shell_outcome(0), Ok(0)));
        assert!(matches!(
            shell_outcome(130),
            Err(JumpError::RemoteShell { status: 130 })
        ));
    }
}
