//! Git credential and identity plumbing
//!
//! Implements the textual git-credential helper format (`key=value` lines
//! terminated by a blank line), the git user identity with its merge rule,
//! and the `git config` invocations the in-container helper uses to adopt
//! the operator's identity and install the credential helper.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;

/// A git credential request or response in structured form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitCredentials {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub protocol: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

/// A git user identity (user.name / user.email)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitUser {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Error, Debug)]
pub enum GitError {
    #[error("malformed credential line: {0:?}")]
    MalformedLine(String),

    #[error("git {action} failed: {stderr}")]
    Command { action: String, stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GitCredentials {
    /// Parse the textual credential helper format.
    ///
    /// Unknown keys are ignored; parsing stops at the first blank line.
    pub fn parse(input: &str) -> Result<Self, GitError> {
        let mut credentials = GitCredentials::default();
        for line in input.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                break;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| GitError::MalformedLine(line.to_string()))?;
            match key {
                "protocol" => credentials.protocol = value.to_string(),
                "host" => credentials.host = value.to_string(),
                "path" => credentials.path = value.to_string(),
                "username" => credentials.username = value.to_string(),
                "password" => credentials.password = value.to_string(),
                "url" => credentials.url = value.to_string(),
                _ => {}
            }
        }
        Ok(credentials)
    }
}

impl std::fmt::Display for GitCredentials {
    /// Render the textual credential helper format, blank-line terminated
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (key, value) in [
            ("protocol", &self.protocol),
            ("host", &self.host),
            ("path", &self.path),
            ("username", &self.username),
            ("password", &self.password),
            ("url", &self.url),
        ] {
            if !value.is_empty() {
                writeln!(f, "{}={}", key, value)?;
            }
        }
        writeln!(f)
    }
}

/// Merge a fetched identity into an existing one.
///
/// Fields already set in `existing` are never overwritten; only empty fields
/// are filled from `fetched`.
pub fn merge_user(existing: &GitUser, fetched: GitUser) -> GitUser {
    GitUser {
        name: if existing.name.is_empty() {
            fetched.name
        } else {
            existing.name.clone()
        },
        email: if existing.email.is_empty() {
            fetched.email
        } else {
            existing.email.clone()
        },
    }
}

/// Home directory convention for a container user
pub fn home_dir_for_user(user: &str) -> PathBuf {
    if user == "root" {
        PathBuf::from("/root")
    } else {
        PathBuf::from("/home").join(user)
    }
}

fn gitconfig_path(home: &Path) -> PathBuf {
    home.join(".gitconfig")
}

/// Base `git config` invocation, scoped to a specific gitconfig when a home
/// directory is given and to the default lookup order otherwise.
fn config_command(home: Option<&Path>) -> Command {
    let mut cmd = Command::new("git");
    cmd.arg("config");
    if let Some(home) = home {
        cmd.arg("--file").arg(gitconfig_path(home));
    } else {
        cmd.arg("--global");
    }
    cmd
}

async fn config_get(home: Option<&Path>, key: &str) -> Result<String, GitError> {
    let output = config_command(home).arg("--get").arg(key).output().await?;
    // `git config --get` exits 1 when the key is unset
    if !output.status.success() {
        return Ok(String::new());
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

async fn config_set(home: Option<&Path>, key: &str, value: &str) -> Result<(), GitError> {
    let output = config_command(home).arg(key).arg(value).output().await?;
    if !output.status.success() {
        return Err(GitError::Command {
            action: format!("config {}", key),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }
    Ok(())
}

/// Read the configured git user identity; unset fields come back empty
pub async fn get_user(home: Option<&Path>) -> Result<GitUser, GitError> {
    Ok(GitUser {
        name: config_get(home, "user.name").await?,
        email: config_get(home, "user.email").await?,
    })
}

/// Set the non-empty fields of a git user identity
pub async fn set_user(home: Option<&Path>, user: &GitUser) -> Result<(), GitError> {
    if !user.name.is_empty() {
        config_set(home, "user.name", &user.name).await?;
    }
    if !user.email.is_empty() {
        config_set(home, "user.email", &user.email).await?;
    }
    Ok(())
}

/// Install this binary as the git credential helper for the given user
pub async fn configure_helper(
    binary: &Path,
    home: Option<&Path>,
    port: u16,
) -> Result<(), GitError> {
    let helper = format!(
        "!'{}' helper git-credentials --port {}",
        binary.display(),
        port
    );
    config_set(home, "credential.helper", &helper).await
}

/// Ask the operator's real credential store to fill a credential request.
///
/// Runs `git credential fill`, feeding the textual form on stdin and parsing
/// the textual response.
pub async fn fill_credentials(request: &GitCredentials) -> Result<GitCredentials, GitError> {
    use std::process::Stdio;
    use tokio::io::AsyncWriteExt;

    let mut child = Command::new("git")
        .args(["credential", "fill"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(request.to_string().as_bytes()).await?;
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(GitError::Command {
            action: "credential fill".to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    GitCredentials::parse(&String::from_utf8_lossy(&output.stdout))
}

/// Remove any credential helper entries installed by [`configure_helper`].
///
/// Best-effort: a missing entry is not an error.
pub async fn remove_helper(home: Option<&Path>) -> Result<(), GitError> {
    let _ = config_command(home)
        .arg("--unset-all")
        .arg("credential.helper")
        .output()
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_credential_request() {
        let input = "protocol=https\nhost=github.com\nusername=dev\n\n";
        let credentials = GitCredentials::parse(input).unwrap();
        assert_eq!(credentials.protocol, "https");
        assert_eq!(credentials.host, "github.com");
        assert_eq!(credentials.username, "dev");
        assert!(credentials.password.is_empty());
    }

    #[test]
    fn parse_stops_at_blank_line() {
        let input = "protocol=https\n\npassword=should-not-be-read\n";
        let credentials = GitCredentials::parse(input).unwrap();
        assert!(credentials.password.is_empty());
    }

    #[test]
    fn parse_ignores_unknown_keys() {
        let input = "protocol=https\nwwwauth[]=Basic realm=\"x\"\n\n";
        let credentials = GitCredentials::parse(input).unwrap();
        assert_eq!(credentials.protocol, "https");
    }

    #[test]
    fn parse_rejects_malformed_line() {
        assert!(GitCredentials::parse("not a key value line\n").is_err());
    }

    #[test]
    fn display_roundtrip() {
        let credentials = GitCredentials {
            protocol: "https".to_string(),
            host: "github.com".to_string(),
            username: "dev".to_string(),
            password: "s3cret".to_string(),
            ..Default::default()
        };
        let text = credentials.to_string();
        assert!(text.ends_with("\n\n"));
        assert_eq!(GitCredentials::parse(&text).unwrap(), credentials);
    }

    #[test]
    fn display_skips_empty_fields() {
        let credentials = GitCredentials {
            host: "github.com".to_string(),
            ..Default::default()
        };
        assert_eq!(credentials.to_string(), "host=github.com\n\n");
    }

    #[test]
    fn merge_existing_fields_win() {
        let existing = GitUser {
            name: String::new(),
            email: "a@b".to_string(),
        };
        let fetched = GitUser {
            name: "R".to_string(),
            email: "x@y".to_string(),
        };
        let merged = merge_user(&existing, fetched);
        assert_eq!(merged.name, "R");
        assert_eq!(merged.email, "a@b");
    }

    #[test]
    fn merge_with_empty_fetched() {
        let existing = GitUser {
            name: "L".to_string(),
            email: String::new(),
        };
        let merged = merge_user(&existing, GitUser::default());
        assert_eq!(merged.name, "L");
        assert!(merged.email.is_empty());
    }

    #[test]
    fn home_dir_convention() {
        assert_eq!(home_dir_for_user("root"), PathBuf::from("/root"));
        assert_eq!(home_dir_for_user("dev"), PathBuf::from("/home/dev"));
    }
}
