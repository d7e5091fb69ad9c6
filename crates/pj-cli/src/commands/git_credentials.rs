//! Git credential helper subcommand
//!
//! Invoked by git itself via the installed `credential.helper` entry. Only
//! the `get` action does anything: the request is read from stdin in git's
//! textual format, forwarded to the loopback credentials endpoint, and the
//! filled response printed back. Every failure path exits cleanly with no
//! output so git falls through to its other helpers.

use anyhow::Result;
use tokio::io::AsyncReadExt;

use pj_core::git::GitCredentials;

pub async fn git_credentials_command(action: &str, port: u16) -> Result<()> {
    if action != "get" {
        return Ok(());
    }

    let mut input = String::new();
    if tokio::io::stdin().read_to_string(&mut input).await.is_err() {
        return Ok(());
    }

    let request = match GitCredentials::parse(&input) {
        Ok(request) => request,
        Err(err) => {
            tracing::debug!("unparseable credential request: {}", err);
            return Ok(());
        }
    };

    match fetch(&request, port).await {
        Ok(filled) => print!("{}", filled),
        Err(err) => tracing::debug!("credential lookup failed: {}", err),
    }
    Ok(())
}

async fn fetch(request: &GitCredentials, port: u16) -> Result<GitCredentials> {
    let response = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/git-credentials", port))
        .json(request)
        .send()
        .await?
        .error_for_status()?;
    Ok(response.json().await?)
}
