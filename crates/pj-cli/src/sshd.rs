//! In-container SSH server
//!
//! Speaks the SSH server protocol over this process's own stdin/stdout, the
//! far side of the pod-exec stream. Accepts the `none` authentication
//! method (the exec stream itself is the trust boundary), runs shells on a
//! PTY when one was requested and over plain pipes otherwise, and executes
//! one-off commands such as the credentials helper.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use russh::server::{Auth, Config, Handle, Handler, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, MethodSet};
use russh_keys::key::KeyPair;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

/// Serve one SSH connection over stdio until the peer disconnects
pub async fn serve_stdio(workdir: PathBuf) -> Result<()> {
    let key = KeyPair::generate_ed25519().ok_or_else(|| anyhow!("host key generation failed"))?;

    let mut config = Config::default();
    config.keys = vec![key];
    config.methods = MethodSet::NONE;
    let config = Arc::new(config);

    let handler = ShellHandler::new(workdir);
    let session = russh::server::run_stream(config, pj_core::stdio_stream(), handler)
        .await
        .context("ssh handshake")?;
    session.await.context("ssh session")?;
    Ok(())
}

struct PtyParams {
    term: String,
    cols: u16,
    rows: u16,
}

#[derive(Default)]
struct ChannelState {
    pty: Option<PtyParams>,
    pty_writer: Option<Box<dyn Write + Send>>,
    pty_master: Option<Box<dyn MasterPty + Send>>,
    child_stdin: Option<tokio::process::ChildStdin>,
}

/// Handler for the single connection this server ever sees
pub struct ShellHandler {
    workdir: PathBuf,
    channels: HashMap<ChannelId, ChannelState>,
}

impl ShellHandler {
    pub fn new(workdir: PathBuf) -> Self {
        Self {
            workdir,
            channels: HashMap::new(),
        }
    }

    fn state(&mut self, channel: ChannelId) -> &mut ChannelState {
        self.channels.entry(channel).or_default()
    }

    fn default_shell() -> String {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }

    /// Spawn the shell on a PTY and pump its output back over the channel
    fn spawn_pty_shell(
        &mut self,
        channel_id: ChannelId,
        handle: Handle,
        params: PtyParams,
    ) -> Result<()> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: params.rows,
                cols: params.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| anyhow!("openpty: {}", e))?;

        let mut cmd = CommandBuilder::new(Self::default_shell());
        cmd.cwd(&self.workdir);
        cmd.env("TERM", &params.term);
        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| anyhow!("spawn shell: {}", e))?;
        // Dropping the slave lets reads observe EOF when the shell exits
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| anyhow!("clone pty reader: {}", e))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| anyhow!("take pty writer: {}", e))?;

        let state = self.state(channel_id);
        state.pty_writer = Some(writer);
        state.pty_master = Some(pair.master);

        enum PtyEvent {
            Data(Vec<u8>),
            Exit(u32),
        }

        let (tx, mut rx) = mpsc::channel::<PtyEvent>(32);
        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 8192];
            loop {
                match std::io::Read::read(&mut reader, &mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.blocking_send(PtyEvent::Data(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                }
            }
            let code = child.wait().map(|status| status.exit_code()).unwrap_or(1);
            let _ = tx.blocking_send(PtyEvent::Exit(code));
        });

        tokio::spawn(async move {
            let mut exit_code = 0u32;
            while let Some(event) = rx.recv().await {
                match event {
                    PtyEvent::Data(data) => {
                        if handle
                            .data(channel_id, CryptoVec::from_slice(&data))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    PtyEvent::Exit(code) => {
                        exit_code = code;
                        break;
                    }
                }
            }
            let _ = handle.exit_status_request(channel_id, exit_code).await;
            let _ = handle.eof(channel_id).await;
            let _ = handle.close(channel_id).await;
        });

        Ok(())
    }

    /// Spawn a command with piped stdio and pump it back over the channel
    fn spawn_piped(
        &mut self,
        channel_id: ChannelId,
        handle: Handle,
        mut command: tokio::process::Command,
    ) -> Result<()> {
        command
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().context("spawn command")?;
        self.state(channel_id).child_stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        tokio::spawn(async move {
            let out_pump = async {
                if let Some(mut stdout) = stdout {
                    let mut buf = [0u8; 8192];
                    loop {
                        match stdout.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                if handle
                                    .data(channel_id, CryptoVec::from_slice(&buf[..n]))
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                        }
                    }
                }
            };
            let err_pump = async {
                if let Some(mut stderr) = stderr {
                    let mut buf = [0u8; 8192];
                    loop {
                        match stderr.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                if handle
                                    .extended_data(channel_id, 1, CryptoVec::from_slice(&buf[..n]))
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                        }
                    }
                }
            };
            tokio::join!(out_pump, err_pump);

            let code = match child.wait().await {
                Ok(status) => status.code().unwrap_or(1) as u32,
                Err(_) => 1,
            };
            let _ = handle.exit_status_request(channel_id, code).await;
            let _ = handle.eof(channel_id).await;
            let _ = handle.close(channel_id).await;
        });

        Ok(())
    }
}

#[async_trait]
impl Handler for ShellHandler {
    type Error = anyhow::Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        // The pod-exec stream already authenticated the operator against the
        // cluster; the SSH user only selects the in-container identity
        tracing::debug!(user, "accepting session");
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.channels.insert(channel.id(), ChannelState::default());
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.state(channel).pty = Some(PtyParams {
            term: term.to_string(),
            cols: col_width as u16,
            rows: row_height as u16,
        });
        session.channel_success(channel);
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let handle = session.handle();
        if let Some(params) = self.state(channel).pty.take() {
            self.spawn_pty_shell(channel, handle, params)?;
        } else {
            let mut command = tokio::process::Command::new(Self::default_shell());
            command.arg("-i");
            self.spawn_piped(channel, handle, command)?;
        }
        session.channel_success(channel);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command_line = String::from_utf8_lossy(data).to_string();
        tracing::debug!(command = %command_line, "exec request");

        let mut command = tokio::process::Command::new("sh");
        command.arg("-c").arg(command_line);
        self.spawn_piped(channel, session.handle(), command)?;
        session.channel_success(channel);
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(master) = &self.state(channel).pty_master {
            let _ = master.resize(PtySize {
                rows: row_height as u16,
                cols: col_width as u16,
                pixel_width: 0,
                pixel_height: 0,
            });
        }
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let state = self.state(channel);
        if let Some(writer) = state.pty_writer.as_mut() {
            writer.write_all(data).context("pty write")?;
        } else if let Some(stdin) = state.child_stdin.as_mut() {
            stdin.write_all(data).await.context("stdin write")?;
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        // Closing our end of stdin is how piped children see EOF
        self.state(channel).child_stdin.take();
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        // Dropping the PTY master hangs up the shell
        self.channels.remove(&channel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_shell_falls_back_to_sh() {
        // SHELL is normally set; the fallback only matters in bare containers
        let shell = ShellHandler::default_shell();
        assert!(!shell.is_empty());
    }

    #[test]
    fn channels_start_empty() {
        let handler = ShellHandler::new(PathBuf::from("/workspaces"));
        assert!(handler.channels.is_empty());
    }
}
