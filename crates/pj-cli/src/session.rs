//! Interactive shell session over the established SSH connection
//!
//! Opens the session channel, opportunistically forwards the local SSH
//! agent, requests a PTY only when both local standard streams are
//! terminals, and relays bytes until the remote shell exits. The remote
//! exit status is the session's result; raw mode is restored on every exit
//! path.

use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::tty::IsTty;
use russh::ChannelMsg;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use pj_core::JumpError;

use crate::jump::JumpClientHandler;

/// Restores the terminal on drop, whatever path the session took out
struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    fn new() -> Self {
        Self { active: false }
    }

    fn enable(&mut self) -> Result<(), JumpError> {
        enable_raw_mode().map_err(JumpError::LocalIo)?;
        self.active = true;
        Ok(())
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.active {
            let _ = disable_raw_mode();
        }
    }
}

fn shell_stage(err: russh::Error) -> JumpError {
    JumpError::Stage {
        stage: "run in container",
        message: err.to_string(),
    }
}

enum Step {
    Input(std::io::Result<Vec<u8>>),
    Resize(u16, u16),
    Remote(Option<ChannelMsg>),
    Cancelled,
}

/// Run the interactive session to completion.
///
/// Returns the remote exit status once the shell finishes (0 when the
/// channel closed without reporting one). A cancellation yields `None`
/// unless a status had already arrived; the caller decides what a
/// status-less cancelled session means.
pub async fn run(
    ssh: russh::client::Handle<JumpClientHandler>,
    cancel: CancellationToken,
) -> Result<Option<u32>, JumpError> {
    let mut channel = ssh.channel_open_session().await.map_err(shell_stage)?;

    // A missing local agent just skips forwarding; a present agent that
    // cannot be forwarded is a hard error, the operator asked for it
    if std::env::var_os("SSH_AUTH_SOCK").is_some() {
        channel.agent_forward(true).await.map_err(shell_stage)?;
        tracing::debug!("agent forwarding requested");
    }

    let interactive = std::io::stdin().is_tty() && std::io::stdout().is_tty();
    let mut raw_guard = RawModeGuard::new();
    let mut initial_size = None;

    if interactive {
        let term = std::env::var("TERM").unwrap_or_else(|_| "xterm-256color".to_string());
        let (cols, rows) = crossterm::terminal::size().map_err(JumpError::LocalIo)?;
        channel
            .request_pty(true, &term, cols as u32, rows as u32, 0, 0, &[])
            .await
            .map_err(shell_stage)?;
        raw_guard.enable()?;
        initial_size = Some((cols, rows));
    }

    channel.request_shell(true).await.map_err(shell_stage)?;

    // The remote side only applies sizes once the shell is attached
    if let Some((cols, rows)) = initial_size {
        channel
            .window_change(cols as u32, rows as u32, 0, 0)
            .await
            .map_err(shell_stage)?;
    }

    let (resize_tx, mut resize_rx) = mpsc::channel(4);
    let winch_task = interactive.then(|| tokio::spawn(watch_resizes(resize_tx, cancel.clone())));

    // Keyboard input runs through its own channel so the main loop never
    // holds two borrows of the session channel at once
    let (input_tx, mut input_rx) = mpsc::channel::<std::io::Result<Vec<u8>>>(4);
    let input_task = tokio::spawn(read_stdin(input_tx));

    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    let mut exit_status = None;
    let mut stdin_open = true;

    let result = loop {
        let step = tokio::select! {
            input = input_rx.recv(), if stdin_open => match input {
                Some(input) => Step::Input(input),
                None => {
                    stdin_open = false;
                    continue;
                }
            },
            Some((cols, rows)) = resize_rx.recv() => Step::Resize(cols, rows),
            msg = channel.wait() => Step::Remote(msg),
            _ = cancel.cancelled() => Step::Cancelled,
        };

        match step {
            Step::Input(Ok(bytes)) => {
                if bytes.is_empty() {
                    stdin_open = false;
                    let _ = channel.eof().await;
                } else if let Err(err) = channel.data(&bytes[..]).await {
                    break Err(shell_stage(err));
                }
            }
            Step::Input(Err(err)) => break Err(JumpError::LocalIo(err)),
            Step::Resize(cols, rows) => {
                if let Err(err) = channel.window_change(cols as u32, rows as u32, 0, 0).await {
                    tracing::debug!("window change failed: {}", err);
                }
            }
            Step::Remote(Some(ChannelMsg::Data { data })) => {
                if let Err(err) = forward(&mut stdout, &data).await {
                    break Err(JumpError::LocalIo(err));
                }
            }
            Step::Remote(Some(ChannelMsg::ExtendedData { data, ext: 1 })) => {
                if let Err(err) = forward(&mut stderr, &data).await {
                    break Err(JumpError::LocalIo(err));
                }
            }
            Step::Remote(Some(ChannelMsg::ExitStatus { exit_status: code })) => {
                exit_status = Some(code);
            }
            Step::Remote(Some(ChannelMsg::Eof)) => {}
            Step::Remote(Some(ChannelMsg::Close)) | Step::Remote(None) => {
                break Ok(Some(exit_status.unwrap_or(0)));
            }
            Step::Remote(Some(_)) => {}
            Step::Cancelled => break Ok(exit_status),
        }
    };

    drop(raw_guard);
    input_task.abort();
    if let Some(task) = winch_task {
        task.abort();
    }
    result
}

async fn forward<W>(out: &mut W, data: &[u8]) -> std::io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    out.write_all(data).await?;
    out.flush().await
}

async fn read_stdin(tx: mpsc::Sender<std::io::Result<Vec<u8>>>) {
    let mut stdin = tokio::io::stdin();
    let mut buf = [0u8; 8192];
    loop {
        let chunk = match stdin.read(&mut buf).await {
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(err) => Err(err),
        };
        let stop = matches!(&chunk, Ok(bytes) if bytes.is_empty()) || chunk.is_err();
        if tx.send(chunk).await.is_err() || stop {
            break;
        }
    }
}

async fn watch_resizes(tx: mpsc::Sender<(u16, u16)>, cancel: CancellationToken) {
    let Ok(mut winch) = signal(SignalKind::window_change()) else {
        return;
    };
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = winch.recv() => {
                if received.is_none() {
                    break;
                }
                if let Ok((cols, rows)) = crossterm::terminal::size() {
                    if tx.send((cols, rows)).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}
