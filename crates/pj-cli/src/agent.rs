//! SSH agent relay
//!
//! The remote server opens agent-forward channels that must be answered by
//! the operator's local agent socket. The agent protocol is strict
//! request/response with a 4-byte big-endian length prefix, so each
//! complete request from the channel is written to the agent and the single
//! reply is sent back on the same channel.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single agent message; anything larger is a corrupt
/// stream, not a real request
const MAX_AGENT_MESSAGE: usize = 256 * 1024;

/// Buffers bytes arriving on one agent-forward channel and exchanges
/// complete messages with the local agent
pub struct AgentRelay<S> {
    agent: S,
    pending: Vec<u8>,
}

impl<S> AgentRelay<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(agent: S) -> Self {
        Self {
            agent,
            pending: Vec::new(),
        }
    }

    /// Feed channel bytes; returns one reply per completed request.
    ///
    /// Partial requests stay buffered until the rest arrives.
    pub async fn relay(&mut self, bytes: &[u8]) -> io::Result<Vec<Vec<u8>>> {
        self.pending.extend_from_slice(bytes);
        let mut replies = Vec::new();
        while let Some(request) = take_message(&mut self.pending)? {
            self.agent.write_all(&request).await?;
            self.agent.flush().await?;
            replies.push(self.read_reply().await?);
        }
        Ok(replies)
    }

    async fn read_reply(&mut self) -> io::Result<Vec<u8>> {
        let mut prefix = [0u8; 4];
        self.agent.read_exact(&mut prefix).await?;
        let length = u32::from_be_bytes(prefix) as usize;
        if length > MAX_AGENT_MESSAGE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "agent reply too large",
            ));
        }
        let mut reply = vec![0u8; 4 + length];
        reply[..4].copy_from_slice(&prefix);
        self.agent.read_exact(&mut reply[4..]).await?;
        Ok(reply)
    }
}

fn take_message(pending: &mut Vec<u8>) -> io::Result<Option<Vec<u8>>> {
    if pending.len() < 4 {
        return Ok(None);
    }
    let length = u32::from_be_bytes([pending[0], pending[1], pending[2], pending[3]]) as usize;
    if length > MAX_AGENT_MESSAGE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "agent request too large",
        ));
    }
    if pending.len() < 4 + length {
        return Ok(None);
    }
    Ok(Some(pending.drain(..4 + length).collect()))
}
