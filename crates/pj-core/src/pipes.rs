//! In-process duplex transports
//!
//! A [`DuplexPipe`] pairs any reader with any writer into a single
//! connection-like object that stream protocols (an SSH client transport,
//! the tunnel RPC codec) can treat as a socket. [`virtual_pipe_pair`] builds
//! two of them from an in-memory duplex stream; [`stdio_stream`] wraps a
//! process's own stdin/stdout the same way.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf, ReadHalf, WriteHalf};

/// Buffer capacity of each underlying in-memory pipe
pub const PIPE_BUFFER_SIZE: usize = 64 * 1024;

/// A reader and a writer joined into one duplex stream.
///
/// No buffering beyond the underlying pipe; the creator owns both ends and
/// dropping (or shutting down) the write side delivers end-of-stream to the
/// peer's pending reads.
#[derive(Debug)]
pub struct DuplexPipe<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> DuplexPipe<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Split back into the underlying halves
    pub fn into_split(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

impl<R, W> AsyncRead for DuplexPipe<R, W>
where
    R: AsyncRead + Unpin,
    W: Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}

impl<R, W> AsyncWrite for DuplexPipe<R, W>
where
    R: Unpin,
    W: AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().writer).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_shutdown(cx)
    }
}

/// One end of an in-process virtual connection
pub type VirtualConn = DuplexPipe<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

/// Two connected virtual connections.
///
/// Bytes written to one end become readable on the other, in both
/// directions, exactly like a connected socket pair. Each end must be owned
/// by exactly one component. Dropping an end (both halves, if split)
/// delivers end-of-stream to the peer's pending reads; no explicit
/// shutdown is required on abort paths.
pub fn virtual_pipe_pair() -> (VirtualConn, VirtualConn) {
    let (a, b) = tokio::io::duplex(PIPE_BUFFER_SIZE);
    let (read_a, write_a) = tokio::io::split(a);
    let (read_b, write_b) = tokio::io::split(b);
    (
        DuplexPipe::new(read_a, write_a),
        DuplexPipe::new(read_b, write_b),
    )
}

/// This process's stdin/stdout as a duplex stream, for the sub-commands that
/// speak a protocol over their own standard streams
pub fn stdio_stream() -> DuplexPipe<tokio::io::Stdin, tokio::io::Stdout> {
    DuplexPipe::new(tokio::io::stdin(), tokio::io::stdout())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn bytes_cross_between_ends() {
        let (mut a, mut b) = virtual_pipe_pair();

        a.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        b.write_all(b"world").await.unwrap();
        a.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");
    }

    #[tokio::test]
    async fn dropping_one_end_signals_eof() {
        let (a, mut b) = virtual_pipe_pair();
        drop(a);

        let mut buf = Vec::new();
        let n = b.read_to_end(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn shutdown_unblocks_pending_read() {
        let (mut a, mut b) = virtual_pipe_pair();

        let reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            b.read_to_end(&mut buf).await.unwrap();
            buf
        });

        a.write_all(b"bye").await.unwrap();
        a.shutdown().await.unwrap();
        drop(a);

        assert_eq!(reader.await.unwrap(), b"bye");
    }

    #[tokio::test]
    async fn dropping_split_halves_signals_eof() {
        let (a, mut b) = virtual_pipe_pair();
        let (read_a, write_a) = a.into_split();
        drop(write_a);
        drop(read_a);

        let mut buf = Vec::new();
        assert_eq!(b.read_to_end(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn split_halves_work_independently() {
        let (a, mut b) = virtual_pipe_pair();
        let (mut read_a, mut write_a) = a.into_split();

        write_a.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        b.write_all(b"pong").await.unwrap();
        read_a.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }
}
