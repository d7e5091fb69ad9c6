//! Leveled logging shared by both tunnel ends
//!
//! [`ConsoleLogger`] renders on the operator's terminal through `tracing`.
//! [`TunnelLogger`] forwards messages over the tunnel so the in-container
//! helper's output lands on the same terminal. [`LogWriter`] adapts a logger
//! into an `AsyncWrite` that emits one log message per line, for wiring into
//! subprocess stdout/stderr.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;
use tokio::sync::mpsc;

use pj_protocol::LogLevel;

use crate::client::TunnelHandle;

/// A leveled logger.
///
/// `log` must drop messages below the configured filter itself; callers do
/// not pre-filter.
pub trait JumpLogger: Send + Sync {
    fn filter(&self) -> LogLevel;
    fn log(&self, level: LogLevel, message: &str);

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }
    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }
    fn done(&self, message: &str) {
        self.log(LogLevel::Done, message);
    }
    fn warn(&self, message: &str) {
        self.log(LogLevel::Warning, message);
    }
    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

/// Renders log messages on the local terminal via `tracing`
pub struct ConsoleLogger {
    filter: LogLevel,
}

impl ConsoleLogger {
    pub fn new(filter: LogLevel) -> Self {
        Self { filter }
    }
}

impl JumpLogger for ConsoleLogger {
    fn filter(&self) -> LogLevel {
        self.filter
    }

    fn log(&self, level: LogLevel, message: &str) {
        if !level.passes(self.filter) {
            return;
        }
        match level {
            LogLevel::Debug => tracing::debug!("{message}"),
            LogLevel::Info | LogLevel::Done => tracing::info!("{message}"),
            LogLevel::Warning => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
        }
    }
}

/// Forwards log messages over the tunnel.
///
/// Sending is fire-and-forget through an unbounded channel so `log` stays
/// synchronous; a background task drains the channel into the tunnel and
/// stops when the tunnel goes away.
pub struct TunnelLogger {
    filter: LogLevel,
    tx: mpsc::UnboundedSender<(LogLevel, String)>,
}

impl TunnelLogger {
    pub fn new(handle: TunnelHandle, filter: LogLevel) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<(LogLevel, String)>();
        tokio::spawn(async move {
            while let Some((level, message)) = rx.recv().await {
                if handle.log(level, message).await.is_err() {
                    break;
                }
            }
        });
        Self { filter, tx }
    }
}

impl JumpLogger for TunnelLogger {
    fn filter(&self) -> LogLevel {
        self.filter
    }

    fn log(&self, level: LogLevel, message: &str) {
        if !level.passes(self.filter) {
            return;
        }
        let _ = self.tx.send((level, message.to_string()));
    }
}

/// An `AsyncWrite` that turns each written line into one log message.
///
/// Writes never block on the logger. A trailing partial line is held until
/// the next newline and emitted on shutdown or drop.
pub enum LogWriter {
    /// The target level is filtered out; writes are accepted and dropped
    Sink,
    Active {
        logger: Arc<dyn JumpLogger>,
        level: LogLevel,
        buf: Vec<u8>,
    },
}

/// Build a [`LogWriter`] for `level`, collapsing to a sink when the logger's
/// filter would drop every message anyway
pub fn writer(logger: &Arc<dyn JumpLogger>, level: LogLevel) -> LogWriter {
    if level.passes(logger.filter()) {
        LogWriter::Active {
            logger: Arc::clone(logger),
            level,
            buf: Vec::new(),
        }
    } else {
        LogWriter::Sink
    }
}

impl LogWriter {
    fn emit_remainder(&mut self) {
        if let LogWriter::Active { logger, level, buf } = self {
            if !buf.is_empty() {
                let line = String::from_utf8_lossy(buf).into_owned();
                logger.log(*level, line.trim_end_matches('\r'));
                buf.clear();
            }
        }
    }
}

impl AsyncWrite for LogWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            LogWriter::Sink => Poll::Ready(Ok(data.len())),
            LogWriter::Active { logger, level, buf } => {
                buf.extend_from_slice(data);
                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    let text = String::from_utf8_lossy(&line[..line.len() - 1]);
                    logger.log(*level, text.trim_end_matches('\r'));
                }
                Poll::Ready(Ok(data.len()))
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        // Partial lines stay buffered until a newline arrives
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.get_mut().emit_remainder();
        Poll::Ready(Ok(()))
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        self.emit_remainder();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::AsyncWriteExt;

    struct RecordingLogger {
        filter: LogLevel,
        entries: Mutex<Vec<(LogLevel, String)>>,
    }

    impl RecordingLogger {
        fn new(filter: LogLevel) -> Arc<Self> {
            Arc::new(Self {
                filter,
                entries: Mutex::new(Vec::new()),
            })
        }

        fn entries(&self) -> Vec<(LogLevel, String)> {
            self.entries.lock().unwrap().clone()
        }
    }

    impl JumpLogger for RecordingLogger {
        fn filter(&self) -> LogLevel {
            self.filter
        }

        fn log(&self, level: LogLevel, message: &str) {
            if !level.passes(self.filter) {
                return;
            }
            self.entries
                .lock()
                .unwrap()
                .push((level, message.to_string()));
        }
    }

    #[tokio::test]
    async fn writer_tokenizes_lines() {
        let recorder = RecordingLogger::new(LogLevel::Debug);
        let logger: Arc<dyn JumpLogger> = recorder.clone();
        let mut w = writer(&logger, LogLevel::Info);

        w.write_all(b"first li").await.unwrap();
        w.write_all(b"ne\nsecond\n").await.unwrap();
        w.shutdown().await.unwrap();

        let entries = recorder.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], (LogLevel::Info, "first line".to_string()));
        assert_eq!(entries[1], (LogLevel::Info, "second".to_string()));
    }

    #[tokio::test]
    async fn writer_emits_remainder_on_shutdown() {
        let recorder = RecordingLogger::new(LogLevel::Debug);
        let logger: Arc<dyn JumpLogger> = recorder.clone();
        let mut w = writer(&logger, LogLevel::Error);

        w.write_all(b"tail without newline").await.unwrap();
        assert!(recorder.entries().is_empty());

        w.shutdown().await.unwrap();
        assert_eq!(
            recorder.entries(),
            vec![(LogLevel::Error, "tail without newline".to_string())]
        );
    }

    #[tokio::test]
    async fn writer_strips_carriage_returns() {
        let recorder = RecordingLogger::new(LogLevel::Debug);
        let logger: Arc<dyn JumpLogger> = recorder.clone();
        let mut w = writer(&logger, LogLevel::Info);

        w.write_all(b"windows line\r\n").await.unwrap();
        assert_eq!(
            recorder.entries(),
            vec![(LogLevel::Info, "windows line".to_string())]
        );
    }

    #[tokio::test]
    async fn filtered_writer_discards_everything() {
        let recorder = RecordingLogger::new(LogLevel::Warning);
        let logger: Arc<dyn JumpLogger> = recorder.clone();
        let mut w = writer(&logger, LogLevel::Debug);

        assert!(matches!(w, LogWriter::Sink));
        w.write_all(b"noisy output\n").await.unwrap();
        w.shutdown().await.unwrap();
        assert!(recorder.entries().is_empty());
    }

    #[test]
    fn console_logger_drops_below_filter() {
        // Rendering goes through tracing; this only checks the filter gate
        let logger = ConsoleLogger::new(LogLevel::Warning);
        assert_eq!(logger.filter(), LogLevel::Warning);
        assert!(!LogLevel::Info.passes(logger.filter()));
        assert!(LogLevel::Error.passes(logger.filter()));
    }
}
