//! Logging bootstrap: leveled `tracing` output routed through the redactor.
//!
//! Every formatted line passes through [`Redactor::redact`] before reaching
//! the sink, so a call site that accidentally interpolates a raw credential
//! still never emits it. Structured values attached to events should be
//! redacted at the call site as well; the sink-level scrub is the backstop.

use crate::redact::Redactor;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Environment variable controlling the log filter (`EnvFilter` syntax).
pub const LOG_FILTER_ENV: &str = "KEEL_LOG";

/// Sink selection for the substrate logger.
#[derive(Debug, Clone, Default)]
pub enum LogSink {
    /// Write to standard error (default).
    #[default]
    Stderr,
    /// Append to a log file via a non-blocking worker thread.
    File {
        /// Directory holding the log file.
        directory: std::path::PathBuf,
        /// File name within `directory`.
        file_name: String,
    },
}

/// Writer adapter that redacts each formatted event before forwarding it.
///
/// The fmt layer renders a complete event into one buffer and performs a
/// single write, so per-write redaction sees whole lines.
pub struct RedactingWriter<W: io::Write> {
    redactor: Arc<Redactor>,
    inner: W,
}

impl<W: io::Write> io::Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match std::str::from_utf8(buf) {
            Ok(text) => {
                let redacted = self.redactor.redact(text);
                self.inner.write_all(redacted.as_bytes())?;
                Ok(buf.len())
            }
            // Non-UTF-8 output cannot carry a text-shaped secret; pass through.
            Err(_) => self.inner.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// `MakeWriter` wrapper producing [`RedactingWriter`]s over an inner sink.
pub struct RedactingMakeWriter<M> {
    redactor: Arc<Redactor>,
    inner: M,
}

impl<M> RedactingMakeWriter<M> {
    /// Wrap `inner` so every produced writer redacts through `redactor`.
    pub fn new(redactor: Arc<Redactor>, inner: M) -> Self {
        Self { redactor, inner }
    }
}

impl<'a, M> MakeWriter<'a> for RedactingMakeWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = RedactingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            redactor: self.redactor.clone(),
            inner: self.inner.make_writer(),
        }
    }
}

/// Install the global subscriber: `EnvFilter` from [`LOG_FILTER_ENV`]
/// (default `info`) and an fmt layer over the redacting writer.
///
/// Returns the appender guard when logging to a file; dropping it flushes
/// and stops the worker thread, so callers keep it alive for the process
/// lifetime. Returns `None` if a global subscriber was already installed.
pub fn init(sink: LogSink, redactor: Arc<Redactor>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match sink {
        LogSink::Stderr => {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(RedactingMakeWriter::new(redactor, io::stderr));
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init();
            None
        }
        LogSink::File {
            directory,
            file_name,
        } => {
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(RedactingMakeWriter::new(redactor, writer));
            let installed = tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init()
                .is_ok();
            installed.then_some(guard)
        }
    }
}

/// Convenience for tests and short-lived tools: stderr sink, default rules.
pub fn init_default() -> Option<WorkerGuard> {
    init(LogSink::Stderr, Arc::new(Redactor::new()))
}

/// Resolve a file sink under `root/logs`.
pub fn file_sink(root: &Path, file_name: &str) -> LogSink {
    LogSink::File {
        directory: root.join("logs"),
        file_name: file_name.to_string(),
    }
}
