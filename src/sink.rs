// src/sink.rs

//! Observers that receive captured lines while a command is still running.
//!
//! Sinks exist for operator visibility during long builds. A failing sink
//! never affects the run: the drainer logs the error and keeps reading.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::info;

/// Which child output stream a line came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn as_str(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification-only receiver of captured lines.
///
/// `line` is called from the drainer task between reads, so it must be
/// cheap: anything slow delays draining of that stream and occupies a
/// runtime worker. Buffer, and do the expensive part in `flush`, which the
/// supervisor calls once after the output has been fully drained.
pub trait TranscriptSink: Send + Sync {
    fn line(&self, label: &str, stream: Stream, line: &str) -> io::Result<()>;

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl TranscriptSink for NullSink {
    fn line(&self, _label: &str, _stream: Stream, _line: &str) -> io::Result<()> {
        Ok(())
    }
}

/// Emits every line as a `tracing` event.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl TranscriptSink for TracingSink {
    fn line(&self, label: &str, stream: Stream, line: &str) -> io::Result<()> {
        info!(job = label, stream = %stream, "{}", line);
        Ok(())
    }
}

/// Appends lines to a transcript file, one `[label] [stream] line` record
/// per line.
///
/// Writes go through a `BufWriter`, so most lines only touch memory. Records
/// reach the file when the buffer fills, on [`flush`](TranscriptSink::flush)
/// and on drop.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: Mutex<BufWriter<File>>,
}

impl FileSink {
    /// Opens `path` for appending, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&self) -> io::Result<MutexGuard<'_, BufWriter<File>>> {
        self.file
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "transcript file lock poisoned"))
    }
}

impl TranscriptSink for FileSink {
    fn line(&self, label: &str, stream: Stream, line: &str) -> io::Result<()> {
        writeln!(self.writer()?, "[{label}] [{stream}] {line}")
    }

    fn flush(&self) -> io::Result<()> {
        self.writer()?.flush()
    }
}

/// Forwards every line to several sinks.
///
/// Each sink sees every line even when an earlier one fails; the first error
/// is returned.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn TranscriptSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn TranscriptSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn TranscriptSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl TranscriptSink for FanoutSink {
    fn line(&self, label: &str, stream: Stream, line: &str) -> io::Result<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.line(label, stream, line) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn flush(&self) -> io::Result<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.flush() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
