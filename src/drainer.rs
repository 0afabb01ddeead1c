// src/drainer.rs

//! One task per child output stream.
//!
//! Each pipe gets its own reader so a child that floods stderr while stdout
//! stays quiet can never fill an OS pipe buffer and stall.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::line_log::{ActivityClock, LineLog};
use crate::sink::{Stream, TranscriptSink};

/// How a [`StreamDrainer::join`] ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The task reached EOF or a read error and exited.
    Finished,
    /// The task was still blocked after the join budget and was aborted.
    Abandoned,
}

/// Reads newline-delimited records from one pipe into a [`LineLog`].
pub struct StreamDrainer {
    stream: Stream,
    log: LineLog,
    handle: JoinHandle<()>,
}

impl StreamDrainer {
    /// Spawns the reading task. It starts draining immediately.
    pub fn spawn<R>(
        stream: Stream,
        reader: R,
        log: LineLog,
        clock: ActivityClock,
        sink: Arc<dyn TranscriptSink>,
        label: String,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let task_log = log.clone();
        let handle = tokio::spawn(async move {
            drain(stream, reader, task_log, clock, sink, label).await;
        });
        Self { stream, log, handle }
    }

    pub fn stream(&self) -> Stream {
        self.stream
    }

    pub fn log(&self) -> &LineLog {
        &self.log
    }

    pub fn is_complete(&self) -> bool {
        self.log.is_complete()
    }

    /// Waits at most `budget` for the task to exit, aborting it otherwise.
    pub async fn join(self, budget: Duration) -> DrainOutcome {
        let mut handle = self.handle;
        match tokio::time::timeout(budget, &mut handle).await {
            Ok(Ok(())) => DrainOutcome::Finished,
            Ok(Err(e)) => {
                warn!(stream = %self.stream, error = %e, "Drainer task failed");
                self.log.mark_complete(Some(format!("{} drainer failed: {e}", self.stream)));
                DrainOutcome::Finished
            }
            Err(_) => {
                warn!(
                    stream = %self.stream,
                    budget = ?budget,
                    "Drainer did not finish after the process ended; pipe still held open"
                );
                handle.abort();
                self.log.mark_complete(Some(format!(
                    "{} pipe still open {budget:?} after the process ended",
                    self.stream
                )));
                DrainOutcome::Abandoned
            }
        }
    }
}

async fn drain<R>(
    stream: Stream,
    reader: R,
    log: LineLog,
    clock: ActivityClock,
    sink: Arc<dyn TranscriptSink>,
    label: String,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(1024);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                debug!(stream = %stream, lines = log.len(), "EOF");
                log.mark_complete(None);
                return;
            }
            Ok(_) => {
                let line = decode_line(&buf);
                clock.touch();
                if let Err(e) = sink.line(&label, stream, &line) {
                    debug!(stream = %stream, error = %e, "Transcript sink rejected line");
                }
                log.push(line);
            }
            Err(e) => {
                // Partial output is still worth returning.
                warn!(stream = %stream, error = %e, "Error reading output, stopping drain");
                log.mark_complete(Some(format!("error reading {stream}: {e}")));
                return;
            }
        }
    }
}

/// Strips the record terminator and decodes lossily.
fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
        if end > 0 && raw[end - 1] == b'\r' {
            end -= 1;
        }
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
