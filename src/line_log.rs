// src/line_log.rs

//! Per-stream capture buffers and the shared inactivity clock.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::TruncateError;
use crate::truncate::{shrink_by_size, ShrinkOptions};

#[derive(Debug, Default)]
struct LineLogInner {
    lines: Vec<String>,
    complete: bool,
    note: Option<String>,
}

/// Append-only sequence of lines captured from one stream of one run.
///
/// Cloning yields another handle to the same log. The drainer is the only
/// writer; the supervisor reads lengths and the completion flag while the
/// drainer is still running, and reads the text once it has completed.
#[derive(Clone, Debug, Default)]
pub struct LineLog {
    inner: Arc<Mutex<LineLogInner>>,
}

impl LineLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LineLogInner> {
        // A panicking writer leaves the lines intact; keep using them.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends a line. Ignored once the log is complete.
    pub fn push(&self, line: impl Into<String>) {
        let mut inner = self.lock();
        if !inner.complete {
            inner.lines.push(line.into());
        }
    }

    /// Marks the log complete. Only the first call has any effect.
    pub fn mark_complete(&self, note: Option<String>) {
        let mut inner = self.lock();
        if !inner.complete {
            inner.complete = true;
            inner.note = note;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.lock().complete
    }

    pub fn len(&self) -> usize {
        self.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Diagnostic left behind by a read error, if the stream ended with one.
    pub fn note(&self) -> Option<String> {
        self.lock().note.clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lock().lines.clone()
    }

    /// All captured lines joined with `\n`.
    pub fn text(&self) -> String {
        self.lock().lines.join("\n")
    }

    /// [`text`](Self::text) shrunk to at most `size` characters.
    pub fn truncated_text(&self, size: usize, opts: &ShrinkOptions) -> Result<String, TruncateError> {
        let text = self.text();
        Ok(shrink_by_size(&text, size, opts)?.into_owned())
    }
}

/// Monotonic timestamp of the most recent line on any stream of a run.
#[derive(Clone, Debug)]
pub struct ActivityClock {
    last: Arc<Mutex<Instant>>,
}

impl ActivityClock {
    /// Starts the clock at the current instant.
    pub fn new() -> Self {
        Self {
            last: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn touch(&self) {
        let mut last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity().elapsed()
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}
