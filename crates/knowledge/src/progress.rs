//! Progress reporting for document ingestion.
//!
//! The ingester reports each phase through a [`ProgressReporter`]; the CLI
//! turns events into status lines, tests collect them.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Stage of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestPhase {
    Discover,
    Parse,
    Chunk,
    Embed,
    Index,
    Skip,
}

impl IngestPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::Parse => "parse",
            Self::Chunk => "chunk",
            Self::Embed => "embed",
            Self::Index => "index",
            Self::Skip => "skip",
        }
    }
}

impl fmt::Display for IngestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One progress update.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub phase: IngestPhase,

    /// Units done so far (files, chunks or batches, depending on phase)
    pub current: u64,

    /// Total units, when known
    pub total: Option<u64>,

    pub message: String,

    /// Seconds since the reporter was created
    pub elapsed_secs: f64,
}

impl ProgressEvent {
    /// Percentage complete, when the total is known.
    pub fn percentage(&self) -> Option<f64> {
        self.total.map(|t| {
            if t > 0 {
                (self.current as f64 / t as f64) * 100.0
            } else {
                100.0
            }
        })
    }

    /// `[phase] current/total (pct%) - message`
    pub fn format_simple(&self) -> String {
        let progress = match self.total {
            Some(total) => format!("{}/{}", self.current, total),
            None => self.current.to_string(),
        };
        let pct = self
            .percentage()
            .map(|p| format!(" ({:.0}%)", p))
            .unwrap_or_default();

        format!("[{}] {}{} - {}", self.phase, progress, pct, self.message)
    }
}

pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Emits progress events to an optional callback and to `tracing`.
#[derive(Clone)]
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    start_time: Instant,
}

impl ProgressReporter {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(callback),
            start_time: Instant::now(),
        }
    }

    /// Reporter that only logs.
    pub fn noop() -> Self {
        Self {
            callback: None,
            start_time: Instant::now(),
        }
    }

    fn emit(&self, phase: IngestPhase, current: u64, total: Option<u64>, message: String) {
        let event = ProgressEvent {
            phase,
            current,
            total,
            message,
            elapsed_secs: self.start_time.elapsed().as_secs_f64(),
        };

        tracing::debug!(
            phase = %event.phase,
            current = event.current,
            total = ?event.total,
            message = %event.message,
            "Ingest progress"
        );

        if let Some(callback) = &self.callback {
            callback(event);
        }
    }

    pub fn discover(&self, found: u64, root: &str) {
        self.emit(IngestPhase::Discover, found, None, format!("scanning {}", root));
    }

    pub fn parse(&self, current: u64, total: u64, file: &str) {
        self.emit(IngestPhase::Parse, current, Some(total), format!("reading {}", file));
    }

    pub fn chunk(&self, chunks: u64, source: &str) {
        self.emit(IngestPhase::Chunk, chunks, None, format!("{} chunks from {}", chunks, source));
    }

    pub fn embed(&self, done: u64, total: u64, model: &str) {
        self.emit(IngestPhase::Embed, done, Some(total), format!("model={}", model));
    }

    pub fn index(&self, chunks: u64, index: &str) {
        self.emit(IngestPhase::Index, chunks, Some(chunks), format!("writing to {}", index));
    }

    pub fn skip(&self, file: &str, reason: &str) {
        self.emit(IngestPhase::Skip, 0, None, format!("{}: {}", file, reason));
    }
}
