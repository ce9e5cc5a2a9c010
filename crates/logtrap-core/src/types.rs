//! Core types for logtrap-core.
//!
//! This module defines the data structures shared across all capture layers:
//! the four-severity [`Severity`] scale, the immutable captured [`LogEvent`],
//! the structured stack [`Frame`], and the aggregator-owned [`LogRecord`]
//! that merges events with equal content.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Event severity. The ordering is meaningful: `Warning` and above feed the
/// warning stream, `Error` and above (including `Exception`) feed the error
/// stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Exception,
}

impl Severity {
    /// All severities, in ascending order.
    pub const ALL: [Severity; 4] = [
        Severity::Info,
        Severity::Warning,
        Severity::Error,
        Severity::Exception,
    ];

    /// Stable index into per-severity counter arrays.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Map a `log` facade level onto the four-severity scale. Everything
    /// below `Warn` is `Info`; `Exception` never arrives through the facade.
    pub fn from_log_level(level: log::Level) -> Self {
        match level {
            log::Level::Error => Severity::Error,
            log::Level::Warn => Severity::Warning,
            log::Level::Info | log::Level::Debug | log::Level::Trace => Severity::Info,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // f.pad so titles can column-align severities with a width spec.
        f.pad(match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Exception => "EXCEPTION",
        })
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// One resolved stack frame. `symbol` is the demangled function path with the
/// trailing monomorphization hash stripped; file and line are present only
/// when debug info was available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub symbol: String,
    pub file: Option<PathBuf>,
    pub line: Option<u32>,
}

impl Frame {
    /// Frame with a symbol only, no file/line info. Used by tests and the
    /// exception path.
    pub fn bare(symbol: impl Into<String>) -> Self {
        Frame {
            symbol: symbol.into(),
            file: None,
            line: None,
        }
    }
}

/// Render frames as trace text, one frame per line. With `include_files`,
/// frames that carry debug info gain a `(file:line)` suffix.
pub fn format_frames(frames: &[Frame], include_files: bool) -> String {
    let mut out = String::new();
    for frame in frames {
        out.push_str(&frame.symbol);
        if include_files {
            if let (Some(file), Some(line)) = (&frame.file, frame.line) {
                out.push_str(&format!(" ({}:{})", file.display(), line));
            }
        }
        out.push('\n');
    }
    out
}

// ---------------------------------------------------------------------------
// LogEvent
// ---------------------------------------------------------------------------

/// One intercepted occurrence, immutable after construction.
///
/// The two `OnceLock` cells are the only late-bound state: the
/// filename-enriched trace text (filled at most once by
/// [`LogEvent::resolve_filenames`]) and the memoized content signature.
/// Aggregators share events through `Arc`, so neither cell can be observed
/// half-written.
#[derive(Debug)]
pub struct LogEvent {
    /// Process-lifetime unique, strictly increasing allocation order.
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
    /// Resolved call-site identifier, e.g. `my_app::worker::run`.
    pub source: String,
    /// Structured frames; `None` when the stack was unavailable.
    pub frames: Option<Vec<Frame>>,
    trace: String,
    full_trace: OnceLock<String>,
    signature: OnceLock<u64>,
}

impl LogEvent {
    pub fn new(
        id: u64,
        timestamp: DateTime<Utc>,
        severity: Severity,
        message: String,
        source: String,
        trace: String,
        frames: Option<Vec<Frame>>,
    ) -> Self {
        LogEvent {
            id,
            timestamp,
            severity,
            message,
            source,
            frames,
            trace,
            full_trace: OnceLock::new(),
            signature: OnceLock::new(),
        }
    }

    /// The trace text as captured. This is the signature input and never
    /// changes, regardless of the lazy filename pass.
    pub fn base_trace(&self) -> &str {
        &self.trace
    }

    /// Current trace text: the filename-enriched form once resolved,
    /// otherwise the capture-time form.
    pub fn stack_trace(&self) -> &str {
        self.full_trace
            .get()
            .map(String::as_str)
            .unwrap_or(&self.trace)
    }

    pub fn filenames_resolved(&self) -> bool {
        self.full_trace.get().is_some()
    }

    /// Format the trace with file and line annotations. Runs at most once;
    /// later calls return the cached text. Events without structured frames
    /// keep their capture-time trace.
    pub fn resolve_filenames(&self) -> &str {
        self.full_trace.get_or_init(|| match &self.frames {
            Some(frames) => format_frames(frames, true),
            None => self.trace.clone(),
        })
    }

    /// Memoized content signature over (source, severity, message, trace).
    pub fn signature(&self) -> u64 {
        *self.signature.get_or_init(|| {
            let mut h = DefaultHasher::new();
            self.source.hash(&mut h);
            self.severity.index().hash(&mut h);
            self.message.hash(&mut h);
            self.trace.hash(&mut h);
            h.finish()
        })
    }

    /// Exact content equality, the relation the signature approximates.
    pub fn same_content(&self, other: &LogEvent) -> bool {
        self.source == other.source
            && self.severity == other.severity
            && self.message == other.message
            && self.trace == other.trace
    }

    /// One-line display form: `<timestamp> <SEVERITY> <source>: <message>`.
    pub fn title(&self, ts_format: &str) -> String {
        format!(
            "{} {:<9} {}: {}",
            self.timestamp.format(ts_format),
            self.severity,
            self.source,
            self.message
        )
    }
}

// ---------------------------------------------------------------------------
// LogRecord
// ---------------------------------------------------------------------------

/// An aggregator-owned, possibly-merged view of one or more events sharing
/// the same content signature.
///
/// The representative event is shared through `Arc` and immutable, so `Clone`
/// is the deep copy used by snapshot aggregators: the clone can never observe
/// mutation through the original.
#[derive(Debug, Clone)]
pub struct LogRecord {
    event: Arc<LogEvent>,
    last_id: u64,
    timestamp: DateTime<Utc>,
    merge_count: u64,
}

impl LogRecord {
    pub fn new(event: Arc<LogEvent>) -> Self {
        let last_id = event.id;
        let timestamp = event.timestamp;
        LogRecord {
            event,
            last_id,
            timestamp,
            merge_count: 1,
        }
    }

    /// The representative event (the first occurrence merged in).
    pub fn event(&self) -> &Arc<LogEvent> {
        &self.event
    }

    pub fn severity(&self) -> Severity {
        self.event.severity
    }

    pub fn source(&self) -> &str {
        &self.event.source
    }

    pub fn message(&self) -> &str {
        &self.event.message
    }

    /// Id of the most recent merged occurrence.
    pub fn last_id(&self) -> u64 {
        self.last_id
    }

    /// Timestamp of the most recent merged occurrence.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Number of occurrences folded into this record, >= 1.
    pub fn merge_count(&self) -> u64 {
        self.merge_count
    }

    pub fn signature(&self) -> u64 {
        self.event.signature()
    }

    /// Whether `event` may be merged into this record: signatures must match
    /// and the underlying content must compare equal, so a hash collision can
    /// never fold distinct events together.
    pub fn matches(&self, event: &LogEvent) -> bool {
        self.signature() == event.signature() && self.event.same_content(event)
    }

    /// Fold another occurrence in: advance `last_id` and `timestamp`, bump
    /// the merge count. Callers guarantee `matches(event)`.
    pub fn merge(&mut self, event: &LogEvent) {
        debug_assert!(self.event.same_content(event));
        self.last_id = event.id;
        self.timestamp = event.timestamp;
        self.merge_count += 1;
    }

    /// One-line display form with the latest timestamp; merged records gain
    /// an `(xN)` occurrence suffix.
    pub fn title(&self, ts_format: &str) -> String {
        let mut title = format!(
            "{} {:<9} {}: {}",
            self.timestamp.format(ts_format),
            self.event.severity,
            self.event.source,
            self.event.message
        );
        if self.merge_count > 1 {
            title.push_str(&format!(" (x{})", self.merge_count));
        }
        title
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: u64, severity: Severity, message: &str, source: &str) -> LogEvent {
        LogEvent::new(
            id,
            Utc::now(),
            severity,
            message.to_string(),
            source.to_string(),
            String::new(),
            None,
        )
    }

    #[test]
    fn severity_ordering_feeds_stream_thresholds() {
        assert!(Severity::Warning >= Severity::Warning);
        assert!(Severity::Exception >= Severity::Error);
        assert!(Severity::Info < Severity::Warning);
    }

    #[test]
    fn equal_content_means_equal_signature() {
        let a = event(1, Severity::Error, "boom", "app::run");
        let b = event(2, Severity::Error, "boom", "app::run");
        assert_eq!(a.signature(), b.signature());
        assert!(a.same_content(&b));
    }

    #[test]
    fn different_severity_means_different_signature() {
        let a = event(1, Severity::Error, "boom", "app::run");
        let b = event(2, Severity::Warning, "boom", "app::run");
        assert_ne!(a.signature(), b.signature());
    }

    #[test]
    fn merge_advances_recency_but_keeps_representative() {
        let first = Arc::new(event(1, Severity::Error, "boom", "app::run"));
        let second = event(9, Severity::Error, "boom", "app::run");
        let mut record = LogRecord::new(first);
        record.merge(&second);
        assert_eq!(record.last_id(), 9);
        assert_eq!(record.merge_count(), 2);
        assert_eq!(record.event().id, 1);
    }

    #[test]
    fn filename_resolution_runs_once() {
        let ev = LogEvent::new(
            1,
            Utc::now(),
            Severity::Info,
            "hi".into(),
            "app::run".into(),
            "app::run\n".into(),
            Some(vec![Frame {
                symbol: "app::run".into(),
                file: Some(PathBuf::from("src/run.rs")),
                line: Some(42),
            }]),
        );
        assert!(!ev.filenames_resolved());
        let full = ev.resolve_filenames().to_string();
        assert!(full.contains("src/run.rs:42"));
        assert!(ev.filenames_resolved());
        assert_eq!(ev.stack_trace(), full);
        // signature still hashes the capture-time trace
        assert_eq!(ev.base_trace(), "app::run\n");
    }
}
