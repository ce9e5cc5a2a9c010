//! Durable on-disk view: per-severity log streams plus the retention sweep.
//!
//! Persistence deliberately ignores the suppression filter: operators want
//! the full record on disk even when the live views are quieted. Any I/O
//! failure disables disk writing for the remainder of the session, reported
//! once; a degraded logging subsystem must never crash the host.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::aggregate::LogAggregator;
use crate::config::PersistConfig;
use crate::intercept::{CallbackId, Interceptor};
use crate::types::{LogEvent, LogRecord, Severity};
use crate::CaptureContext;

// ---------------------------------------------------------------------------
// Writer state
// ---------------------------------------------------------------------------

#[derive(Default)]
struct WriterState {
    disabled: bool,
    dirty: bool,
    all: Option<BufWriter<File>>,
    warnings: Option<BufWriter<File>>,
    errors: Option<BufWriter<File>>,
}

struct PersistState {
    cfg: PersistConfig,
    intercept: Arc<Interceptor>,
    writer: Mutex<WriterState>,
    subscription: Mutex<Option<CallbackId>>,
}

impl PersistState {
    /// Close any open streams, then open fresh ones with a new timestamp.
    /// Opening resets the session's disabled flag; a failure here trips it
    /// again before anything is written.
    fn open_streams(&self) {
        let mut w = self.writer.lock();
        close_streams(&mut w);
        w.disabled = false;
        w.dirty = false;

        let cfg = &self.cfg;
        if !(cfg.write_all || cfg.write_warnings || cfg.write_errors) {
            return;
        }
        if let Err(err) = std::fs::create_dir_all(&cfg.dir) {
            disable_on_error(&mut w, "log directory unavailable", &err);
            return;
        }

        let stamp = Utc::now().format(&cfg.file_timestamp_format).to_string();
        let open = |level: &str| -> io::Result<BufWriter<File>> {
            let name = format!("{}.{}.{}.txt", cfg.prefix, stamp, level);
            Ok(BufWriter::new(File::create(cfg.dir.join(name))?))
        };
        let opened = (|| -> io::Result<()> {
            if cfg.write_all {
                w.all = Some(open("INFO")?);
            }
            if cfg.write_warnings {
                w.warnings = Some(open("WARNING")?);
            }
            if cfg.write_errors {
                w.errors = Some(open("ERROR")?);
            }
            Ok(())
        })();
        if let Err(err) = opened {
            disable_on_error(&mut w, "open failure", &err);
        }
    }

    fn write_event(&self, event: &LogEvent) {
        let mut w = self.writer.lock();
        if w.disabled {
            return;
        }
        let title = event.title(&self.cfg.timestamp_format);
        let block = (event.severity == Severity::Exception)
            .then(|| indent_block(event.stack_trace()));
        match write_streams(&mut w, event.severity, &title, block.as_deref()) {
            Ok(wrote) => {
                if wrote {
                    w.dirty = true;
                }
            }
            Err(err) => disable_on_error(&mut w, "write failure", &err),
        }
    }

    /// Flush all open streams. Returns whether anything had been written
    /// since the last flush.
    fn flush_buffered(&self) -> bool {
        let mut w = self.writer.lock();
        if w.disabled {
            return false;
        }
        let had_buffered = w.dirty;
        let flushed = (|| -> io::Result<()> {
            if let Some(f) = w.all.as_mut() {
                f.flush()?;
            }
            if let Some(f) = w.warnings.as_mut() {
                f.flush()?;
            }
            if let Some(f) = w.errors.as_mut() {
                f.flush()?;
            }
            Ok(())
        })();
        match flushed {
            Ok(()) => {
                w.dirty = false;
                had_buffered
            }
            Err(err) => {
                disable_on_error(&mut w, "flush failure", &err);
                false
            }
        }
    }

    fn close(&self) {
        close_streams(&mut self.writer.lock());
    }
}

fn close_streams(w: &mut WriterState) {
    for stream in [w.all.take(), w.warnings.take(), w.errors.take()] {
        if let Some(mut f) = stream {
            let _ = f.flush();
        }
    }
    w.dirty = false;
}

/// Disabling is the first observable effect of a failure, so a concurrent
/// caller can never race into a half-closed writer. Reported exactly once
/// per session: later events return early on the flag.
fn disable_on_error(w: &mut WriterState, context: &str, err: &io::Error) {
    w.disabled = true;
    w.all = None;
    w.warnings = None;
    w.errors = None;
    tracing::error!(%err, "disk logging disabled for this session: {context}");
}

fn write_streams(
    w: &mut WriterState,
    severity: Severity,
    title: &str,
    block: Option<&str>,
) -> io::Result<bool> {
    let mut wrote = false;
    if let Some(f) = w.all.as_mut() {
        write_entry(f, title, block)?;
        wrote = true;
    }
    if severity >= Severity::Warning {
        if let Some(f) = w.warnings.as_mut() {
            write_entry(f, title, block)?;
            wrote = true;
        }
    }
    if severity >= Severity::Error {
        if let Some(f) = w.errors.as_mut() {
            write_entry(f, title, block)?;
            wrote = true;
        }
    }
    Ok(wrote)
}

fn write_entry(f: &mut BufWriter<File>, title: &str, block: Option<&str>) -> io::Result<()> {
    writeln!(f, "{title}")?;
    if let Some(block) = block {
        f.write_all(block.as_bytes())?;
    }
    Ok(())
}

fn indent_block(trace: &str) -> String {
    let mut out = String::new();
    for line in trace.lines() {
        out.push_str("    ");
        out.push_str(line);
        out.push('\n');
    }
    out
}

// ---------------------------------------------------------------------------
// PersistentAggregator
// ---------------------------------------------------------------------------

/// The durable view. Holds no in-memory records; each accepted event is
/// formatted and appended to the enabled severity streams.
pub struct PersistentAggregator {
    state: Arc<PersistState>,
}

impl PersistentAggregator {
    pub fn new(ctx: &CaptureContext) -> Self {
        PersistentAggregator {
            state: Arc::new(PersistState {
                cfg: ctx.config().persist.clone(),
                intercept: ctx.interceptor().clone(),
                writer: Mutex::new(WriterState::default()),
                subscription: Mutex::new(None),
            }),
        }
    }

    /// Flush open streams to disk; the external timer collaborator calls
    /// this periodically.
    pub fn flush_buffered(&self) -> bool {
        self.state.flush_buffered()
    }
}

impl LogAggregator for PersistentAggregator {
    /// Rotates: closes and flushes any open files, opens fresh ones, runs
    /// the retention sweep, then subscribes (if not already subscribed).
    fn start_capture(&self) {
        self.state.open_streams();
        retention_sweep(&self.state.cfg);

        let mut subscription = self.state.subscription.lock();
        if subscription.is_some() {
            return;
        }
        let weak: Weak<PersistState> = Arc::downgrade(&self.state);
        let id = self.state.intercept.register_preview(Box::new(move |event| {
            match weak.upgrade() {
                Some(state) => {
                    state.write_event(event);
                    Ok(())
                }
                None => anyhow::bail!("persistent aggregator state dropped"),
            }
        }));
        *subscription = Some(id);
    }

    fn stop_capture(&self) {
        if let Some(id) = self.state.subscription.lock().take() {
            self.state.intercept.unregister_preview(id);
        }
        self.state.close();
    }

    fn records(&self) -> Vec<LogRecord> {
        Vec::new()
    }

    fn clear(&self) {}

    fn flush_pending(&self) -> bool {
        self.state.flush_buffered()
    }

    /// Persistence ignores the suppression filter by design.
    fn update_filter(&self) {}

    fn severity_count(&self, _severity: Severity) -> usize {
        0
    }
}

// ---------------------------------------------------------------------------
// Retention sweep
// ---------------------------------------------------------------------------

struct SweepCandidate {
    path: PathBuf,
    created: DateTime<Utc>,
    size: i64,
}

/// Enforce the count/size/age budgets over all files matching the configured
/// prefix, oldest-creation-time first. The three checks apply per file in
/// that fixed precedence; a threshold <= 0 disables its check, and with all
/// three disabled the sweep is skipped. Failures are logged and skipped,
/// never surfaced.
fn retention_sweep(cfg: &PersistConfig) {
    let max_files = cfg.max_files;
    let max_bytes = cfg.max_total_mb.saturating_mul(1024 * 1024);
    let max_age_hours = cfg.max_age_hours;
    if max_files <= 0 && max_bytes <= 0 && max_age_hours <= 0 {
        return;
    }

    let entries = match std::fs::read_dir(&cfg.dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(dir = %cfg.dir.display(), %err, "retention sweep skipped");
            return;
        }
    };

    let prefix = format!("{}.", cfg.prefix);
    let mut files: Vec<SweepCandidate> = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(&prefix) || !name.ends_with(".txt") {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_file() {
            continue;
        }
        // created() is unsupported on some filesystems; fall back to mtime
        // rather than failing the sweep.
        let stamp = meta
            .created()
            .or_else(|_| meta.modified())
            .unwrap_or_else(|_| std::time::SystemTime::now());
        files.push(SweepCandidate {
            path: entry.path(),
            created: DateTime::<Utc>::from(stamp),
            size: meta.len() as i64,
        });
    }
    files.sort_by_key(|f| f.created);

    let mut remaining = files.len() as i64;
    let mut total: i64 = files.iter().map(|f| f.size).sum();
    let now = Utc::now();

    for file in &files {
        let delete = if max_files > 0 && remaining > max_files {
            true
        } else if max_bytes > 0 && total > max_bytes {
            true
        } else {
            max_age_hours > 0 && (now - file.created).num_hours() > max_age_hours
        };
        if !delete {
            continue;
        }
        match std::fs::remove_file(&file.path) {
            Ok(()) => {
                remaining -= 1;
                total -= file.size;
            }
            Err(err) => {
                tracing::warn!(path = %file.path.display(), %err, "retention sweep could not delete file");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
