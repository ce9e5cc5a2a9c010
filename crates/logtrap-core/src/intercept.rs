//! The process-wide log interceptor.
//!
//! Hooks the `log` facade so every `log::info!`/`warn!`/`error!` in the host
//! process flows through here. Events from the primary thread (the one that
//! built the interceptor) are dispatched to subscribers immediately; events
//! from any other thread are tagged `[Thread:#N]` and queued until the
//! primary thread drains them. Exception events enter through
//! [`Interceptor::report_exception`], optionally fed by the panic hook.
//!
//! Nothing in this module surfaces errors to the logging caller: a
//! malfunctioning subscriber is unregistered, a missing stack degrades to
//! sentinels, and a stopped interceptor simply ignores traffic.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Once, Weak};
use std::thread::{self, ThreadId};

use chrono::Utc;
use lazy_static::lazy_static;
use parking_lot::{Mutex, RwLock};

use crate::resolve::{panic_trace, Resolved, SourceResolver};
use crate::types::{LogEvent, Severity};

/// Subscriber callback. Returning `Err` permanently unregisters the
/// callback after the current dispatch completes; it must not panic.
pub type PreviewFn = Box<dyn Fn(&Arc<LogEvent>) -> anyhow::Result<()> + Send + Sync>;

/// Handle for unregistering a preview callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackId(u64);

pub struct Interceptor {
    resolver: SourceResolver,
    enabled: bool,
    started: AtomicBool,
    next_event_id: AtomicU64,
    next_callback_id: AtomicU64,
    callbacks: Mutex<Vec<(CallbackId, PreviewFn)>>,
    background: Mutex<Vec<Arc<LogEvent>>>,
    primary: ThreadId,
}

lazy_static! {
    /// Target of the process-wide facade hook. The `log` crate allows one
    /// logger per process and no uninstall, so the hook forwards through
    /// this slot and start/stop toggle the interceptor's own gate.
    static ref HOOK_TARGET: RwLock<Weak<Interceptor>> = RwLock::new(Weak::new());
}

thread_local! {
    // Re-entrancy gate: diagnostics emitted while dispatching (by this
    // crate or by a subscriber) must not be re-ingested on the same thread.
    static IN_DISPATCH: Cell<bool> = const { Cell::new(false) };
}

impl Interceptor {
    /// Build the interceptor. The constructing thread becomes the primary
    /// execution context for the synchronous dispatch path.
    pub fn new(enabled: bool, resolver: SourceResolver) -> Arc<Self> {
        Arc::new(Interceptor {
            resolver,
            enabled,
            started: AtomicBool::new(false),
            next_event_id: AtomicU64::new(1),
            next_callback_id: AtomicU64::new(1),
            callbacks: Mutex::new(Vec::new()),
            background: Mutex::new(Vec::new()),
            primary: thread::current().id(),
        })
    }

    // -- lifecycle ----------------------------------------------------------

    /// Begin interception. Idempotent; a no-op when the `capture.enabled`
    /// config flag is off.
    pub fn start_intercepting(self: &Arc<Self>) {
        if !self.enabled {
            return;
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        *HOOK_TARGET.write() = Arc::downgrade(self);
        install_facade_hook();
    }

    /// Stop interception. Idempotent. The facade hook stays installed (the
    /// `log` crate has no uninstall) but traffic is ignored from here on.
    pub fn stop_intercepting(&self) {
        self.started.store(false, Ordering::SeqCst);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    // -- subscription -------------------------------------------------------

    /// Register a preview callback. Callbacks run in registration order on
    /// every dispatched event.
    pub fn register_preview(&self, callback: PreviewFn) -> CallbackId {
        let id = CallbackId(self.next_callback_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks.lock().push((id, callback));
        id
    }

    /// Remove a callback; returns whether it was still registered.
    pub fn unregister_preview(&self, id: CallbackId) -> bool {
        let mut callbacks = self.callbacks.lock();
        let before = callbacks.len();
        callbacks.retain(|(cb_id, _)| *cb_id != id);
        callbacks.len() != before
    }

    // -- ingestion ----------------------------------------------------------

    /// Ingest one event at the given severity, resolving its source from the
    /// current call stack. This is the path behind the facade hook; it is
    /// public so hosts and harnesses can feed events directly.
    pub fn emit(&self, severity: Severity, message: impl Into<String>) {
        if !self.is_started() {
            return;
        }
        IN_DISPATCH.with(|gate| {
            if gate.get() {
                return;
            }
            gate.set(true);
            let resolved = self.resolver.resolve(0);
            self.route(severity, message.into(), resolved);
            gate.set(false);
        });
    }

    /// Ingest an exception event carrying an externally supplied trace.
    pub fn report_exception(&self, message: impl Into<String>, trace: &str) {
        if !self.is_started() {
            return;
        }
        IN_DISPATCH.with(|gate| {
            if gate.get() {
                return;
            }
            gate.set(true);
            let resolved = self.resolver.resolve_exception(trace);
            self.route(Severity::Exception, message.into(), resolved);
            gate.set(false);
        });
    }

    /// Route panics into the exception path, chaining the previous panic
    /// hook so default reporting is preserved.
    pub fn hook_panics(self: &Arc<Self>) {
        let target = Arc::downgrade(self);
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if let Some(intercept) = target.upgrade() {
                let payload = if let Some(s) = info.payload().downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = info.payload().downcast_ref::<String>() {
                    s.clone()
                } else {
                    "panic".to_string()
                };
                let message = match info.location() {
                    Some(loc) => format!("panic at {}:{}: {payload}", loc.file(), loc.line()),
                    None => format!("panic: {payload}"),
                };
                intercept.report_exception(message, &panic_trace());
            }
            previous(info);
        }));
    }

    /// Deliver every queued background event through the preview fan-out,
    /// preserving arrival order within the batch. Primary context only.
    /// Returns the number of events delivered.
    pub fn drain_background(&self) -> usize {
        let batch = std::mem::take(&mut *self.background.lock());
        if batch.is_empty() {
            return 0;
        }
        IN_DISPATCH.with(|gate| {
            let was = gate.replace(true);
            for event in &batch {
                self.dispatch(event);
            }
            gate.set(was);
        });
        batch.len()
    }

    // -- internals ----------------------------------------------------------

    fn route(&self, severity: Severity, message: String, resolved: Resolved) {
        let current = thread::current().id();
        let on_primary = current == self.primary;
        let message = if on_primary {
            message
        } else {
            format!("[Thread:#{}] {message}", thread_ordinal(current))
        };
        let event = Arc::new(LogEvent::new(
            self.next_event_id.fetch_add(1, Ordering::SeqCst),
            Utc::now(),
            severity,
            message,
            resolved.source,
            resolved.stack_trace,
            resolved.frames,
        ));
        if on_primary {
            self.dispatch(&event);
        } else {
            self.background.lock().push(event);
        }
    }

    fn dispatch(&self, event: &Arc<LogEvent>) {
        let mut callbacks = self.callbacks.lock();
        let mut failed: Vec<CallbackId> = Vec::new();
        for (id, callback) in callbacks.iter() {
            if let Err(err) = callback(event) {
                tracing::warn!(callback = id.0, %err, "preview callback failed; unregistering");
                failed.push(*id);
            }
        }
        if !failed.is_empty() {
            callbacks.retain(|(id, _)| !failed.contains(id));
        }
    }
}

// ---------------------------------------------------------------------------
// Facade hook
// ---------------------------------------------------------------------------

struct FacadeHook;

impl log::Log for FacadeHook {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if let Some(intercept) = HOOK_TARGET.read().upgrade() {
            intercept.emit(
                Severity::from_log_level(record.level()),
                record.args().to_string(),
            );
        }
    }

    fn flush(&self) {}
}

static FACADE: FacadeHook = FacadeHook;
static INSTALL: Once = Once::new();

fn install_facade_hook() {
    INSTALL.call_once(|| {
        if log::set_logger(&FACADE).is_err() {
            tracing::warn!("another logger is already installed; log facade traffic will not be intercepted");
        } else {
            log::set_max_level(log::LevelFilter::Trace);
        }
    });
}

/// Numeric form of a `ThreadId` for the `[Thread:#N]` marker. The id is
/// stable for the thread's lifetime, which is all the marker needs.
fn thread_ordinal(id: ThreadId) -> u64 {
    format!("{id:?}")
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
