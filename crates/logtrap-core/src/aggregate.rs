//! In-memory aggregation: the shared capture/buffer/evict machinery and the
//! three dedup policies layered over it, plus point-in-time snapshots.
//!
//! Incoming events are filtered, buffered, and only folded into records when
//! the buffer hits its threshold or a consumer asks, so dedup hashing stays
//! off the hot path while nobody is reading. After every fold an eviction
//! pass enforces the per-severity cap, oldest records first; a severity far
//! under its cap is never evicted to make room for another.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::filter::SilenceFilter;
use crate::intercept::{CallbackId, Interceptor};
use crate::types::{LogEvent, LogRecord, Severity};
use crate::CaptureContext;

// ---------------------------------------------------------------------------
// LogAggregator
// ---------------------------------------------------------------------------

/// The contract every aggregator variant exposes to its consumers.
pub trait LogAggregator {
    /// Subscribe to the interceptor. Idempotent.
    fn start_capture(&self);
    /// Unsubscribe, then perform one final fold. No in-flight event is
    /// dropped, but nothing new is accepted after this returns.
    fn stop_capture(&self);
    /// Snapshot of the current records, most recent first. Further
    /// aggregation never mutates a returned snapshot.
    fn records(&self) -> Vec<LogRecord>;
    /// Drop all records and any pending events.
    fn clear(&self);
    /// Fold all buffered events into records. Returns whether anything was
    /// pending.
    fn flush_pending(&self) -> bool;
    /// Re-evaluate the current suppression rules against already-held
    /// records and evict the ones that now match.
    fn update_filter(&self);
    /// Number of records currently held at `severity`.
    fn severity_count(&self, severity: Severity) -> usize;

    /// Linear-scan quick filter: substring match on the message, prefix
    /// match on the source, case-insensitive. Serves the interactive
    /// type-to-filter surface.
    fn records_matching(&self, needle: &str) -> Vec<LogRecord> {
        let needle = needle.to_lowercase();
        self.records()
            .into_iter()
            .filter(|r| {
                r.message().to_lowercase().contains(&needle)
                    || r.source().to_lowercase().starts_with(&needle)
            })
            .collect()
    }
}

/// Dedup policy of a [`MemoryAggregator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupPolicy {
    /// Append-only chronology; every accepted event is its own record.
    Raw,
    /// Run-length collapse: merge only into the current tail record.
    Collapsing,
    /// Global dedup with recency promotion: a repeat anywhere in history
    /// merges into its record and moves it to the tail.
    Smart,
}

// ---------------------------------------------------------------------------
// Store: the composed buffering/eviction helper
// ---------------------------------------------------------------------------

struct Store {
    policy: DedupPolicy,
    flush_threshold: usize,
    per_severity_cap: usize,
    records: Vec<LogRecord>,
    counts: [usize; 4],
    pending: Vec<Arc<LogEvent>>,
    // Signature membership for the smart policy; maintained on every
    // append, merge-promotion, eviction, and clear.
    smart_index: HashSet<u64>,
}

impl Store {
    fn new(policy: DedupPolicy, flush_threshold: usize, per_severity_cap: usize) -> Self {
        Store {
            policy,
            flush_threshold,
            per_severity_cap,
            records: Vec::new(),
            counts: [0; 4],
            pending: Vec::new(),
            smart_index: HashSet::new(),
        }
    }

    fn fold_all(&mut self) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        for event in std::mem::take(&mut self.pending) {
            self.fold(event);
        }
        self.evict();
        true
    }

    fn fold(&mut self, event: Arc<LogEvent>) {
        match self.policy {
            DedupPolicy::Raw => self.append(event),
            DedupPolicy::Collapsing => {
                if let Some(tail) = self.records.last_mut() {
                    if tail.matches(&event) {
                        tail.merge(&event);
                        return;
                    }
                }
                self.append(event);
            }
            DedupPolicy::Smart => {
                if self.smart_index.contains(&event.signature()) {
                    // Scan from the tail: hot repeats sit near the end.
                    if let Some(pos) = self.records.iter().rposition(|r| r.matches(&event)) {
                        let mut record = self.records.remove(pos);
                        record.merge(&event);
                        self.records.push(record);
                        return;
                    }
                    // Index hit without a content match is a hash collision;
                    // fall through and keep both records distinct.
                }
                self.smart_index.insert(event.signature());
                self.append(event);
            }
        }
    }

    fn append(&mut self, event: Arc<LogEvent>) {
        self.counts[event.severity.index()] += 1;
        self.records.push(LogRecord::new(event));
    }

    /// Capped FIFO per severity: one oldest-first pass removing records of
    /// any severity still over cap, compacting as it goes.
    fn evict(&mut self) {
        let cap = self.per_severity_cap;
        let mut excess = [0usize; 4];
        let mut over = false;
        for (i, &count) in self.counts.iter().enumerate() {
            if count > cap {
                excess[i] = count - cap;
                over = true;
            }
        }
        if !over {
            return;
        }
        let counts = &mut self.counts;
        let index = &mut self.smart_index;
        self.records.retain(|record| {
            let i = record.severity().index();
            if excess[i] > 0 {
                excess[i] -= 1;
                counts[i] -= 1;
                index.remove(&record.signature());
                false
            } else {
                true
            }
        });
    }

    fn remove_silenced(&mut self, filter: &SilenceFilter) {
        let counts = &mut self.counts;
        let index = &mut self.smart_index;
        self.records.retain(|record| {
            if filter.is_silenced(record.source()) {
                counts[record.severity().index()] -= 1;
                index.remove(&record.signature());
                false
            } else {
                true
            }
        });
    }

    fn clear(&mut self) {
        self.records.clear();
        self.pending.clear();
        self.smart_index.clear();
        self.counts = [0; 4];
    }
}

// ---------------------------------------------------------------------------
// MemoryAggregator
// ---------------------------------------------------------------------------

struct State {
    store: Mutex<Store>,
    filter: Arc<SilenceFilter>,
    intercept: Arc<Interceptor>,
    subscription: Mutex<Option<CallbackId>>,
}

impl State {
    fn ingest(&self, event: &Arc<LogEvent>) {
        // Silenced events are dropped before ever entering the buffer.
        if self.filter.is_silenced(&event.source) {
            return;
        }
        let mut store = self.store.lock();
        store.pending.push(event.clone());
        if store.pending.len() >= store.flush_threshold {
            store.fold_all();
        }
    }
}

/// The raw, collapsing, and smart views over the event stream: one composed
/// store, three fold policies.
pub struct MemoryAggregator {
    state: Arc<State>,
}

impl MemoryAggregator {
    pub fn raw(ctx: &CaptureContext) -> Self {
        Self::with_policy(DedupPolicy::Raw, ctx)
    }

    pub fn collapsing(ctx: &CaptureContext) -> Self {
        Self::with_policy(DedupPolicy::Collapsing, ctx)
    }

    pub fn smart(ctx: &CaptureContext) -> Self {
        Self::with_policy(DedupPolicy::Smart, ctx)
    }

    pub fn with_policy(policy: DedupPolicy, ctx: &CaptureContext) -> Self {
        let capture = &ctx.config().capture;
        MemoryAggregator {
            state: Arc::new(State {
                store: Mutex::new(Store::new(
                    policy,
                    capture.buffer_flush_threshold,
                    capture.per_severity_cap,
                )),
                filter: ctx.filter().clone(),
                intercept: ctx.interceptor().clone(),
                subscription: Mutex::new(None),
            }),
        }
    }
}

impl LogAggregator for MemoryAggregator {
    fn start_capture(&self) {
        let mut subscription = self.state.subscription.lock();
        if subscription.is_some() {
            return;
        }
        // The callback holds the state weakly: if the aggregator is dropped
        // without stop_capture, the next dispatch errors and the interceptor
        // unregisters it through the failed-callback path.
        let weak: Weak<State> = Arc::downgrade(&self.state);
        let id = self.state.intercept.register_preview(Box::new(move |event| {
            match weak.upgrade() {
                Some(state) => {
                    state.ingest(event);
                    Ok(())
                }
                None => anyhow::bail!("aggregator state dropped"),
            }
        }));
        *subscription = Some(id);
    }

    fn stop_capture(&self) {
        if let Some(id) = self.state.subscription.lock().take() {
            self.state.intercept.unregister_preview(id);
        }
        self.state.store.lock().fold_all();
    }

    fn records(&self) -> Vec<LogRecord> {
        self.state.store.lock().records.iter().rev().cloned().collect()
    }

    fn clear(&self) {
        self.state.store.lock().clear();
    }

    fn flush_pending(&self) -> bool {
        self.state.store.lock().fold_all()
    }

    fn update_filter(&self) {
        let mut store = self.state.store.lock();
        store.fold_all();
        store.remove_silenced(&self.state.filter);
    }

    fn severity_count(&self, severity: Severity) -> usize {
        self.state.store.lock().counts[severity.index()]
    }
}

// ---------------------------------------------------------------------------
// SnapshotAggregator
// ---------------------------------------------------------------------------

struct SnapshotInner {
    records: Vec<LogRecord>,
    counts: [usize; 4],
}

/// A frozen, non-capturing copy of another aggregator's records, for
/// inspection while live capture continues elsewhere.
pub struct SnapshotAggregator {
    inner: Mutex<SnapshotInner>,
    dirty: AtomicBool,
}

impl SnapshotAggregator {
    /// Deep-copy the source aggregator's current records.
    pub fn freeze(source: &dyn LogAggregator) -> Self {
        let records = source.records();
        let counts = count_severities(&records);
        SnapshotAggregator {
            inner: Mutex::new(SnapshotInner { records, counts }),
            dirty: AtomicBool::new(true),
        }
    }

    /// Replace the frozen contents with a fresh copy of `source`.
    pub fn refreeze(&self, source: &dyn LogAggregator) {
        let records = source.records();
        let counts = count_severities(&records);
        *self.inner.lock() = SnapshotInner { records, counts };
        self.dirty.store(true, Ordering::SeqCst);
    }
}

fn count_severities(records: &[LogRecord]) -> [usize; 4] {
    let mut counts = [0; 4];
    for record in records {
        counts[record.severity().index()] += 1;
    }
    counts
}

impl LogAggregator for SnapshotAggregator {
    fn start_capture(&self) {}

    fn stop_capture(&self) {}

    fn records(&self) -> Vec<LogRecord> {
        self.inner.lock().records.clone()
    }

    fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.records.clear();
        inner.counts = [0; 4];
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// No folding happens here; reports only whether the snapshot changed
    /// since the last call.
    fn flush_pending(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }

    fn update_filter(&self) {}

    fn severity_count(&self, severity: Severity) -> usize {
        self.inner.lock().counts[severity.index()]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(id: u64, severity: Severity, message: &str, source: &str) -> Arc<LogEvent> {
        Arc::new(LogEvent::new(
            id,
            Utc::now(),
            severity,
            message.to_string(),
            source.to_string(),
            String::new(),
            None,
        ))
    }

    fn store(policy: DedupPolicy, cap: usize) -> Store {
        Store::new(policy, 1000, cap)
    }

    #[test]
    fn smart_promotion_updates_eviction_age() {
        // Cap 2: A, B, A-again promotes A past B, so B is evicted next.
        let mut s = store(DedupPolicy::Smart, 2);
        s.pending.push(event(1, Severity::Error, "a", "src::a"));
        s.pending.push(event(2, Severity::Error, "b", "src::b"));
        s.pending.push(event(3, Severity::Error, "a", "src::a"));
        s.pending.push(event(4, Severity::Error, "c", "src::c"));
        s.fold_all();

        let messages: Vec<_> = s.records.iter().map(|r| r.message().to_string()).collect();
        assert_eq!(messages, vec!["a", "c"]);
        assert_eq!(s.records[0].merge_count(), 2);
        assert_eq!(s.counts[Severity::Error.index()], 2);
    }

    #[test]
    fn eviction_keeps_smart_index_consistent() {
        let mut s = store(DedupPolicy::Smart, 1);
        s.pending.push(event(1, Severity::Info, "a", "src::a"));
        s.pending.push(event(2, Severity::Info, "b", "src::b"));
        s.fold_all();
        assert_eq!(s.records.len(), 1);

        // "a" was evicted and unindexed, so a repeat starts a fresh record.
        s.pending.push(event(3, Severity::Info, "a", "src::a"));
        s.fold_all();
        assert_eq!(s.records.len(), 1);
        assert_eq!(s.records[0].merge_count(), 1);
        assert_eq!(s.records[0].message(), "a");
    }

    #[test]
    fn eviction_is_per_severity_not_global() {
        let mut s = store(DedupPolicy::Raw, 2);
        for i in 0..5 {
            s.pending.push(event(i, Severity::Error, &format!("e{i}"), "src::err"));
        }
        s.pending.push(event(10, Severity::Info, "quiet", "src::info"));
        s.fold_all();

        assert_eq!(s.counts[Severity::Error.index()], 2);
        assert_eq!(s.counts[Severity::Info.index()], 1);
        // The survivors are the two most recent errors.
        let messages: Vec<_> = s.records.iter().map(|r| r.message().to_string()).collect();
        assert_eq!(messages, vec!["e3", "e4", "quiet"]);
    }

    mod props {
        use super::{event, store};
        use crate::aggregate::DedupPolicy;
        use crate::types::Severity;
        use proptest::prelude::*;

        proptest! {
            // For any event sequence and any fold schedule, the per-severity
            // counters equal the records actually held, and no severity
            // exceeds its cap after a fold.
            #[test]
            fn counters_always_match_records(
                ops in proptest::collection::vec((0usize..4, 0u8..8), 0..200),
            ) {
                let mut s = store(DedupPolicy::Smart, 5);
                for (id, (sev, msg)) in ops.into_iter().enumerate() {
                    let severity = Severity::ALL[sev];
                    s.pending.push(event(id as u64 + 1, severity, &format!("m{msg}"), "src::gen"));
                    if s.pending.len() >= 10 {
                        s.fold_all();
                    }
                }
                s.fold_all();

                let total: usize = s.counts.iter().sum();
                prop_assert_eq!(total, s.records.len());
                for severity in Severity::ALL {
                    let held = s.records.iter().filter(|r| r.severity() == severity).count();
                    prop_assert_eq!(held, s.counts[severity.index()]);
                    prop_assert!(held <= 5);
                }
            }
        }
    }
}
