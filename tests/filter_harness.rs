//! Suppression-filter harness.
//!
//! # What this covers
//!
//! - **Idempotence**: adding the same exact or prefix rule twice leaves one
//!   entry.
//! - **Persistence**: every add writes the rules file immediately; a fresh
//!   load round-trips the rules; a missing file means an empty set.
//! - **Ingestion filtering**: silenced events are dropped before they ever
//!   enter an aggregator's buffer.
//! - **Live update**: `update_filter` evicts already-aggregated records that
//!   newly match, without disturbing the rest.
//!
//! # Running
//!
//! ```sh
//! cargo test --test filter_harness
//! ```

mod common;
use common::*;

use std::sync::Arc;

use logtrap_core::{LogAggregator, MemoryAggregator, Severity, SilenceFilter};
use pretty_assertions::assert_eq;

// ---------------------------------------------------------------------------
// Rule-set semantics and persistence
// ---------------------------------------------------------------------------

#[test]
fn adding_the_same_source_twice_keeps_one_entry() {
    let dir = tempfile::tempdir().unwrap();
    let filter = SilenceFilter::load(dir.path().join("silence.toml"));

    filter.add_silence_exact("app::noisy::tick").unwrap();
    filter.add_silence_exact("app::noisy::tick").unwrap();
    filter.add_silence_prefix("vendor::").unwrap();
    filter.add_silence_prefix("vendor::").unwrap();

    let rules = filter.rules();
    assert_eq!(rules.exact.len(), 1);
    assert_eq!(rules.prefixes.len(), 1);
}

#[test]
fn rules_round_trip_through_the_rules_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("silence.toml");

    let filter = SilenceFilter::load(path.clone());
    filter.add_silence_exact("app::noisy::tick").unwrap();
    filter.add_silence_prefix("vendor::").unwrap();
    assert!(path.exists());

    let reloaded = SilenceFilter::load(path);
    assert_eq!(reloaded.rules(), filter.rules());
    assert!(reloaded.is_silenced("app::noisy::tick"));
    assert!(reloaded.is_silenced("vendor::sdk::poll"));
    assert!(!reloaded.is_silenced("app::worker::run"));
}

#[test]
fn a_missing_rules_file_means_an_empty_set() {
    let dir = tempfile::tempdir().unwrap();
    let filter = SilenceFilter::load(dir.path().join("does-not-exist.toml"));
    let rules = filter.rules();
    assert!(rules.exact.is_empty());
    assert!(rules.prefixes.is_empty());
}

// ---------------------------------------------------------------------------
// Filtering at ingestion
// ---------------------------------------------------------------------------

#[test]
fn silenced_events_never_enter_the_buffer() {
    let filter = Arc::new(SilenceFilter::in_memory());
    // Everything this harness emits resolves to a source inside this crate.
    filter.add_silence_prefix("filter_harness::").unwrap();

    let ctx = started_context_with_filter(eager_config(), filter);
    let agg = MemoryAggregator::raw(&ctx);
    agg.start_capture();

    ctx.interceptor().emit(Severity::Error, "silenced at the door");
    assert!(!agg.flush_pending());
    assert!(agg.records().is_empty());
}

// ---------------------------------------------------------------------------
// Live filter updates
// ---------------------------------------------------------------------------

#[test]
fn update_filter_evicts_newly_matching_records() {
    let filter = Arc::new(SilenceFilter::in_memory());
    let ctx = started_context_with_filter(eager_config(), filter.clone());
    let agg = MemoryAggregator::raw(&ctx);
    agg.start_capture();

    ctx.interceptor().emit(Severity::Error, "captured before the rule");
    ctx.interceptor().emit(Severity::Info, "also captured");
    agg.flush_pending();
    assert_eq!(agg.records().len(), 2);

    filter.add_silence_prefix("filter_harness::").unwrap();
    agg.update_filter();

    assert!(agg.records().is_empty());
    assert_eq!(agg.severity_count(Severity::Error), 0);
    assert_eq!(agg.severity_count(Severity::Info), 0);
}

#[test]
fn exact_rule_evicts_only_the_matching_source() {
    let filter = Arc::new(SilenceFilter::in_memory());
    let ctx = started_context_with_filter(eager_config(), filter.clone());
    let agg = MemoryAggregator::raw(&ctx);
    agg.start_capture();

    emit_noisy(&ctx);
    emit_quiet(&ctx);
    agg.flush_pending();
    let records = agg.records();
    assert_eq!(records.len(), 2);

    let noisy_source = records
        .iter()
        .find(|r| r.message() == "noisy")
        .unwrap()
        .source()
        .to_string();
    filter.add_silence_exact(&noisy_source).unwrap();
    agg.update_filter();

    let records = agg.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message(), "quiet");
}

// Distinct functions so the two events resolve to distinct sources.
fn emit_noisy(ctx: &logtrap_core::CaptureContext) {
    ctx.interceptor().emit(Severity::Warning, "noisy");
}

fn emit_quiet(ctx: &logtrap_core::CaptureContext) {
    ctx.interceptor().emit(Severity::Warning, "quiet");
}
