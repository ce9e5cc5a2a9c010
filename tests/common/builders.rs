//! Test builders: tuned configs and started capture contexts.
//!
//! These are designed for readability in harness tests, not for production
//! use. Contexts come pre-started with an in-memory filter; configs default
//! to an eager pending buffer so folds happen on every event unless a test
//! exercises the threshold explicitly.

use std::sync::Arc;

use logtrap_core::{CaptureContext, Config, SilenceFilter};

// ---------------------------------------------------------------------------
// Config builders
// ---------------------------------------------------------------------------

/// Defaults with a pending buffer of one, so every event folds immediately.
pub fn eager_config() -> Config {
    let mut config = Config::defaults();
    config.capture.buffer_flush_threshold = 1;
    config
}

/// Eager config with a custom per-severity record cap.
pub fn capped_config(per_severity_cap: usize) -> Config {
    let mut config = eager_config();
    config.capture.per_severity_cap = per_severity_cap;
    config
}

/// Config with a custom pending-buffer threshold (no eager folding).
pub fn buffered_config(flush_threshold: usize) -> Config {
    let mut config = Config::defaults();
    config.capture.buffer_flush_threshold = flush_threshold;
    config
}

/// Eager config persisting into `dir`, with the retention sweep disabled so
/// tests opt into each threshold explicitly.
pub fn persist_config(dir: &std::path::Path) -> Config {
    let mut config = eager_config();
    config.persist.dir = dir.to_path_buf();
    config.persist.max_files = 0;
    config.persist.max_total_mb = 0;
    config.persist.max_age_hours = 0;
    config
}

// ---------------------------------------------------------------------------
// Context builders
// ---------------------------------------------------------------------------

/// A capture context with an in-memory filter, already intercepting.
pub fn started_context(config: Config) -> CaptureContext {
    started_context_with_filter(config, Arc::new(SilenceFilter::in_memory()))
}

pub fn started_context_with_filter(config: Config, filter: Arc<SilenceFilter>) -> CaptureContext {
    let ctx = CaptureContext::with_filter(config, filter);
    ctx.interceptor().start_intercepting();
    ctx
}
