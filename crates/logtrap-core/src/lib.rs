//! logtrap-core: in-process log capture, aggregation, and persistence.
//!
//! # Architecture
//!
//! ```text
//! log!/panic ──► Interceptor ──► Raw / Collapsing / Smart aggregators
//!                    │                     │
//!                    │                     └──► Snapshot (frozen copies)
//!                    └──► PersistentAggregator ──► per-severity files
//! ```
//!
//! The interceptor hooks the `log` facade and fans events out to every
//! subscribed aggregator: synchronously on the primary thread, via a drained
//! queue for producer threads. Each aggregator independently filters,
//! buffers, and folds events into its own bounded record list. Everything is
//! best-effort by policy: the capture pipeline never raises an error into
//! the host it instruments.

pub mod aggregate;
pub mod config;
pub mod filter;
pub mod intercept;
pub mod persist;
pub mod resolve;
pub mod types;

use std::sync::Arc;

pub use aggregate::{DedupPolicy, LogAggregator, MemoryAggregator, SnapshotAggregator};
pub use config::Config;
pub use filter::SilenceFilter;
pub use intercept::Interceptor;
pub use persist::PersistentAggregator;
pub use resolve::SourceResolver;
pub use types::{LogEvent, LogRecord, Severity};

/// Errors surfaced by fallible persistence APIs. The capture hot path never
/// returns these.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("failed to persist silence rules: {0}")]
    Persist(#[from] std::io::Error),
}

/// Process-scoped capture service, constructed once at startup and passed by
/// reference to every aggregator and UI collaborator.
pub struct CaptureContext {
    config: Config,
    intercept: Arc<Interceptor>,
    filter: Arc<SilenceFilter>,
}

impl CaptureContext {
    /// Build the context with suppression rules loaded from the default
    /// rules file beside the config.
    pub fn init(config: Config) -> Self {
        let filter = Arc::new(SilenceFilter::load(Config::silence_path()));
        Self::with_filter(config, filter)
    }

    /// Build the context around an explicit filter; tests and ephemeral
    /// runs use [`SilenceFilter::in_memory`].
    pub fn with_filter(config: Config, filter: Arc<SilenceFilter>) -> Self {
        let resolver = SourceResolver::new(&config.resolver);
        let intercept = Interceptor::new(config.capture.enabled, resolver);
        CaptureContext {
            config,
            intercept,
            filter,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn interceptor(&self) -> &Arc<Interceptor> {
        &self.intercept
    }

    pub fn filter(&self) -> &Arc<SilenceFilter> {
        &self.filter
    }
}
