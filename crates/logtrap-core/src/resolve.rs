//! Source resolution: attribute an intercepted event to the code location
//! that produced it.
//!
//! Naive "immediate caller" attribution points at logging-wrapper methods,
//! not the real call site. The resolver first drops runtime-internal frames,
//! then applies two operator-configurable override rules until stable: an
//! exact-match blacklist that skips a single frame, and a prefix rule that
//! skips past a whole block of consecutive wrapper frames.

use std::path::PathBuf;

use lazy_static::lazy_static;
use regex::Regex;

use crate::config::ResolverConfig;
use crate::types::{format_frames, Frame};

/// Sentinel source for events whose stack could not be walked.
pub const UNKNOWN_SOURCE: &str = "UNKNOWN";

/// Sentinel trace for events whose stack could not be walked.
pub const SYSTEM_CALL_TRACE: &str = "<system call>";

/// Outcome of a resolution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub source: String,
    pub stack_trace: String,
    pub frames: Option<Vec<Frame>>,
}

impl Resolved {
    fn system_call() -> Self {
        Resolved {
            source: UNKNOWN_SOURCE.to_string(),
            stack_trace: SYSTEM_CALL_TRACE.to_string(),
            frames: None,
        }
    }
}

// ---------------------------------------------------------------------------
// SourceResolver
// ---------------------------------------------------------------------------

/// Applies the configured override rules to a captured stack.
#[derive(Debug, Clone, Default)]
pub struct SourceResolver {
    skip_exact: Vec<String>,
    skip_prefixes: Vec<String>,
}

impl SourceResolver {
    pub fn new(cfg: &ResolverConfig) -> Self {
        SourceResolver {
            skip_exact: cfg.skip_exact.clone(),
            skip_prefixes: cfg.skip_prefixes.clone(),
        }
    }

    /// Resolve the current call stack, starting `skip_frames` application
    /// frames up. Never fails: an unwalkable stack degrades to the
    /// `UNKNOWN` / `<system call>` sentinels.
    pub fn resolve(&self, skip_frames: usize) -> Resolved {
        self.resolve_from_frames(capture_frames(), skip_frames)
    }

    /// Rule engine over an explicit frame list. Public so the override
    /// semantics can be exercised with synthetic frames.
    pub fn resolve_from_frames(&self, frames: Vec<Frame>, skip_frames: usize) -> Resolved {
        let mut idx = skip_frames.min(frames.len());
        loop {
            let Some(frame) = frames.get(idx) else { break };
            if self.skip_exact.iter().any(|s| *s == frame.symbol) {
                idx += 1;
                continue;
            }
            if let Some(prefix) = self
                .skip_prefixes
                .iter()
                .find(|p| frame.symbol.starts_with(p.as_str()))
            {
                // Skip the whole consecutive run sharing this prefix, then
                // re-run every rule from the new position.
                while frames
                    .get(idx)
                    .map_or(false, |f| f.symbol.starts_with(prefix.as_str()))
                {
                    idx += 1;
                }
                continue;
            }
            break;
        }

        match frames.get(idx) {
            None => Resolved::system_call(),
            Some(frame) => {
                let retained = frames[idx..].to_vec();
                Resolved {
                    source: frame.symbol.clone(),
                    stack_trace: format_frames(&retained, false),
                    frames: Some(retained),
                }
            }
        }
    }

    /// Resolve an exception event from its supplied trace text. The source
    /// is the token preceding the first space or parenthesis on the first
    /// line; the trace is reshaped line-by-line for readability.
    pub fn resolve_exception(&self, trace: &str) -> Resolved {
        let first = trace.lines().next().unwrap_or("");
        let source = first
            .split([' ', '('])
            .next()
            .unwrap_or("")
            .to_string();

        let mut reshaped = String::new();
        for line in trace.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            reshaped.push_str("    at ");
            reshaped.push_str(line);
            reshaped.push('\n');
        }

        Resolved {
            source,
            stack_trace: reshaped,
            frames: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Stack capture
// ---------------------------------------------------------------------------

lazy_static! {
    static ref HASH_SUFFIX: Regex = Regex::new(r"::h[0-9a-f]{16}$").expect("valid regex");
}

/// Capture and symbolicate the current stack, keeping application frames
/// only. Returns an empty vec when no symbols are available (stripped
/// binaries, platform-internal call sites).
pub(crate) fn capture_frames() -> Vec<Frame> {
    let bt = backtrace::Backtrace::new();
    let mut frames = Vec::new();
    for frame in bt.frames() {
        for symbol in frame.symbols() {
            let Some(name) = symbol.name() else { continue };
            let symbol_name = strip_hash_suffix(&name.to_string());
            if !is_app_frame(&symbol_name) {
                continue;
            }
            frames.push(Frame {
                symbol: symbol_name,
                file: symbol.filename().map(PathBuf::from),
                line: symbol.lineno(),
            });
        }
    }
    frames
}

/// Trace text for the panic hook: current application frames with file/line
/// annotations, innermost first, so the exception parser can lift the source
/// from the first line.
pub(crate) fn panic_trace() -> String {
    let frames = capture_frames();
    if frames.is_empty() {
        return SYSTEM_CALL_TRACE.to_string();
    }
    format_frames(&frames, true)
}

/// Drop the `::h<16 hex>` monomorphization suffix rustc appends to symbols.
fn strip_hash_suffix(symbol: &str) -> String {
    HASH_SUFFIX.replace(symbol, "").into_owned()
}

/// Frames from the runtime, the log facade, or this crate's own machinery
/// are never attribution candidates.
fn is_app_frame(symbol: &str) -> bool {
    const SYSTEM_PREFIXES: &[&str] = &[
        "std::",
        "core::",
        "alloc::",
        "<std::",
        "<core::",
        "<alloc::",
        "log::",
        "<log::",
        "logtrap_core::",
        "<logtrap_core::",
        "backtrace::",
        "<backtrace::",
        "tracing::",
        "tracing_core::",
        "parking_lot::",
        "test::",
        "rust_begin_unwind",
        "rust_panic",
        "__rust_",
        "_rust_",
        "__libc_start_main",
        "_start",
    ];
    const SYSTEM_CONTAINS: &[&str] = &[
        "::panicking::",
        "::panic::",
        "::rt::",
        "::sys::",
        "::sys_common::",
        "::thread::Builder::spawn",
        "lang_start",
    ];

    for prefix in SYSTEM_PREFIXES {
        if symbol.starts_with(prefix) {
            return false;
        }
    }
    for needle in SYSTEM_CONTAINS {
        if symbol.contains(needle) {
            return false;
        }
    }
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_monomorphization_hash() {
        assert_eq!(
            strip_hash_suffix("app::worker::run::h0123456789abcdef"),
            "app::worker::run"
        );
        assert_eq!(strip_hash_suffix("app::worker::run"), "app::worker::run");
    }

    #[test]
    fn system_frames_are_not_candidates() {
        assert!(!is_app_frame("std::panicking::begin_panic"));
        assert!(!is_app_frame("log::__private_api::log"));
        assert!(!is_app_frame("logtrap_core::intercept::Interceptor::emit"));
        assert!(is_app_frame("my_app::handlers::process"));
    }

    #[test]
    fn empty_stack_degrades_to_sentinels() {
        let resolver = SourceResolver::default();
        let resolved = resolver.resolve_from_frames(Vec::new(), 0);
        assert_eq!(resolved.source, UNKNOWN_SOURCE);
        assert_eq!(resolved.stack_trace, SYSTEM_CALL_TRACE);
        assert!(resolved.frames.is_none());
    }
}
