//! Suppression rules: exact-source and prefix-source silences shared by
//! every aggregator.
//!
//! The rule set lives in `silence.toml` beside the main config file. Every
//! mutation persists the whole file immediately, so rules survive restarts
//! without an explicit save step.

use std::collections::BTreeSet;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::Deserialize;

use crate::CoreError;

/// The persisted rule set. Both collections are duplicate-free: `exact` by
/// construction, `prefixes` by an insert guard.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct FilterRules {
    #[serde(default)]
    pub exact: BTreeSet<String>,
    #[serde(default)]
    pub prefixes: Vec<String>,
}

impl FilterRules {
    pub fn is_silenced(&self, source: &str) -> bool {
        self.exact.contains(source) || self.prefixes.iter().any(|p| source.starts_with(p.as_str()))
    }
}

/// Shared, live-updatable suppression filter.
pub struct SilenceFilter {
    rules: RwLock<FilterRules>,
    path: Option<PathBuf>,
}

impl SilenceFilter {
    /// Load rules from `path`. A missing file means an empty rule set; an
    /// unreadable one is reported and treated as empty, because a broken
    /// rules file must never take the capture pipeline down.
    pub fn load(path: PathBuf) -> Self {
        let rules = match config::Config::builder()
            .add_source(config::File::from(path.as_path()).required(false))
            .build()
            .and_then(|c| c.try_deserialize::<FilterRules>())
        {
            Ok(rules) => rules,
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "ignoring unreadable silence rules");
                FilterRules::default()
            }
        };
        SilenceFilter {
            rules: RwLock::new(rules),
            path: Some(path),
        }
    }

    /// Rule set that is never persisted. Used by tests and ephemeral runs.
    pub fn in_memory() -> Self {
        SilenceFilter {
            rules: RwLock::new(FilterRules::default()),
            path: None,
        }
    }

    pub fn is_silenced(&self, source: &str) -> bool {
        self.rules.read().is_silenced(source)
    }

    /// Silence an exact source. Idempotent; persists only when the rule set
    /// actually changed.
    pub fn add_silence_exact(&self, source: &str) -> Result<(), CoreError> {
        let snapshot = {
            let mut rules = self.rules.write();
            if !rules.exact.insert(source.to_string()) {
                return Ok(());
            }
            rules.clone()
        };
        self.persist(&snapshot)
    }

    /// Silence every source starting with `prefix`. Idempotent.
    pub fn add_silence_prefix(&self, prefix: &str) -> Result<(), CoreError> {
        let snapshot = {
            let mut rules = self.rules.write();
            if rules.prefixes.iter().any(|p| p == prefix) {
                return Ok(());
            }
            rules.prefixes.push(prefix.to_string());
            rules.clone()
        };
        self.persist(&snapshot)
    }

    /// Snapshot of the current rules.
    pub fn rules(&self) -> FilterRules {
        self.rules.read().clone()
    }

    fn persist(&self, rules: &FilterRules) -> Result<(), CoreError> {
        let Some(path) = &self.path else { return Ok(()) };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, render_rules(rules))?;
        Ok(())
    }
}

fn render_rules(rules: &FilterRules) -> String {
    let mut out = String::from("exact = [\n");
    for source in &rules.exact {
        out.push_str(&format!("    \"{}\",\n", toml_escape(source)));
    }
    out.push_str("]\nprefixes = [\n");
    for prefix in &rules.prefixes {
        out.push_str(&format!("    \"{}\",\n", toml_escape(prefix)));
    }
    out.push_str("]\n");
    out
}

fn toml_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
