//! Warn-once bookkeeping scoped to a caller.
//!
//! Long-running operations emit some advisory messages ("fetching may take a
//! while", parameter coercions). A [`Notices`] value owned by the caller
//! remembers which ones were already logged, so repeated calls sharing the
//! same `Notices` stay quiet while independent callers each see them once.

use std::collections::HashSet;

/// Set of advisory keys already logged.
#[derive(Debug, Default, Clone)]
pub struct Notices {
    seen: HashSet<String>,
}

impl Notices {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Log `message` at WARN unless `key` was already logged. Returns whether it logged.
    pub fn warn_once(&mut self, key: &str, message: &str) -> bool {
        if !self.seen.insert(key.to_string()) {
            return false;
        }
        tracing::warn!(notice = key, "{message}");
        true
    }

    /// Log `message` at INFO unless `key` was already logged. Returns whether it logged.
    pub fn info_once(&mut self, key: &str, message: &str) -> bool {
        if !self.seen.insert(key.to_string()) {
            return false;
        }
        tracing::info!(notice = key, "{message}");
        true
    }

    /// Whether `key` has been logged.
    pub fn seen(&self, key: &str) -> bool {
        self.seen.contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_warning_is_suppressed() {
        let mut notices = Notices::new();
        assert!(notices.warn_once("fetch", "slow"));
        assert!(!notices.warn_once("fetch", "slow"));
        assert!(notices.seen("fetch"));

        let mut other = Notices::new();
        assert!(other.warn_once("fetch", "slow"));
    }
}
