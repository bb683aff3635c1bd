//! Begin/complete bracketing for long-running index operations
//!
//! - `{name}_BEGIN` on creation
//! - `{name}_COMPLETE` on `complete()`
//! - `{name}_FAILED` on `fail()`
//! - `{name}_INCOMPLETE` if dropped without either

use std::cell::Cell;
use std::time::Instant;

use super::logger::Logger;

/// Logs the lifecycle of one operation.
///
/// ```ignore
/// let scope = ObservationScope::with_fields("INDEX_BULK_LOAD", &[("documents", "100")]);
/// // ... load ...
/// scope.complete_with_fields(&[("elements", "250")]);
/// ```
pub struct ObservationScope<'a> {
    name: &'a str,
    finished: Cell<bool>,
    fields: Vec<(&'a str, String)>,
    started: Instant,
}

impl<'a> ObservationScope<'a> {
    pub fn new(name: &'a str) -> Self {
        Self::with_fields(name, &[])
    }

    /// Fields given here are repeated on every later line of the scope.
    pub fn with_fields(name: &'a str, fields: &[(&'a str, &str)]) -> Self {
        Logger::info(&format!("{}_BEGIN", name), fields);
        Self {
            name,
            finished: Cell::new(false),
            fields: fields.iter().map(|(k, v)| (*k, v.to_string())).collect(),
            started: Instant::now(),
        }
    }

    pub fn complete(self) {
        self.complete_with_fields(&[]);
    }

    pub fn complete_with_fields(self, extra: &[(&str, &str)]) {
        self.finished.set(true);
        let elapsed = self.elapsed_ms();
        let mut fields = self.field_refs();
        fields.push(("elapsed_ms", elapsed.as_str()));
        fields.extend(extra.iter().copied());
        Logger::info(&format!("{}_COMPLETE", self.name), &fields);
    }

    /// Logs at ERROR.
    pub fn fail(self, reason: &str) {
        self.finished.set(true);
        let mut fields = self.field_refs();
        fields.push(("reason", reason));
        Logger::error(&format!("{}_FAILED", self.name), &fields);
    }

    /// Logs at FATAL.
    pub fn fail_fatal(self, reason: &str) {
        self.finished.set(true);
        let mut fields = self.field_refs();
        fields.push(("reason", reason));
        Logger::fatal(&format!("{}_FAILED", self.name), &fields);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.get()
    }

    fn elapsed_ms(&self) -> String {
        self.started.elapsed().as_millis().to_string()
    }

    fn field_refs(&self) -> Vec<(&str, &str)> {
        self.fields.iter().map(|(k, v)| (*k, v.as_str())).collect()
    }
}

impl Drop for ObservationScope<'_> {
    fn drop(&mut self) {
        if !self.finished.get() {
            Logger::warn(
                &format!("{}_INCOMPLETE", self.name),
                &[("reason", "scope dropped without completion")],
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_complete() {
        let scope = ObservationScope::with_fields("TEST", &[("documents", "3")]);
        assert!(!scope.is_finished());
        scope.complete_with_fields(&[("elements", "5")]);
    }

    #[test]
    fn test_scope_fail() {
        ObservationScope::new("TEST").fail("unique constraint violated");
        ObservationScope::new("TEST").fail_fatal("document missing");
    }

    #[test]
    fn test_scope_drop_without_complete() {
        let scope = ObservationScope::new("TEST");
        drop(scope);
    }
}
