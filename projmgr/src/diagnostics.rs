//! Process-wide message collection.
//!
//! Errors and warnings accumulate per context name while processing
//! continues for the surviving contexts; the aggregate decides the exit
//! code and the per-context streams surface under `messages:` in the
//! emitted index artefact.

use log::{error, info, warn};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Default)]
pub struct MessageStreams {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub infos: Vec<String>,
}

impl MessageStreams {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty() && self.infos.is_empty()
    }
}

/// Collector keyed by context name; messages without a context key are
/// attributed to the solution.
#[derive(Debug, Default)]
pub struct Diagnostics {
    by_context: BTreeMap<String, MessageStreams>,
    error_count: usize,
}

/// The key used for messages that concern the solution as a whole.
pub const SOLUTION_SCOPE: &str = "";

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    fn streams(&mut self, context: &str) -> &mut MessageStreams {
        self.by_context.entry(context.to_string()).or_default()
    }

    pub fn error(&mut self, context: &str, message: impl Into<String>) {
        let message = message.into();
        if context.is_empty() {
            error!("{message}");
        } else {
            error!("[{context}] {message}");
        }
        self.error_count += 1;
        self.streams(context).errors.push(message);
    }

    pub fn warning(&mut self, context: &str, message: impl Into<String>) {
        let message = message.into();
        if context.is_empty() {
            warn!("{message}");
        } else {
            warn!("[{context}] {message}");
        }
        self.streams(context).warnings.push(message);
    }

    pub fn info(&mut self, context: &str, message: impl Into<String>) {
        let message = message.into();
        if context.is_empty() {
            info!("{message}");
        } else {
            info!("[{context}] {message}");
        }
        self.streams(context).infos.push(message);
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn context_messages(&self, context: &str) -> Option<&MessageStreams> {
        self.by_context.get(context).filter(|s| !s.is_empty())
    }

    pub fn contexts_with_errors(&self) -> Vec<&str> {
        self.by_context
            .iter()
            .filter(|(_, s)| !s.errors.is_empty())
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn collects_per_context() {
        let mut diagnostics = Diagnostics::new();
        assert!(!diagnostics.has_errors());
        diagnostics.warning("App.Debug+A", "something is off");
        diagnostics.error("App.Debug+A", "something is wrong");
        diagnostics.info(SOLUTION_SCOPE, "note");
        assert!(diagnostics.has_errors());

        let streams = diagnostics.context_messages("App.Debug+A").unwrap();
        assert_eq!(streams.errors, vec!["something is wrong"]);
        assert_eq!(streams.warnings, vec!["something is off"]);
        assert_eq!(diagnostics.contexts_with_errors(), vec!["App.Debug+A"]);
        assert!(diagnostics.context_messages("Other+B").is_none());
    }
}
