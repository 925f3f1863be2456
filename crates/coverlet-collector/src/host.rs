//! Host-facing types: the run correlation token, session events and the
//! host's warning channel.

use crate::result::CollectorError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Correlation token identifying the test run a report belongs to.
///
/// Owned by the host and only referenced by the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunContext {
    id: Uuid,
}

impl RunContext {
    /// Create a context with a fresh identifier
    #[must_use]
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    /// Wrap an identifier issued by the host
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self { id }
    }

    /// The underlying identifier
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Session-start event raised by the host before tests execute
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStartEvent {
    /// Event properties keyed by name
    pub properties: HashMap<String, serde_json::Value>,
}

impl SessionStartEvent {
    /// Create an empty event
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an event carrying a test module list under `property`
    #[must_use]
    pub fn with_test_sources<I, S>(property: &str, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let list = sources
            .into_iter()
            .map(|source| serde_json::Value::String(source.into()))
            .collect();
        let mut event = Self::new();
        let _ = event
            .properties
            .insert(property.to_string(), serde_json::Value::Array(list));
        event
    }

    /// Test modules listed under `property`.
    ///
    /// A missing property, or one that isn't a list of strings, yields an
    /// empty list; non-string entries are skipped.
    #[must_use]
    pub fn test_sources(&self, property: &str) -> Vec<String> {
        match self.properties.get(property) {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(String::from))
                .collect(),
            Some(serde_json::Value::String(single)) => vec![single.clone()],
            _ => Vec::new(),
        }
    }
}

/// Session-end event raised by the host after tests finish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEndEvent;

/// The host's logging channel. Warnings are the only user-visible failure
/// surface of the collector.
pub trait HostLogger: Send + Sync {
    /// Report a warning against the given run
    fn warn(&self, context: &RunContext, message: &str);
}

/// Host logger that only emits `tracing` warnings
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingHostLogger;

impl HostLogger for TracingHostLogger {
    fn warn(&self, context: &RunContext, message: &str) {
        warn!(run = %context, "{message}");
    }
}

/// Binds a host logger to one run and formats collector errors for it
#[derive(Clone)]
pub struct CollectorLogger {
    context: RunContext,
    host: Arc<dyn HostLogger>,
    collector_name: String,
}

impl fmt::Debug for CollectorLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectorLogger")
            .field("context", &self.context)
            .field("collector_name", &self.collector_name)
            .finish()
    }
}

impl CollectorLogger {
    /// Create a logger for `context`
    #[must_use]
    pub fn new(context: RunContext, host: Arc<dyn HostLogger>, collector_name: &str) -> Self {
        Self {
            context,
            host,
            collector_name: collector_name.to_string(),
        }
    }

    /// The run this logger reports against
    #[must_use]
    pub const fn context(&self) -> &RunContext {
        &self.context
    }

    /// Forward a warning to the host
    pub fn warn(&self, message: &str) {
        self.host.warn(&self.context, message);
    }

    /// Forward an error, with its source chain, to the host as a warning
    pub fn warn_error(&self, error: &CollectorError) {
        warn!(
            collector = %self.collector_name,
            run = %self.context,
            error = %error,
            "coverage collection degraded"
        );
        self.warn(&format!("{}: {}", self.collector_name, error.to_report_string()));
    }
}
