//! Named sink routing
//!
//! Operations pick a sink through their policy's logger name. Unknown or empty
//! names fall back to the registry's default sink; each unknown name is
//! reported once.

use super::TimeLogger;
use crate::error::{Result, SinkError};
use dashmap::DashSet;
use fnv::{FnvBuildHasher, FnvHashMap};
use std::fmt;
use std::sync::Arc;

/// Sinks addressable by logger name, with a default
#[derive(Clone)]
pub struct SinkRegistry {
    default_name: String,
    default: Arc<dyn TimeLogger>,
    sinks: FnvHashMap<String, Arc<dyn TimeLogger>>,
    /// Unknown logger names already reported
    reported_unknown: DashSet<String, FnvBuildHasher>,
}

impl fmt::Debug for SinkRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.sinks.keys().collect();
        names.sort();
        f.debug_struct("SinkRegistry")
            .field("default", &self.default_name)
            .field("sinks", &names)
            .finish()
    }
}

impl SinkRegistry {
    /// Create a registry whose default sink is also reachable as `name`
    pub fn new(name: impl Into<String>, default: Arc<dyn TimeLogger>) -> Self {
        let default_name = name.into();
        let mut sinks = FnvHashMap::default();
        sinks.insert(default_name.clone(), Arc::clone(&default));
        Self {
            default_name,
            default,
            sinks,
            reported_unknown: DashSet::default(),
        }
    }

    /// Register `sink` under `name`, returning any sink it replaces
    pub fn register(
        &mut self,
        name: impl Into<String>,
        sink: Arc<dyn TimeLogger>,
    ) -> Option<Arc<dyn TimeLogger>> {
        let name = name.into();
        if name == self.default_name {
            self.default = Arc::clone(&sink);
        }
        self.sinks.insert(name, sink)
    }

    pub fn with(mut self, name: impl Into<String>, sink: Arc<dyn TimeLogger>) -> Self {
        self.register(name, sink);
        self
    }

    /// Look up a sink by exact name
    pub fn get(&self, name: &str) -> Result<Arc<dyn TimeLogger>> {
        self.sinks
            .get(name)
            .cloned()
            .ok_or_else(|| SinkError::Unavailable(name.to_string()))
    }

    /// Sink for `name`, falling back to the default when empty or unknown
    pub fn resolve(&self, name: Option<&str>) -> Arc<dyn TimeLogger> {
        let Some(name) = name else {
            return Arc::clone(&self.default);
        };
        match self.get(name) {
            Ok(sink) => sink,
            Err(err) => {
                if !self.reported_unknown.contains(name)
                    && self.reported_unknown.insert(name.to_string())
                {
                    tracing::warn!(error = %err, fallback = %self.default_name, "using default sink");
                }
                Arc::clone(&self.default)
            }
        }
    }

    pub fn default_sink(&self) -> Arc<dyn TimeLogger> {
        Arc::clone(&self.default)
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.sinks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Close every sink, returning the first failure after trying them all
    pub fn close_all(&self) -> Result<()> {
        let mut first_err = None;
        for name in self.names() {
            if let Err(err) = self.sinks[name].close() {
                tracing::warn!(sink = name, error = %err, "failed to close sink");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
