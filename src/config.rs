//! Declarative sink and policy configuration
//!
//! One TOML document declares the sinks, which one is the default, the pipeline
//! timings, and the policy of every instrumented operation.

use crate::error::ConfigError;
use crate::pipeline::{PipelineOptions, DEFAULT_DRAIN_TIMEOUT, DEFAULT_POLL_INTERVAL};
use crate::policy::{OperationPolicy, PolicyTable};
use crate::sink::{ConsoleTimeLogger, FileTimeLogger, SinkRegistry, TimeLogger};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Where a sink delivers its lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkKind {
    Console,
    File { path: PathBuf },
}

/// A named sink declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: SinkKind,
}

/// Top-level configuration
///
/// # Example
/// ```
/// use timekeeper::config::Config;
///
/// let config = Config::from_toml_str(r#"
///     default_sink = "console"
///
///     [[sinks]]
///     name = "console"
///     kind = "console"
///
///     [operations.checkout]
///     threshold = 50.0
/// "#).unwrap();
/// assert_eq!(config.policy_table().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Name of the sink used when a policy names no logger, or an unknown one
    pub default_sink: String,
    /// Bounded wait for each sink's drain on close (non-zero)
    pub drain_timeout_ms: u64,
    /// Consumer poll interval (non-zero)
    pub poll_interval_ms: u64,
    pub sinks: Vec<SinkConfig>,
    /// Policies keyed by operation id
    pub operations: BTreeMap<String, OperationPolicy>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_sink: "console".to_string(),
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT.as_millis() as u64,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            sinks: vec![SinkConfig {
                name: "console".to_string(),
                kind: SinkKind::Console,
            }],
            operations: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Read and parse a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&source)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Pipeline options for the sink called `name`
    pub fn pipeline_options(&self, name: &str) -> PipelineOptions {
        PipelineOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
            thread_name: format!("timekeeper-{}", name),
        }
    }

    /// Start every declared sink and route them by name
    ///
    /// Sinks started before a failure are closed again before the error is
    /// returned.
    pub fn build_registry(&self) -> Result<SinkRegistry, ConfigError> {
        let mut seen = HashSet::new();
        for sink in &self.sinks {
            if !seen.insert(sink.name.as_str()) {
                return Err(ConfigError::DuplicateSink(sink.name.clone()));
            }
        }
        if !seen.contains(self.default_sink.as_str()) {
            return Err(ConfigError::UnknownDefaultSink(self.default_sink.clone()));
        }

        let mut started: Vec<(String, Arc<dyn TimeLogger>)> = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            match self.start_sink(sink) {
                Ok(logger) => started.push((sink.name.clone(), logger)),
                Err(err) => {
                    for (_, logger) in &started {
                        let _ = logger.close();
                    }
                    return Err(err);
                }
            }
        }

        let default = started
            .iter()
            .find(|(name, _)| *name == self.default_sink)
            .map(|(_, logger)| Arc::clone(logger))
            .ok_or_else(|| ConfigError::UnknownDefaultSink(self.default_sink.clone()))?;

        let mut registry = SinkRegistry::new(self.default_sink.clone(), default);
        for (name, logger) in started {
            if name != self.default_sink {
                registry.register(name, logger);
            }
        }
        Ok(registry)
    }

    fn start_sink(&self, sink: &SinkConfig) -> Result<Arc<dyn TimeLogger>, ConfigError> {
        let options = self.pipeline_options(&sink.name);
        let logger: Arc<dyn TimeLogger> = match &sink.kind {
            SinkKind::Console => Arc::new(ConsoleTimeLogger::with_options(options)?),
            SinkKind::File { path } => Arc::new(FileTimeLogger::open_with_options(path, options)?),
        };
        Ok(logger)
    }

    /// Declared policies as a [`PolicyTable`]
    pub fn policy_table(&self) -> PolicyTable {
        self.operations
            .iter()
            .map(|(op, policy)| (op.clone(), policy.clone()))
            .collect()
    }
}
