//! Per-operation measurement policy
//!
//! An [`OperationPolicy`] is the static data carrier that decides whether and how
//! an operation's execution time is logged. Policies are supplied up front
//! through a [`PolicySource`] (usually a [`PolicyTable`] built in code or loaded
//! from configuration) and resolved once per operation by the interceptor.

use crate::error::PolicyError;
use fnv::FnvHashMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Unit in which durations are reported and thresholds are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    #[default]
    Milliseconds,
    Seconds,
}

impl TimeUnit {
    /// Number of nanoseconds in one unit
    pub const fn nanos_per_unit(self) -> u64 {
        match self {
            TimeUnit::Nanoseconds => 1,
            TimeUnit::Microseconds => 1_000,
            TimeUnit::Milliseconds => 1_000_000,
            TimeUnit::Seconds => 1_000_000_000,
        }
    }

    /// Convert a nanosecond count into this unit (fractional)
    pub fn convert(self, nanos: u64) -> f64 {
        nanos as f64 / self.nanos_per_unit() as f64
    }

    /// Convert a nanosecond count into whole units, truncating
    pub fn convert_whole(self, nanos: u64) -> u64 {
        nanos / self.nanos_per_unit()
    }

    /// Lowercase unit name as it appears in log lines
    pub const fn as_str(self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "nanoseconds",
            TimeUnit::Microseconds => "microseconds",
            TimeUnit::Milliseconds => "milliseconds",
            TimeUnit::Seconds => "seconds",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeUnit {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nanoseconds" | "ns" => Ok(TimeUnit::Nanoseconds),
            "microseconds" | "us" => Ok(TimeUnit::Microseconds),
            "milliseconds" | "ms" => Ok(TimeUnit::Milliseconds),
            "seconds" | "s" => Ok(TimeUnit::Seconds),
            _ => Err(PolicyError::UnknownUnit(s.to_string())),
        }
    }
}

impl TryFrom<String> for TimeUnit {
    type Error = PolicyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeUnit> for String {
    fn from(unit: TimeUnit) -> Self {
        unit.as_str().to_ascii_uppercase()
    }
}

/// Immutable configuration governing whether and how an operation is logged
///
/// # Example
/// ```
/// use timekeeper::policy::{OperationPolicy, TimeUnit};
///
/// let policy = OperationPolicy::default()
///     .with_unit(TimeUnit::Microseconds)
///     .with_threshold(250.0)
///     .unwrap()
///     .with_tag("db");
/// assert_eq!(policy.unit(), TimeUnit::Microseconds);
/// assert!(policy.is_exceeded(300_000));
/// assert!(!policy.is_exceeded(200_000));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OperationPolicy {
    display_name: String,
    unit: TimeUnit,
    #[serde(deserialize_with = "deserialize_threshold")]
    threshold: f64,
    logger_name: String,
    include_parameters: bool,
    tags: BTreeSet<String>,
    track_memory_usage: bool,
    max_log_count: u64,
    log_stack_trace_on_threshold_exceeded: bool,
}

impl Default for OperationPolicy {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            unit: TimeUnit::Milliseconds,
            threshold: 0.0,
            logger_name: String::new(),
            include_parameters: false,
            tags: BTreeSet::new(),
            track_memory_usage: false,
            max_log_count: 0,
            log_stack_trace_on_threshold_exceeded: false,
        }
    }
}

fn validate_threshold(threshold: f64) -> Result<f64, PolicyError> {
    if threshold.is_finite() && threshold >= 0.0 {
        Ok(threshold)
    } else {
        Err(PolicyError::InvalidThreshold(threshold))
    }
}

fn deserialize_threshold<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    validate_threshold(raw).map_err(serde::de::Error::custom)
}

impl OperationPolicy {
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_unit(mut self, unit: TimeUnit) -> Self {
        self.unit = unit;
        self
    }

    /// Set the threshold, expressed in the policy's unit
    ///
    /// Negative, NaN and infinite thresholds are rejected.
    pub fn with_threshold(mut self, threshold: f64) -> Result<Self, PolicyError> {
        self.threshold = validate_threshold(threshold)?;
        Ok(self)
    }

    pub fn with_logger(mut self, logger_name: impl Into<String>) -> Self {
        self.logger_name = logger_name.into();
        self
    }

    pub fn with_parameters(mut self, include: bool) -> Self {
        self.include_parameters = include;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_memory_tracking(mut self, track: bool) -> Self {
        self.track_memory_usage = track;
        self
    }

    /// Cap the number of emitted log lines (0 = unlimited)
    pub fn with_max_log_count(mut self, max: u64) -> Self {
        self.max_log_count = max;
        self
    }

    pub fn with_stack_trace_on_exceed(mut self, enabled: bool) -> Self {
        self.log_stack_trace_on_threshold_exceeded = enabled;
        self
    }

    /// Display-name override, if any
    pub fn display_name(&self) -> Option<&str> {
        (!self.display_name.is_empty()).then_some(self.display_name.as_str())
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Logger route, if any
    pub fn logger_name(&self) -> Option<&str> {
        (!self.logger_name.is_empty()).then_some(self.logger_name.as_str())
    }

    pub fn include_parameters(&self) -> bool {
        self.include_parameters
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn track_memory_usage(&self) -> bool {
        self.track_memory_usage
    }

    pub fn max_log_count(&self) -> u64 {
        self.max_log_count
    }

    pub fn log_stack_trace_on_threshold_exceeded(&self) -> bool {
        self.log_stack_trace_on_threshold_exceeded
    }

    /// Whether a duration meets the threshold, compared in the policy's unit
    pub fn is_exceeded(&self, duration_nanos: u64) -> bool {
        self.unit.convert(duration_nanos) >= self.threshold
    }

    /// Same as [`is_exceeded`](Self::is_exceeded) for a [`Duration`]
    pub fn is_exceeded_by(&self, elapsed: Duration) -> bool {
        self.is_exceeded(saturating_nanos(elapsed))
    }
}

/// Clamp a [`Duration`] to a nanosecond count that fits in `u64`
pub(crate) fn saturating_nanos(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
}

/// Source of statically declared policies, keyed by operation id
pub trait PolicySource: Send + Sync {
    /// Policy declared for `operation`, or `None` if it is not instrumented
    fn policy_for(&self, operation: &str) -> Option<OperationPolicy>;
}

impl<F> PolicySource for F
where
    F: Fn(&str) -> Option<OperationPolicy> + Send + Sync,
{
    fn policy_for(&self, operation: &str) -> Option<OperationPolicy> {
        self(operation)
    }
}

/// Table of declared policies
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    policies: FnvHashMap<String, OperationPolicy>,
}

impl PolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare (or replace) the policy for an operation
    pub fn insert(&mut self, operation: impl Into<String>, policy: OperationPolicy) {
        self.policies.insert(operation.into(), policy);
    }

    /// Builder-style [`insert`](Self::insert)
    pub fn with(mut self, operation: impl Into<String>, policy: OperationPolicy) -> Self {
        self.insert(operation, policy);
        self
    }

    pub fn get(&self, operation: &str) -> Option<&OperationPolicy> {
        self.policies.get(operation)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl FromIterator<(String, OperationPolicy)> for PolicyTable {
    fn from_iter<I: IntoIterator<Item = (String, OperationPolicy)>>(iter: I) -> Self {
        Self {
            policies: iter.into_iter().collect(),
        }
    }
}

impl PolicySource for PolicyTable {
    fn policy_for(&self, operation: &str) -> Option<OperationPolicy> {
        self.policies.get(operation).cloned()
    }
}
