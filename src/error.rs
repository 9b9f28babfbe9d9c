//! Error types for timekeeper
//!
//! Each concern carries its own enum: timer misuse, sink/pipeline failures,
//! invalid policies and configuration loading. Failures raised inside the
//! logging path are reported through `tracing` and never reach the caller of
//! an instrumented operation.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the thread-scoped manual timer
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    #[error("Timer not started on this thread")]
    NoActiveTimer,
}

/// Errors raised by sinks and their delivery pipeline
#[derive(Error, Debug)]
pub enum SinkError {
    /// No sink is registered under the requested logger name
    #[error("No sink registered under name '{0}'")]
    Unavailable(String),

    /// The consumer thread failed to write a record
    #[error("Failed to deliver log record: {source}")]
    Delivery {
        #[source]
        source: io::Error,
    },

    /// The pipeline already reached the Stopped state
    #[error("Sink is closed; no further records can be delivered")]
    Closed,

    /// The file sink could not open its target
    #[error("Failed to open log file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The bounded drain wait elapsed before the queue emptied
    #[error("Drain timed out; {abandoned} queued records were abandoned")]
    DrainTimeout { abandoned: u64 },

    /// The consumer thread could not be spawned
    #[error("Failed to spawn consumer thread: {0}")]
    Spawn(#[source] io::Error),

    /// A pipeline timing was zero
    #[error("Invalid pipeline options: {0}")]
    InvalidOptions(&'static str),
}

/// Errors raised while building an operation policy
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    #[error("Threshold must be a finite value >= 0, got {0}")]
    InvalidThreshold(f64),

    #[error("Unknown time unit '{0}' (expected NANOSECONDS, MICROSECONDS, MILLISECONDS or SECONDS)")]
    UnknownUnit(String),
}

/// Errors raised while turning a configuration into sinks
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Default sink '{0}' is not declared in [[sinks]]")]
    UnknownDefaultSink(String),

    #[error("Sink '{0}' is declared more than once")]
    DuplicateSink(String),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, SinkError>;
