//! Timekeeper - execution-time instrumentation with asynchronous log delivery
//!
//! This library wraps operations with execution-time measurement and hands the
//! resulting lines to console or file sinks, each drained by its own background
//! thread so the instrumented call path never blocks on I/O.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod interceptor;
pub mod memory;
pub mod pipeline;
pub mod policy;
pub mod record;
pub mod sink;
pub mod timer;

pub use error::{ConfigError, PolicyError, SinkError, TimerError};
pub use interceptor::{Intercepted, Interceptor, InterceptorStats, Timed};
pub use policy::{OperationPolicy, PolicySource, PolicyTable, TimeUnit};
pub use sink::{ConsoleTimeLogger, FileTimeLogger, SinkRegistry, TimeLogger};
