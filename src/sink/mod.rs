//! Sinks: destinations for timestamped, thread-tagged log lines
//!
//! Every sink implements [`TimeLogger`]. The two concrete sinks,
//! [`ConsoleTimeLogger`] and [`FileTimeLogger`], are thin constructors over
//! [`AsyncTimeLogger`], which hands each record to a [`DeliveryPipeline`] so
//! that nothing is written on the caller's thread.

mod console;
mod file;
pub mod registry;

pub use console::ConsoleTimeLogger;
pub use file::FileTimeLogger;
pub use registry::SinkRegistry;

use crate::error::Result;
use crate::pipeline::{DeliveryPipeline, LineWriter, PipelineOptions, PipelineState, PipelineStats};
use crate::policy::TimeUnit;
use crate::record::LogRecord;

/// Destination for execution-time log lines
pub trait TimeLogger: Send + Sync {
    /// Queue `message` for delivery, stamped with time and thread label
    fn log(&self, message: &str) -> Result<()>;

    /// Log an execution time if it meets `threshold` (expressed in `unit`)
    ///
    /// The line reads `"<name> executed in <value> <unit>"` with four decimal
    /// places. Durations under the threshold are ignored.
    fn log_execution_time(
        &self,
        name: &str,
        duration_nanos: u64,
        unit: TimeUnit,
        threshold: f64,
    ) -> Result<()> {
        let value = unit.convert(duration_nanos);
        if value < threshold {
            return Ok(());
        }
        self.log(&format_execution_time(name, value, unit))
    }

    /// Drain pending lines and release the underlying resource
    fn close(&self) -> Result<()>;
}

/// `"<name> executed in <value:.4> <unit>"`
pub fn format_execution_time(name: &str, value: f64, unit: TimeUnit) -> String {
    format!("{} executed in {:.4} {}", name, value, unit.as_str())
}

/// [`TimeLogger`] backed by a [`DeliveryPipeline`]
#[derive(Debug)]
pub struct AsyncTimeLogger {
    pipeline: DeliveryPipeline,
}

impl AsyncTimeLogger {
    /// Start a pipeline that writes to `writer`
    pub fn new<W: LineWriter>(writer: W, options: PipelineOptions) -> Result<Self> {
        Ok(Self {
            pipeline: DeliveryPipeline::start(writer, options)?,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.pipeline.state()
    }

    pub fn stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }
}

impl TimeLogger for AsyncTimeLogger {
    fn log(&self, message: &str) -> Result<()> {
        self.pipeline.enqueue(LogRecord::capture(message))
    }

    fn close(&self) -> Result<()> {
        self.pipeline.close()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::SinkError;
    use std::sync::Mutex;

    /// In-memory sink that records every message synchronously
    #[derive(Debug, Default)]
    pub(crate) struct RecordingSink {
        messages: Mutex<Vec<String>>,
        pub(crate) fail: bool,
    }

    impl RecordingSink {
        pub(crate) fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub(crate) fn messages(&self) -> Vec<String> {
            self.messages.lock().unwrap().clone()
        }
    }

    impl TimeLogger for RecordingSink {
        fn log(&self, message: &str) -> Result<()> {
            if self.fail {
                return Err(SinkError::Closed);
            }
            self.messages.lock().unwrap().push(message.to_string());
            Ok(())
        }

        fn close(&self) -> Result<()> {
            Ok(())
        }
    }
}
