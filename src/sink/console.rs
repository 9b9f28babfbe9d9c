use super::{AsyncTimeLogger, TimeLogger};
use crate::error::Result;
use crate::pipeline::{PipelineOptions, PipelineStats};
use std::io;

/// Sink that delivers lines to standard output
#[derive(Debug)]
pub struct ConsoleTimeLogger {
    inner: AsyncTimeLogger,
}

impl ConsoleTimeLogger {
    pub fn new() -> Result<Self> {
        Self::with_options(PipelineOptions::default().named("timekeeper-console"))
    }

    pub fn with_options(options: PipelineOptions) -> Result<Self> {
        Ok(Self {
            inner: AsyncTimeLogger::new(io::stdout(), options)?,
        })
    }

    pub fn stats(&self) -> PipelineStats {
        self.inner.stats()
    }
}

impl TimeLogger for ConsoleTimeLogger {
    fn log(&self, message: &str) -> Result<()> {
        self.inner.log(message)
    }

    // Nothing to release beyond the consumer thread.
    fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;

    #[test]
    fn test_console_logger_lifecycle() {
        let logger = ConsoleTimeLogger::new().unwrap();
        logger.log("console line").unwrap();
        logger.close().unwrap();
        logger.close().unwrap();

        assert_eq!(logger.stats().delivered, 1);
        assert!(matches!(logger.log("late"), Err(SinkError::Closed)));
    }
}
