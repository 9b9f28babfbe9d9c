use super::{AsyncTimeLogger, TimeLogger};
use crate::error::{Result, SinkError};
use crate::pipeline::{PipelineOptions, PipelineStats};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Sink that appends lines to a file, flushing after each one
///
/// The file is opened (and created if missing) in append mode at construction.
/// The handle lives on the consumer thread and is released when it stops.
#[derive(Debug)]
pub struct FileTimeLogger {
    path: PathBuf,
    inner: AsyncTimeLogger,
}

impl FileTimeLogger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, PipelineOptions::default().named("timekeeper-file"))
    }

    pub fn open_with_options(path: impl AsRef<Path>, options: PipelineOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| SinkError::Open {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(path = %path.display(), "file sink opened");

        Ok(Self {
            inner: AsyncTimeLogger::new(file, options)?,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> PipelineStats {
        self.inner.stats()
    }
}

impl TimeLogger for FileTimeLogger {
    fn log(&self, message: &str) -> Result<()> {
        self.inner.log(message)
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }
}
