// Shared helpers for integration tests

#![allow(dead_code)]

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use timekeeper::pipeline::PipelineOptions;

/// Writer that keeps everything in memory so tests can read lines back
#[derive(Clone, Default)]
pub struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CaptureWriter {
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock().unwrap())
            .lines()
            .map(str::to_string)
            .collect()
    }
}

/// Writer that fails every `every`-th line and commits the others
pub struct FlakyWriter {
    inner: CaptureWriter,
    pending: Vec<u8>,
    every: usize,
    seen: usize,
}

impl FlakyWriter {
    pub fn new(inner: CaptureWriter, every: usize) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            every,
            seen: 0,
        }
    }
}

impl Write for FlakyWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    // Each line ends with a flush; a failed line is discarded.
    fn flush(&mut self) -> io::Result<()> {
        self.seen += 1;
        let line = std::mem::take(&mut self.pending);
        if self.seen % self.every == 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "simulated I/O failure"));
        }
        self.inner.write_all(&line)
    }
}

/// Pipeline options with a fast poll for quicker tests
pub fn fast_options(name: &str) -> PipelineOptions {
    PipelineOptions {
        poll_interval: Duration::from_millis(10),
        drain_timeout: Duration::from_secs(5),
        thread_name: name.to_string(),
    }
}

/// Strip `[timestamp] [thread] ` and return the message
pub fn message_of(line: &str) -> &str {
    line.splitn(3, "] ").nth(2).unwrap_or("")
}
