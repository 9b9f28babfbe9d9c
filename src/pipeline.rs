//! Asynchronous delivery pipeline shared by every sink
//!
//! The pipeline decouples the caller's thread (which only enqueues a record)
//! from the I/O done by a dedicated consumer thread.
//!
//! # Design
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │ CALLER THREADS (Hot Path)                                       │
//! │   operation() → sink.log() → pipeline.enqueue(record)           │
//! │   never blocks on I/O                                           │
//! └─────────────────────────────────────────────────────────────────┘
//!                          │
//!                          │ unbounded crossbeam channel (FIFO)
//!                          ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │ CONSUMER THREAD (Cold Path)                                     │
//! │   loop {                                                        │
//! │     select! { record | wake from close() | 100ms poll }         │
//! │     writer.write_line(record);   // stdout or file, flushed     │
//! │   }                                                             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! `Running → Draining → Stopped`. [`DeliveryPipeline::close`] moves to
//! Draining; the consumer keeps writing (and producers may keep enqueuing)
//! until it sees an empty queue, which it checks under the state write lock so
//! no enqueue can slip in between. `close` wakes the consumer, so an idle
//! pipeline stops without waiting out a poll interval. If the drain outlives
//! the bounded wait the consumer is cancelled and the leftover records are
//! counted as abandoned.
//!
//! A writer that panics stops the pipeline: the in-flight record counts as
//! failed, queued records as abandoned, and later enqueues are rejected.
//!
//! The queue is unbounded: producers faster than the writer grow memory without
//! limit. There is no backpressure.

use crate::error::{Result, SinkError};
use crate::record::LogRecord;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default consumer poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default bounded wait for a drain on close
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Destination the consumer thread writes rendered lines to
pub trait LineWriter: Send + 'static {
    /// Write one newline-terminated line and flush it
    fn write_line(&mut self, line: &str) -> io::Result<()>;
}

impl<W: Write + Send + 'static> LineWriter for W {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self, "{}", line)?;
        self.flush()
    }
}

/// Lifecycle of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    Draining,
    Stopped,
}

/// Tuning for a pipeline's consumer
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// How long the consumer blocks waiting for a record before re-checking state
    pub poll_interval: Duration,
    /// Bounded wait for the drain in [`DeliveryPipeline::close`]
    pub drain_timeout: Duration,
    /// Name of the consumer thread
    pub thread_name: String,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            thread_name: "timekeeper-sink".to_string(),
        }
    }
}

impl PipelineOptions {
    pub fn named(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }
}

/// State shared between the pipeline handle and its consumer
#[derive(Debug)]
struct Shared {
    state: RwLock<PipelineState>,
    cancel: AtomicBool,
    enqueued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
}

impl Shared {
    fn read_state(&self) -> RwLockReadGuard<'_, PipelineState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, PipelineState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Unbounded queue with a single consumer thread
///
/// # Example
///
/// ```no_run
/// use timekeeper::pipeline::{DeliveryPipeline, PipelineOptions};
/// use timekeeper::record::LogRecord;
///
/// let pipeline = DeliveryPipeline::start(std::io::stdout(), PipelineOptions::default())?;
/// pipeline.enqueue(LogRecord::capture("warming up"))?;
/// pipeline.close()?;
/// # Ok::<(), timekeeper::error::SinkError>(())
/// ```
#[derive(Debug)]
pub struct DeliveryPipeline {
    sender: Sender<LogRecord>,
    /// Kept to report queue depth and discard leftovers after a forced stop
    receiver: Receiver<LogRecord>,
    shared: Arc<Shared>,
    /// Wakes the consumer when `close` moves to Draining
    wake: Sender<()>,
    /// Disconnects when the consumer thread exits
    finished: Receiver<()>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    drain_timeout: Duration,
    name: String,
}

impl DeliveryPipeline {
    /// Spawn the consumer thread that owns `writer`
    ///
    /// Fails with [`SinkError::InvalidOptions`] if the poll interval or the
    /// drain timeout is zero.
    pub fn start<W: LineWriter>(writer: W, options: PipelineOptions) -> Result<Self> {
        if options.poll_interval.is_zero() {
            return Err(SinkError::InvalidOptions("poll interval must be non-zero"));
        }
        if options.drain_timeout.is_zero() {
            return Err(SinkError::InvalidOptions("drain timeout must be non-zero"));
        }

        let (sender, receiver) = channel::unbounded();
        let (wake, wake_rx) = channel::bounded::<()>(1);
        let (finished_tx, finished) = channel::bounded::<()>(1);
        let shared = Arc::new(Shared {
            state: RwLock::new(PipelineState::Running),
            cancel: AtomicBool::new(false),
            enqueued: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
        });

        let consumer_receiver = receiver.clone();
        let consumer_shared = Arc::clone(&shared);
        let poll_interval = options.poll_interval;
        let name = options.thread_name.clone();
        let handle = thread::Builder::new()
            .name(options.thread_name.clone())
            .spawn(move || {
                let _finished = finished_tx;
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    consume(
                        writer,
                        &consumer_receiver,
                        &consumer_shared,
                        &wake_rx,
                        poll_interval,
                        &name,
                    )
                }));
                if outcome.is_err() {
                    stop_after_panic(&consumer_receiver, &consumer_shared, &name);
                }
            })
            .map_err(SinkError::Spawn)?;

        tracing::debug!(sink = %options.thread_name, "delivery pipeline started");

        Ok(Self {
            sender,
            receiver,
            shared,
            wake,
            finished,
            consumer: Mutex::new(Some(handle)),
            drain_timeout: options.drain_timeout,
            name: options.thread_name,
        })
    }

    /// Queue a record for delivery (never blocks)
    ///
    /// Accepted while Running or Draining; fails with [`SinkError::Closed`]
    /// once the pipeline has Stopped.
    pub fn enqueue(&self, record: LogRecord) -> Result<()> {
        let state = self.shared.read_state();
        if *state == PipelineState::Stopped {
            return Err(SinkError::Closed);
        }
        self.sender.send(record).map_err(|_| SinkError::Closed)?;
        self.shared.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn state(&self) -> PipelineState {
        *self.shared.read_state()
    }

    /// Drain the queue and stop the consumer
    ///
    /// Waits at most the configured drain timeout. Safe to call more than once
    /// and from several threads; calls after the pipeline stopped return `Ok`.
    pub fn close(&self) -> Result<()> {
        let previous = {
            let mut state = self.shared.write_state();
            let previous = *state;
            if previous == PipelineState::Running {
                *state = PipelineState::Draining;
            }
            previous
        };
        if previous == PipelineState::Stopped {
            self.join_consumer();
            return Ok(());
        }
        tracing::debug!(sink = %self.name, pending = self.receiver.len(), "draining");
        // A full slot means a wake-up is already pending.
        let _ = self.wake.try_send(());

        match self.finished.recv_timeout(self.drain_timeout) {
            Err(RecvTimeoutError::Timeout) => self.force_stop(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                self.join_consumer();
                *self.shared.write_state() = PipelineState::Stopped;
                tracing::debug!(sink = %self.name, "delivery pipeline stopped");
                Ok(())
            }
        }
    }

    fn force_stop(&self) -> Result<()> {
        self.shared.cancel.store(true, Ordering::SeqCst);
        *self.shared.write_state() = PipelineState::Stopped;

        let mut abandoned = 0u64;
        while self.receiver.try_recv().is_ok() {
            abandoned += 1;
        }
        self.shared.abandoned.fetch_add(abandoned, Ordering::Relaxed);

        // The consumer exits after its current write; it is not joined.
        drop(self.take_consumer());

        tracing::warn!(
            sink = %self.name,
            abandoned,
            timeout_ms = self.drain_timeout.as_millis() as u64,
            "drain timed out, consumer cancelled"
        );
        Err(SinkError::DrainTimeout { abandoned })
    }

    fn take_consumer(&self) -> Option<JoinHandle<()>> {
        self.consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn join_consumer(&self) {
        if let Some(handle) = self.take_consumer() {
            if handle.join().is_err() {
                tracing::error!(sink = %self.name, "consumer thread panicked");
            }
        }
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            enqueued: self.shared.enqueued.load(Ordering::Relaxed),
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            abandoned: self.shared.abandoned.load(Ordering::Relaxed),
            pending: self.receiver.len(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for DeliveryPipeline {
    fn drop(&mut self) {
        if self.state() != PipelineState::Stopped {
            let _ = self.close();
        }
    }
}

/// Consumer loop; runs on the pipeline's dedicated thread
fn consume<W: LineWriter>(
    mut writer: W,
    receiver: &Receiver<LogRecord>,
    shared: &Shared,
    wake: &Receiver<()>,
    poll_interval: Duration,
    name: &str,
) {
    loop {
        if shared.cancel.load(Ordering::SeqCst) {
            break;
        }

        crossbeam::select! {
            recv(receiver) -> record => match record {
                Ok(record) => deliver(&mut writer, &record, shared, name),
                Err(_) => break,
            },
            recv(wake) -> signal => {
                // The handle is gone; only a cancelled consumer gets here.
                if signal.is_err() {
                    break;
                }
            },
            default(poll_interval) => {}
        }

        if receiver.is_empty() && finish_if_drained(receiver, shared) {
            break;
        }
    }
    // `writer` drops here, releasing the file handle if there is one.
}

/// Stop the pipeline after the writer panicked mid-delivery
///
/// Takes the state write lock before draining, so every record enqueued
/// before the transition is counted and nothing is enqueued after it.
fn stop_after_panic(receiver: &Receiver<LogRecord>, shared: &Shared, name: &str) {
    shared.failed.fetch_add(1, Ordering::Relaxed);
    let mut state = shared.write_state();
    *state = PipelineState::Stopped;

    let mut abandoned = 0u64;
    while receiver.try_recv().is_ok() {
        abandoned += 1;
    }
    drop(state);
    shared.abandoned.fetch_add(abandoned, Ordering::Relaxed);

    tracing::error!(sink = %name, abandoned, "writer panicked, delivery pipeline stopped");
}

fn deliver<W: LineWriter>(writer: &mut W, record: &LogRecord, shared: &Shared, name: &str) {
    match writer.write_line(&record.to_string()) {
        Ok(()) => {
            shared.delivered.fetch_add(1, Ordering::Relaxed);
        }
        Err(source) => {
            let failed = shared.failed.fetch_add(1, Ordering::Relaxed) + 1;
            let err = SinkError::Delivery { source };
            tracing::error!(sink = %name, failed, error = %err, "log record dropped");
        }
    }
}

/// Transition Draining → Stopped if the queue is empty
///
/// Runs under the state write lock, which excludes concurrent enqueues.
fn finish_if_drained(receiver: &Receiver<LogRecord>, shared: &Shared) -> bool {
    if *shared.read_state() != PipelineState::Draining {
        return false;
    }
    let mut state = shared.write_state();
    if *state == PipelineState::Draining && receiver.is_empty() {
        *state = PipelineState::Stopped;
        true
    } else {
        false
    }
}

/// Pipeline counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub enqueued: u64,
    pub delivered: u64,
    pub failed: u64,
    pub abandoned: u64,
    pub pending: usize,
}

impl PipelineStats {
    /// Fraction of delivery attempts that failed (0.0 to 1.0)
    pub fn failure_rate(&self) -> f64 {
        let attempted = self.delivered + self.failed;
        if attempted == 0 {
            0.0
        } else {
            self.failed as f64 / attempted as f64
        }
    }
}
