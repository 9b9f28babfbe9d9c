//! Thread-scoped manual timer and closure measurement
//!
//! [`start`]/[`stop`] keep one mark per thread. A second `start` before `stop`
//! overwrites the mark. [`measure`] and [`try_measure`] wrap a closure and
//! always clear the mark, even when the closure fails or panics.
//!
//! The interceptor does not use the thread-local mark; it measures with a local
//! [`Instant`] so reentrant operations cannot disturb each other.

use crate::error::TimerError;
use crate::policy::{saturating_nanos, TimeUnit};
use std::cell::Cell;
use std::time::{Duration, Instant};

thread_local! {
    static MARK: Cell<Option<Instant>> = const { Cell::new(None) };
}

/// Start (or restart) the calling thread's timer
pub fn start() {
    MARK.with(|mark| mark.set(Some(Instant::now())));
}

/// Stop the calling thread's timer and return the elapsed nanoseconds
pub fn stop() -> Result<u64, TimerError> {
    let started = MARK
        .with(Cell::take)
        .ok_or(TimerError::NoActiveTimer)?;
    Ok(saturating_nanos(started.elapsed()))
}

/// Whether the calling thread currently has a running timer
pub fn is_running() -> bool {
    MARK.with(|mark| mark.get().is_some())
}

/// Clears the thread's mark when dropped, so unwinding cannot leak it
struct MarkGuard {
    started: Instant,
}

impl MarkGuard {
    fn begin() -> Self {
        let started = Instant::now();
        MARK.with(|mark| mark.set(Some(started)));
        Self { started }
    }

    fn finish(self) -> u64 {
        saturating_nanos(self.started.elapsed())
    }
}

impl Drop for MarkGuard {
    fn drop(&mut self) {
        MARK.with(|mark| mark.set(None));
    }
}

/// Duration and return value of a timed closure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementResult<V> {
    duration_nanos: u64,
    result: V,
}

impl<V> MeasurementResult<V> {
    pub fn new(duration_nanos: u64, result: V) -> Self {
        Self {
            duration_nanos,
            result,
        }
    }

    pub fn duration_nanos(&self) -> u64 {
        self.duration_nanos
    }

    pub fn duration(&self) -> Duration {
        Duration::from_nanos(self.duration_nanos)
    }

    /// Duration in `unit`, fractional
    pub fn duration_in(&self, unit: TimeUnit) -> f64 {
        unit.convert(self.duration_nanos)
    }

    /// Duration in whole `unit`s, truncated
    pub fn duration_whole(&self, unit: TimeUnit) -> u64 {
        unit.convert_whole(self.duration_nanos)
    }

    pub fn result(&self) -> &V {
        &self.result
    }

    pub fn into_result(self) -> V {
        self.result
    }
}

/// Measure the execution time of a closure
///
/// # Example
/// ```
/// use timekeeper::timer;
///
/// let measured = timer::measure(|| "Hello, World!");
/// assert_eq!(*measured.result(), "Hello, World!");
/// assert!(!timer::is_running());
/// ```
pub fn measure<F, R>(f: F) -> MeasurementResult<R>
where
    F: FnOnce() -> R,
{
    let guard = MarkGuard::begin();
    let result = f();
    MeasurementResult::new(guard.finish(), result)
}

/// Measure a fallible closure, propagating its error unchanged
///
/// The thread's mark is cleared before the error is returned.
pub fn try_measure<F, T, E>(f: F) -> Result<MeasurementResult<T>, E>
where
    F: FnOnce() -> Result<T, E>,
{
    let guard = MarkGuard::begin();
    let outcome = f();
    let nanos = guard.finish();
    outcome.map(|value| MeasurementResult::new(nanos, value))
}

/// Accumulates repeated measurements of the same operation
#[derive(Debug, Clone, Default)]
pub struct MeasurementStats {
    count: u64,
    total_nanos: u128,
    min_nanos: Option<u64>,
    max_nanos: Option<u64>,
}

impl MeasurementStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, duration_nanos: u64) {
        self.count += 1;
        self.total_nanos += u128::from(duration_nanos);
        self.min_nanos = Some(self.min_nanos.map_or(duration_nanos, |m| m.min(duration_nanos)));
        self.max_nanos = Some(self.max_nanos.map_or(duration_nanos, |m| m.max(duration_nanos)));
    }

    /// Run and time `f`, recording its duration
    pub fn measure<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let measured = measure(f);
        self.record(measured.duration_nanos());
        measured.into_result()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Total of all measurements in `unit`
    pub fn total(&self, unit: TimeUnit) -> f64 {
        self.total_nanos as f64 / unit.nanos_per_unit() as f64
    }

    /// Mean of all measurements in `unit`, or 0 when nothing was recorded
    pub fn average(&self, unit: TimeUnit) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total(unit) / self.count as f64
        }
    }

    pub fn min_nanos(&self) -> Option<u64> {
        self.min_nanos
    }

    pub fn max_nanos(&self) -> Option<u64> {
        self.max_nanos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_stop_without_start_fails() {
        assert_eq!(stop(), Err(TimerError::NoActiveTimer));
    }

    #[test]
    fn test_start_stop_clears_mark() {
        start();
        assert!(is_running());
        thread::sleep(Duration::from_millis(5));
        let nanos = stop().unwrap();
        assert!(nanos >= 5_000_000);
        assert!(!is_running());
        assert_eq!(stop(), Err(TimerError::NoActiveTimer));
    }

    #[test]
    fn test_restart_overwrites_mark() {
        start();
        thread::sleep(Duration::from_millis(20));
        start();
        let nanos = stop().unwrap();
        assert!(nanos < 20_000_000);
    }

    #[test]
    fn test_marks_are_per_thread() {
        start();
        let other = thread::spawn(|| (is_running(), stop())).join().unwrap();
        assert_eq!(other, (false, Err(TimerError::NoActiveTimer)));
        assert!(stop().is_ok());
    }

    #[test]
    fn test_measure_returns_value() {
        let measured = measure(|| {
            thread::sleep(Duration::from_millis(10));
            42
        });
        assert_eq!(*measured.result(), 42);
        assert!(measured.duration() >= Duration::from_millis(10));
        assert!(measured.duration_in(TimeUnit::Milliseconds) >= 10.0);
        assert_eq!(
            measured.duration_whole(TimeUnit::Nanoseconds),
            measured.duration_nanos()
        );
    }

    #[test]
    fn test_try_measure_propagates_error_and_clears_mark() {
        let outcome: Result<MeasurementResult<u32>, &str> = try_measure(|| Err("boom"));
        assert_eq!(outcome.unwrap_err(), "boom");
        assert!(!is_running());

        let ok: Result<_, &str> = try_measure(|| Ok(7));
        assert_eq!(ok.unwrap().into_result(), 7);
    }

    #[test]
    fn test_measure_clears_mark_on_panic() {
        let caught = std::panic::catch_unwind(|| measure(|| panic!("inside")));
        assert!(caught.is_err());
        assert!(!is_running());
    }

    #[test]
    fn test_measurement_stats() {
        let mut stats = MeasurementStats::new();
        assert_eq!(stats.average(TimeUnit::Milliseconds), 0.0);

        stats.record(1_000_000);
        stats.record(3_000_000);
        assert_eq!(stats.count(), 2);
        assert_eq!(stats.total(TimeUnit::Milliseconds), 4.0);
        assert_eq!(stats.average(TimeUnit::Milliseconds), 2.0);
        assert_eq!(stats.min_nanos(), Some(1_000_000));
        assert_eq!(stats.max_nanos(), Some(3_000_000));

        let value = stats.measure(|| "done");
        assert_eq!(value, "done");
        assert_eq!(stats.count(), 3);
    }
}
