//! Execution-time interception
//!
//! The [`Interceptor`] sits between a caller and the real operation. For every
//! call it resolves the operation's [`OperationPolicy`] (once, then cached),
//! runs the operation, and when the elapsed time meets the policy's threshold
//! hands a line to the routed sink.
//!
//! Three ways to put it in front of code:
//!
//! - [`Interceptor::invoke`] times a closure under an operation id.
//! - [`Interceptor::wrap`] owns a target; [`Intercepted::invoke`] calls its methods.
//! - [`Interceptor::decorate`] turns a function plus a policy into a [`Timed`] callable.
//!
//! Timing is recorded on every exit path. A returned `Err` is just a value, and
//! a panic unwinding out of the operation still triggers emission from a drop
//! guard before it continues. Nothing on the logging path (threshold checks,
//! sink failures, closed sinks) is ever visible to the caller.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use timekeeper::interceptor::Interceptor;
//! use timekeeper::policy::{OperationPolicy, PolicyTable};
//! use timekeeper::sink::{ConsoleTimeLogger, SinkRegistry};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let sinks = SinkRegistry::new("console", Arc::new(ConsoleTimeLogger::new()?));
//! let policies = PolicyTable::new().with("parse", OperationPolicy::default());
//! let interceptor = Interceptor::new(policies, Arc::new(sinks));
//!
//! let len = interceptor.invoke("parse", &[&"input"], || "input".len());
//! assert_eq!(len, 5);
//! interceptor.sinks().close_all()?;
//! # Ok(())
//! # }
//! ```

use crate::memory;
use crate::policy::{saturating_nanos, OperationPolicy, PolicySource};
use crate::sink::SinkRegistry;
use backtrace::Backtrace;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fnv::FnvBuildHasher;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Wraps operations with execution-time measurement
pub struct Interceptor {
    source: Box<dyn PolicySource>,
    sinks: Arc<SinkRegistry>,
    /// Resolved policies, including "not instrumented" (`None`)
    policies: DashMap<String, Option<Arc<OperationPolicy>>, FnvBuildHasher>,
    /// Emissions per operation, checked against `max_log_count`
    log_counts: DashMap<String, u64, FnvBuildHasher>,
    counters: Counters,
}

#[derive(Debug, Default)]
struct Counters {
    intercepted: AtomicU64,
    emitted: AtomicU64,
    suppressed_by_threshold: AtomicU64,
    suppressed_by_limit: AtomicU64,
    emission_failures: AtomicU64,
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("sinks", &self.sinks)
            .field("cached_policies", &self.policies.len())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Interceptor {
    pub fn new(source: impl PolicySource + 'static, sinks: Arc<SinkRegistry>) -> Arc<Self> {
        Arc::new(Self {
            source: Box::new(source),
            sinks,
            policies: DashMap::default(),
            log_counts: DashMap::default(),
            counters: Counters::default(),
        })
    }

    /// Policy for `operation`, resolved from the source on first use
    ///
    /// Concurrent first calls for the same operation converge on one cached
    /// `Arc`.
    pub fn resolve(&self, operation: &str) -> Option<Arc<OperationPolicy>> {
        if let Some(cached) = self.policies.get(operation) {
            return cached.value().clone();
        }
        self.policies
            .entry(operation.to_string())
            .or_insert_with(|| self.source.policy_for(operation).map(Arc::new))
            .value()
            .clone()
    }

    /// Install a statically supplied policy for an operation not yet resolved
    ///
    /// Resolution is fixed for the interceptor's lifetime: once `operation`
    /// has been resolved or registered (even as uninstrumented), the cached
    /// entry wins and `false` is returned.
    pub fn register(&self, operation: impl Into<String>, policy: OperationPolicy) -> bool {
        match self.policies.entry(operation.into()) {
            Entry::Vacant(slot) => {
                slot.insert(Some(Arc::new(policy)));
                true
            }
            Entry::Occupied(cached) => {
                tracing::debug!(operation = %cached.key(), "policy already resolved, keeping it");
                false
            }
        }
    }

    /// Run `call` as `operation`, timing it if a policy applies
    ///
    /// `args` are rendered into the log line only when the policy asks for
    /// parameters. The return value (or panic) of `call` passes through
    /// unchanged.
    pub fn invoke<R>(
        &self,
        operation: &str,
        args: &[&dyn fmt::Debug],
        call: impl FnOnce() -> R,
    ) -> R {
        let Some(policy) = self.resolve(operation) else {
            return call();
        };
        let params = policy.include_parameters().then(|| render_args(args));
        self.timed(operation, policy, params, call)
    }

    /// Take ownership of `target` so its operations can be invoked through
    /// this interceptor
    pub fn wrap<T>(self: &Arc<Self>, target: T) -> Intercepted<T> {
        Intercepted {
            target,
            interceptor: Arc::clone(self),
        }
    }

    /// Bind `policy` to `operation` and return `f` wrapped as a [`Timed`]
    ///
    /// Follows [`Interceptor::register`]: an earlier resolution of
    /// `operation` keeps precedence over `policy`.
    pub fn decorate<F>(
        self: &Arc<Self>,
        operation: impl Into<String>,
        policy: OperationPolicy,
        f: F,
    ) -> Timed<F> {
        let operation = operation.into();
        self.register(operation.clone(), policy);
        Timed {
            operation,
            interceptor: Arc::clone(self),
            f,
        }
    }

    fn timed<R>(
        &self,
        operation: &str,
        policy: Arc<OperationPolicy>,
        params: Option<String>,
        call: impl FnOnce() -> R,
    ) -> R {
        self.counters.intercepted.fetch_add(1, Ordering::Relaxed);
        let guard = TimingGuard {
            interceptor: self,
            operation,
            memory_before: policy
                .track_memory_usage()
                .then(memory::resident_bytes)
                .flatten(),
            policy,
            params,
            started: Instant::now(),
        };
        let result = call();
        drop(guard);
        result
    }

    fn emit(
        &self,
        operation: &str,
        policy: &OperationPolicy,
        params: Option<&str>,
        duration_nanos: u64,
        memory_before: Option<u64>,
    ) {
        if !policy.is_exceeded(duration_nanos) {
            self.counters
                .suppressed_by_threshold
                .fetch_add(1, Ordering::Relaxed);
            return;
        }
        if !self.try_count(operation, policy.max_log_count()) {
            self.counters
                .suppressed_by_limit
                .fetch_add(1, Ordering::Relaxed);
            return;
        }

        let label = display_label(operation, policy, params);
        let sink = self.sinks.resolve(policy.logger_name());

        let mut outcome =
            sink.log_execution_time(&label, duration_nanos, policy.unit(), policy.threshold());

        if outcome.is_ok() && policy.track_memory_usage() {
            if let (Some(before), Some(after)) = (memory_before, memory::resident_bytes()) {
                outcome = sink.log(&format!(
                    "{} memory delta: {} bytes",
                    label,
                    memory::format_delta(before, after)
                ));
            }
        }

        if outcome.is_ok() && policy.log_stack_trace_on_threshold_exceeded() {
            outcome = sink.log(&format!("{} stack trace:\n{:?}", label, Backtrace::new()));
        }

        match outcome {
            Ok(()) => {
                self.counters.emitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.counters
                    .emission_failures
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(operation, error = %err, "failed to log execution time");
            }
        }
    }

    /// Reserve one emission for `operation`; false once `max` is reached
    fn try_count(&self, operation: &str, max: u64) -> bool {
        let admit = |count: &mut u64| {
            if max > 0 && *count >= max {
                false
            } else {
                *count += 1;
                true
            }
        };
        if let Some(mut count) = self.log_counts.get_mut(operation) {
            return admit(count.value_mut());
        }
        let mut count = self.log_counts.entry(operation.to_string()).or_insert(0);
        admit(count.value_mut())
    }

    /// Number of lines emitted so far for `operation`
    pub fn log_count(&self, operation: &str) -> u64 {
        self.log_counts.get(operation).map_or(0, |c| *c.value())
    }

    pub fn sinks(&self) -> &SinkRegistry {
        &self.sinks
    }

    pub fn stats(&self) -> InterceptorStats {
        InterceptorStats {
            intercepted: self.counters.intercepted.load(Ordering::Relaxed),
            emitted: self.counters.emitted.load(Ordering::Relaxed),
            suppressed_by_threshold: self
                .counters
                .suppressed_by_threshold
                .load(Ordering::Relaxed),
            suppressed_by_limit: self.counters.suppressed_by_limit.load(Ordering::Relaxed),
            emission_failures: self.counters.emission_failures.load(Ordering::Relaxed),
        }
    }
}

/// Emits on drop so that unwinding operations are timed too
struct TimingGuard<'a> {
    interceptor: &'a Interceptor,
    operation: &'a str,
    policy: Arc<OperationPolicy>,
    params: Option<String>,
    memory_before: Option<u64>,
    started: Instant,
}

impl Drop for TimingGuard<'_> {
    fn drop(&mut self) {
        let elapsed = saturating_nanos(self.started.elapsed());
        self.interceptor.emit(
            self.operation,
            &self.policy,
            self.params.as_deref(),
            elapsed,
            self.memory_before,
        );
    }
}

fn render_args(args: &[&dyn fmt::Debug]) -> String {
    args.iter()
        .map(|arg| format!("{:?}", arg))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Display name (or operation id), then `(params)`, then ` [tags]`
fn display_label(operation: &str, policy: &OperationPolicy, params: Option<&str>) -> String {
    let mut label = policy.display_name().unwrap_or(operation).to_string();
    if let Some(params) = params {
        label.push('(');
        label.push_str(params);
        label.push(')');
    }
    if !policy.tags().is_empty() {
        let tags: Vec<&str> = policy.tags().iter().map(String::as_str).collect();
        label.push_str(" [");
        label.push_str(&tags.join(", "));
        label.push(']');
    }
    label
}

/// Interceptor counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterceptorStats {
    /// Calls that had a policy and were timed
    pub intercepted: u64,
    /// Calls whose line reached a sink
    pub emitted: u64,
    pub suppressed_by_threshold: u64,
    pub suppressed_by_limit: u64,
    /// Sink failures swallowed on the logging path
    pub emission_failures: u64,
}

/// A target whose operations run through an [`Interceptor`]
#[derive(Debug)]
pub struct Intercepted<T> {
    target: T,
    interceptor: Arc<Interceptor>,
}

impl<T> Intercepted<T> {
    /// Call an operation on the wrapped target
    pub fn invoke<R>(
        &self,
        operation: &str,
        args: &[&dyn fmt::Debug],
        call: impl FnOnce(&T) -> R,
    ) -> R {
        self.interceptor
            .invoke(operation, args, || call(&self.target))
    }

    /// Call a mutating operation on the wrapped target
    pub fn invoke_mut<R>(
        &mut self,
        operation: &str,
        args: &[&dyn fmt::Debug],
        call: impl FnOnce(&mut T) -> R,
    ) -> R {
        let target = &mut self.target;
        self.interceptor.invoke(operation, args, || call(target))
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn interceptor(&self) -> &Arc<Interceptor> {
        &self.interceptor
    }

    pub fn into_inner(self) -> T {
        self.target
    }
}

/// A function bound to an operation id and policy
pub struct Timed<F> {
    operation: String,
    interceptor: Arc<Interceptor>,
    f: F,
}

impl<F> fmt::Debug for Timed<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timed")
            .field("operation", &self.operation)
            .finish_non_exhaustive()
    }
}

impl<F> Timed<F> {
    /// Call the wrapped function with a single argument
    ///
    /// Use a tuple for several arguments.
    pub fn call<A, R>(&self, arg: A) -> R
    where
        F: Fn(A) -> R,
        A: fmt::Debug,
    {
        let Some(policy) = self.interceptor.resolve(&self.operation) else {
            return (self.f)(arg);
        };
        let params = policy.include_parameters().then(|| format!("{:?}", arg));
        self.interceptor
            .timed(&self.operation, policy, params, || (self.f)(arg))
    }

    /// Call a wrapped function that takes no arguments
    pub fn run<R>(&self) -> R
    where
        F: Fn() -> R,
    {
        self.interceptor.invoke(&self.operation, &[], || (self.f)())
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }
}
