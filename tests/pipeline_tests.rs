//! Integration tests for the asynchronous delivery pipeline
//!
//! Covers FIFO delivery per producer, concurrent producers, enqueues accepted
//! while draining, delivery failures that keep the consumer alive, and the
//! bounded drain on close.

mod utils;

use std::io::{self, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use timekeeper::pipeline::{DeliveryPipeline, PipelineOptions, PipelineState};
use timekeeper::record::LogRecord;
use timekeeper::SinkError;
use utils::{fast_options, message_of, CaptureWriter, FlakyWriter};

fn record(message: String) -> LogRecord {
    LogRecord::capture(message)
}

#[test]
fn test_single_producer_order_preserved() {
    let capture = CaptureWriter::default();
    let pipeline = DeliveryPipeline::start(capture.clone(), fast_options("order")).unwrap();

    for i in 0..500 {
        pipeline.enqueue(record(format!("msg {}", i))).unwrap();
    }
    pipeline.close().unwrap();

    let messages: Vec<String> = capture
        .lines()
        .iter()
        .map(|l| message_of(l).to_string())
        .collect();
    let expected: Vec<String> = (0..500).map(|i| format!("msg {}", i)).collect();
    assert_eq!(messages, expected);
}

#[test]
fn test_concurrent_producers_per_thread_fifo() {
    let capture = CaptureWriter::default();
    let pipeline = Arc::new(DeliveryPipeline::start(capture.clone(), fast_options("mpsc")).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let pipeline = Arc::clone(&pipeline);
            thread::Builder::new()
                .name(format!("producer-{}", t))
                .spawn(move || {
                    for i in 0..100 {
                        pipeline.enqueue(record(format!("{} {}", t, i))).unwrap();
                    }
                })
                .unwrap()
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    pipeline.close().unwrap();

    let lines = capture.lines();
    assert_eq!(lines.len(), 800);
    assert_eq!(pipeline.stats().delivered, 800);

    // Within each producer the sequence numbers must be increasing
    for t in 0..8 {
        let label = format!("[producer-{}]", t);
        let seq: Vec<u32> = lines
            .iter()
            .filter(|l| l.contains(&label))
            .map(|l| message_of(l).split(' ').nth(1).unwrap().parse().unwrap())
            .collect();
        assert_eq!(seq, (0..100).collect::<Vec<_>>());
    }
}

/// Holds every write until released, so the queue stays non-empty
struct GatedWriter {
    inner: CaptureWriter,
    gate: crossbeam::channel::Receiver<()>,
}

impl Write for GatedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.gate.recv_timeout(Duration::from_secs(2));
        Ok(())
    }
}

#[test]
fn test_enqueue_accepted_while_draining() {
    let capture = CaptureWriter::default();
    let (release, gate) = crossbeam::channel::unbounded();
    let writer = GatedWriter {
        inner: capture.clone(),
        gate,
    };
    let pipeline = Arc::new(DeliveryPipeline::start(writer, fast_options("gated")).unwrap());
    pipeline.enqueue(record("first".to_string())).unwrap();
    pipeline.enqueue(record("second".to_string())).unwrap();

    let closer = {
        let pipeline = Arc::clone(&pipeline);
        thread::spawn(move || pipeline.close())
    };

    let deadline = Instant::now() + Duration::from_secs(2);
    while pipeline.state() != PipelineState::Draining && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(pipeline.state(), PipelineState::Draining);
    pipeline.enqueue(record("during drain".to_string())).unwrap();

    for _ in 0..3 {
        release.send(()).unwrap();
    }
    closer.join().unwrap().unwrap();

    let messages: Vec<String> = capture
        .lines()
        .iter()
        .map(|l| message_of(l).to_string())
        .collect();
    assert_eq!(messages, vec!["first", "second", "during drain"]);
    assert!(matches!(
        pipeline.enqueue(record("after".to_string())),
        Err(SinkError::Closed)
    ));
}

#[test]
fn test_delivery_failures_do_not_stop_consumer() {
    let capture = CaptureWriter::default();
    let pipeline =
        DeliveryPipeline::start(FlakyWriter::new(capture.clone(), 3), fast_options("flaky")).unwrap();

    for i in 1..=9 {
        pipeline.enqueue(record(format!("line {}", i))).unwrap();
    }
    pipeline.close().unwrap();

    let stats = pipeline.stats();
    assert_eq!(stats.failed, 3);
    assert_eq!(stats.delivered, 6);
    let messages: Vec<String> = capture
        .lines()
        .iter()
        .map(|l| message_of(l).to_string())
        .collect();
    assert_eq!(
        messages,
        vec!["line 1", "line 2", "line 4", "line 5", "line 7", "line 8"]
    );
}

#[test]
fn test_bounded_drain_under_backlog() {
    struct Stalled;
    impl Write for Stalled {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            thread::sleep(Duration::from_millis(200));
            Ok(())
        }
    }

    let options = PipelineOptions {
        drain_timeout: Duration::from_millis(100),
        ..fast_options("stalled")
    };
    let pipeline = DeliveryPipeline::start(Stalled, options).unwrap();
    for i in 0..20 {
        pipeline.enqueue(record(format!("{}", i))).unwrap();
    }

    let started = Instant::now();
    let result = pipeline.close();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(matches!(result, Err(SinkError::DrainTimeout { abandoned }) if abandoned > 0));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[test]
fn test_concurrent_close_calls() {
    let pipeline = Arc::new(
        DeliveryPipeline::start(CaptureWriter::default(), fast_options("closers")).unwrap(),
    );
    pipeline.enqueue(record("x".to_string())).unwrap();

    let closers: Vec<_> = (0..4)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || pipeline.close())
        })
        .collect();
    for closer in closers {
        closer.join().unwrap().unwrap();
    }
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(pipeline.stats().delivered, 1);
}
