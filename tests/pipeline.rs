//! End-to-end exercises of the span pipeline: tracer → batch recorder →
//! transport, plus propagation round trips and the global registry.

use std::collections::HashSet;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use futures_util::future::BoxFuture;
use once_cell::sync::Lazy;

use tracewire::events::{self, Event};
use tracewire::propagation::{Format, PropagationError};
use tracewire::recorder::InMemoryRecorder;
use tracewire::trace::{SpanId, TraceError, TraceId, Tracer};
use tracewire::transport::{ExportResult, Report, Transport, TransportError};
use tracewire::LogField;

/// The event bus is process state; tests that install a handler take this.
static BUS_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Route internal diagnostics to the test writer; `RUST_LOG` filters them.
fn init_diagnostics() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A transport that stores every report it is asked to deliver.
#[derive(Debug)]
struct CollectingTransport {
    reports: Arc<Mutex<Vec<Report>>>,
}

impl CollectingTransport {
    fn new() -> (Self, Arc<Mutex<Vec<Report>>>) {
        let reports = Arc::new(Mutex::new(Vec::new()));
        (
            CollectingTransport {
                reports: reports.clone(),
            },
            reports,
        )
    }
}

impl Transport for CollectingTransport {
    fn send(&mut self, report: Report) -> BoxFuture<'static, ExportResult> {
        let reports = self.reports.clone();
        Box::pin(async move {
            reports.lock().unwrap().push(report);
            Ok(())
        })
    }
}

fn collecting_tracer(reporting_period: Duration) -> (Tracer, Arc<Mutex<Vec<Report>>>) {
    let (transport, reports) = CollectingTransport::new();
    let tracer = Tracer::builder()
        .with_transport(Box::new(transport))
        .with_reporting_period(reporting_period)
        .build()
        .unwrap();
    (tracer, reports)
}

fn delivered_spans(reports: &Arc<Mutex<Vec<Report>>>) -> Vec<tracewire::transport::SpanRecord> {
    reports
        .lock()
        .unwrap()
        .iter()
        .flat_map(|report| report.spans.clone())
        .collect()
}

#[test]
fn parent_and_child_share_a_trace() {
    init_diagnostics();
    let (tracer, reports) = collecting_tracer(Duration::from_millis(50));

    let root = tracer.start_span("root");
    let child = tracer
        .span_builder("child")
        .child_of(&root.context())
        .start(&tracer);
    child.finish();
    root.finish();
    tracer.flush(Duration::from_secs(5)).unwrap();

    let spans = delivered_spans(&reports);
    assert_eq!(spans.len(), 2);
    let child = spans.iter().find(|span| span.operation == "child").unwrap();
    let root = spans.iter().find(|span| span.operation == "root").unwrap();
    assert_eq!(child.trace_id, root.trace_id);
    assert_eq!(child.parent_span_id, root.span_id);
    assert_eq!(root.parent_span_id, "0000000000000000");

    tracer.close(Duration::from_secs(5)).unwrap();
}

#[test]
fn eager_and_lazy_fields_arrive_in_one_record() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let (tracer, reports) = collecting_tracer(Duration::from_millis(50));

    let span = tracer.start_span("root");
    span.log_fields([
        LogField::string("k", "v"),
        LogField::lazy(move |encoder| {
            counted.fetch_add(1, Ordering::SeqCst);
            encoder.emit_string("t", "2026-08-06T00:00:00Z");
        }),
    ]);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    span.finish();
    tracer.flush(Duration::from_secs(5)).unwrap();

    let spans = delivered_spans(&reports);
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].logs.len(), 1);
    let fields = &spans[0].logs[0].fields;
    assert_eq!(fields.len(), 2);
    assert_eq!(fields[0].key, "k");
    assert_eq!(fields[0].value, serde_json::json!("v"));
    assert_eq!(fields[1].key, "t");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tracer.close(Duration::from_secs(5)).unwrap();
}

#[test]
fn lazy_fields_stay_unevaluated_in_a_plain_recorder() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let recorder = Arc::new(InMemoryRecorder::new());
    let tracer = Tracer::builder()
        .with_recorder(recorder.clone())
        .build()
        .unwrap();

    let span = tracer.start_span("op");
    span.log_fields([LogField::lazy(move |encoder| {
        counted.fetch_add(1, Ordering::SeqCst);
        encoder.emit_bool("ran", true);
    })]);
    span.finish();

    assert_eq!(recorder.finished_spans().len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn global_tracer_defaults_to_noop() {
    let previous = tracewire::global::clear_tracer();

    let tracer = tracewire::global::tracer();
    let span = tracer.start_span("pre-registration");
    span.set_tag("k", "v");
    span.log_event("ignored");
    span.finish();
    assert!(tracer.flush(Duration::from_secs(1)).is_ok());

    tracewire::global::set_tracer(previous);
}

#[test]
fn text_map_round_trip_ignores_unknown_keys() {
    let (tracer, _reports) = collecting_tracer(Duration::from_secs(60));
    let context = tracewire::SpanContext::new(
        TraceId::from_hex("0123456789abcdef0123456789abcdef").unwrap(),
        SpanId::from_hex("89abcdef01234ef0").unwrap(),
        true,
    )
    .with_baggage("user", "alice");

    let mut carrier: HashMap<String, String> = HashMap::new();
    tracer
        .inject(&context, Format::TextMap, &mut carrier)
        .unwrap();
    carrier.insert("x-unknown-header".to_string(), "junk".to_string());

    let extracted = tracer.extract(Format::TextMap, &carrier).unwrap();
    assert_eq!(extracted, context);
    assert_eq!(extracted.baggage_item("user"), Some("alice"));
    assert!(extracted.is_sampled());

    // The binary format cannot ride a key/value carrier.
    assert_eq!(
        tracer.inject(&context, Format::Binary, &mut carrier),
        Err(PropagationError::UnsupportedFormat)
    );

    // The dedicated binary entry points round-trip the same context.
    let bytes = tracer.inject_binary(&context);
    assert_eq!(tracer.extract_binary(&bytes).unwrap(), context);

    tracer.close(Duration::from_secs(1)).unwrap();
}

#[test]
fn flush_delivers_every_span_finished_before_the_call() {
    let (tracer, reports) = collecting_tracer(Duration::from_secs(60));
    for i in 0..25 {
        tracer.start_span(format!("op-{i}")).finish();
    }
    tracer.flush(Duration::from_secs(5)).unwrap();
    assert_eq!(delivered_spans(&reports).len(), 25);
    tracer.close(Duration::from_secs(5)).unwrap();
}

/// A transport that signals when a delivery starts, then blocks until the
/// test drops its end of the release channel.
#[derive(Debug)]
struct StallingTransport {
    received: Arc<Mutex<Vec<String>>>,
    started: mpsc::Sender<usize>,
    release: Arc<Mutex<mpsc::Receiver<()>>>,
}

impl Transport for StallingTransport {
    fn send(&mut self, report: Report) -> BoxFuture<'static, ExportResult> {
        let received = self.received.clone();
        let started = self.started.clone();
        let release = self.release.clone();
        Box::pin(async move {
            {
                let mut received = received.lock().unwrap();
                for span in &report.spans {
                    received.push(span.span_id.clone());
                }
            }
            let _ = started.send(report.spans.len());
            // Blocks until the test releases the transport.
            let _ = release.lock().unwrap().recv();
            Err(TransportError::Connect("collector never accepted".into()))
        })
    }
}

#[test]
fn producer_overrun_drops_oldest_with_accounted_events() {
    let _guard = BUS_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    let dropped_total = Arc::new(AtomicU64::new(0));
    let sink = dropped_total.clone();
    events::set_event_handler(move |event| {
        if let Event::SpansDropped { count } = event {
            sink.fetch_add(*count, Ordering::SeqCst);
        }
    });

    let received = Arc::new(Mutex::new(Vec::new()));
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let transport = StallingTransport {
        received: received.clone(),
        started: started_tx,
        release: Arc::new(Mutex::new(release_rx)),
    };

    let capacity = 1_000;
    let tracer = Tracer::builder()
        .with_transport(Box::new(transport))
        .with_max_buffered_spans(capacity)
        .with_reporting_period(Duration::from_millis(10))
        .with_max_send_attempts(1)
        .build()
        .unwrap();

    // Seed a first batch and wait for the worker to take it and stall.
    for _ in 0..10 {
        tracer.start_span("seed").finish();
    }
    let first_batch = started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("worker never started a delivery");

    // Overrun the buffer while the transport is stalled.
    for _ in 0..(10_000 - 10) {
        tracer.start_span("flood").finish();
    }

    // Every span is in exactly one place: taken by the transport (once),
    // resident in the full buffer, or dropped with a reported event.
    let dropped = dropped_total.load(Ordering::SeqCst);
    assert_eq!(dropped, (10_000 - first_batch - capacity) as u64);

    let received = received.lock().unwrap();
    assert_eq!(received.len(), first_batch);
    let unique: HashSet<&String> = received.iter().collect();
    assert_eq!(unique.len(), received.len(), "a span was delivered twice");
    drop(received);

    // The worker is wedged in the transport, so a flush cannot complete.
    let err = tracer.flush(Duration::from_millis(50)).unwrap_err();
    assert!(matches!(err, TraceError::FlushTimeout(_)));

    events::clear_event_handler();
    drop(release_tx);
    let _ = tracer.close(Duration::from_millis(100));
}

/// A transport that fails every delivery after a fixed delay.
#[derive(Debug)]
struct NeverAcceptsTransport {
    delay: Duration,
}

impl Transport for NeverAcceptsTransport {
    fn send(&mut self, _report: Report) -> BoxFuture<'static, ExportResult> {
        let delay = self.delay;
        Box::pin(async move {
            thread::sleep(delay);
            Err(TransportError::Connect("connection refused".into()))
        })
    }
}

#[test]
fn close_times_out_against_a_dead_collector() {
    init_diagnostics();
    let _guard = BUS_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    let connection_errors = Arc::new(AtomicUsize::new(0));
    let sink = connection_errors.clone();
    events::set_event_handler(move |event| {
        if let Event::ConnectionError { .. } = event {
            sink.fetch_add(1, Ordering::SeqCst);
        }
    });

    let tracer = Tracer::builder()
        .with_transport(Box::new(NeverAcceptsTransport {
            delay: Duration::from_millis(300),
        }))
        .with_reporting_period(Duration::from_secs(60))
        .with_max_send_attempts(1)
        .build()
        .unwrap();

    tracer.start_span("pending").finish();
    let err = tracer.close(Duration::from_millis(50)).unwrap_err();
    assert!(matches!(err, TraceError::FlushTimeout(_)));

    // The worker finishes its best-effort attempt and reports the failure.
    thread::sleep(Duration::from_millis(500));
    assert!(connection_errors.load(Ordering::SeqCst) >= 1);
    events::clear_event_handler();

    // The tracer is terminally disabled.
    assert!(!tracer.is_enabled());
    let span = tracer.start_span("after-close");
    assert!(!span.is_active());
    span.finish();
    assert!(tracer.flush(Duration::from_secs(1)).is_ok());
}

#[test]
fn span_ids_are_unique_across_a_large_trace() {
    let recorder = Arc::new(InMemoryRecorder::new());
    let tracer = Tracer::builder()
        .with_recorder(recorder.clone())
        .build()
        .unwrap();

    let mut seen = HashSet::new();
    for _ in 0..100_000 {
        let span = tracer.start_span("op");
        assert!(seen.insert(span.context().span_id()));
        // Dropping the span finishes it; keep the recorder small.
        recorder.reset();
    }
}
