//! The default recorder: a bounded buffer drained by a dedicated worker
//! thread that batches spans into reports and ships them over a
//! [`Transport`].
//!
//! `record` never blocks beyond a bounded enqueue: when the buffer is full
//! the oldest span is dropped and a [`Event::SpansDropped`] is emitted. The
//! worker exports when the buffer crosses its high-water mark, when the
//! reporting period elapses, or when an explicit flush arrives. Failed
//! batches are retried with exponential backoff and then dropped with a
//! [`Event::ConnectionError`]; shutdown performs one best-effort delivery
//! within the caller's deadline.

use std::collections::VecDeque;
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use futures_executor::block_on;

use crate::events::{self, Event, StatusReport};
use crate::recorder::Recorder;
use crate::trace::config::{
    DEFAULT_BACKOFF_INITIAL, DEFAULT_BACKOFF_MAX, DEFAULT_MAX_BUFFERED_SPANS,
    DEFAULT_MAX_SEND_ATTEMPTS, DEFAULT_REPORTING_PERIOD,
};
use crate::trace::{RawSpan, TraceError, TraceResult};
use crate::transport::{Report, Transport};

/// Buffering and pacing knobs for [`BatchRecorder`].
#[derive(Clone, Debug)]
pub struct BatchConfig {
    /// Buffer capacity; the oldest span is dropped on overflow.
    pub max_buffered_spans: usize,
    /// Max interval between exports.
    pub reporting_period: Duration,
    /// First retry delay after a transport failure.
    pub backoff_initial: Duration,
    /// Retry delay ceiling.
    pub backoff_max: Duration,
    /// Delivery attempts per batch, first try included.
    pub max_send_attempts: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            max_buffered_spans: DEFAULT_MAX_BUFFERED_SPANS,
            reporting_period: DEFAULT_REPORTING_PERIOD,
            backoff_initial: DEFAULT_BACKOFF_INITIAL,
            backoff_max: DEFAULT_BACKOFF_MAX,
            max_send_attempts: DEFAULT_MAX_SEND_ATTEMPTS,
        }
    }
}

#[derive(Debug)]
struct QueueState {
    spans: VecDeque<RawSpan>,
    flush_waiters: Vec<SyncSender<()>>,
    shutdown_waiter: Option<SyncSender<()>>,
    stopping: bool,
    sent: u64,
    dropped: u64,
}

#[derive(Debug)]
struct SpanQueue {
    state: Mutex<QueueState>,
    wake: Condvar,
    capacity: usize,
    high_water: usize,
}

impl SpanQueue {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The default [`Recorder`]: bounded buffer plus dedicated worker thread.
#[derive(Debug)]
pub struct BatchRecorder {
    queue: Arc<SpanQueue>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl BatchRecorder {
    /// Create a recorder shipping reports through `transport`, stamping
    /// `access_token` on every report.
    pub fn new(transport: Box<dyn Transport>, access_token: String, config: BatchConfig) -> Self {
        let capacity = config.max_buffered_spans.max(1);
        let queue = Arc::new(SpanQueue {
            state: Mutex::new(QueueState {
                spans: VecDeque::with_capacity(capacity),
                flush_waiters: Vec::new(),
                shutdown_waiter: None,
                stopping: false,
                sent: 0,
                dropped: 0,
            }),
            wake: Condvar::new(),
            capacity,
            high_water: (capacity / 2).max(1),
        });

        let worker = Worker {
            transport,
            access_token,
            config,
            queue: queue.clone(),
        };
        let handle = thread::Builder::new()
            .name("tracewire-batch-recorder".to_string())
            .spawn(move || worker.run())
            .expect("failed to spawn recorder thread");

        BatchRecorder {
            queue,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Number of spans currently buffered.
    pub fn pending_spans(&self) -> usize {
        self.queue.lock().spans.len()
    }

    /// Snapshot of the recorder's lifetime counters.
    pub fn status(&self) -> StatusReport {
        let state = self.queue.lock();
        StatusReport {
            spans_sent: state.sent,
            spans_dropped: state.dropped,
            spans_pending: state.spans.len() as u64,
        }
    }
}

impl Recorder for BatchRecorder {
    fn record(&self, span: RawSpan) {
        let (dropped, wake) = {
            let mut state = self.queue.lock();
            if state.stopping {
                tracing::debug!("recorder is shut down; dropping span");
                return;
            }
            let mut dropped = false;
            if state.spans.len() >= self.queue.capacity {
                state.spans.pop_front();
                state.dropped += 1;
                dropped = true;
            }
            state.spans.push_back(span);
            (dropped, state.spans.len() >= self.queue.high_water)
        };
        if wake {
            self.queue.wake.notify_one();
        }
        if dropped {
            events::emit(Event::SpansDropped { count: 1 });
        }
    }

    fn flush(&self, deadline: Duration) -> TraceResult<()> {
        let (sender, receiver) = sync_channel(1);
        {
            let mut state = self.queue.lock();
            if state.stopping {
                return Ok(());
            }
            state.flush_waiters.push(sender);
        }
        self.queue.wake.notify_one();
        receiver
            .recv_timeout(deadline)
            .map_err(|_| TraceError::FlushTimeout(deadline))
    }

    fn shutdown(&self, deadline: Duration) -> TraceResult<()> {
        let (sender, receiver) = sync_channel(1);
        {
            let mut state = self.queue.lock();
            if state.stopping {
                return Ok(());
            }
            state.stopping = true;
            state.shutdown_waiter = Some(sender);
        }
        self.queue.wake.notify_all();
        let result = receiver
            .recv_timeout(deadline)
            .map_err(|_| TraceError::FlushTimeout(deadline));
        if result.is_ok() {
            if let Ok(mut worker) = self.worker.lock() {
                if let Some(handle) = worker.take() {
                    let _ = handle.join();
                }
            }
        }
        result
    }
}

impl Drop for BatchRecorder {
    fn drop(&mut self) {
        let _ = self.shutdown(Duration::from_millis(100));
    }
}

struct Worker {
    transport: Box<dyn Transport>,
    access_token: String,
    config: BatchConfig,
    queue: Arc<SpanQueue>,
}

impl Worker {
    fn run(mut self) {
        let mut last_cycle = Instant::now();
        loop {
            let (batch, flushers, shutdown) = self.wait_for_work(&last_cycle);
            let is_shutdown = shutdown.is_some();

            if !batch.is_empty() {
                let count = batch.len() as u64;
                let delivered = self.export(batch, is_shutdown);
                {
                    let mut state = self.queue.lock();
                    if delivered {
                        state.sent += count;
                    } else {
                        state.dropped += count;
                    }
                }
                if !delivered {
                    events::emit(Event::SpansDropped { count });
                }
            }

            for waiter in flushers {
                let _ = waiter.send(());
            }

            if last_cycle.elapsed() >= self.config.reporting_period {
                let report = {
                    let state = self.queue.lock();
                    StatusReport {
                        spans_sent: state.sent,
                        spans_dropped: state.dropped,
                        spans_pending: state.spans.len() as u64,
                    }
                };
                events::emit(Event::StatusReport(report));
                last_cycle = Instant::now();
            }

            if let Some(waiter) = shutdown {
                self.transport.shutdown();
                let _ = waiter.send(());
                return;
            }
        }
    }

    /// Block until there is something to do: the buffer crossed its
    /// high-water mark, the reporting period elapsed, or a flush/shutdown
    /// request arrived. Returns the drained batch and any waiters.
    fn wait_for_work(
        &self,
        last_cycle: &Instant,
    ) -> (Vec<RawSpan>, Vec<SyncSender<()>>, Option<SyncSender<()>>) {
        let mut state = self.queue.lock();
        loop {
            if state.shutdown_waiter.is_some() || !state.flush_waiters.is_empty() {
                break;
            }
            if state.spans.len() >= self.queue.high_water {
                break;
            }
            let elapsed = last_cycle.elapsed();
            if elapsed >= self.config.reporting_period {
                break;
            }
            let timeout = self.config.reporting_period - elapsed;
            let (guard, _) = self
                .queue
                .wake
                .wait_timeout(state, timeout)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
        let batch: Vec<RawSpan> = state.spans.drain(..).collect();
        let flushers = std::mem::take(&mut state.flush_waiters);
        let shutdown = state.shutdown_waiter.take();
        (batch, flushers, shutdown)
    }

    /// Deliver one batch. On shutdown a single best-effort attempt is made;
    /// otherwise failures are retried with exponential backoff up to the
    /// attempt ceiling. Returns whether the batch was delivered.
    fn export(&mut self, batch: Vec<RawSpan>, single_attempt: bool) -> bool {
        let report = Report::assemble(&self.access_token, batch);
        let attempts = if single_attempt {
            1
        } else {
            self.config.max_send_attempts.max(1)
        };
        let mut delay = self.config.backoff_initial;
        let mut last_error = None;

        for attempt in 0..attempts {
            match block_on(self.transport.send(report.clone())) {
                Ok(()) => return true,
                Err(err) => {
                    tracing::debug!(attempt, error = %err, "report delivery failed");
                    last_error = Some(err);
                    if attempt + 1 < attempts {
                        thread::sleep(delay.min(self.config.backoff_max));
                        delay = delay.saturating_mul(2);
                    }
                }
            }
        }

        let message = last_error
            .map(|err| err.to_string())
            .unwrap_or_else(|| "report delivery failed".to_string());
        events::emit(Event::ConnectionError { message });
        false
    }
}
