use std::sync::Mutex;

use crate::recorder::Recorder;
use crate::trace::RawSpan;

/// A recorder that stores finished spans in memory.
///
/// Useful for testing and debugging. Spans are kept exactly as recorded —
/// lazy log fields stay unevaluated — and can be retrieved with
/// [`InMemoryRecorder::finished_spans`].
#[derive(Debug, Default)]
pub struct InMemoryRecorder {
    spans: Mutex<Vec<RawSpan>>,
}

impl InMemoryRecorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every span recorded so far, in record order.
    pub fn finished_spans(&self) -> Vec<RawSpan> {
        self.spans
            .lock()
            .map(|spans| spans.clone())
            .unwrap_or_default()
    }

    /// Clears the internal storage.
    pub fn reset(&self) {
        if let Ok(mut spans) = self.spans.lock() {
            spans.clear();
        }
    }
}

impl Recorder for InMemoryRecorder {
    fn record(&self, span: RawSpan) {
        if let Ok(mut spans) = self.spans.lock() {
            spans.push(span);
        }
    }
}
