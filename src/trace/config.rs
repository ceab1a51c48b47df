//! Tracer configuration.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::common::Value;
use crate::events::{self, Event};
use crate::recorder::{BatchConfig, BatchRecorder, Recorder};
use crate::trace::id_generator::{IdGenerator, RandomIdGenerator};
use crate::trace::tracer::Tracer;
use crate::transport::Transport;

/// Override for the reporting period, in milliseconds.
pub(crate) const ENV_REPORTING_PERIOD: &str = "TRACEWIRE_REPORTING_PERIOD";
/// Override for the span buffer capacity.
pub(crate) const ENV_MAX_BUFFERED_SPANS: &str = "TRACEWIRE_MAX_BUFFERED_SPANS";
/// Override for the per-report transport timeout, in milliseconds.
pub(crate) const ENV_REPORT_TIMEOUT: &str = "TRACEWIRE_REPORT_TIMEOUT";

/// Default max interval between recorder flushes.
pub(crate) const DEFAULT_REPORTING_PERIOD: Duration = Duration::from_millis(500);
/// Default capacity of the recorder's in-memory buffer.
pub(crate) const DEFAULT_MAX_BUFFERED_SPANS: usize = 1_000;
/// Default time budget for a single report delivery.
pub(crate) const DEFAULT_REPORT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default first retry delay after a transport failure.
pub(crate) const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_secs(1);
/// Delay ceiling for transport retries.
pub(crate) const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(15);
/// Default number of delivery attempts per batch, first try included.
pub(crate) const DEFAULT_MAX_SEND_ATTEMPTS: usize = 4;
/// Default per-span log-record cap; 0 disables the cap.
pub(crate) const DEFAULT_MAX_LOGS_PER_SPAN: usize = 500;

/// A rejected tracer configuration. Fatal at construction; also surfaced as
/// an [`Event::StartError`] on the event bus.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// The default recorder requires a credential to ship spans.
    #[error("an access token is required to ship spans to a collector")]
    MissingAccessToken,
    /// The collector endpoint is unusable.
    #[error("malformed collector endpoint: {0}")]
    InvalidEndpoint(String),
    /// Some other option combination is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
}

/// A collector endpoint: host, port, and whether to use cleartext.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
    plaintext: bool,
}

impl Endpoint {
    /// A secure endpoint at `host:port`. Use [`Endpoint::with_plaintext`]
    /// for cleartext transport.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Endpoint {
            host: host.into(),
            port,
            plaintext: false,
        }
    }

    /// Select cleartext (`true`) or TLS with system roots (`false`).
    pub fn with_plaintext(mut self, plaintext: bool) -> Self {
        self.plaintext = plaintext;
        self
    }

    /// The endpoint host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The endpoint port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the endpoint speaks cleartext.
    pub fn is_plaintext(&self) -> bool {
        self.plaintext
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Configures and builds a [`Tracer`].
///
/// The recognized options mirror the collector-client configuration
/// surface: credential, endpoint, transport selection, an optional
/// replacement [`Recorder`], buffering and pacing knobs, tracer-wide tags,
/// and test seams for the transport and id generator.
///
/// Defaults honor the `TRACEWIRE_REPORTING_PERIOD`,
/// `TRACEWIRE_MAX_BUFFERED_SPANS`, and `TRACEWIRE_REPORT_TIMEOUT`
/// environment variables; explicit builder calls win over the environment.
pub struct TracerBuilder {
    access_token: Option<String>,
    collector: Endpoint,
    use_http: bool,
    recorder: Option<Arc<dyn Recorder>>,
    transport: Option<Box<dyn Transport>>,
    id_generator: Option<Arc<dyn IdGenerator>>,
    reporting_period: Duration,
    max_buffered_spans: usize,
    report_timeout: Duration,
    backoff_initial: Duration,
    backoff_max: Duration,
    max_send_attempts: usize,
    max_logs_per_span: usize,
    tags: HashMap<String, Value>,
}

impl fmt::Debug for TracerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracerBuilder")
            .field("collector", &self.collector)
            .field("use_http", &self.use_http)
            .field("reporting_period", &self.reporting_period)
            .field("max_buffered_spans", &self.max_buffered_spans)
            .finish()
    }
}

impl Default for TracerBuilder {
    fn default() -> Self {
        TracerBuilder {
            access_token: None,
            collector: Endpoint::new("localhost", 8360).with_plaintext(true),
            use_http: false,
            recorder: None,
            transport: None,
            id_generator: None,
            reporting_period: DEFAULT_REPORTING_PERIOD,
            max_buffered_spans: DEFAULT_MAX_BUFFERED_SPANS,
            report_timeout: DEFAULT_REPORT_TIMEOUT,
            backoff_initial: DEFAULT_BACKOFF_INITIAL,
            backoff_max: DEFAULT_BACKOFF_MAX,
            max_send_attempts: DEFAULT_MAX_SEND_ATTEMPTS,
            max_logs_per_span: DEFAULT_MAX_LOGS_PER_SPAN,
            tags: HashMap::new(),
        }
        .init_from_env_vars()
    }
}

impl TracerBuilder {
    /// The credential forwarded verbatim with every report.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// The collector the default recorder ships to.
    pub fn with_collector(mut self, endpoint: Endpoint) -> Self {
        self.collector = endpoint;
        self
    }

    /// Use the HTTP transport (`true`) instead of the length-framed TCP
    /// transport (`false`, the default).
    pub fn with_http_transport(mut self, use_http: bool) -> Self {
        self.use_http = use_http;
        self
    }

    /// Replace the default recorder with a user-supplied sink. The default
    /// transport is not constructed in that case, and flush is a no-op
    /// unless the sink implements it.
    pub fn with_recorder(mut self, recorder: Arc<dyn Recorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Replace the default recorder's transport while keeping its
    /// batching. With a custom transport the access token is optional.
    pub fn with_transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the id generator.
    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = Some(id_generator);
        self
    }

    /// Max interval between recorder flushes. Default 500 ms.
    pub fn with_reporting_period(mut self, period: Duration) -> Self {
        self.reporting_period = period;
        self
    }

    /// Capacity of the recorder's in-memory buffer. Default 1000.
    pub fn with_max_buffered_spans(mut self, capacity: usize) -> Self {
        self.max_buffered_spans = capacity;
        self
    }

    /// Time budget for a single report delivery. Default 30 s.
    pub fn with_report_timeout(mut self, timeout: Duration) -> Self {
        self.report_timeout = timeout;
        self
    }

    /// Retry pacing after transport failures: first delay and ceiling.
    /// Defaults 1 s and 15 s.
    pub fn with_send_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff_initial = initial;
        self.backoff_max = max;
        self
    }

    /// Delivery attempts per batch before it is dropped, first try
    /// included. Default 4.
    pub fn with_max_send_attempts(mut self, attempts: usize) -> Self {
        self.max_send_attempts = attempts.max(1);
        self
    }

    /// Per-span log-record cap; 0 disables the cap. Default 500.
    pub fn with_max_logs_per_span(mut self, max_logs: usize) -> Self {
        self.max_logs_per_span = max_logs;
        self
    }

    /// A tag stamped on every span this tracer starts.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    fn init_from_env_vars(mut self) -> Self {
        if let Some(period) = env::var(ENV_REPORTING_PERIOD)
            .ok()
            .and_then(|millis| u64::from_str(&millis).ok())
        {
            self.reporting_period = Duration::from_millis(period);
        }

        if let Some(capacity) = env::var(ENV_MAX_BUFFERED_SPANS)
            .ok()
            .and_then(|capacity| usize::from_str(&capacity).ok())
        {
            self.max_buffered_spans = capacity;
        }

        if let Some(timeout) = env::var(ENV_REPORT_TIMEOUT)
            .ok()
            .and_then(|millis| u64::from_str(&millis).ok())
        {
            self.report_timeout = Duration::from_millis(timeout);
        }

        self
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.reporting_period.is_zero() {
            return Err(ConfigurationError::InvalidConfiguration(
                "reporting period must be non-zero",
            ));
        }
        if self.max_buffered_spans == 0 {
            return Err(ConfigurationError::InvalidConfiguration(
                "span buffer capacity must be non-zero",
            ));
        }
        if self.recorder.is_some() {
            // A user recorder replaces the whole delivery path; nothing
            // else needs to hold.
            return Ok(());
        }
        if self.transport.is_none() {
            match self.access_token.as_deref() {
                None | Some("") => return Err(ConfigurationError::MissingAccessToken),
                Some(_) => {}
            }
            if self.collector.host().is_empty() {
                return Err(ConfigurationError::InvalidEndpoint(
                    "empty collector host".into(),
                ));
            }
            if self.collector.port() == 0 {
                return Err(ConfigurationError::InvalidEndpoint(format!(
                    "invalid collector port in {}",
                    self.collector
                )));
            }
            if !self.use_http && !self.collector.is_plaintext() {
                return Err(ConfigurationError::InvalidConfiguration(
                    "a secure collector requires the http transport",
                ));
            }
        }
        Ok(())
    }

    /// Build the tracer.
    ///
    /// A rejected configuration is returned as a [`ConfigurationError`] and
    /// additionally emitted as [`Event::StartError`].
    pub fn build(self) -> Result<Tracer, ConfigurationError> {
        if let Err(err) = self.validate() {
            events::emit(Event::StartError {
                message: err.to_string(),
            });
            return Err(err);
        }

        let recorder: Arc<dyn Recorder> = match self.recorder {
            Some(recorder) => recorder,
            None => {
                let transport = match self.transport {
                    Some(transport) => transport,
                    None => crate::transport::for_endpoint(
                        &self.collector,
                        self.use_http,
                        self.report_timeout,
                    )?,
                };
                let config = BatchConfig {
                    max_buffered_spans: self.max_buffered_spans,
                    reporting_period: self.reporting_period,
                    backoff_initial: self.backoff_initial,
                    backoff_max: self.backoff_max,
                    max_send_attempts: self.max_send_attempts,
                };
                Arc::new(BatchRecorder::new(
                    transport,
                    self.access_token.unwrap_or_default(),
                    config,
                ))
            }
        };

        let id_generator = self
            .id_generator
            .unwrap_or_else(|| Arc::new(RandomIdGenerator::default()));

        Ok(Tracer::from_parts(
            recorder,
            id_generator,
            self.tags,
            self.max_logs_per_span,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::InMemoryRecorder;
    use std::sync::Mutex;

    #[test]
    fn missing_access_token_is_rejected_and_reported() {
        let _guard = events::TEST_BUS_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        events::set_event_handler(move |event| {
            if let Event::StartError { message } = event {
                sink.lock().unwrap().push(message.clone());
            }
        });

        let err = Tracer::builder().build().unwrap_err();
        events::clear_event_handler();

        assert_eq!(err, ConfigurationError::MissingAccessToken);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn empty_host_is_rejected() {
        let _guard = events::TEST_BUS_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let err = Tracer::builder()
            .with_access_token("token")
            .with_collector(Endpoint::new("", 443))
            .with_http_transport(true)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidEndpoint(_)));
    }

    #[test]
    fn secure_binary_collector_is_rejected() {
        let _guard = events::TEST_BUS_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let err = Tracer::builder()
            .with_access_token("token")
            .with_collector(Endpoint::new("collector.example.com", 443))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidConfiguration(_)));
    }

    #[test]
    fn zero_buffer_capacity_is_rejected() {
        let _guard = events::TEST_BUS_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let err = Tracer::builder()
            .with_recorder(Arc::new(InMemoryRecorder::new()))
            .with_max_buffered_spans(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidConfiguration(_)));
    }

    #[test]
    fn custom_recorder_needs_no_token_or_endpoint() {
        let tracer = Tracer::builder()
            .with_recorder(Arc::new(InMemoryRecorder::new()))
            .build();
        assert!(tracer.is_ok());
    }

    #[test]
    fn env_vars_override_defaults() {
        let env_vars = [
            (ENV_REPORTING_PERIOD, Some("2000")),
            (ENV_MAX_BUFFERED_SPANS, Some("64")),
            (ENV_REPORT_TIMEOUT, Some("1500")),
        ];
        let builder = temp_env::with_vars(env_vars, TracerBuilder::default);
        assert_eq!(builder.reporting_period, Duration::from_millis(2000));
        assert_eq!(builder.max_buffered_spans, 64);
        assert_eq!(builder.report_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn defaults_without_env_vars() {
        let env_vars = [ENV_REPORTING_PERIOD, ENV_MAX_BUFFERED_SPANS, ENV_REPORT_TIMEOUT];
        let builder = temp_env::with_vars_unset(env_vars, TracerBuilder::default);
        assert_eq!(builder.reporting_period, DEFAULT_REPORTING_PERIOD);
        assert_eq!(builder.max_buffered_spans, DEFAULT_MAX_BUFFERED_SPANS);
        assert_eq!(builder.report_timeout, DEFAULT_REPORT_TIMEOUT);
        assert_eq!(builder.max_send_attempts, DEFAULT_MAX_SEND_ATTEMPTS);
    }
}
