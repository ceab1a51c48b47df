//! Transports: the seam between the default recorder and a collector.
//!
//! A [`Transport`] delivers one [`Report`] at a time. Retry policy lives in
//! the recorder, not here; a transport only needs to attempt one delivery
//! and describe its failure. The connection is created lazily on first send
//! and released on [`Transport::shutdown`].

mod http;
mod report;
mod tcp;

pub use http::HttpTransport;
pub use report::{LogEntry, Report, ReportField, SpanRecord};
pub use tcp::TcpTransport;

use std::fmt;
use std::time::Duration;

use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::trace::{ConfigurationError, Endpoint};

/// A failed report delivery. Never returned to application threads; the
/// recorder converts persistent failures into bus events.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The collector could not be reached.
    #[error("failed to reach collector: {0}")]
    Connect(String),
    /// The collector answered with a non-success HTTP status, e.g. on a
    /// rejected access token.
    #[error("collector rejected report: http status {0}")]
    Status(u16),
    /// The connection failed mid-delivery.
    #[error("i/o failure: {0}")]
    Io(String),
    /// The report could not be encoded.
    #[error("failed to encode report: {0}")]
    Serialize(String),
}

/// Describes the result of a report delivery.
pub type ExportResult = Result<(), TransportError>;

/// Delivers reports to a collector.
///
/// `send` is never called concurrently for the same transport; the
/// recorder's worker drives the returned future to completion before the
/// next call.
pub trait Transport: Send + fmt::Debug {
    /// Attempt to deliver one report.
    fn send(&mut self, report: Report) -> BoxFuture<'static, ExportResult>;

    /// Release the connection, if one was established.
    fn shutdown(&mut self) {}
}

/// Build the transport matching an endpoint and transport selection.
pub(crate) fn for_endpoint(
    endpoint: &Endpoint,
    use_http: bool,
    timeout: Duration,
) -> Result<Box<dyn Transport>, ConfigurationError> {
    if use_http {
        Ok(Box::new(HttpTransport::new(endpoint.clone(), timeout)))
    } else if !endpoint.is_plaintext() {
        Err(ConfigurationError::InvalidConfiguration(
            "a secure collector requires the http transport",
        ))
    } else {
        Ok(Box::new(TcpTransport::new(endpoint.clone(), timeout)))
    }
}
