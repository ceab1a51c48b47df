use std::io::Write;
use std::net::TcpStream;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::trace::Endpoint;
use crate::transport::{ExportResult, Report, Transport, TransportError};

/// Delivers reports as length-framed JSON over a plaintext TCP connection.
///
/// Each report is written as a big-endian `u32` payload length followed by
/// the JSON payload. The connection is established lazily on first send,
/// dropped after any I/O failure so the next attempt reconnects, and
/// released on shutdown.
#[derive(Debug)]
pub struct TcpTransport {
    endpoint: Endpoint,
    timeout: Duration,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    /// A transport writing to `endpoint` with the given socket timeout.
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Self {
        TcpTransport {
            endpoint,
            timeout,
            stream: None,
        }
    }

    fn ensure_connected(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = TcpStream::connect((self.endpoint.host(), self.endpoint.port()))
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        stream
            .set_write_timeout(Some(self.timeout))
            .and_then(|_| stream.set_read_timeout(Some(self.timeout)))
            .map_err(|err| TransportError::Io(err.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn send_framed(&mut self, report: &Report) -> ExportResult {
        let body = serde_json::to_vec(report)
            .map_err(|err| TransportError::Serialize(err.to_string()))?;
        let frame_len = u32::try_from(body.len())
            .map_err(|_| TransportError::Serialize("report exceeds frame size".to_string()))?;

        self.ensure_connected()?;
        let outcome = match self.stream.as_mut() {
            Some(stream) => stream
                .write_all(&frame_len.to_be_bytes())
                .and_then(|_| stream.write_all(&body))
                .and_then(|_| stream.flush())
                .map_err(|err| TransportError::Io(err.to_string())),
            None => Err(TransportError::Connect("no connection".to_string())),
        };
        if outcome.is_err() {
            self.stream = None;
        }
        outcome
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, report: Report) -> BoxFuture<'static, ExportResult> {
        let result = self.send_framed(&report);
        Box::pin(std::future::ready(result))
    }

    fn shutdown(&mut self) {
        self.stream = None;
    }
}
