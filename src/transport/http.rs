use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::trace::Endpoint;
use crate::transport::{ExportResult, Report, Transport, TransportError};

/// Path reports are posted to under the collector host.
const REPORT_PATH: &str = "/api/v0/reports";

/// Delivers reports as JSON over HTTP POST.
///
/// Plaintext endpoints use `http://`; everything else uses `https://` with
/// the system trust roots. The client is built lazily on first send and
/// released on shutdown.
#[derive(Debug)]
pub struct HttpTransport {
    endpoint: Endpoint,
    timeout: Duration,
    client: Option<reqwest::blocking::Client>,
}

impl HttpTransport {
    /// A transport posting to `endpoint` with the given per-report timeout.
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Self {
        HttpTransport {
            endpoint,
            timeout,
            client: None,
        }
    }

    fn client(&mut self) -> Result<reqwest::blocking::Client, TransportError> {
        match &self.client {
            Some(client) => Ok(client.clone()),
            None => {
                let client = reqwest::blocking::Client::builder()
                    .timeout(self.timeout)
                    .build()
                    .map_err(|err| TransportError::Connect(err.to_string()))?;
                self.client = Some(client.clone());
                Ok(client)
            }
        }
    }

    fn report_url(&self) -> String {
        let scheme = if self.endpoint.is_plaintext() {
            "http"
        } else {
            "https"
        };
        format!(
            "{scheme}://{}:{}{REPORT_PATH}",
            self.endpoint.host(),
            self.endpoint.port()
        )
    }
}

impl Transport for HttpTransport {
    fn send(&mut self, report: Report) -> BoxFuture<'static, ExportResult> {
        let client = match self.client() {
            Ok(client) => client,
            Err(err) => return Box::pin(std::future::ready(Err(err))),
        };
        let url = self.report_url();
        Box::pin(async move {
            let response = client
                .post(&url)
                .json(&report)
                .send()
                .map_err(|err| TransportError::Connect(err.to_string()))?;
            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(TransportError::Status(status.as_u16()))
            }
        })
    }

    fn shutdown(&mut self) {
        self.client = None;
    }
}
