//! HTTP health probe over a local stream

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Local};
use http_body_util::{BodyExt, Empty};
use http::header::HOST;
use http::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use relaywatch_util::PING_PATH;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::{Connector, LocalConnector, ProbeEndpoint, ProbeError};

/// Default bound on a single probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// How much of the response body is kept for logging
const BODY_EXCERPT_LEN: usize = 64;

/// Outcome of a single probe
///
/// A point-in-time sample; nothing aggregates these.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub healthy: bool,
    /// HTTP status, if a response arrived
    pub status: Option<u16>,
    /// Why the probe was unhealthy
    pub error: Option<String>,
    pub elapsed: Duration,
    /// Start of the response body, lossily decoded
    pub body: Option<String>,
    pub checked_at: DateTime<Local>,
}

impl ProbeResult {
    fn from_outcome(outcome: Result<PingResponse, ProbeError>, elapsed: Duration) -> Self {
        let checked_at = Local::now();

        match outcome {
            Ok(response) if response.status == StatusCode::OK => Self {
                healthy: true,
                status: Some(response.status.as_u16()),
                error: None,
                elapsed,
                body: Some(response.excerpt()),
                checked_at,
            },
            Ok(response) => Self {
                healthy: false,
                status: Some(response.status.as_u16()),
                error: Some(ProbeError::UnhealthyStatus(response.status.as_u16()).to_string()),
                elapsed,
                body: Some(response.excerpt()),
                checked_at,
            },
            Err(e) => Self {
                healthy: false,
                status: None,
                error: Some(e.to_string()),
                elapsed,
                body: None,
                checked_at,
            },
        }
    }
}

/// Raw response to a ping
#[derive(Debug)]
pub struct PingResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl PingResponse {
    fn excerpt(&self) -> String {
        let end = self.body.len().min(BODY_EXCERPT_LEN);
        String::from_utf8_lossy(&self.body[..end]).into_owned()
    }
}

/// A single health check
#[async_trait]
pub trait Probe: Send + Sync {
    /// Run one check; failures are reported in the result, never raised
    async fn check(&self) -> ProbeResult;
}

/// Aborts the connection driver when the request is finished or dropped
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// `GET /_ping` over a Unix socket or named pipe
pub struct HttpProbe<C = LocalConnector> {
    endpoint: ProbeEndpoint,
    connector: C,
    timeout: Duration,
}

impl HttpProbe<LocalConnector> {
    pub fn new(endpoint: ProbeEndpoint, timeout: Duration) -> Self {
        let connector = LocalConnector::new(endpoint.transport.clone());
        Self::with_connector(endpoint, connector, timeout)
    }
}

impl<C: Connector> HttpProbe<C> {
    pub fn with_connector(endpoint: ProbeEndpoint, connector: C, timeout: Duration) -> Self {
        Self {
            endpoint,
            connector,
            timeout,
        }
    }

    pub fn endpoint(&self) -> &ProbeEndpoint {
        &self.endpoint
    }

    /// Ping the endpoint, bounded by the probe timeout.
    ///
    /// Any response is `Ok`; judging the status is up to the caller.
    pub async fn ping(&self) -> Result<PingResponse, ProbeError> {
        tokio::time::timeout(self.timeout, self.request(PING_PATH))
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))?
    }

    async fn request(&self, path: &str) -> Result<PingResponse, ProbeError> {
        let io = self.connector.connect().await?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io)).await?;
        let driver = tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "Probe connection closed with error");
            }
        });
        let _driver = AbortOnDrop(driver.abort_handle());

        let request = Request::builder()
            .method(Method::GET)
            .uri(self.endpoint.request_path(path))
            .header(HOST, self.endpoint.host())
            .body(Empty::<Bytes>::new())?;

        let response = sender.send_request(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();

        debug!(status = %status, body_len = body.len(), "Response received");

        Ok(PingResponse { status, body })
    }
}

#[async_trait]
impl<C: Connector> Probe for HttpProbe<C> {
    async fn check(&self) -> ProbeResult {
        debug!(endpoint = %self.endpoint, "Checking status of relay server");

        let started = Instant::now();
        let outcome = self.ping().await;
        ProbeResult::from_outcome(outcome, started.elapsed())
    }
}
