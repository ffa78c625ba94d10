//! ==============================================================================
//! transmit.rs - telemetry transmitter
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     turns a `TelemetryRecord` into one GET against the telemetry sink:
//!
//!         <sink_url>?node_name=..&<fields>..&time_received=..&_=<nonce>
//!
//!     `send()` is a single attempt. whether a failed attempt is retried is
//!     decided by `deliver()` and the configured `RetryPolicy` (one attempt by
//!     default, i.e. the reading is dropped).
//!
//! failure exits:
//!     - NetworkUnavailable: link down, no i/o performed
//!     - RequestBuildFailed: the sink url cannot carry a query
//!     - Transport: connect/timeout/body errors
//!     - Rejected: the sink answered with something other than 200
//! ```
//!
//! ==============================================================================

use std::sync::Arc;
use thiserror::Error;

use crate::domain::TelemetryRecord;
use crate::network::{nonce, NetworkLink};
use crate::query::{QueryBuilder, QueryError};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    pub http_status: u16,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("network not connected")]
    NetworkUnavailable,
    #[error("could not build request: {0}")]
    RequestBuildFailed(#[from] QueryError),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("sink rejected reading with HTTP {}", .0.http_status)]
    Rejected(DeliveryResult),
}

impl DeliveryError {
    /// only failures that happened on the wire are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Transport(_) | DeliveryError::Rejected(_))
    }
}

#[derive(Clone)]
pub struct Transmitter {
    http: reqwest::Client,
    sink_url: String,
    link: Arc<dyn NetworkLink>,
}

impl Transmitter {
    pub fn new(http: reqwest::Client, sink_url: impl Into<String>, link: Arc<dyn NetworkLink>) -> Self {
        Self {
            http,
            sink_url: sink_url.into(),
            link,
        }
    }

    pub fn request_url(&self, record: &TelemetryRecord) -> Result<reqwest::Url, QueryError> {
        QueryBuilder::new(self.sink_url.as_str())
            .params(record.params())
            .param("_", nonce())
            .build()
    }

    /// exactly one delivery attempt
    ///
    /// a non-200 answer still comes back as `Ok`; `deliver()` is where it
    /// becomes a failure.
    pub async fn send(&self, record: &TelemetryRecord) -> Result<DeliveryResult, DeliveryError> {
        if !self.link.connected() {
            return Err(DeliveryError::NetworkUnavailable);
        }

        let url = self.request_url(record)?;
        tracing::debug!("GET URL: {}", url);

        let response = self.http.get(url).send().await?;
        let http_status = response.status().as_u16();
        let body = response.text().await?;

        Ok(DeliveryResult { http_status, body })
    }

    /// send under `policy`; success means HTTP 200
    pub async fn deliver(&self, record: &TelemetryRecord, policy: &RetryPolicy) -> Result<DeliveryResult, DeliveryError> {
        policy
            .retry_result(
                |attempt| async move {
                    let result = match self.send(record).await {
                        Ok(r) if r.http_status == 200 => Ok(r),
                        Ok(r) => Err(DeliveryError::Rejected(r)),
                        Err(e) => Err(e),
                    };
                    if let Err(e) = &result {
                        tracing::debug!(attempt, node = record.node_name(), "delivery attempt failed: {}", e);
                    }
                    result
                },
                DeliveryError::is_retryable,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NormalizedTime, Reading};
    use crate::network::ManualLink;

    fn record() -> TelemetryRecord {
        TelemetryRecord::new(
            "node_1",
            &Reading::Light { lux: 977.0 },
            NormalizedTime::new("2025-01-01 12:00:00").unwrap(),
        )
    }

    #[test]
    fn test_request_url_layout() {
        let tx = Transmitter::new(
            reqwest::Client::new(),
            "http://sink.local/db2_insert.php",
            Arc::new(ManualLink::new(true)),
        );
        let url = tx.request_url(&record()).unwrap();
        let query = url.query().unwrap();
        assert!(query.starts_with("node_name=node_1&lux_value=977&time_received=2025-01-01%2012%3A00%3A00&_="));
    }

    #[tokio::test]
    async fn test_link_down_short_circuits() {
        // unroutable sink: any i/o attempt would surface as Transport, not NetworkUnavailable
        let tx = Transmitter::new(
            reqwest::Client::new(),
            "http://192.0.2.1:9/never",
            Arc::new(ManualLink::new(false)),
        );
        let err = tx.send(&record()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::NetworkUnavailable));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_bad_sink_url_is_build_failure() {
        let tx = Transmitter::new(reqwest::Client::new(), "sink without scheme", Arc::new(ManualLink::new(true)));
        let err = tx.deliver(&record(), &RetryPolicy::attempts(3, std::time::Duration::ZERO)).await.unwrap_err();
        assert!(matches!(err, DeliveryError::RequestBuildFailed(_)));
    }
}
