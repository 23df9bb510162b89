use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ProcessorError;
use crate::processor_type::ProcessorType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ProcessorHealth {
    pub failing: bool,
    #[serde(rename = "minResponseTime")]
    pub min_response_time: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentRequest {
    #[serde(rename = "correlationId")]
    pub correlation_id: Uuid,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub amount: Decimal,
    #[serde(rename = "requestedAt", with = "time::serde::rfc3339")]
    pub requested_at: OffsetDateTime,
}

/// Definitive answers from a processor. Everything else is a
/// [`ProcessorError`] and is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    /// 422: the processor rejected the payload itself.
    Unprocessable,
}

#[async_trait]
pub trait ProcessorClient: Send + Sync {
    async fn probe_health(&self, processor: ProcessorType)
    -> Result<ProcessorHealth, ProcessorError>;

    async fn submit_payment(
        &self,
        processor: ProcessorType,
        request: &PaymentRequest,
    ) -> Result<SubmitOutcome, ProcessorError>;
}

pub struct HttpProcessorClient {
    default_url: String,
    fallback_url: String,
    payments: Client<HttpConnector, Full<Bytes>>,
    probes: Client<HttpConnector, Empty<Bytes>>,
    request_timeout: Duration,
}

impl HttpProcessorClient {
    pub fn new(default_url: &str, fallback_url: &str, request_timeout: Duration) -> Self {
        let payments =
            Client::builder(hyper_util::rt::TokioExecutor::new()).build(HttpConnector::new());
        let probes =
            Client::builder(hyper_util::rt::TokioExecutor::new()).build(HttpConnector::new());

        Self {
            default_url: default_url.trim_end_matches('/').to_string(),
            fallback_url: fallback_url.trim_end_matches('/').to_string(),
            payments,
            probes,
            request_timeout,
        }
    }

    fn base_url(&self, processor: ProcessorType) -> &str {
        match processor {
            ProcessorType::Default => &self.default_url,
            ProcessorType::Fallback => &self.fallback_url,
        }
    }
}

#[async_trait]
impl ProcessorClient for HttpProcessorClient {
    async fn probe_health(
        &self,
        processor: ProcessorType,
    ) -> Result<ProcessorHealth, ProcessorError> {
        let uri = format!("{}/payments/service-health", self.base_url(processor))
            .parse::<hyper::Uri>()
            .map_err(|e| ProcessorError::InvalidRequest(e.to_string()))?;

        let req = Request::builder()
            .uri(uri)
            .method(Method::GET)
            .body(Empty::<Bytes>::new())
            .map_err(|e| ProcessorError::InvalidRequest(e.to_string()))?;

        let res = tokio::time::timeout(self.request_timeout, self.probes.request(req))
            .await
            .map_err(|_| ProcessorError::Timeout)?
            .map_err(|e| ProcessorError::Transport(e.to_string()))?;

        if res.status() != StatusCode::OK {
            return Err(ProcessorError::Unavailable(res.status().as_u16()));
        }

        let body = res
            .into_body()
            .collect()
            .await
            .map_err(|e| ProcessorError::Transport(e.to_string()))?
            .to_bytes();

        serde_json::from_slice(&body).map_err(|e| ProcessorError::InvalidResponse(e.to_string()))
    }

    async fn submit_payment(
        &self,
        processor: ProcessorType,
        request: &PaymentRequest,
    ) -> Result<SubmitOutcome, ProcessorError> {
        let json_bytes =
            serde_json::to_vec(request).map_err(|e| ProcessorError::InvalidRequest(e.to_string()))?;

        let req = Request::builder()
            .method(Method::POST)
            .uri(format!("{}/payments", self.base_url(processor)))
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from(json_bytes)))
            .map_err(|e| ProcessorError::InvalidRequest(e.to_string()))?;

        let response = tokio::time::timeout(self.request_timeout, self.payments.request(req))
            .await
            .map_err(|_| ProcessorError::Timeout)?
            .map_err(|e| ProcessorError::Transport(e.to_string()))?;

        classify_status(response.status())
    }
}

fn classify_status(status: StatusCode) -> Result<SubmitOutcome, ProcessorError> {
    if status.is_success() {
        Ok(SubmitOutcome::Accepted)
    } else if status == StatusCode::UNPROCESSABLE_ENTITY {
        Ok(SubmitOutcome::Unprocessable)
    } else {
        Err(ProcessorError::Unavailable(status.as_u16()))
    }
}
