//! Analysis client: one round trip per submission, no retries, no caching.
//!
//! Request: `POST <endpoint>` with `{"image": "<data URI>"}`.
//! Response: `{"isReal": bool, "confidence": "0.95" | 0.95, "emotion": str,
//! "timestamp": ISO-8601 | epoch}` plus optional `predictionLabel` and
//! `image_id`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{AnalysisRequest, AnalysisResult};

/// Epoch values above this are taken to be milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    /// The service could not be reached (DNS, refused connection, timeout).
    #[error("analysis service unreachable: {0}")]
    Unreachable(String),
    /// The service answered, but not with a usable verdict.
    #[error("analysis service error{}: {message}", status_suffix(.status))]
    ServiceError {
        status: Option<u16>,
        message: String,
    },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl AnalysisError {
    fn malformed(message: impl Into<String>) -> Self {
        AnalysisError::ServiceError {
            status: None,
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
#[error("invalid analysis endpoint: {0}")]
pub struct EndpointError(String);

/// Transport-level failure; the request never produced an HTTP response.
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Outbound request body.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeRequest {
    pub image: String,
}

/// Status code and raw body of a completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Carries one request to the analysis service.
#[async_trait]
pub trait AnalysisTransport: Send + Sync {
    async fn post_json(
        &self,
        endpoint: &Url,
        body: &AnalyzeRequest,
    ) -> Result<TransportResponse, TransportError>;
}

/// `reqwest`-backed transport with a fixed request timeout.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("deepcheck/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }
}

fn describe_reqwest_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request timed out: {e}")
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    }
}

#[async_trait]
impl AnalysisTransport for HttpTransport {
    async fn post_json(
        &self,
        endpoint: &Url,
        body: &AnalyzeRequest,
    ) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .post(endpoint.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError(describe_reqwest_error(&e)))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError(describe_reqwest_error(&e)))?;
        Ok(TransportResponse { status, body })
    }
}

/// Submits canonical images to the configured endpoint.
#[derive(Clone)]
pub struct AnalysisClient {
    endpoint: Url,
    transport: Arc<dyn AnalysisTransport>,
}

impl AnalysisClient {
    pub fn new(
        endpoint: &str,
        transport: Arc<dyn AnalysisTransport>,
    ) -> Result<Self, EndpointError> {
        Ok(Self {
            endpoint: validate_endpoint(endpoint)?,
            transport,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Send one image and parse the verdict. Single attempt.
    pub async fn submit(&self, request: AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
        let AnalysisRequest { token, image } = request;
        tracing::info!(
            token = %token,
            mime = %image.mime(),
            bytes = image.len(),
            endpoint = %self.endpoint,
            "submitting image for analysis"
        );

        let body = AnalyzeRequest {
            image: image.to_data_uri(),
        };
        let response = self
            .transport
            .post_json(&self.endpoint, &body)
            .await
            .map_err(|e| AnalysisError::Unreachable(e.0))?;

        if !(200..300).contains(&response.status) {
            let message = server_error_message(&response.body)
                .unwrap_or_else(|| "request was not accepted".to_string());
            return Err(AnalysisError::ServiceError {
                status: Some(response.status),
                message,
            });
        }

        let result = parse_analysis_response(&response.body)?;
        tracing::debug!(
            token = %token,
            authentic = result.is_authentic(),
            "analysis response parsed"
        );
        Ok(result)
    }
}

/// Endpoint must be an absolute http(s) URL.
pub fn validate_endpoint(endpoint: &str) -> Result<Url, EndpointError> {
    let url = Url::parse(endpoint).map_err(|e| EndpointError(format!("{endpoint}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(EndpointError(format!("{endpoint}: unsupported scheme {other}"))),
    }
}

/// Extract `{"error": "..."}` from a failed response body, if present.
fn server_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value.get("error")?.as_str().map(str::to_string)
}

#[derive(Deserialize)]
struct RawAnalysisResponse {
    #[serde(rename = "isReal")]
    is_real: Option<bool>,
    confidence: Option<Value>,
    emotion: Option<String>,
    timestamp: Option<Value>,
    #[serde(rename = "predictionLabel")]
    prediction_label: Option<String>,
    image_id: Option<String>,
}

/// Parse a success body into an [`AnalysisResult`], requiring all four
/// verdict fields.
pub fn parse_analysis_response(raw: &str) -> Result<AnalysisResult, AnalysisError> {
    let parsed: RawAnalysisResponse = serde_json::from_str(raw)
        .map_err(|e| AnalysisError::malformed(format!("invalid response body: {e}")))?;

    let is_real = parsed
        .is_real
        .ok_or_else(|| AnalysisError::malformed("response missing isReal"))?;
    let confidence = parsed
        .confidence
        .ok_or_else(|| AnalysisError::malformed("response missing confidence"))
        .and_then(|v| parse_confidence(&v).map_err(AnalysisError::malformed))?;
    let emotion = parsed
        .emotion
        .ok_or_else(|| AnalysisError::malformed("response missing emotion"))?;
    if emotion.trim().is_empty() {
        return Err(AnalysisError::malformed("emotion is empty"));
    }
    let timestamp = parsed
        .timestamp
        .ok_or_else(|| AnalysisError::malformed("response missing timestamp"))
        .and_then(|v| parse_timestamp(&v).map_err(AnalysisError::malformed))?;

    let analysis_id = parsed
        .image_id
        .as_deref()
        .and_then(|id| match Uuid::parse_str(id) {
            Ok(uuid) => Some(uuid),
            Err(e) => {
                tracing::debug!(error = %e, "ignoring malformed image_id");
                None
            }
        });

    Ok(AnalysisResult::new(is_real, confidence, emotion.trim().to_string(), timestamp)
        .with_service_metadata(parsed.prediction_label, analysis_id))
}

fn parse_confidence(value: &Value) -> Result<f32, String> {
    let raw = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| format!("confidence is not a number: {value}"))?;

    if !raw.is_finite() || !(0.0..=1.0).contains(&raw) {
        return Err(format!("confidence {raw} outside [0, 1]"));
    }
    Ok(raw as f32)
}

fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>, String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt.with_timezone(&Utc));
            }
            // Naive ISO-8601 (server without timezone support) is taken as UTC.
            for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                    return Ok(naive.and_utc());
                }
            }
            Err(format!("unrecognised timestamp: {s}"))
        }
        Value::Number(n) => {
            let raw = n
                .as_f64()
                .filter(|v| v.is_finite() && *v >= 0.0)
                .ok_or_else(|| format!("invalid epoch timestamp: {n}"))?;
            let millis = if raw > EPOCH_MILLIS_THRESHOLD { raw } else { raw * 1000.0 };
            DateTime::from_timestamp_millis(millis as i64)
                .ok_or_else(|| format!("epoch timestamp out of range: {n}"))
        }
        other => Err(format!("timestamp has wrong type: {other}")),
    }
}
