use crate::application::ports::{ReconciliationClient, SubmitOutcome};
use crate::domain::entities::{EncodedImage, OfflineInspectionRecord, PhotoAttachment};
use crate::domain::value_objects::{AnswerResult, ServerInspectionId};
use crate::shared::config::RemoteConfig;
use crate::shared::error::AppError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
const MAX_REASON_LEN: usize = 500;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("failed to read response body: {0}")]
    Body(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_body() || err.is_decode() {
            TransportError::Body(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

#[derive(Serialize)]
struct SubmitBody<'a> {
    client_id: &'a str,
    line_item: i64,
    inspector: i64,
    checklist_template: Option<&'a str>,
    start_time: String,
    end_time: Option<String>,
    geo_location_lat: Option<f64>,
    geo_location_lng: Option<f64>,
    answers: Vec<SubmitAnswer<'a>>,
    evidence_photos: Vec<SubmitPhoto<'a>>,
    inspector_signature: Option<SubmitImage<'a>>,
    client_signature: Option<SubmitImage<'a>>,
}

#[derive(Serialize)]
struct SubmitAnswer<'a> {
    question_key: &'a str,
    result: AnswerResult,
    comment: Option<&'a str>,
    photos: Vec<SubmitPhoto<'a>>,
}

#[derive(Serialize)]
struct SubmitPhoto<'a> {
    slot_name: &'a str,
    geotag_lat: Option<f64>,
    geotag_lng: Option<f64>,
    #[serde(flatten)]
    image: SubmitImage<'a>,
}

#[derive(Serialize)]
struct SubmitImage<'a> {
    content_type: &'a str,
    sha256: &'a str,
    data: String,
}

impl<'a> SubmitImage<'a> {
    fn from_image(image: &'a EncodedImage) -> Self {
        Self {
            content_type: &image.content_type,
            sha256: &image.sha256,
            data: image.to_base64(),
        }
    }
}

impl<'a> SubmitPhoto<'a> {
    fn from_photo(photo: &'a PhotoAttachment) -> Self {
        Self {
            slot_name: &photo.slot_name,
            geotag_lat: photo.geotag.map(|g| g.lat()),
            geotag_lng: photo.geotag.map(|g| g.lng()),
            image: SubmitImage::from_image(&photo.image),
        }
    }
}

impl<'a> SubmitBody<'a> {
    fn from_record(record: &'a OfflineInspectionRecord) -> Self {
        let payload = record.payload();
        Self {
            client_id: record.id().as_str(),
            line_item: record.line_item_ref(),
            inspector: record.inspector_ref(),
            checklist_template: payload.checklist_template.as_deref(),
            start_time: payload.started_at.to_rfc3339(),
            end_time: payload.finished_at.map(|at| at.to_rfc3339()),
            geo_location_lat: payload.location.map(|g| g.lat()),
            geo_location_lng: payload.location.map(|g| g.lng()),
            answers: payload
                .answers
                .iter()
                .map(|answer| SubmitAnswer {
                    question_key: &answer.question_key,
                    result: answer.result,
                    comment: answer.comment.as_deref(),
                    photos: answer.photos.iter().map(SubmitPhoto::from_photo).collect(),
                })
                .collect(),
            evidence_photos: payload
                .evidence_photos
                .iter()
                .map(SubmitPhoto::from_photo)
                .collect(),
            inspector_signature: payload
                .inspector_signature
                .as_ref()
                .map(SubmitImage::from_image),
            client_signature: payload
                .client_signature
                .as_ref()
                .map(SubmitImage::from_image),
        }
    }
}

/// REST API への送信クライアント。
pub struct HttpReconciliationClient {
    client: Client,
    submit_url: String,
    health_url: String,
    api_token: Option<String>,
}

impl HttpReconciliationClient {
    pub fn new(config: &RemoteConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|err| {
                AppError::ConfigurationError(format!("failed to build HTTP client: {err}"))
            })?;

        Ok(Self {
            client,
            submit_url: join_url(&config.base_url, &config.submit_path),
            health_url: join_url(&config.base_url, &config.health_path),
            api_token: config.api_token.clone(),
        })
    }

    pub fn submit_url(&self) -> &str {
        &self.submit_url
    }

    async fn send(
        &self,
        record: &OfflineInspectionRecord,
    ) -> Result<(StatusCode, String), TransportError> {
        let body = SubmitBody::from_record(record);
        let mut request = self
            .client
            .post(&self.submit_url)
            .header(IDEMPOTENCY_HEADER, record.id().as_str())
            .json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        Ok((status, text))
    }
}

#[async_trait]
impl ReconciliationClient for HttpReconciliationClient {
    async fn submit(&self, record: &OfflineInspectionRecord) -> SubmitOutcome {
        match self.send(record).await {
            Ok((status, body)) => {
                let outcome = classify_response(status, &body);
                tracing::debug!(
                    target: "offline::sync",
                    id = %record.id(),
                    status = status.as_u16(),
                    outcome = ?outcome,
                    "submit response received"
                );
                outcome
            }
            Err(err) => {
                tracing::debug!(
                    target: "offline::sync",
                    id = %record.id(),
                    error = %err,
                    "submit transport error"
                );
                SubmitOutcome::transient(err.to_string())
            }
        }
    }

    async fn is_reachable(&self) -> bool {
        match self.client.get(&self.health_url).send().await {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!(
                    target: "offline::sync",
                    url = %self.health_url,
                    error = %TransportError::from(err),
                    "remote health check failed"
                );
                false
            }
        }
    }
}

/// HTTP ステータスと本文から送信結果を判定する。
pub fn classify_response(status: StatusCode, body: &str) -> SubmitOutcome {
    let json: Option<Value> = serde_json::from_str(body).ok();
    let server_id = json
        .as_ref()
        .and_then(|value| value.get("id"))
        .and_then(Value::as_i64)
        .and_then(|id| ServerInspectionId::new(id).ok());

    match status.as_u16() {
        200..=299 => match server_id {
            Some(id) => SubmitOutcome::Accepted(id),
            None => SubmitOutcome::transient(format!(
                "HTTP {}: response did not include an inspection id",
                status.as_u16()
            )),
        },
        409 => match server_id {
            Some(id) => SubmitOutcome::Accepted(id),
            None => SubmitOutcome::transient(failure_reason(status, json.as_ref(), body)),
        },
        408 | 425 | 429 => SubmitOutcome::transient(failure_reason(status, json.as_ref(), body)),
        400..=499 => SubmitOutcome::rejected(failure_reason(status, json.as_ref(), body)),
        _ => SubmitOutcome::transient(failure_reason(status, json.as_ref(), body)),
    }
}

fn failure_reason(status: StatusCode, json: Option<&Value>, body: &str) -> String {
    let detail = json
        .and_then(|value| {
            ["detail", "error", "message"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_str))
        })
        .map(str::to_string)
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| truncate(trimmed, MAX_REASON_LEN))
        });

    match detail {
        Some(detail) => format!("HTTP {}: {}", status.as_u16(), detail),
        None => format!(
            "HTTP {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or_default()
        )
        .trim_end()
        .to_string(),
    }
}

fn truncate(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut end = max_len;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &value[..end])
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.is_empty() {
        return base.to_string();
    }
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}
