use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error};

use crate::state::AppState;

/// Client for the AI service's `/process` endpoint.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    process_url: String,
}

#[derive(Debug, Deserialize)]
pub struct EnhanceRequest {
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("prompt is required")]
    MissingPrompt,
    #[error("AI service responded with status {status}")]
    Upstream {
        status: StatusCode,
        details: Option<Value>,
    },
    #[error("AI service unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),
    #[error("AI service returned an unreadable body: {0}")]
    InvalidBody(#[source] reqwest::Error),
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl UpstreamClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            process_url: format!("{}/process", base_url.trim_end_matches('/')),
        })
    }

    pub fn process_url(&self) -> &str {
        &self.process_url
    }

    /// Forwards the prompt and returns the upstream JSON body untouched.
    pub async fn process(&self, prompt: &str) -> Result<Value, ProxyError> {
        let response = self
            .http
            .post(&self.process_url)
            .json(&json!({ "prompt": prompt }))
            .send()
            .await
            .map_err(ProxyError::Unreachable)?;

        let status = response.status();
        if !status.is_success() {
            let status = StatusCode::from_u16(status.as_u16())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let details = match response.text().await {
                Ok(body) => parse_details(body),
                Err(err) => {
                    debug!(error = %err, "failed to read AI service error body");
                    None
                }
            };
            return Err(ProxyError::Upstream { status, details });
        }

        response.json::<Value>().await.map_err(ProxyError::InvalidBody)
    }
}

fn parse_details(body: String) -> Option<Value> {
    if body.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(&body).unwrap_or(Value::String(body)))
}

impl ProxyError {
    fn metric_label(&self) -> &'static str {
        match self {
            ProxyError::MissingPrompt => "missing_prompt",
            ProxyError::Upstream { .. } => "upstream_status",
            ProxyError::Unreachable(_) => "unreachable",
            ProxyError::InvalidBody(_) => "invalid_body",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, envelope) = match self {
            ProxyError::MissingPrompt => (
                StatusCode::BAD_REQUEST,
                ErrorEnvelope {
                    error: "Prompt is required",
                    details: None,
                },
            ),
            ProxyError::Upstream { status, details } => (
                status,
                ErrorEnvelope {
                    error: "Error from AI service",
                    details,
                },
            ),
            ProxyError::Unreachable(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorEnvelope {
                    error: "Error from AI service",
                    details: None,
                },
            ),
            ProxyError::InvalidBody(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorEnvelope {
                    error: "An unexpected error occurred",
                    details: None,
                },
            ),
        };
        (status, Json(envelope)).into_response()
    }
}

/// POST /api/v1/enhance
pub async fn enhance_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EnhanceRequest>,
) -> Result<Json<Value>, ProxyError> {
    let prompt = match request.prompt.as_deref() {
        Some(prompt) if !prompt.is_empty() => prompt,
        _ => {
            counter!("archway_proxy_requests_total", 1, "outcome" => "missing_prompt");
            return Err(ProxyError::MissingPrompt);
        }
    };

    let started = Instant::now();
    let result = state.upstream().process(prompt).await;
    histogram!(
        "archway_proxy_duration_ms",
        started.elapsed().as_secs_f64() * 1000.0
    );

    match result {
        Ok(body) => {
            counter!("archway_proxy_requests_total", 1, "outcome" => "ok");
            Ok(Json(body))
        }
        Err(err) => {
            counter!("archway_proxy_requests_total", 1, "outcome" => err.metric_label());
            error!(error = %err, "error proxying to AI service");
            Err(err)
        }
    }
}
