//! HTTP handlers.
//!
//! `POST /api/chat` answers with one JSON event per line
//! (`application/x-ndjson`). Rejections that happen before any event is
//! produced use ordinary status codes with a JSON body.

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use dispatch_core::{ChatQuery, ChatTurn, MetricSnapshot, SessionId};
use dispatch_engine::{ChatStream, PipelineError};

use crate::server::AppState;

pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const CHAT_TIER: HeaderName = HeaderName::from_static("x-chat-tier");
const NDJSON: &str = "application/x-ndjson";

/// Default and maximum look-back for `/api/usage`.
const DEFAULT_USAGE_HOURS: u32 = 24;
const MAX_USAGE_HOURS: u32 = 24 * 90;

/// Inbound chat turn. Field names are snake_case; camelCase is accepted.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default, alias = "conversationHistory")]
    pub conversation_history: Vec<ChatTurn>,
    #[serde(default, alias = "currentPage")]
    pub current_page: String,
    #[serde(default, alias = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default, alias = "forceDeep")]
    pub force_deep: bool,
    #[serde(default)]
    pub snapshot: Option<MetricSnapshot>,
}

impl ChatRequest {
    fn into_parts(self) -> (ChatQuery, SessionId) {
        let session = SessionId::from_caller(self.session_id.as_deref());
        let query = ChatQuery {
            raw_text: self.message,
            current_page: self.current_page,
            conversation_history: self.conversation_history,
            force_deep: self.force_deep,
            snapshot: self.snapshot,
        };
        (query, session)
    }
}

pub async fn chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    if request.message.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "message must not be empty");
    }
    let (query, session) = request.into_parts();

    match state.pipeline.start(query, session, state.shutdown.child_token()) {
        Ok(stream) => ndjson_response(stream),
        Err(PipelineError::RateLimited {
            remaining,
            retry_after,
        }) => rate_limited_response(remaining, retry_after),
        Err(PipelineError::Configuration(message)) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, &message)
        }
    }
}

/// Dropping the body (client disconnect) drops the pipeline stream, which
/// aborts the provider call.
fn ndjson_response(stream: ChatStream) -> Response {
    let headers = [
        (header::CONTENT_TYPE, HeaderValue::from_static(NDJSON)),
        (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        (RATE_LIMIT_REMAINING, HeaderValue::from(stream.remaining)),
        (CHAT_TIER, HeaderValue::from_static(stream.tier.as_str())),
    ];
    let body = Body::from_stream(stream.map(|event| Ok::<_, Infallible>(event.to_ndjson())));
    (StatusCode::OK, headers, body).into_response()
}

fn rate_limited_response(remaining: u32, retry_after: Duration) -> Response {
    // round up so clients never retry early
    let retry_secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    let headers = [
        (header::RETRY_AFTER, HeaderValue::from(retry_secs)),
        (RATE_LIMIT_REMAINING, HeaderValue::from(remaining)),
    ];
    let body = json!({ "error": "rate limit exceeded", "remaining": remaining });
    (StatusCode::TOO_MANY_REQUESTS, headers, Json(body)).into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

#[derive(Debug, Deserialize)]
pub struct UsageParams {
    pub hours: Option<u32>,
}

/// Ledger summary for the last `hours` plus the current budget status.
pub async fn usage(State(state): State<AppState>, Query(params): Query<UsageParams>) -> Response {
    let hours = params
        .hours
        .unwrap_or(DEFAULT_USAGE_HOURS)
        .clamp(1, MAX_USAGE_HOURS);
    let since = Utc::now() - chrono::Duration::hours(i64::from(hours));

    match state.pipeline.ledger().summary_since(since) {
        Ok(summary) => Json(json!({
            "hours": hours,
            "summary": summary,
            "budget": state.pipeline.governor().status(),
        }))
        .into_response(),
        Err(failure) => {
            error!(error = %failure, "usage ledger read failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "usage ledger unavailable")
        }
    }
}

/// Health check HTTP endpoint.
pub async fn health(State(state): State<AppState>) -> Response {
    let pipeline = &state.pipeline;
    let configured = pipeline.provider_configured();
    let body = json!({
        "status": if configured { "healthy" } else { "degraded" },
        "provider_configured": configured,
        "cache_size": pipeline.cache().len(),
        "tracked_sessions": pipeline.rate_limiter().tracked_sessions(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "metrics": pipeline.metrics().snapshot(),
    });
    let status = if configured {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}
