//! HTTP handlers.
//!
//! The publish handler owns the HTTP-only concerns: content-type policing,
//! chaff, body decoding, response padding and the status mapping. Everything
//! else lives in the pipeline.

use crate::state::AppState;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use bytes::Bytes;
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tekserver_core::error::PublishError;
use tekserver_domain::model::Publish;
use tekserver_publish::response::PublishResponse;
use tracing::{info, instrument, warn};

const CHAFF_HEADER: &str = "x-chaff";

#[instrument(skip_all)]
pub async fn publish(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<PublishResponse>) {
    let pad = |r: PublishResponse| {
        r.with_padding(
            state.config.response_padding_min_bytes,
            state.config.response_padding_range,
        )
    };

    // Chaff requests get a plausible body and touch no state.
    if headers.contains_key(CHAFF_HEADER) {
        state.metrics.chaff.fetch_add(1, Ordering::Relaxed);
        return (StatusCode::OK, Json(pad(PublishResponse::chaff())));
    }

    let json_content = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false);
    if !json_content {
        state.metrics.rejected.fetch_add(1, Ordering::Relaxed);
        let (response, _) =
            PublishResponse::failure(&PublishError::BadJson("content-type must be application/json".into()));
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, Json(pad(response)));
    }

    let publish: Publish = match serde_json::from_slice(&body) {
        Ok(publish) => publish,
        Err(e) => {
            state.metrics.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "unable to decode publish body");
            let (response, status) = PublishResponse::failure(&PublishError::BadJson(e.to_string()));
            return (to_status(status), Json(pad(response)));
        }
    };

    let processor = state.processor.clone();
    let result = tokio::task::spawn_blocking(move || {
        processor.process(&publish, chrono::Utc::now())
    })
    .await
    .unwrap_or_else(|e| Err(PublishError::Internal(format!("publish task failed: {e}"))));

    match result {
        Ok(outcome) => {
            state.metrics.published.fetch_add(1, Ordering::Relaxed);
            let (response, status) = PublishResponse::success(outcome);
            (to_status(status), Json(pad(response)))
        }
        Err(err) => {
            state.metrics.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(code = err.code(), error = %err, "publish rejected");
            let (response, status) = PublishResponse::failure(&err);
            (to_status(status), Json(pad(response)))
        }
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "publish-api",
        "published": state.metrics.published.load(Ordering::Relaxed),
        "rejected": state.metrics.rejected.load(Ordering::Relaxed),
        "chaff": state.metrics.chaff.load(Ordering::Relaxed),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

fn to_status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or_else(|_| {
        info!(code, "unmapped status code, serving 500");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
