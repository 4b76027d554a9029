//! Media server callback endpoint (`spec.md` §6/§4.9).
//!
//! Nginx-rtmp-style media servers POST `{action, stream, param}` as either
//! JSON or `application/x-www-form-urlencoded`, and only inspect the JSON
//! body's `code` field — `0` accepts, `1` rejects, always over HTTP 200. No
//! crate in this workspace (or the rest of the retrieval pack) parses that
//! shape, so it is a small hand-rolled decoder, the same judgment call as
//! the M3U8 line scanner in `monitor::playlist`.

use super::reducer::{RtmpAction, RtmpEnvironment, RtmpReducer, RtmpState};
use crate::config::{ModerationConfig, MonitorConfig};
use crate::domain::moderation::ModerationClient;
use crate::monitor::{self, MonitorRegistry};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::Json;
use composable_rust_core::event_bus::EventBus;
use composable_rust_core::rtmp_store::PublishOutcome;
use composable_rust_runtime::Store;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// `Store` specialized for the RTMP publish state machine.
pub type RtmpStore = Store<RtmpState, RtmpAction, RtmpEnvironment, RtmpReducer>;

/// Shared state for the `/rtmp/callback` route.
///
/// An accepted `on_publish` starts this stream's livestream monitor (§4.6):
/// the media server callback is the only signal this process has that a
/// stream just went live, so it is the natural trigger rather than a
/// separate route nothing would ever call.
#[derive(Clone)]
pub struct RtmpWebhookState {
    /// The running RTMP store.
    pub store: Arc<RtmpStore>,
    /// Active per-stream monitor tasks.
    pub monitors: Arc<MonitorRegistry>,
    /// Event bus the monitor publishes `violation.events` to.
    pub event_bus: Arc<dyn EventBus>,
    /// Moderation oracle client handed to each spawned monitor task.
    pub moderation: ModerationClient,
    /// HTTP client used for HLS playlist/segment fetches.
    pub http: reqwest::Client,
    /// Monitor poll cadence and offline threshold.
    pub monitor_config: MonitorConfig,
    /// Moderation oracle timeouts.
    pub moderation_config: ModerationConfig,
}

const WEBHOOK_EFFECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct Callback {
    action: String,
    stream: String,
    #[serde(default)]
    param: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
struct CallbackResponse {
    code: u8,
}

const ACCEPT: CallbackResponse = CallbackResponse { code: 0 };
const REJECT: CallbackResponse = CallbackResponse { code: 1 };

/// `POST /rtmp/callback` — dispatches `on_publish`/`on_unpublish` media
/// server callbacks into the RTMP store and replies with the `{code}`
/// contract. Always HTTP 200: the accept/reject signal lives in the body.
pub async fn callback(State(state): State<RtmpWebhookState>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let Some(request) = parse_callback(&headers, &body) else {
        tracing::warn!("malformed media server callback body");
        return (StatusCode::OK, Json(REJECT));
    };

    let response = match request.action.as_str() {
        "on_publish" => handle_publish(&state, &request).await,
        "on_unpublish" => handle_unpublish(&state, &request).await,
        other => {
            tracing::warn!(action = other, stream_id = %request.stream, "unknown media server callback action");
            REJECT
        }
    };
    (StatusCode::OK, Json(response))
}

async fn handle_publish(state: &RtmpWebhookState, request: &Callback) -> CallbackResponse {
    let Some(token) = extract_token(&request.param) else {
        tracing::warn!(stream_id = %request.stream, "on_publish callback missing token");
        return REJECT;
    };

    let (tx, rx) = oneshot::channel();
    let mut handle = state
        .store
        .send(RtmpAction::Publish {
            stream_id: request.stream.clone(),
            token,
            respond: Arc::new(Mutex::new(Some(tx))),
        })
        .await;
    let _ = handle.wait_with_timeout(WEBHOOK_EFFECT_TIMEOUT).await;

    match rx.await {
        Ok(Ok(PublishOutcome::Accepted)) => {
            start_monitor_for(state, &request.stream).await;
            ACCEPT
        }
        Ok(Ok(PublishOutcome::TokenMismatch | PublishOutcome::InvalidState { .. })) => REJECT,
        Ok(Err(error)) => {
            tracing::error!(%error, stream_id = %request.stream, "rtmp store failed during on_publish");
            REJECT
        }
        Err(_) => {
            tracing::error!(stream_id = %request.stream, "on_publish effect never replied");
            REJECT
        }
    }
}

/// Start this stream's livestream monitor on an accepted publish.
///
/// `RtmpSession` carries no separate account identifier (`core::rtmp_store`),
/// so `stream_id` stands in for `user_id` in the moderation call — the
/// oracle only uses it for attribution in the published violation event.
async fn start_monitor_for(state: &RtmpWebhookState, stream_id: &str) {
    let outcome = monitor::start_monitoring(
        Arc::clone(&state.monitors),
        Arc::clone(&state.event_bus),
        state.moderation.clone(),
        state.http.clone(),
        state.monitor_config.clone(),
        state.moderation_config.clone(),
        stream_id.to_string(),
        stream_id.to_string(),
    )
    .await;
    tracing::info!(stream_id, ?outcome, "livestream monitor start requested");
}

async fn handle_unpublish(state: &RtmpWebhookState, request: &Callback) -> CallbackResponse {
    let (tx, rx) = oneshot::channel();
    let mut handle = state
        .store
        .send(RtmpAction::Unpublish {
            stream_id: request.stream.clone(),
            respond: Arc::new(Mutex::new(Some(tx))),
        })
        .await;
    let _ = handle.wait_with_timeout(WEBHOOK_EFFECT_TIMEOUT).await;

    match rx.await {
        Ok(Ok(())) => ACCEPT,
        Ok(Err(error)) => {
            tracing::error!(%error, stream_id = %request.stream, "rtmp store failed during on_unpublish");
            // spec.md §4.9: always return an accept code for on_unpublish.
            ACCEPT
        }
        Err(_) => {
            tracing::error!(stream_id = %request.stream, "on_unpublish effect never replied");
            ACCEPT
        }
    }
}

/// `param` looks like `?token=abc123&other=1`; pull out `token`.
fn extract_token(param: &str) -> Option<String> {
    let query = param.strip_prefix('?').unwrap_or(param);
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == "token").then(|| percent_decode(value))
    })
}

fn parse_callback(headers: &HeaderMap, body: &[u8]) -> Option<Callback> {
    let content_type = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or("");
    if content_type.contains("application/json") {
        serde_json::from_slice(body).ok()
    } else {
        parse_form(body)
    }
}

fn parse_form(body: &[u8]) -> Option<Callback> {
    let body = std::str::from_utf8(body).ok()?;
    let mut action = None;
    let mut stream = None;
    let mut param = String::new();
    for pair in body.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=')?;
        let value = percent_decode(value);
        match key {
            "action" => action = Some(value),
            "stream" => stream = Some(value),
            "param" => param = value,
            _ => {}
        }
    }
    Some(Callback { action: action?, stream: stream?, param })
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_token_reads_the_token_param() {
        assert_eq!(extract_token("?token=tok123&other=1"), Some("tok123".to_string()));
    }

    #[test]
    fn extract_token_is_none_when_absent() {
        assert_eq!(extract_token("?other=1"), None);
    }

    #[test]
    fn percent_decode_handles_escapes_and_plus() {
        assert_eq!(percent_decode("hello%20world+again"), "hello world again");
    }

    #[test]
    fn parse_form_reads_action_stream_and_param() {
        let body = b"action=on_publish&stream=5&param=%3Ftoken%3Dtok";
        let callback = parse_form(body).expect("should parse");
        assert_eq!(callback.action, "on_publish");
        assert_eq!(callback.stream, "5");
        assert_eq!(extract_token(&callback.param), Some("tok".to_string()));
    }

    #[test]
    fn parse_callback_prefers_json_when_content_type_matches() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        let body = br#"{"action":"on_unpublish","stream":"9","param":""}"#;
        let callback = parse_callback(&headers, body).expect("should parse");
        assert_eq!(callback.action, "on_unpublish");
        assert_eq!(callback.stream, "9");
    }
}
