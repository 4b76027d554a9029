//! The per-stream periodic monitor loop (`spec.md` §4.6).

use super::playlist::last_segment_url;
use super::registry::MonitorRegistry;
use crate::config::{ModerationConfig, MonitorConfig};
use crate::consumer::EVENTS_TOPIC;
use crate::domain::event::{EventEnvelope, RoutingKey};
use crate::domain::moderation::{ModerationClient, ModerationOutcome};
use composable_rust_core::event_bus::EventBus;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Why a tick produced no new segment to classify, tracked separately from
/// fetch errors so the two causes are distinguishable in metrics even though
/// they share one numeric threshold (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickOutcome {
    Classified,
    Idle,
    FetchError,
}

/// Spawn the periodic monitor task for `stream_id` if one is not already
/// active. Returns the [`super::registry::StartOutcome`] so the caller can
/// surface "already active" to the originating request.
pub async fn start_monitoring(
    registry: Arc<MonitorRegistry>,
    event_bus: Arc<dyn EventBus>,
    moderation: ModerationClient,
    http: reqwest::Client,
    monitor_config: MonitorConfig,
    moderation_config: ModerationConfig,
    stream_id: String,
    user_id: String,
) -> super::registry::StartOutcome {
    let task_stream_id = stream_id.clone();
    let task_registry = Arc::clone(&registry);
    let handle = tokio::spawn(async move {
        run_loop(
            task_registry,
            event_bus,
            moderation,
            http,
            monitor_config,
            moderation_config,
            task_stream_id,
            user_id,
        )
        .await;
    });
    registry.try_register(&stream_id, handle).await
}

async fn run_loop(
    registry: Arc<MonitorRegistry>,
    event_bus: Arc<dyn EventBus>,
    moderation: ModerationClient,
    http: reqwest::Client,
    monitor_config: MonitorConfig,
    moderation_config: ModerationConfig,
    stream_id: String,
    user_id: String,
) {
    let mut seen_segments: HashSet<String> = HashSet::new();
    let mut consecutive_idle: u32 = 0;
    let mut consecutive_errors: u32 = 0;
    let mut interval = tokio::time::interval(Duration::from_secs(monitor_config.interval_s));

    loop {
        interval.tick().await;

        let outcome = tick(
            &http,
            &moderation,
            &event_bus,
            &monitor_config,
            &moderation_config,
            &stream_id,
            &user_id,
            &mut seen_segments,
        )
        .await;

        match outcome {
            Ok(TickOutcome::Classified) => {
                consecutive_idle = 0;
                consecutive_errors = 0;
            }
            Ok(TickOutcome::Idle) => {
                consecutive_idle += 1;
                consecutive_errors = 0;
                metrics::counter!("monitor.idle_ticks.total", "stream_id" => stream_id.clone()).increment(1);
            }
            Ok(TickOutcome::FetchError) => {
                consecutive_errors += 1;
                consecutive_idle = 0;
                metrics::counter!("monitor.fetch_errors.total", "stream_id" => stream_id.clone()).increment(1);
            }
            Err(()) => {
                // Rejected: violation already published inside `tick`.
                break;
            }
        }

        if consecutive_idle >= monitor_config.offline_threshold || consecutive_errors >= monitor_config.offline_threshold {
            tracing::info!(stream_id, consecutive_idle, consecutive_errors, "stream offline, tearing down monitor");
            break;
        }
    }

    registry.remove(&stream_id).await;
}

/// One poll cycle. `Err(())` signals a `Rejected` classification (violation
/// already published); the caller tears the monitor down on that signal.
async fn tick(
    http: &reqwest::Client,
    moderation: &ModerationClient,
    event_bus: &Arc<dyn EventBus>,
    monitor_config: &MonitorConfig,
    moderation_config: &ModerationConfig,
    stream_id: &str,
    user_id: &str,
    seen_segments: &mut HashSet<String>,
) -> Result<TickOutcome, ()> {
    let playlist_url = format!("{}/live/{stream_id}.m3u8", monitor_config.cdn_base_url);
    let playlist = match http.get(&playlist_url).send().await {
        Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => return Ok(TickOutcome::Idle),
        Ok(response) => match response.error_for_status() {
            Ok(response) => match response.text().await {
                Ok(body) => body,
                Err(_) => return Ok(TickOutcome::FetchError),
            },
            Err(_) => return Ok(TickOutcome::FetchError),
        },
        Err(_) => return Ok(TickOutcome::FetchError),
    };

    let Some(segment_url) = last_segment_url(&playlist) else {
        return Ok(TickOutcome::Idle);
    };
    if seen_segments.contains(segment_url) {
        return Ok(TickOutcome::Idle);
    }
    seen_segments.insert(segment_url.to_string());

    let absolute_segment_url = resolve_segment_url(&monitor_config.cdn_base_url, stream_id, segment_url);
    let segment_bytes = match http
        .get(&absolute_segment_url)
        .timeout(Duration::from_secs(moderation_config.segment_fetch_timeout_s))
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
    {
        Ok(response) => match response.bytes().await {
            Ok(bytes) => bytes,
            Err(_) => return Ok(TickOutcome::FetchError),
        },
        Err(_) => return Ok(TickOutcome::FetchError),
    };

    let classification = moderation
        .classify(user_id, stream_id, &segment_bytes, "video/mp2t")
        .await;

    match classification {
        Ok(ModerationOutcome::Rejected { reason }) => {
            publish_violation(event_bus, stream_id, user_id, &reason).await;
            metrics::counter!("monitor.violations.total", "stream_id" => stream_id.to_string()).increment(1);
            Err(())
        }
        Ok(_) => Ok(TickOutcome::Classified),
        Err(error) => {
            tracing::warn!(stream_id, %error, "moderation oracle call failed");
            Ok(TickOutcome::FetchError)
        }
    }
}

fn resolve_segment_url(cdn_base_url: &str, stream_id: &str, segment_url: &str) -> String {
    if segment_url.starts_with("http://") || segment_url.starts_with("https://") {
        segment_url.to_string()
    } else {
        format!("{cdn_base_url}/live/{stream_id}/{segment_url}")
    }
}

async fn publish_violation(event_bus: &Arc<dyn EventBus>, stream_id: &str, user_id: &str, reason: &str) {
    let envelope = EventEnvelope {
        routing_key: RoutingKey::ViolationEvents,
        message_id: None,
        body: serde_json::json!({
            "stream_id": stream_id,
            "user_id": user_id,
            "reason": reason,
        }),
    };
    let Ok(serialized) = envelope.to_serialized() else {
        tracing::error!(stream_id, "failed to serialize violation event");
        return;
    };
    if let Err(error) = event_bus.publish(EVENTS_TOPIC, &serialized).await {
        tracing::error!(stream_id, %error, "failed to publish violation event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_segment_url_keeps_absolute_urls() {
        let resolved = resolve_segment_url("https://cdn.example.com", "s1", "https://other.example.com/seg.ts");
        assert_eq!(resolved, "https://other.example.com/seg.ts");
    }

    #[test]
    fn resolve_segment_url_joins_relative_urls() {
        let resolved = resolve_segment_url("https://cdn.example.com", "s1", "seg1.ts");
        assert_eq!(resolved, "https://cdn.example.com/live/s1/seg1.ts");
    }
}
