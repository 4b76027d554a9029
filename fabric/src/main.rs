//! Pulsefeed real-time event fabric: process entrypoint.
//!
//! Wires the event consumer, outbox worker, cross-instance router, and the
//! HTTP/WebSocket server into one process, following the construction order
//! the teacher's `ticketing` binary uses: tracing first, configuration
//! second, infrastructure clients third, capability stores fourth,
//! background tasks spawned last, server run last of all.

use composable_rust_core::event_bus::EventBus;
use composable_rust_core::idempotency_store::IdempotencyStore;
use composable_rust_core::notification_store::NotificationStore;
use composable_rust_core::outbox_store::OutboxStore;
use composable_rust_core::rtmp_store::RtmpSessionStore;
use composable_rust_postgres::{
    PostgresIdempotencyStore, PostgresNotificationStore, PostgresOutboxStore, PostgresRtmpSessionStore,
};
use composable_rust_redpanda::RedpandaEventBus;
use composable_rust_runtime::Store;
use metrics_exporter_prometheus::PrometheusBuilder;
use pulsefeed_fabric::chat::{ChatRoomRegistry, ChatState};
use pulsefeed_fabric::config::Config;
use pulsefeed_fabric::consumer::{Consumer, NullFollowerLookup};
use pulsefeed_fabric::domain::moderation::ModerationClient;
use pulsefeed_fabric::gateway::{ConnectionManager, GatewayState};
use pulsefeed_fabric::monitor::MonitorRegistry;
use pulsefeed_fabric::outbox::OutboxWorker;
use pulsefeed_fabric::router::{Publisher, RealtimeNotifier, Subscriber};
use pulsefeed_fabric::rtmp::{RtmpEnvironment, RtmpReducer, RtmpState, RtmpStore, RtmpWebhookState};
use pulsefeed_fabric::server::{self, Application, BackgroundTask};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulsefeed_fabric=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting Pulsefeed real-time event fabric");

    let config = Config::from_env();
    tracing::info!(
        postgres_url = %config.postgres.url,
        redpanda_brokers = %config.redpanda.brokers,
        redis_url = %config.redis.url,
        "configuration loaded"
    );

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    tracing::info!("connecting to Postgres...");
    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .min_connections(config.postgres.min_connections)
        .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout_s))
        .connect(&config.postgres.url)
        .await?;
    tracing::info!("Postgres pool established");

    tracing::info!("connecting to Redpanda...");
    let event_bus: Arc<dyn EventBus> = Arc::new(
        RedpandaEventBus::builder()
            .brokers(&config.redpanda.brokers)
            .consumer_group(&config.redpanda.consumer_group)
            .build()?,
    );
    tracing::info!("Redpanda event bus connected");

    tracing::info!("connecting to Redis...");
    let redis_client = redis::Client::open(config.redis.url.clone())?;
    let redis_connection = redis_client.get_connection_manager().await?;
    let publisher = Publisher::new(redis_connection);
    let notify: Arc<dyn RealtimeNotifier> = Arc::new(publisher);
    tracing::info!("Redis router publisher connected");

    let notification_store: Arc<dyn NotificationStore> = Arc::new(PostgresNotificationStore::new(pool.clone()));
    let idempotency_store = Arc::new(PostgresIdempotencyStore::new(pool.clone()));
    let outbox_store: Arc<dyn OutboxStore> = Arc::new(PostgresOutboxStore::new(pool.clone()));
    let rtmp_session_store: Arc<dyn RtmpSessionStore> = Arc::new(PostgresRtmpSessionStore::new(pool.clone()));
    let followers = Arc::new(NullFollowerLookup);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let consumer = Consumer::new(
        Arc::clone(&event_bus),
        Arc::clone(&idempotency_store) as Arc<dyn IdempotencyStore>,
        Arc::clone(&notification_store),
        followers,
        Arc::clone(&notify),
        config.idempotency.aggregate_window(),
    );
    let consumer_shutdown = shutdown_tx.subscribe();
    let consumer_handle = tokio::spawn(async move { consumer.run(consumer_shutdown).await });

    let outbox_worker = OutboxWorker::new(outbox_store, Arc::clone(&event_bus), config.outbox.clone());
    let outbox_shutdown = shutdown_tx.subscribe();
    let outbox_handle = tokio::spawn(async move { outbox_worker.run(outbox_shutdown).await });

    let connections = Arc::new(ConnectionManager::new());
    let router_subscriber = Subscriber::new(config.redis.url.clone(), Arc::clone(&connections));
    let router_shutdown = shutdown_tx.subscribe();
    let router_handle = tokio::spawn(async move { router_subscriber.run(router_shutdown).await });

    tracing::info!("spawning idempotency key reaper");
    let reaper_store = Arc::clone(&idempotency_store);
    let mut reaper_shutdown = shutdown_tx.subscribe();
    let reaper_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            tokio::select! {
                _ = reaper_shutdown.recv() => {
                    tracing::info!("idempotency reaper shutting down");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(error) = reaper_store.reap_expired().await {
                        tracing::warn!(%error, "idempotency reaper pass failed");
                    }
                }
            }
        }
    });

    let gateway_state = GatewayState::new(Arc::clone(&connections), config.websocket.clone());
    let chat_state = ChatState::new(Arc::new(ChatRoomRegistry::new()), config.chat.clone());

    let rtmp_env = RtmpEnvironment { store: rtmp_session_store };
    let rtmp_store: Arc<RtmpStore> = Arc::new(Store::new(RtmpState::default(), RtmpReducer, rtmp_env));
    let http_client = reqwest::Client::new();
    let moderation_client = ModerationClient::new(
        http_client.clone(),
        config.moderation.base_url.clone(),
        config.moderation.app_name.clone(),
    );
    let monitor_registry = Arc::new(MonitorRegistry::new());
    let rtmp_state = RtmpWebhookState {
        store: rtmp_store,
        monitors: monitor_registry,
        event_bus: Arc::clone(&event_bus),
        moderation: moderation_client,
        http: http_client,
        monitor_config: config.monitor.clone(),
        moderation_config: config.moderation.clone(),
    };

    let app = server::build_router(gateway_state.clone(), chat_state, rtmp_state, pool);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "HTTP server bound");

    let metrics_addr = format!("{}:{}", config.server.host, config.server.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr).await?;
    tracing::info!(address = %metrics_addr, "Prometheus metrics endpoint bound");
    let metrics_app = axum::Router::new()
        .route("/metrics", axum::routing::get(move || async move { prometheus_handle.render() }));
    let mut metrics_shutdown = shutdown_tx.subscribe();
    let metrics_handle = tokio::spawn(async move {
        if let Err(error) = axum::serve(metrics_listener, metrics_app)
            .with_graceful_shutdown(async move {
                let _ = metrics_shutdown.recv().await;
            })
            .await
        {
            tracing::warn!(%error, "metrics server exited with an error");
        }
    });

    let background = vec![
        BackgroundTask::new("event_consumer", consumer_handle),
        BackgroundTask::new("outbox_worker", outbox_handle),
        BackgroundTask::new("router_subscriber", router_handle),
        BackgroundTask::new("idempotency_reaper", reaper_handle),
        BackgroundTask::new("metrics_server", metrics_handle),
    ];

    let application = Application::new(
        listener,
        app,
        background,
        shutdown_tx,
        connections,
        gateway_state,
        config.websocket.shutdown_budget(),
    );
    application.run().await;

    tracing::info!("Pulsefeed fabric stopped");
    Ok(())
}
