use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use notification_dispatch_service::broker::{EventConsumer, EventPublisher, RedisStreamBroker};
use notification_dispatch_service::config::Settings;
use notification_dispatch_service::delivery::{DeliveryGateway, StreamDeliveryGateway};
use notification_dispatch_service::dispatch::{
    EventHandler, HandlerTable, InboundEventRouter, MessageProcessor, NotificationHandler,
};
use notification_dispatch_service::domain::template::create_template_store;
use notification_dispatch_service::postgres::PostgresPool;
use notification_dispatch_service::redis::RedisPool;
use notification_dispatch_service::server::create_app;
use notification_dispatch_service::shutdown::{wait_for_signal, GracefulShutdown, ShutdownConfig};
use notification_dispatch_service::status::StatusPublisher;
use notification_dispatch_service::tasks::HealthReporter;
use notification_dispatch_service::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new().context("failed to load configuration")?;
    let _telemetry = init_telemetry(&settings.otel)?;
    tracing::info!(service = %settings.service.name, "Configuration loaded");

    // Broker
    let redis_pool = Arc::new(RedisPool::new(&settings.redis)?);
    let broker = Arc::new(RedisStreamBroker::new(
        redis_pool.clone(),
        settings.broker.clone(),
    ));
    let consumer: Arc<dyn EventConsumer> = broker.clone();
    let publisher: Arc<dyn EventPublisher> = broker;

    let status = Arc::new(StatusPublisher::new(
        publisher.clone(),
        settings.service.name.clone(),
        settings.broker.dead_letter_topic.clone(),
    ));
    let gateway: Arc<dyn DeliveryGateway> = Arc::new(StreamDeliveryGateway::new(
        publisher,
        settings.broker.delivery_prefix.clone(),
    ));

    // Template catalog (PostgreSQL optional, memory fallback)
    let postgres_pool = if settings.templates.backend == "postgres" {
        match PostgresPool::new(&settings.database).await {
            Ok(pool) => Some(Arc::new(pool)),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "PostgreSQL unavailable, template catalog falls back to memory"
                );
                None
            }
        }
    } else {
        None
    };
    let templates = create_template_store(&settings.templates, postgres_pool.clone()).await?;
    let template_guard = settings.templates.guard_enabled.then(|| templates.clone());

    // Explicit topic → handler table
    let handlers = HandlerTable::from_bindings(&settings.topics, |family| {
        let handler = NotificationHandler::new(family, gateway.clone(), status.clone());
        let handler = match &template_guard {
            Some(store) => handler.with_template_guard(store.clone()),
            None => handler,
        };
        Arc::new(handler) as Arc<dyn EventHandler>
    });

    let processor = Arc::new(MessageProcessor::new(
        handlers,
        consumer.clone(),
        status.clone(),
    ));
    let router = Arc::new(InboundEventRouter::new(
        consumer,
        processor,
        status.clone(),
        settings.worker.clone(),
        settings.broker.batch_size,
    ));
    let shutdown_tx = router.shutdown_signal();

    let router_task = {
        let router = router.clone();
        tokio::spawn(async move { router.run().await })
    };

    let health_task = {
        let reporter = HealthReporter::new(
            settings.health.clone(),
            router.clone(),
            status,
            shutdown_tx.subscribe(),
        );
        tokio::spawn(async move { reporter.run().await })
    };

    // Metrics endpoint
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(addr = %addr, "Metrics server listening");

    let mut server_shutdown = shutdown_tx.subscribe();
    let server_task = tokio::spawn(async move {
        let serve = axum::serve(listener, create_app()).with_graceful_shutdown(async move {
            let _ = server_shutdown.recv().await;
        });
        if let Err(e) = serve.await {
            tracing::error!(error = %e, "Metrics server failed");
        }
    });

    let reason = wait_for_signal().await;
    let result = GracefulShutdown::new(
        shutdown_tx,
        ShutdownConfig::for_drain_timeout(settings.worker.drain_timeout_secs),
    )
    .execute(reason, router_task, vec![health_task, server_task])
    .await;

    if let Some(pool) = postgres_pool {
        pool.close().await;
    }

    tracing::info!(
        success = result.success,
        duration_ms = result.duration.as_millis(),
        "Service shutdown complete"
    );
    Ok(())
}
