use std::sync::Arc;

use axum::Router;
use envconfig::Envconfig;
use eyre::{Result, WrapErr};
use time::Duration;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use fio_common::enrichment::HttpEnrichmentProvider;
use fio_common::health::HealthRegistry;
use fio_common::kafka_producer::create_kafka_producer;
use fio_common::logging::init_tracing;
use fio_common::metrics::setup_metrics_recorder;
use fio_common::publisher::KafkaPublisher;
use fio_common::store::PgStore;
use fio_service::config::Config;
use fio_service::coordinator::GroupCoordinator;
use fio_service::handlers;
use fio_service::worker::ConsumerGroupWorker;

async fn listen(app: Router, bind: String, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .wrap_err_with(|| format!("failed to bind {}", bind))?;
    info!("listening on {}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

async fn wait_for_signal(
    mut term: Signal,
    mut interrupt: Signal,
    shutdown: CancellationToken,
) {
    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
        _ = shutdown.cancelled() => return,
    };

    info!("Shutting down gracefully...");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::init_from_env().wrap_err("failed to load configuration from env")?;
    init_tracing(config.log_json);

    let shutdown = CancellationToken::new();
    let term = signal(SignalKind::terminate()).wrap_err("failed to register SIGTERM handler")?;
    let interrupt =
        signal(SignalKind::interrupt()).wrap_err("failed to register SIGINT handler")?;
    tokio::spawn(wait_for_signal(term, interrupt, shutdown.clone()));

    let liveness = HealthRegistry::new("liveness");

    let store = PgStore::new(&config.database_url, config.max_pg_connections)
        .await
        .wrap_err("failed to connect to postgres")?;
    if config.run_migrations {
        store.migrate().await.wrap_err("failed to run migrations")?;
    }
    let store = Arc::new(store);

    let producer_liveness = liveness
        .register("rdkafka".to_string(), Duration::seconds(30))
        .await;
    let producer = create_kafka_producer(&config.kafka, producer_liveness.into())
        .await
        .wrap_err("failed to create kafka producer")?;
    let publisher = Arc::new(KafkaPublisher::new(
        producer,
        &config.consumer.kafka_status_topic,
    ));

    let enrichment = Arc::new(
        HttpEnrichmentProvider::new(&config.enrichment)
            .wrap_err("failed to build enrichment client")?,
    );

    let worker = ConsumerGroupWorker::new(enrichment, store.clone(), publisher);
    let coordinator = GroupCoordinator::new(
        &config.kafka,
        &config.consumer,
        worker,
        liveness
            .register("coordinator".to_string(), Duration::seconds(30))
            .await,
    )
    .wrap_err("failed to join consumer group")?;

    let recorder_handle = setup_metrics_recorder().wrap_err("failed to install metrics recorder")?;
    let app = handlers::app(
        store,
        liveness,
        Some(recorder_handle),
        config.http_timeout.0,
    );

    // Whichever task stops first takes the other one down with it
    let coordinator_shutdown = shutdown.clone();
    let coordinator = tokio::spawn(async move {
        let result = coordinator.run(coordinator_shutdown.clone()).await;
        coordinator_shutdown.cancel();
        result
    });

    let server_shutdown = shutdown.clone();
    let http_server = tokio::spawn(async move {
        let result = listen(app, config.bind(), server_shutdown.clone()).await;
        server_shutdown.cancel();
        result
    });

    let (coordinator_result, server_result) = tokio::join!(coordinator, http_server);

    let mut failed = false;
    if let Err(e) = coordinator_result? {
        error!("consumer group coordinator failed: {}", e);
        failed = true;
    }
    if let Err(e) = server_result? {
        error!("http server failed: {}", e);
        failed = true;
    }
    if failed {
        eyre::bail!("fio-service stopped on a fatal error");
    }

    info!("fio-service stopped");
    Ok(())
}
