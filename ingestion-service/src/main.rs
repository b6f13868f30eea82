use anyhow::Result;
use fleet_client::db::schema;
use ingestion_service::{
    api,
    config::AppConfig,
    intake::MqttIntake,
    metrics_server, observability,
    queue::{DurableQueue, Stream},
    worker::BatchWorker,
};
use sqlx::postgres::PgPoolOptions;
use time::OffsetDateTime;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr, shutdown_rx.clone())?;
    }

    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect(&cfg.database.url)
        .await?;

    schema::create_schema(&pool).await?;
    schema::ensure_history_partitions(&pool, OffsetDateTime::now_utc(), 1, 2).await?;

    let queue = DurableQueue::new(pool.clone());

    // Broker intake: parse, validate, enqueue.
    let intake = MqttIntake::new(cfg.mqtt.clone(), queue.clone(), shutdown_rx.clone());
    let intake_task = tokio::spawn(async move {
        if let Err(e) = intake.run().await {
            tracing::error!(error = %e, "intake stopped with error");
        }
    });

    // One single-flight batch worker per stream.
    let meter_worker = BatchWorker::new(
        pool.clone(),
        queue.clone(),
        Stream::Meter,
        cfg.batcher.clone(),
        shutdown_rx.clone(),
    );
    let vehicle_worker = BatchWorker::new(
        pool.clone(),
        queue.clone(),
        Stream::Vehicle,
        cfg.batcher.clone(),
        shutdown_rx.clone(),
    );
    let meter_task = tokio::spawn(meter_worker.run());
    let vehicle_task = tokio::spawn(vehicle_worker.run());

    // Keep future history partitions provisioned while the service runs.
    let maintenance_pool = pool.clone();
    let mut maintenance_shutdown = shutdown_rx.clone();
    let maintenance_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(24 * 60 * 60));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = schema::ensure_history_partitions(
                        &maintenance_pool,
                        OffsetDateTime::now_utc(),
                        1,
                        2,
                    )
                    .await
                    {
                        tracing::warn!(error = %e, "history partition maintenance failed");
                    }
                }
                _ = maintenance_shutdown.changed() => return,
            }
        }
    });

    // Admin/analytics HTTP surface.
    let app = api::router(pool.clone());
    let listener = tokio::net::TcpListener::bind(cfg.http.bind_addr.as_str()).await?;
    tracing::info!(addr = %cfg.http.bind_addr, "http api listening");
    let http_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app.into_make_service()).await {
            tracing::error!(error = %e, "http server error");
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested, draining workers");
    let _ = shutdown_tx.send(true);

    let _ = intake_task.await;
    let _ = meter_task.await;
    let _ = vehicle_task.await;
    let _ = maintenance_task.await;
    http_task.abort();

    Ok(())
}
