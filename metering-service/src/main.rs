use std::{sync::Arc, time::Duration};

use anyhow::Result;
use metering_service::{
    checkpoint::{CheckpointRepository, JsonCheckpointStore},
    config::AppConfig,
    coordinator::Coordinator,
    observability,
    statistics::{RecorderSink, TimeSeriesSink},
};
use meter_client::ProviderClient;
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        observability::init_metrics(&metrics_cfg.bind_addr)?;
    }

    let pool = PgPoolOptions::new()
        .max_connections(cfg.recorder.max_connections)
        .connect(&cfg.recorder.uri)
        .await?;
    let sink: Arc<dyn TimeSeriesSink> = Arc::new(RecorderSink::new(
        pool,
        cfg.recorder.batch_size,
        cfg.recorder.max_retries,
        Duration::from_millis(cfg.recorder.retry_backoff_ms),
    ));
    let checkpoints: Arc<dyn CheckpointRepository> =
        Arc::new(JsonCheckpointStore::new(&cfg.checkpoint.dir));
    let client = Arc::new(ProviderClient::new(
        cfg.provider.api_url.as_str(),
        cfg.provider.token.as_str(),
        cfg.provider.tax_number.as_str(),
    ));

    let mut handles = Vec::new();
    for supply_cfg in &cfg.supplies {
        let coordinator = Coordinator::new(
            supply_cfg,
            Arc::clone(&client),
            Arc::clone(&checkpoints),
            Arc::clone(&sink),
        )?;
        tracing::info!(supply = %supply_cfg.supply, "starting update coordinator");
        handles.push(tokio::spawn(coordinator.run()));
    }

    futures::future::join_all(handles).await;

    Ok(())
}
