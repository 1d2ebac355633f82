use std::{env, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use metering_service::{
    checkpoint::{CheckpointRepository, JsonCheckpointStore},
    config::{AppConfig, ORIGIN_DATE_FORMAT},
    coordinator,
    ingest::{CurveFetcher, Ingestor},
    observability,
    statistics::{RecorderSink, TimeSeriesSink},
};
use meter_client::{MeteringChannel, ProviderClient};
use sqlx::postgres::PgPoolOptions;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

/// One-shot historical sweep for a single supply point.
///
/// `backfill_history <supply> <from dd/mm/yyyy> [--reset]`
///
/// Without `--reset` the sweep accumulates on top of the stored totals
/// (gap filling). With `--reset` the totals are zeroed first and history is
/// rebuilt from the given date — the origin-reset operation.
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        bail!("usage: backfill_history <supply> <from dd/mm/yyyy> [--reset]");
    }
    let supply = &args[1];
    let origin = Date::parse(&args[2], ORIGIN_DATE_FORMAT)
        .with_context(|| format!("invalid from date {:?}", args[2]))?;
    let reset = args.iter().any(|a| a == "--reset");

    let cfg = AppConfig::load()?;
    let supply_cfg = cfg
        .supplies
        .iter()
        .find(|s| &s.supply == supply)
        .with_context(|| format!("supply {supply} is not configured"))?;
    let channels: &[MeteringChannel] = if supply_cfg.has_pv {
        &MeteringChannel::ALL
    } else {
        &MeteringChannel::ALL[..1]
    };

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
    let fetcher: Arc<dyn CurveFetcher> = Arc::new(ProviderClient::new(
        cfg.provider.api_url.as_str(),
        cfg.provider.token.as_str(),
        cfg.provider.tax_number.as_str(),
    ));
    let ingestor = Ingestor::new(fetcher, Arc::clone(&checkpoints), sink);

    if reset {
        tracing::info!(supply, from = %origin, "resetting origin and rebuilding history");
        coordinator::reset_origin(&ingestor, checkpoints.as_ref(), supply, channels, origin).await?;
    } else {
        let now = OffsetDateTime::now_utc();
        let now = PrimitiveDateTime::new(now.date(), now.time());
        for &channel in channels {
            ingestor
                .batch_fetch(supply, channel, origin.midnight(), now, "history backfill")
                .await?;
        }
    }

    Ok(())
}
