use std::{cmp, sync::Arc, time::Duration as StdDuration};

use meter_client::MeteringChannel;
use time::{Duration, PrimitiveDateTime};

use super::{accumulate::process_and_insert, CurveFetcher};
use crate::{
    checkpoint::{CheckpointRepository, PersistenceError},
    statistics::{reconcile, TimeSeriesSink},
};

/// Largest span one provider call may cover. The client shifts `fromDate`
/// one day earlier on the wire, so 364 days here fills the provider's
/// 365-day request window exactly.
pub const MAX_BATCH_DAYS: i64 = 364;

/// How long after a checkpoint write the future-statistics repair runs,
/// giving the statistics store time to finish ingesting the batch just
/// written.
pub const DEFAULT_STATS_DELAY: StdDuration = StdDuration::from_secs(60);

/// Batch planner and incremental fetcher over one supply point's channels.
///
/// Owns the collaborators an ingestion run flows through; the coordinator
/// holds one per supply point. Runs for the same supply+channel are strictly
/// sequential (the running total threads through them); different supply
/// points are independent.
pub struct Ingestor {
    fetcher: Arc<dyn CurveFetcher>,
    checkpoints: Arc<dyn CheckpointRepository>,
    sink: Arc<dyn TimeSeriesSink>,
    stats_delay: StdDuration,
}

impl Ingestor {
    pub fn new(
        fetcher: Arc<dyn CurveFetcher>,
        checkpoints: Arc<dyn CheckpointRepository>,
        sink: Arc<dyn TimeSeriesSink>,
    ) -> Self {
        Self {
            fetcher,
            checkpoints,
            sink,
            stats_delay: DEFAULT_STATS_DELAY,
        }
    }

    pub fn with_stats_delay(mut self, delay: StdDuration) -> Self {
        self.stats_delay = delay;
        self
    }

    /// Sweep `[from, to)` in provider-sized batches, accumulating into the
    /// stored total and checkpointing once after the full sweep.
    ///
    /// One batch's failure (fetch or downstream write) is logged and
    /// isolated; later batches still run and still contribute. The
    /// checkpoint is written only when at least one batch produced a valid
    /// timestamp, and the repair pass is scheduled only when records were
    /// actually accepted. Checkpoint-store failures propagate.
    pub async fn batch_fetch(
        &self,
        supply: &str,
        channel: MeteringChannel,
        from: PrimitiveDateTime,
        to: PrimitiveDateTime,
        label: &str,
    ) -> Result<(), PersistenceError> {
        tracing::info!(
            supply,
            %channel,
            label,
            from = %from.date(),
            to = %to.date(),
            "starting batched fetch"
        );

        let mut total = self
            .checkpoints
            .load_total(supply, channel)
            .await?
            .unwrap_or(0.0);
        let mut cursor = from;
        let mut last_valid: Option<PrimitiveDateTime> = None;
        let mut accepted = 0usize;

        while cursor < to {
            let batch_end = cmp::min(cursor + Duration::days(MAX_BATCH_DAYS), to);
            match self.fetcher.fetch_curves(supply, channel, cursor, batch_end).await {
                Ok(records) if records.is_empty() => {
                    tracing::info!(
                        supply,
                        %channel,
                        label,
                        from = %cursor.date(),
                        to = %batch_end.date(),
                        "no records in batch"
                    );
                }
                Ok(records) => {
                    tracing::info!(
                        supply,
                        %channel,
                        label,
                        from = %cursor.date(),
                        to = %batch_end.date(),
                        records = records.len(),
                        "found records in batch"
                    );
                    match process_and_insert(self.sink.as_ref(), &records, supply, total, channel)
                        .await
                    {
                        Ok(outcome) => {
                            accepted += outcome.accepted;
                            total = outcome.total;
                            if let Some(ts) = outcome.last_valid {
                                last_valid = Some(ts);
                            }
                        }
                        Err(e) => {
                            tracing::error!(supply, %channel, label, error = %e, "failed to process batch");
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(
                        supply,
                        %channel,
                        label,
                        from = %cursor.date(),
                        to = %batch_end.date(),
                        error = %e,
                        "batch fetch failed"
                    );
                    metrics::counter!("ingest_batch_failures_total").increment(1);
                }
            }
            cursor = batch_end + Duration::days(1);
        }

        self.finish_run(supply, channel, total, last_valid, accepted, label)
            .await
    }

    /// Single-shot variant for gaps already known to fit one provider call.
    ///
    /// A failed fetch persists nothing and schedules nothing; persistence
    /// failures propagate like in [`batch_fetch`](Self::batch_fetch).
    pub async fn fetch_since(
        &self,
        supply: &str,
        channel: MeteringChannel,
        from: PrimitiveDateTime,
        to: PrimitiveDateTime,
        label: &str,
    ) -> Result<(), PersistenceError> {
        let records = match self.fetcher.fetch_curves(supply, channel, from, to).await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(supply, %channel, label, error = %e, "fetch failed");
                metrics::counter!("ingest_batch_failures_total").increment(1);
                return Ok(());
            }
        };
        if records.is_empty() {
            tracing::info!(supply, %channel, label, "no new records");
            return Ok(());
        }
        tracing::info!(
            supply,
            %channel,
            label,
            from = %from.date(),
            to = %to.date(),
            records = records.len(),
            "found records"
        );

        let starting = self
            .checkpoints
            .load_total(supply, channel)
            .await?
            .unwrap_or(0.0);
        match process_and_insert(self.sink.as_ref(), &records, supply, starting, channel).await {
            Ok(outcome) => {
                self.finish_run(supply, channel, outcome.total, outcome.last_valid, outcome.accepted, label)
                    .await
            }
            Err(e) => {
                tracing::error!(supply, %channel, label, error = %e, "failed to process records");
                Ok(())
            }
        }
    }

    async fn finish_run(
        &self,
        supply: &str,
        channel: MeteringChannel,
        total: f64,
        last_valid: Option<PrimitiveDateTime>,
        accepted: usize,
        label: &str,
    ) -> Result<(), PersistenceError> {
        let Some(last) = last_valid else {
            tracing::warn!(
                supply,
                %channel,
                label,
                "no valid data retrieved; check whether your telemetry is enabled"
            );
            return Ok(());
        };

        self.checkpoints.save_last_update(supply, channel, last).await?;
        self.checkpoints.save_total(supply, channel, total).await?;
        tracing::info!(
            supply,
            %channel,
            label,
            records = accepted,
            total,
            through = %(last - Duration::days(1)).date(),
            "persisted ingestion checkpoint"
        );

        if accepted > 0 {
            // Repair uses the start of the last statistic bucket, i.e. the
            // last meterDate shifted back one hour.
            reconcile::schedule(
                Arc::clone(&self.sink),
                supply.to_string(),
                channel,
                last - Duration::hours(1),
                total,
                self.stats_delay,
            );
        }
        Ok(())
    }
}
