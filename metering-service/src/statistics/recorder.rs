use std::time::Duration;

use async_trait::async_trait;
use sqlx::{postgres::PgPool, Postgres, QueryBuilder};
use time::{OffsetDateTime, PrimitiveDateTime};

use super::{SeriesMetadata, SinkError, StatisticPoint, TimeSeriesSink};

/// [`TimeSeriesSink`] over the long-term statistics database.
///
/// Expects the recorder schema: `statistics_meta (id, statistic_id, source,
/// name, unit_of_measurement, has_sum)` and `statistics (metadata_id,
/// start_ts, state, sum)` keyed by `(metadata_id, start_ts)`. Imports are
/// chunked bulk upserts retried with linear backoff; duplicate starts take
/// the newest state/sum, which is what makes re-imports and repair passes
/// idempotent.
pub struct RecorderSink {
    pool: PgPool,
    batch_size: usize,
    max_retries: u32,
    retry_backoff: Duration,
}

impl RecorderSink {
    pub fn new(pool: PgPool, batch_size: usize, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            pool,
            batch_size,
            max_retries,
            retry_backoff,
        }
    }

    async fn ensure_metadata(&self, metadata: &SeriesMetadata) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO statistics_meta (statistic_id, source, name, unit_of_measurement, has_sum)
            VALUES ($1, 'recorder', $2, $3, $4)
            ON CONFLICT (statistic_id)
            DO UPDATE SET name = EXCLUDED.name, unit_of_measurement = EXCLUDED.unit_of_measurement
            RETURNING id
            "#,
        )
        .bind(&metadata.statistic_id)
        .bind(&metadata.name)
        .bind(metadata.unit_of_measurement)
        .bind(metadata.has_sum)
        .fetch_one(&self.pool)
        .await
    }

    async fn upsert_chunk(
        &self,
        metadata_id: i64,
        chunk: &[StatisticPoint],
    ) -> Result<(), sqlx::Error> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO statistics (metadata_id, start_ts, state, sum) ",
        );
        builder.push_values(chunk, |mut b, point| {
            b.push_bind(metadata_id)
                .push_bind(point.start.assume_utc())
                .push_bind(point.state)
                .push_bind(point.sum);
        });
        builder.push(
            " ON CONFLICT (metadata_id, start_ts) DO UPDATE SET state = EXCLUDED.state, sum = EXCLUDED.sum",
        );
        builder.build().execute(&self.pool).await.map(|_| ())
    }

    async fn flush_chunk(&self, metadata_id: i64, chunk: &[StatisticPoint]) -> Result<(), SinkError> {
        let mut attempt: u32 = 0;
        loop {
            match self.upsert_chunk(metadata_id, chunk).await {
                Ok(()) => {
                    metrics::counter!("recorder_points_written_total").increment(chunk.len() as u64);
                    return Ok(());
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let sleep_for = self.retry_backoff * attempt;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        "statistics flush failed, retrying with backoff"
                    );
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "statistics flush failed, giving up");
                    metrics::counter!("recorder_sink_errors_total").increment(1);
                    return Err(e.into());
                }
            }
        }
    }
}

#[async_trait]
impl TimeSeriesSink for RecorderSink {
    async fn import_points(
        &self,
        metadata: &SeriesMetadata,
        points: &[StatisticPoint],
    ) -> Result<(), SinkError> {
        if points.is_empty() {
            return Ok(());
        }
        let metadata_id = self.ensure_metadata(metadata).await?;
        for chunk in points.chunks(self.batch_size) {
            self.flush_chunk(metadata_id, chunk).await?;
        }
        Ok(())
    }

    async fn points_after(
        &self,
        statistic_id: &str,
        after: PrimitiveDateTime,
    ) -> Result<Vec<PrimitiveDateTime>, SinkError> {
        let starts: Vec<OffsetDateTime> = sqlx::query_scalar(
            r#"
            SELECT start_ts FROM statistics
            WHERE metadata_id IN (SELECT id FROM statistics_meta WHERE statistic_id = $1)
              AND start_ts > $2
            ORDER BY start_ts
            "#,
        )
        .bind(statistic_id)
        .bind(after.assume_utc())
        .fetch_all(&self.pool)
        .await?;

        Ok(starts
            .into_iter()
            .map(|ts| {
                let utc = ts.to_offset(time::UtcOffset::UTC);
                PrimitiveDateTime::new(utc.date(), utc.time())
            })
            .collect())
    }
}
