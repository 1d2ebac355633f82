use std::{sync::Arc, time::Duration};

use meter_client::MeteringChannel;
use time::PrimitiveDateTime;

use super::{statistic_id, SeriesMetadata, SinkError, StatisticPoint, TimeSeriesSink};

/// Rewrite every statistic point of the series stamped later than
/// `last_start` to the new cumulative total.
///
/// A delayed or back-dated provider response can leave points in the store
/// that now sit beyond the authoritative checkpoint with a stale, lower
/// total; left alone they render as a decreasing counter. Returns how many
/// points were corrected.
pub async fn update_future_statistics(
    sink: &dyn TimeSeriesSink,
    supply: &str,
    channel: MeteringChannel,
    last_start: PrimitiveDateTime,
    new_total: f64,
) -> Result<usize, SinkError> {
    let statistic_id = statistic_id(supply, channel);
    let future_starts = sink.points_after(&statistic_id, last_start).await?;
    if future_starts.is_empty() {
        tracing::info!(supply, %channel, "no inconsistent future points in the statistics store");
        return Ok(0);
    }

    let points: Vec<StatisticPoint> = future_starts
        .into_iter()
        .map(|start| StatisticPoint {
            start,
            state: new_total,
            sum: new_total,
        })
        .collect();
    let corrected = points.len();
    let metadata = SeriesMetadata::for_channel(supply, channel);
    sink.import_points(&metadata, &points).await?;
    metrics::counter!("statistics_future_points_corrected_total").increment(corrected as u64);
    Ok(corrected)
}

/// Schedule the repair pass as a delayed fire-and-forget task.
///
/// The delay gives the statistics store time to finish ingesting the batch
/// the caller just wrote; running inline would race an eventually-consistent
/// read against that write. Repair is advisory cleanup: errors are logged and
/// the job is not retried, since the next successful ingestion schedules a
/// fresh one.
pub fn schedule(
    sink: Arc<dyn TimeSeriesSink>,
    supply: String,
    channel: MeteringChannel,
    last_start: PrimitiveDateTime,
    new_total: f64,
    delay: Duration,
) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        match update_future_statistics(sink.as_ref(), &supply, channel, last_start, new_total).await
        {
            Ok(0) => {}
            Ok(corrected) => tracing::info!(
                supply,
                %channel,
                corrected,
                total = new_total,
                "rewrote future statistic points to the new cumulative total"
            ),
            Err(e) => tracing::warn!(
                supply,
                %channel,
                error = %e,
                "future-statistics repair failed"
            ),
        }
    });
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, sync::Mutex};

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use time::macros::datetime;

    use super::*;

    /// Sink over an in-memory point map, upserting by start timestamp.
    #[derive(Default)]
    struct MemorySink {
        series: Mutex<BTreeMap<String, BTreeMap<PrimitiveDateTime, StatisticPoint>>>,
    }

    impl MemorySink {
        fn insert(&self, statistic_id: &str, point: StatisticPoint) {
            self.series
                .lock()
                .unwrap()
                .entry(statistic_id.to_string())
                .or_default()
                .insert(point.start, point);
        }

        fn sum_at(&self, statistic_id: &str, start: PrimitiveDateTime) -> f64 {
            self.series.lock().unwrap()[statistic_id][&start].sum
        }
    }

    #[async_trait]
    impl TimeSeriesSink for MemorySink {
        async fn import_points(
            &self,
            metadata: &SeriesMetadata,
            points: &[StatisticPoint],
        ) -> Result<(), SinkError> {
            for point in points {
                self.insert(&metadata.statistic_id, point.clone());
            }
            Ok(())
        }

        async fn points_after(
            &self,
            statistic_id: &str,
            after: PrimitiveDateTime,
        ) -> Result<Vec<PrimitiveDateTime>, SinkError> {
            Ok(self
                .series
                .lock()
                .unwrap()
                .get(statistic_id)
                .map(|points| points.keys().filter(|start| **start > after).copied().collect())
                .unwrap_or_default())
        }
    }

    fn point(start: PrimitiveDateTime, total: f64) -> StatisticPoint {
        StatisticPoint {
            start,
            state: total,
            sum: total,
        }
    }

    #[tokio::test]
    async fn rewrites_points_after_the_checkpoint_only() {
        let sink = MemorySink::default();
        let id = statistic_id("123456789", MeteringChannel::Consumption);
        let checkpoint = datetime!(2025-04-21 23:00);
        sink.insert(&id, point(datetime!(2025-04-21 22:00), 10.0));
        sink.insert(&id, point(datetime!(2025-04-22 00:00), 5.0));
        sink.insert(&id, point(datetime!(2025-04-22 01:00), 6.0));

        let corrected = update_future_statistics(
            &sink,
            "123456789",
            MeteringChannel::Consumption,
            checkpoint,
            24.0,
        )
        .await
        .unwrap();

        assert_eq!(corrected, 2);
        assert_eq!(sink.sum_at(&id, datetime!(2025-04-21 22:00)), 10.0);
        assert_eq!(sink.sum_at(&id, datetime!(2025-04-22 00:00)), 24.0);
        assert_eq!(sink.sum_at(&id, datetime!(2025-04-22 01:00)), 24.0);
    }

    #[tokio::test]
    async fn clean_series_corrects_nothing() {
        let sink = MemorySink::default();
        let id = statistic_id("123456789", MeteringChannel::Consumption);
        sink.insert(&id, point(datetime!(2025-04-21 22:00), 10.0));

        let corrected = update_future_statistics(
            &sink,
            "123456789",
            MeteringChannel::Consumption,
            datetime!(2025-04-21 23:00),
            24.0,
        )
        .await
        .unwrap();

        assert_eq!(corrected, 0);
    }

    #[tokio::test]
    async fn other_series_are_untouched() {
        let sink = MemorySink::default();
        let consumption = statistic_id("123456789", MeteringChannel::Consumption);
        let production = statistic_id("123456789", MeteringChannel::Production);
        sink.insert(&consumption, point(datetime!(2025-04-22 00:00), 5.0));
        sink.insert(&production, point(datetime!(2025-04-22 00:00), 3.0));

        update_future_statistics(
            &sink,
            "123456789",
            MeteringChannel::Consumption,
            datetime!(2025-04-21 23:00),
            24.0,
        )
        .await
        .unwrap();

        assert_eq!(sink.sum_at(&production, datetime!(2025-04-22 00:00)), 3.0);
    }
}
