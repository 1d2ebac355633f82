use meter_client::{CurveRecord, MeteringChannel};
use time::{Duration, PrimitiveDateTime};

use super::day_group::{group_valid_days, DayGroups};
use crate::statistics::{SeriesMetadata, SinkError, StatisticPoint, TimeSeriesSink};

/// Result of one accumulation pass over a fetched record set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessOutcome {
    /// Records whose delta was added to the total.
    pub accepted: usize,
    /// Cumulative total after the pass.
    pub total: f64,
    /// `meterDate` of the newest record that contributed, if any.
    pub last_valid: Option<PrimitiveDateTime>,
}

/// Walk complete days of `records`, add each hourly delta to the running
/// total and emit one statistic point per accepted record.
///
/// Day order does not affect the final total; within a day, records are
/// processed in timestamp order so intermediate points are monotone. A record
/// whose value does not parse as a number is skipped on its own without
/// invalidating its already-validated day. All emitted points are written
/// downstream in a single batched call; the statistics store needs the whole
/// batch at once to version it consistently.
pub async fn process_and_insert(
    sink: &dyn TimeSeriesSink,
    records: &[CurveRecord],
    supply: &str,
    starting_total: f64,
    channel: MeteringChannel,
) -> Result<ProcessOutcome, SinkError> {
    let DayGroups { days, mut skipped } = group_valid_days(records, supply, channel);

    let mut total = starting_total;
    let mut accepted = 0usize;
    let mut last_valid: Option<PrimitiveDateTime> = None;
    let mut points: Vec<StatisticPoint> = Vec::new();

    for (day, mut day_records) in days {
        day_records.sort_by_key(|(meter_dt, _)| *meter_dt);
        for (meter_dt, rec) in day_records {
            let raw = rec.value(channel).unwrap_or_default();
            let delta: f64 = match raw.parse() {
                Ok(v) => v,
                Err(e) => {
                    tracing::info!(supply, %day, raw, error = %e, "skipping record with unparsable value");
                    skipped += 1;
                    continue;
                }
            };
            total += delta;
            // The statistic bucket starts where the metered hour starts.
            points.push(StatisticPoint {
                start: meter_dt - Duration::hours(1),
                state: total,
                sum: total,
            });
            last_valid = Some(meter_dt);
            accepted += 1;
        }
    }

    if !points.is_empty() {
        let metadata = SeriesMetadata::for_channel(supply, channel);
        sink.import_points(&metadata, &points).await?;
    }

    if skipped > 0 {
        tracing::info!(supply, %channel, skipped, "discarded records with incomplete data");
        metrics::counter!("ingest_records_skipped_total").increment(skipped as u64);
    }
    metrics::counter!("ingest_records_accepted_total").increment(accepted as u64);

    Ok(ProcessOutcome {
        accepted,
        total,
        last_valid,
    })
}
