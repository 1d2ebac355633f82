pub mod reconcile;
pub mod recorder;

pub use recorder::RecorderSink;

use async_trait::async_trait;
use meter_client::MeteringChannel;
use time::PrimitiveDateTime;

/// Prefix of every statistic series this service owns.
pub const STATISTIC_ID_PREFIX: &str = "sensor.metering";

pub const ENERGY_UNIT: &str = "kWh";

/// Series id for one channel of one supply point, e.g.
/// `sensor.metering.consumption_123456789`.
pub fn statistic_id(supply: &str, channel: MeteringChannel) -> String {
    format!("{STATISTIC_ID_PREFIX}.{}_{supply}", channel.key())
}

#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("statistics database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("statistics store unavailable: {0}")]
    Unavailable(String),
}

/// One long-term statistic bucket. `start` is the beginning of the metered
/// hour; `state` and `sum` both carry the cumulative total at that point.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticPoint {
    pub start: PrimitiveDateTime,
    pub state: f64,
    pub sum: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesMetadata {
    pub statistic_id: String,
    pub name: String,
    pub unit_of_measurement: &'static str,
    pub has_sum: bool,
}

impl SeriesMetadata {
    pub fn for_channel(supply: &str, channel: MeteringChannel) -> Self {
        Self {
            statistic_id: statistic_id(supply, channel),
            name: format!("{} {supply}", channel.display_name()),
            unit_of_measurement: ENERGY_UNIT,
            has_sum: true,
        }
    }
}

/// Downstream long-term statistics store.
///
/// The accumulation engine appends through [`import_points`] in one batched
/// call per ingestion pass; the future-statistics repair reads through
/// [`points_after`] and overwrites through the same bulk import. Duplicate
/// starts are reconciled by the store (upsert semantics).
///
/// [`import_points`]: TimeSeriesSink::import_points
/// [`points_after`]: TimeSeriesSink::points_after
#[async_trait]
pub trait TimeSeriesSink: Send + Sync {
    async fn import_points(
        &self,
        metadata: &SeriesMetadata,
        points: &[StatisticPoint],
    ) -> Result<(), SinkError>;

    /// Start timestamps of existing points of the series stamped strictly
    /// later than `after`, in ascending order.
    async fn points_after(
        &self,
        statistic_id: &str,
        after: PrimitiveDateTime,
    ) -> Result<Vec<PrimitiveDateTime>, SinkError>;
}
