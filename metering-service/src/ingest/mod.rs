pub mod accumulate;
pub mod batch;
pub mod day_group;

pub use accumulate::{process_and_insert, ProcessOutcome};
pub use batch::Ingestor;

use async_trait::async_trait;
use meter_client::{CurveRecord, MeteringChannel, ProviderClient, ProviderError};
use time::PrimitiveDateTime;

/// Upstream data-fetch seam.
///
/// The batch planner and incremental fetcher only ever see this trait, so
/// tests drive them with scripted in-memory fetchers. Timestamps are
/// provider-local; implementations decide how to map them onto the wire.
#[async_trait]
pub trait CurveFetcher: Send + Sync {
    async fn fetch_curves(
        &self,
        supply: &str,
        channel: MeteringChannel,
        from: PrimitiveDateTime,
        to: PrimitiveDateTime,
    ) -> Result<Vec<CurveRecord>, ProviderError>;
}

#[async_trait]
impl CurveFetcher for ProviderClient {
    async fn fetch_curves(
        &self,
        supply: &str,
        channel: MeteringChannel,
        from: PrimitiveDateTime,
        to: PrimitiveDateTime,
    ) -> Result<Vec<CurveRecord>, ProviderError> {
        ProviderClient::fetch_curves(self, supply, channel, from, to).await
    }
}
