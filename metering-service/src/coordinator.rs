use std::{sync::Arc, time::Duration as StdDuration};

use meter_client::{MeteringChannel, ProviderClient};
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime};
use tokio::time::MissedTickBehavior;

use crate::{
    checkpoint::{CheckpointRepository, PersistenceError},
    config::SupplyConfig,
    ingest::Ingestor,
    statistics::TimeSeriesSink,
};

/// Gap beyond which a periodic update falls back to batched fetching.
const BATCH_GAP: Duration = Duration::days(7);

/// Minimum spacing between PV-detection probes for supplies without PV.
const PV_DETECTION_INTERVAL: Duration = Duration::days(7);

/// How one update cycle reaches the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdatePlan {
    /// No stored checkpoint: reconstruct from the origin date.
    Initial,
    /// Gap larger than one comfortable request: sweep in batches.
    Batched { since: PrimitiveDateTime },
    /// Small gap: one incremental fetch.
    Single { since: PrimitiveDateTime },
}

fn plan_update(last_update: Option<PrimitiveDateTime>, now: PrimitiveDateTime) -> UpdatePlan {
    match last_update {
        None => UpdatePlan::Initial,
        Some(since) if now - since > BATCH_GAP => UpdatePlan::Batched { since },
        Some(since) => UpdatePlan::Single { since },
    }
}

fn now_local() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

/// Periodic update driver for one supply point.
///
/// Owns the gap decision (initial sweep / batched catch-up / single fetch),
/// PV detection and the initial-jump flags the presentation layer reads.
/// Each supply point runs its own coordinator task; they share nothing
/// mutable.
pub struct Coordinator {
    supply: String,
    origin: Date,
    interval: StdDuration,
    has_pv: bool,
    client: Arc<ProviderClient>,
    checkpoints: Arc<dyn CheckpointRepository>,
    ingestor: Ingestor,
}

impl Coordinator {
    pub fn new(
        cfg: &SupplyConfig,
        client: Arc<ProviderClient>,
        checkpoints: Arc<dyn CheckpointRepository>,
        sink: Arc<dyn TimeSeriesSink>,
    ) -> anyhow::Result<Self> {
        let origin = cfg
            .origin()
            .map_err(|e| anyhow::anyhow!("supply {}: invalid origin_date: {e}", cfg.supply))?;
        let fetcher: Arc<dyn crate::ingest::CurveFetcher> = client.clone();
        let ingestor = Ingestor::new(fetcher, Arc::clone(&checkpoints), sink);
        Ok(Self {
            supply: cfg.supply.clone(),
            origin,
            interval: StdDuration::from_secs(cfg.interval_hours * 3600),
            has_pv: cfg.has_pv,
            client,
            checkpoints,
            ingestor,
        })
    }

    fn active_channels(&self) -> &'static [MeteringChannel] {
        if self.has_pv {
            &MeteringChannel::ALL
        } else {
            &MeteringChannel::ALL[..1]
        }
    }

    pub async fn run(mut self) {
        if let Err(e) = self.mark_restored_channels().await {
            tracing::error!(supply = %self.supply, error = %e, "failed to restore channel flags");
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.update_cycle().await {
                tracing::error!(supply = %self.supply, error = %e, "update cycle failed");
            }
        }
    }

    async fn update_cycle(&mut self) -> Result<(), PersistenceError> {
        self.detect_pv().await?;
        for &channel in self.active_channels() {
            self.update_channel(channel).await?;
        }
        Ok(())
    }

    async fn update_channel(&self, channel: MeteringChannel) -> Result<(), PersistenceError> {
        let now = now_local();
        let last_update = self.checkpoints.load_last_update(&self.supply, channel).await?;
        match plan_update(last_update, now) {
            UpdatePlan::Initial => {
                tracing::info!(
                    supply = %self.supply,
                    %channel,
                    origin = %self.origin,
                    "no stored checkpoint; reconstructing history"
                );
                self.ingestor
                    .batch_fetch(&self.supply, channel, self.origin.midnight(), now, "initial fetch")
                    .await?;
                self.checkpoints.save_initial_jump(&self.supply, channel, false).await?;
            }
            UpdatePlan::Batched { since } => {
                tracing::info!(
                    supply = %self.supply,
                    %channel,
                    gap_days = (now - since).whole_days(),
                    "data gap detected; starting batched catch-up"
                );
                self.ingestor
                    .batch_fetch(&self.supply, channel, since, now, "periodic update")
                    .await?;
            }
            UpdatePlan::Single { since } => {
                self.ingestor
                    .fetch_since(&self.supply, channel, since, now, "periodic update")
                    .await?;
            }
        }
        Ok(())
    }

    /// Probe for PV production at most once per detection interval.
    ///
    /// A non-empty dry-run answer on the production channel permanently
    /// enables the production and injection channels for this supply.
    /// Provider failures only mean "try again next interval".
    async fn detect_pv(&mut self) -> Result<(), PersistenceError> {
        if self.has_pv {
            return Ok(());
        }
        let now = now_local();
        if let Some(last_check) = self.checkpoints.load_pv_check(&self.supply).await? {
            if now - last_check < PV_DETECTION_INTERVAL {
                return Ok(());
            }
        }
        self.checkpoints.save_pv_check(&self.supply, now).await?;

        match self
            .client
            .validate_credentials(&self.supply, MeteringChannel::Production)
            .await
        {
            Ok(curves) if !curves.is_empty() => {
                tracing::info!(
                    supply = %self.supply,
                    "PV production detected; enabling production and injection channels"
                );
                self.has_pv = true;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(supply = %self.supply, error = %e, "PV detection probe failed");
            }
        }
        Ok(())
    }

    /// Channels restored from a previous run have already presented their
    /// reconstructed total once; record that for the presentation layer.
    async fn mark_restored_channels(&self) -> Result<(), PersistenceError> {
        for &channel in self.active_channels() {
            if self
                .checkpoints
                .load_last_update(&self.supply, channel)
                .await?
                .is_some()
            {
                self.checkpoints.save_initial_jump(&self.supply, channel, true).await?;
            }
        }
        Ok(())
    }
}

/// Zero the persisted totals and rebuild history from an earlier origin.
///
/// The only sanctioned way a cumulative total moves backwards: the operator
/// explicitly restarts history from a new date of origin.
pub async fn reset_origin(
    ingestor: &Ingestor,
    checkpoints: &dyn CheckpointRepository,
    supply: &str,
    channels: &[MeteringChannel],
    origin: Date,
) -> Result<(), PersistenceError> {
    let now = now_local();
    for &channel in channels {
        checkpoints.save_total(supply, channel, 0.0).await?;
    }
    for &channel in channels {
        ingestor
            .batch_fetch(supply, channel, origin.midnight(), now, "origin reset")
            .await?;
        checkpoints.save_initial_jump(supply, channel, false).await?;
    }
    Ok(())
}
