use std::{collections::BTreeMap, io, path::PathBuf};

use async_trait::async_trait;
use meter_client::MeteringChannel;
use serde_json::Value;
use time::{
    format_description::{well_known::Rfc3339, BorrowedFormatItem},
    macros::format_description,
    OffsetDateTime, PrimitiveDateTime,
};

/// Checkpoint-store failures are correctness-critical: a lost write means a
/// lost idempotency boundary, so these propagate to the caller instead of
/// being swallowed like fetch errors.
#[derive(thiserror::Error, Debug)]
pub enum PersistenceError {
    #[error("checkpoint store I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("checkpoint store holds malformed JSON: {0}")]
    Format(#[from] serde_json::Error),
    #[error("checkpoint store holds an unreadable timestamp: {0}")]
    Timestamp(String),
}

/// Durable `{cumulative total, last update, initial-jump flag}` per supply
/// point and channel — the unit of idempotency for ingestion runs.
///
/// A single coordinator owns each supply+channel, so implementations need
/// load-modify-save atomicity per call but no cross-writer locking.
/// Re-saving the same value must be harmless.
#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    async fn load_total(
        &self,
        supply: &str,
        channel: MeteringChannel,
    ) -> Result<Option<f64>, PersistenceError>;

    async fn save_total(
        &self,
        supply: &str,
        channel: MeteringChannel,
        total: f64,
    ) -> Result<(), PersistenceError>;

    async fn load_last_update(
        &self,
        supply: &str,
        channel: MeteringChannel,
    ) -> Result<Option<PrimitiveDateTime>, PersistenceError>;

    async fn save_last_update(
        &self,
        supply: &str,
        channel: MeteringChannel,
        update: PrimitiveDateTime,
    ) -> Result<(), PersistenceError>;

    /// Whether the presentation layer has already shown the first big jump
    /// from zero to the reconstructed total for this channel.
    async fn load_initial_jump(
        &self,
        supply: &str,
        channel: MeteringChannel,
    ) -> Result<bool, PersistenceError>;

    async fn save_initial_jump(
        &self,
        supply: &str,
        channel: MeteringChannel,
        done: bool,
    ) -> Result<(), PersistenceError>;

    /// Timestamp of the last PV-detection probe for the supply point.
    async fn load_pv_check(&self, supply: &str) -> Result<Option<PrimitiveDateTime>, PersistenceError>;

    async fn save_pv_check(
        &self,
        supply: &str,
        checked_at: PrimitiveDateTime,
    ) -> Result<(), PersistenceError>;
}

const TOTALS_FILE: &str = "last_total.json";
const UPDATES_FILE: &str = "last_update.json";
const JUMPS_FILE: &str = "initial_jump.json";

/// Pseudo-channel key for the PV-detection timestamp, stored alongside the
/// per-channel last-update entries.
const PV_DETECTION_KEY: &str = "pv_detection";

/// Timestamp layout written by this service. Reads also accept RFC 3339 with
/// an offset, which older deployments stored.
const STORED_TS_FORMAT: &[BorrowedFormatItem<'_>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

/// File-backed [`CheckpointRepository`]: three small JSON documents under one
/// data directory, each a flat key/value map.
///
/// Key layout: `"<channel>_total_<supply>"`, `"last_update_<channel>_<supply>"`
/// and `"jump_<channel>_<supply>"`. Deployments that predate multi-channel
/// support stored consumption under channel-less keys (`"total_<supply>"`,
/// `"last_update_<supply>"`, `"jump_<supply>"`); those are honoured as a read
/// fallback for the consumption channel only.
pub struct JsonCheckpointStore {
    dir: PathBuf,
}

impl JsonCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn read_map(&self, file: &str) -> Result<BTreeMap<String, Value>, PersistenceError> {
        let path = self.dir.join(file);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_entry(&self, file: &str, key: String, value: Value) -> Result<(), PersistenceError> {
        let mut map = self.read_map(file).await?;
        map.insert(key, value);
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.dir.join(file), serde_json::to_vec_pretty(&map)?).await?;
        Ok(())
    }

    fn lookup<'a>(
        map: &'a BTreeMap<String, Value>,
        key: &str,
        legacy_key: Option<&str>,
    ) -> Option<&'a Value> {
        map.get(key)
            .or_else(|| legacy_key.and_then(|legacy| map.get(legacy)))
    }
}

fn parse_stored_ts(raw: &str) -> Result<PrimitiveDateTime, PersistenceError> {
    if let Ok(dt) = PrimitiveDateTime::parse(raw, STORED_TS_FORMAT) {
        return Ok(dt);
    }
    let with_offset = OffsetDateTime::parse(raw, &Rfc3339)
        .map_err(|e| PersistenceError::Timestamp(format!("{raw:?}: {e}")))?;
    Ok(PrimitiveDateTime::new(with_offset.date(), with_offset.time()))
}

fn format_stored_ts(ts: PrimitiveDateTime) -> String {
    // The format description has no invalid components for a datetime.
    ts.format(STORED_TS_FORMAT).expect("formatting stored timestamp")
}

#[async_trait]
impl CheckpointRepository for JsonCheckpointStore {
    async fn load_total(
        &self,
        supply: &str,
        channel: MeteringChannel,
    ) -> Result<Option<f64>, PersistenceError> {
        let map = self.read_map(TOTALS_FILE).await?;
        let legacy = (channel == MeteringChannel::Consumption).then(|| format!("total_{supply}"));
        Ok(
            Self::lookup(&map, &format!("{}_total_{supply}", channel.key()), legacy.as_deref())
                .and_then(Value::as_f64),
        )
    }

    async fn save_total(
        &self,
        supply: &str,
        channel: MeteringChannel,
        total: f64,
    ) -> Result<(), PersistenceError> {
        self.write_entry(
            TOTALS_FILE,
            format!("{}_total_{supply}", channel.key()),
            Value::from(total),
        )
        .await
    }

    async fn load_last_update(
        &self,
        supply: &str,
        channel: MeteringChannel,
    ) -> Result<Option<PrimitiveDateTime>, PersistenceError> {
        let map = self.read_map(UPDATES_FILE).await?;
        let legacy =
            (channel == MeteringChannel::Consumption).then(|| format!("last_update_{supply}"));
        Self::lookup(
            &map,
            &format!("last_update_{}_{supply}", channel.key()),
            legacy.as_deref(),
        )
        .and_then(Value::as_str)
        .map(parse_stored_ts)
        .transpose()
    }

    async fn save_last_update(
        &self,
        supply: &str,
        channel: MeteringChannel,
        update: PrimitiveDateTime,
    ) -> Result<(), PersistenceError> {
        self.write_entry(
            UPDATES_FILE,
            format!("last_update_{}_{supply}", channel.key()),
            Value::from(format_stored_ts(update)),
        )
        .await
    }

    async fn load_initial_jump(
        &self,
        supply: &str,
        channel: MeteringChannel,
    ) -> Result<bool, PersistenceError> {
        let map = self.read_map(JUMPS_FILE).await?;
        let legacy = (channel == MeteringChannel::Consumption).then(|| format!("jump_{supply}"));
        Ok(
            Self::lookup(&map, &format!("jump_{}_{supply}", channel.key()), legacy.as_deref())
                .and_then(Value::as_bool)
                .unwrap_or(false),
        )
    }

    async fn save_initial_jump(
        &self,
        supply: &str,
        channel: MeteringChannel,
        done: bool,
    ) -> Result<(), PersistenceError> {
        self.write_entry(
            JUMPS_FILE,
            format!("jump_{}_{supply}", channel.key()),
            Value::from(done),
        )
        .await
    }

    async fn load_pv_check(&self, supply: &str) -> Result<Option<PrimitiveDateTime>, PersistenceError> {
        let map = self.read_map(UPDATES_FILE).await?;
        map.get(&format!("last_update_{PV_DETECTION_KEY}_{supply}"))
            .and_then(Value::as_str)
            .map(parse_stored_ts)
            .transpose()
    }

    async fn save_pv_check(
        &self,
        supply: &str,
        checked_at: PrimitiveDateTime,
    ) -> Result<(), PersistenceError> {
        self.write_entry(
            UPDATES_FILE,
            format!("last_update_{PV_DETECTION_KEY}_{supply}"),
            Value::from(format_stored_ts(checked_at)),
        )
        .await
    }
}
