use serde::Deserialize;
use std::fs;
use time::{format_description::BorrowedFormatItem, macros::format_description, Date};

/// Origin dates in the config file use the provider's day-first convention.
pub const ORIGIN_DATE_FORMAT: &[BorrowedFormatItem<'_>] =
    format_description!("[day]/[month]/[year]");

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub api_url: String,
    pub token: String,
    pub tax_number: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecorderConfig {
    pub uri: String,
    pub max_connections: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointConfig {
    pub dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupplyConfig {
    /// 9-digit supply point identifier assigned by the provider.
    pub supply: String,
    /// Earliest day history is reconstructed from, `dd/mm/yyyy`.
    pub origin_date: String,
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,
    /// Enables the production and injection channels from the start;
    /// otherwise PV detection probes for them periodically.
    #[serde(default)]
    pub has_pv: bool,
}

impl SupplyConfig {
    pub fn origin(&self) -> Result<Date, time::error::Parse> {
        Date::parse(&self.origin_date, ORIGIN_DATE_FORMAT)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub recorder: RecorderConfig,
    pub checkpoint: CheckpointConfig,
    pub supplies: Vec<SupplyConfig>,
    pub metrics: Option<MetricsConfig>,
}

fn default_batch_size() -> usize {
    500
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_interval_hours() -> u64 {
    8
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("METERING_CONFIG").unwrap_or_else(|_| "metering-config.toml".to_string());
        let contents = fs::read_to_string(&path)?;
        let cfg: AppConfig = toml::from_str(&contents)?;
        Ok(cfg)
    }
}
