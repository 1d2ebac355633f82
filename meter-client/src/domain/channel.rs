use std::fmt;

use serde::{Deserialize, Serialize};

/// Physical energy flow a curve record belongs to.
///
/// Every supply point meters consumption; production and injection only carry
/// data when the supply point has a PV installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeteringChannel {
    Consumption,
    Production,
    Injection,
}

impl MeteringChannel {
    pub const ALL: [MeteringChannel; 3] = [
        MeteringChannel::Consumption,
        MeteringChannel::Production,
        MeteringChannel::Injection,
    ];

    /// Key fragment used in provider requests (`classType`), checkpoint store
    /// keys and statistic series ids.
    pub fn key(self) -> &'static str {
        match self {
            MeteringChannel::Consumption => "consumption",
            MeteringChannel::Production => "production",
            MeteringChannel::Injection => "injection",
        }
    }

    /// Human-readable series name fragment.
    pub fn display_name(self) -> &'static str {
        match self {
            MeteringChannel::Consumption => "Consumption",
            MeteringChannel::Production => "Production",
            MeteringChannel::Injection => "Injection",
        }
    }
}

impl fmt::Display for MeteringChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}
