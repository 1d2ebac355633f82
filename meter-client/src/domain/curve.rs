use serde::{Deserialize, Serialize};

use super::MeteringChannel;

/// One hour of metered flow as the provider reports it.
///
/// `meter_date` is a provider-local `dd/mm/yyyy HH:MM` string following the
/// "hour ending" convention (the record stamped 01:00 covers 00:00-01:00).
/// Channel values arrive as numeric strings; a missing or empty string means
/// the provider has no figure for that hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveRecord {
    #[serde(rename = "meterDate")]
    pub meter_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub production: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub injection: Option<String>,
}

impl CurveRecord {
    /// Raw value string for the requested channel, if the provider sent one.
    pub fn value(&self, channel: MeteringChannel) -> Option<&str> {
        match channel {
            MeteringChannel::Consumption => self.consumption.as_deref(),
            MeteringChannel::Production => self.production.as_deref(),
            MeteringChannel::Injection => self.injection.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn deserializes_provider_payload_shape() {
        let raw = r#"{"meterDate": "21/04/2025 01:00", "consumption": "0.412"}"#;
        let rec: CurveRecord = serde_json::from_str(raw).unwrap();

        assert_eq!(rec.meter_date, "21/04/2025 01:00");
        assert_eq!(rec.value(MeteringChannel::Consumption), Some("0.412"));
        assert_eq!(rec.value(MeteringChannel::Production), None);
    }

    #[test]
    fn empty_string_is_kept_as_is() {
        let raw = r#"{"meterDate": "21/04/2025 01:00", "production": ""}"#;
        let rec: CurveRecord = serde_json::from_str(raw).unwrap();

        // Presence and emptiness are distinguished by the validator, not here.
        assert_eq!(rec.value(MeteringChannel::Production), Some(""));
    }
}
