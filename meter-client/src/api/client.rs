use serde::{Deserialize, Serialize};
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime};

use crate::domain::{CurveRecord, MeteringChannel};

/// Hourly curve analysis, one record per metered hour.
const ANALYSIS_HOURLY: u8 = 2;
/// Monthly analysis, used for cheap dry-run calls (credential checks, PV
/// detection) that only need to know whether any data exists.
const ANALYSIS_MONTHLY: u8 = 4;

#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    #[error("access token expired or rejected by the provider")]
    TokenExpired,
    #[error("provider API returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("provider API returned an error payload: {0}")]
    Api(String),
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// HTTP client for the provider's curve-retrieval endpoint.
///
/// Holds the access token and tax number; callers only pass the supply number
/// and the requested window. Session/timeout policy lives in the underlying
/// `reqwest::Client`.
pub struct ProviderClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
    tax_number: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CurvesRequest<'a> {
    analysis_type: u8,
    class_type: &'a str,
    confirmed_data_flag: bool,
    from_date: String,
    hour_analysis_flag: bool,
    supply_number: &'a str,
    tax_number: &'a str,
    to_date: String,
}

#[derive(Deserialize)]
struct CurvesResponse {
    #[serde(default)]
    curves: Vec<CurveRecord>,
    #[serde(default)]
    error: Option<String>,
}

/// Provider request window for a `[from, to]` date pair.
///
/// The provider expects both bounds at 20:00:00.000Z wall time and treats
/// `fromDate` as exclusive, so it is shifted one day earlier. The effective
/// span of a request is therefore one day longer than `to - from`.
fn request_window(from: Date, to: Date) -> (String, String) {
    let from_date = from - Duration::days(1);
    (
        format!("{from_date}T20:00:00.000Z"),
        format!("{to}T20:00:00.000Z"),
    )
}

impl ProviderClient {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>, tax_number: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
            token: token.into(),
            tax_number: tax_number.into(),
        }
    }

    /// Fetch hourly curve records for one channel of one supply point.
    ///
    /// Returns an empty list when the provider has no data for the window;
    /// that is data absence, not an error.
    pub async fn fetch_curves(
        &self,
        supply: &str,
        channel: MeteringChannel,
        from: PrimitiveDateTime,
        to: PrimitiveDateTime,
    ) -> Result<Vec<CurveRecord>, ProviderError> {
        let curves = self
            .call(supply, channel, from.date(), to.date(), ANALYSIS_HOURLY)
            .await?;
        if curves.is_empty() {
            tracing::debug!(supply, %channel, "no new curve data available");
        } else {
            tracing::debug!(supply, %channel, records = curves.len(), "provider returned curve data");
        }
        Ok(curves)
    }

    /// Dry-run call with monthly analysis over the last 30 days.
    ///
    /// Used to validate credentials and to probe whether a channel carries any
    /// data at all (PV detection). Fails with the same taxonomy as a real
    /// fetch.
    pub async fn validate_credentials(
        &self,
        supply: &str,
        channel: MeteringChannel,
    ) -> Result<Vec<CurveRecord>, ProviderError> {
        let today = OffsetDateTime::now_utc().date();
        self.call(
            supply,
            channel,
            today - Duration::days(30),
            today - Duration::days(1),
            ANALYSIS_MONTHLY,
        )
        .await
    }

    async fn call(
        &self,
        supply: &str,
        channel: MeteringChannel,
        from: Date,
        to: Date,
        analysis_type: u8,
    ) -> Result<Vec<CurveRecord>, ProviderError> {
        let (from_date, to_date) = request_window(from, to);
        let payload = CurvesRequest {
            analysis_type,
            class_type: channel.key(),
            confirmed_data_flag: false,
            from_date,
            hour_analysis_flag: false,
            supply_number: supply,
            tax_number: &self.tax_number,
            to_date,
        };

        let response = self
            .http
            .post(&self.api_url)
            .header("accept", "application/json;charset=utf-8")
            .header("token", &self.token)
            .header("scope", "API")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 401 {
            tracing::error!(supply, "provider rejected the access token; renew it on the provider portal");
            return Err(ProviderError::TokenExpired);
        }

        let body = response.text().await?;
        if !status.is_success() {
            tracing::error!(supply, status = status.as_u16(), %body, "provider API call failed");
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: CurvesResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::Api(e.to_string()))?;
        if let Some(error) = parsed.error {
            return Err(ProviderError::Api(error));
        }
        Ok(parsed.curves)
    }
}
