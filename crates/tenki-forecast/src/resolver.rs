//! Forecast resolution: fine area -> office document -> per-day forecasts.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate};
use reqwest::Client;
use tenki_core::ReqwestErrorExt;
use tracing::instrument;

use crate::catalog::RegionCatalog;
use crate::error::ForecastError;
use crate::types::{AreaSeries, DayForecast, ForecastReport, TimeSeries, NO_DATA};

/// Short-range report holding the dense weather series.
const PRIMARY_REPORT: usize = 0;
/// Weekly report holding the temperature series.
const SECONDARY_REPORT: usize = 1;
/// Position of the temperature series inside the weekly report.
const TEMPERATURE_SERIES: usize = 1;

#[derive(Debug, Clone)]
pub struct ForecastResolver {
    client: Arc<Client>,
    base_url: String,
}

impl ForecastResolver {
    /// Build a resolver whose requests fail after `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ForecastError> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            ForecastError::Resolution {
                office_id: String::new(),
                source: e.into_network_error(),
            }
        })?;

        Ok(Self::with_client(Arc::new(client), base_url))
    }

    pub fn with_client(client: Arc<Client>, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// URL of the forecast document published by `office_id`.
    pub fn document_url(&self, office_id: &str) -> String {
        format!("{}{}.json", self.base_url, office_id)
    }

    /// Resolve the owning office, fetch its document once and extract the
    /// forecasts for `fine_area_id`.
    #[instrument(skip(self, catalog), level = "info")]
    pub async fn fetch(
        &self,
        catalog: &RegionCatalog,
        fine_area_id: &str,
        region_name: &str,
    ) -> Result<Vec<DayForecast>, ForecastError> {
        let office_id = catalog.find_parent_office(fine_area_id);
        let reports = self.fetch_document(office_id).await?;
        extract_forecasts(&reports, office_id, fine_area_id, region_name)
    }

    async fn fetch_document(&self, office_id: &str) -> Result<Vec<ForecastReport>, ForecastError> {
        let url = self.document_url(office_id);
        let resolution_error = |e: reqwest::Error| ForecastError::Resolution {
            office_id: office_id.to_string(),
            source: e.into_network_error(),
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(resolution_error)?;

        let body = response.bytes().await.map_err(resolution_error)?;

        serde_json::from_slice(&body)
            .map_err(|e| ForecastError::parse(office_id, format!("invalid document: {}", e)))
    }
}

/// Turn an office document into one `DayForecast` per primary time point.
///
/// Missing exact area matches fall back to the series' first area, and a
/// missing temperature series yields `None` temperatures; neither is an error.
pub fn extract_forecasts(
    reports: &[ForecastReport],
    office_id: &str,
    fine_area_id: &str,
    region_name: &str,
) -> Result<Vec<DayForecast>, ForecastError> {
    let primary = reports
        .get(PRIMARY_REPORT)
        .and_then(|r| r.time_series.first())
        .ok_or_else(|| ForecastError::parse(office_id, "document has no primary time series"))?;

    if primary.time_defines.is_empty() {
        return Err(ForecastError::parse(office_id, "primary series has no time points"));
    }

    let dates = primary
        .time_defines
        .iter()
        .map(|t| calendar_date_of(t).ok_or_else(|| {
            ForecastError::parse(office_id, format!("invalid time point '{}'", t))
        }))
        .collect::<Result<Vec<_>, _>>()?;

    if dates.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ForecastError::parse(
            office_id,
            "primary time points are not on strictly increasing dates",
        ));
    }

    let weather_area = select_area(primary, fine_area_id)
        .ok_or_else(|| ForecastError::parse(office_id, "primary series lists no areas"))?;
    let weathers = weather_area.weathers.as_deref().unwrap_or_default();

    let temperature_area = temperature_series(reports).and_then(|s| select_area(s, fine_area_id));
    if temperature_area.is_none() {
        tracing::debug!("No temperature series for office {}", office_id);
    }
    let temps_max = temperature_area.and_then(|a| a.temps_max.as_deref());
    let temps_min = temperature_area.and_then(|a| a.temps_min.as_deref());

    Ok(dates
        .into_iter()
        .enumerate()
        .map(|(i, date)| DayForecast {
            region_id: fine_area_id.to_string(),
            region_name: region_name.to_string(),
            date,
            weather: weathers
                .get(i)
                .cloned()
                .unwrap_or_else(|| NO_DATA.to_string()),
            temp_max: temperature_at(temps_max, i),
            temp_min: temperature_at(temps_min, i),
        })
        .collect())
}

/// Calendar date of an ISO-8601 timestamp, in the timestamp's own offset.
pub fn calendar_date_of(time_point: &str) -> Option<NaiveDate> {
    DateTime::parse_from_rfc3339(time_point)
        .map(|dt| dt.date_naive())
        .ok()
        .or_else(|| {
            // Offset-less timestamps still name a calendar day
            chrono::NaiveDateTime::parse_from_str(time_point, "%Y-%m-%dT%H:%M:%S")
                .map(|dt| dt.date())
                .ok()
        })
}

/// Area matching `fine_area_id`, else the series' first area.
fn select_area<'a>(series: &'a TimeSeries, fine_area_id: &str) -> Option<&'a AreaSeries> {
    series
        .areas
        .iter()
        .find(|a| a.area.code == fine_area_id)
        .or_else(|| {
            let first = series.areas.first();
            if let Some(area) = first {
                tracing::debug!(
                    "Area {} not in series, using {} instead",
                    fine_area_id,
                    area.area.code
                );
            }
            first
        })
}

/// Temperature series of the weekly report.
///
/// Prefers its usual position and otherwise takes the first series that
/// carries temperature arrays at all.
fn temperature_series(reports: &[ForecastReport]) -> Option<&TimeSeries> {
    let weekly = reports.get(SECONDARY_REPORT)?;
    weekly
        .time_series
        .get(TEMPERATURE_SERIES)
        .filter(|s| s.areas.iter().any(AreaSeries::carries_temperatures))
        .or_else(|| {
            weekly
                .time_series
                .iter()
                .find(|s| s.areas.iter().any(AreaSeries::carries_temperatures))
        })
}

/// Value at `index`, with absent, out-of-range and empty values all `None`.
fn temperature_at(values: Option<&[String]>, index: usize) -> Option<String> {
    values
        .and_then(|v| v.get(index))
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
