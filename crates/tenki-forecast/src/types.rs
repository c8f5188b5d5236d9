//! Region, forecast and storage types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Shown in place of a weather description the upstream series does not cover.
pub const NO_DATA: &str = "情報なし";

/// Depth of a node in the region hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionLevel {
    /// Regional center (`centers`)
    Zone,
    /// Forecast office (`offices`); forecast documents are published per office
    Office,
    /// Fine forecast area (`class10s`)
    FineArea,
}

/// One node of the zone -> office -> fine-area tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionNode {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub level: RegionLevel,
}

/// Fine area as listed under its office.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AreaEntry {
    pub id: String,
    pub name: String,
}

/// Office with its fine areas, in catalog order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OfficeGroup {
    pub id: String,
    pub name: String,
    pub areas: Vec<AreaEntry>,
}

/// Zone with its offices, in catalog order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneGroup {
    pub id: String,
    pub name: String,
    pub offices: Vec<OfficeGroup>,
}

/// Forecast for one region on one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayForecast {
    pub region_id: String,
    pub region_name: String,
    pub date: NaiveDate,
    pub weather: String,
    pub temp_max: Option<String>,
    pub temp_min: Option<String>,
}

/// A `DayForecast` as persisted in the history table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredForecastRow {
    pub region_id: String,
    pub region_name: String,
    pub date: NaiveDate,
    pub weather: String,
    pub temp_max: Option<String>,
    pub temp_min: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StoredForecastRow {
    pub fn from_forecast(forecast: &DayForecast, updated_at: DateTime<Utc>) -> Self {
        Self {
            region_id: forecast.region_id.clone(),
            region_name: forecast.region_name.clone(),
            date: forecast.date,
            weather: forecast.weather.clone(),
            temp_max: forecast.temp_max.clone(),
            temp_min: forecast.temp_min.clone(),
            updated_at,
        }
    }

    pub fn to_forecast(&self) -> DayForecast {
        DayForecast {
            region_id: self.region_id.clone(),
            region_name: self.region_name.clone(),
            date: self.date,
            weather: self.weather.clone(),
            temp_max: self.temp_max.clone(),
            temp_min: self.temp_min.clone(),
        }
    }
}

// Upstream Forecast Document Types

/// One element of the per-office forecast array.
///
/// Element 0 carries the short-range report, element 1 (when present) the
/// weekly report with temperature ranges.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastReport {
    #[serde(default)]
    pub publishing_office: Option<String>,
    #[serde(default)]
    pub time_series: Vec<TimeSeries>,
}

/// Parallel-array series: one value per entry of `time_defines`, per area.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeries {
    #[serde(default)]
    pub time_defines: Vec<String>,
    #[serde(default)]
    pub areas: Vec<AreaSeries>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaSeries {
    pub area: AreaRef,
    #[serde(default)]
    pub weathers: Option<Vec<String>>,
    #[serde(default)]
    pub temps_min: Option<Vec<String>>,
    #[serde(default)]
    pub temps_max: Option<Vec<String>>,
}

impl AreaSeries {
    pub fn carries_temperatures(&self) -> bool {
        self.temps_min.is_some() || self.temps_max.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AreaRef {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_stored_row_keeps_forecast_fields() {
        let forecast = DayForecast {
            region_id: "130010".into(),
            region_name: "東京地方".into(),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            weather: "晴れ".into(),
            temp_max: Some("12".into()),
            temp_min: None,
        };
        let row = StoredForecastRow::from_forecast(&forecast, Utc::now());
        assert_eq!(row.to_forecast(), forecast);
    }

    #[test]
    fn test_report_tolerates_unknown_and_missing_fields() {
        let json = serde_json::json!({
            "reportDatetime": "2024-01-01T05:00:00+09:00",
            "timeSeries": [{
                "timeDefines": ["2024-01-01T00:00:00+09:00"],
                "areas": [{
                    "area": {"name": "東京地方", "code": "130010"},
                    "weatherCodes": ["100"],
                    "weathers": ["晴れ"]
                }]
            }]
        });
        let report: ForecastReport = serde_json::from_value(json).unwrap();
        let area = &report.time_series[0].areas[0];
        assert_eq!(area.area.code, "130010");
        assert!(!area.carries_temperatures());
        assert!(report.publishing_office.is_none());
    }
}
