//! SQLite-backed forecast history keyed by (region, date).

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tenki_core::{DatabaseError, RusqliteErrorExt};

use crate::error::ForecastError;
use crate::types::StoredForecastRow;

const DATE_FORMAT: &str = "%Y-%m-%d";

const SELECT_COLUMNS: &str =
    "SELECT area_code, area_name, date, weather, temp_max, temp_min, updated_at FROM weather_forecasts";

/// Durable forecast history.
///
/// Writes go through a single connection behind a mutex; the table's unique
/// constraint makes each upsert atomic per key.
pub struct ForecastStore {
    conn: Mutex<Connection>,
}

impl ForecastStore {
    /// Open (or create) the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ForecastError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::ConnectionFailed(format!(
                        "cannot create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        let conn = Connection::open(path).map_err(|e| {
            ForecastError::Store(DatabaseError::ConnectionFailed(e.to_string()))
        })?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Create an in-memory store.
    pub fn in_memory() -> Result<Self, ForecastError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            ForecastError::Store(DatabaseError::ConnectionFailed(e.to_string()))
        })?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Create the table and its uniqueness constraint if missing. Idempotent.
    pub fn ensure_schema(&self) -> Result<(), ForecastError> {
        self.conn
            .lock()
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS weather_forecasts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    area_code TEXT NOT NULL,
                    area_name TEXT NOT NULL,
                    date TEXT NOT NULL,
                    weather TEXT NOT NULL,
                    temp_max TEXT,
                    temp_min TEXT,
                    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                    UNIQUE(area_code, date)
                );
                "#,
            )
            .map_err(store_error)
    }

    /// Drop every stored row and recreate the schema.
    pub fn reset_schema(&self) -> Result<(), ForecastError> {
        tracing::info!("Resetting forecast history");
        self.conn
            .lock()
            .execute_batch("DROP TABLE IF EXISTS weather_forecasts;")
            .map_err(store_error)?;
        self.ensure_schema()
    }

    /// Insert the row, or replace the content of the row sharing its (region, date).
    pub fn upsert(&self, row: &StoredForecastRow) -> Result<(), ForecastError> {
        self.conn
            .lock()
            .execute(
                r#"
                INSERT INTO weather_forecasts
                (area_code, area_name, date, weather, temp_max, temp_min, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(area_code, date) DO UPDATE SET
                    area_name = excluded.area_name,
                    weather = excluded.weather,
                    temp_max = excluded.temp_max,
                    temp_min = excluded.temp_min,
                    updated_at = excluded.updated_at
                "#,
                params![
                    row.region_id,
                    row.region_name,
                    row.date.format(DATE_FORMAT).to_string(),
                    row.weather,
                    row.temp_max,
                    row.temp_min,
                    row.updated_at.to_rfc3339(),
                ],
            )
            .map_err(store_error)?;
        Ok(())
    }

    /// Point lookup; `None` when nothing is stored for the key.
    pub fn get(
        &self,
        region_id: &str,
        date: NaiveDate,
    ) -> Result<Option<StoredForecastRow>, ForecastError> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("{} WHERE area_code = ?1 AND date = ?2", SELECT_COLUMNS),
            params![region_id, date.format(DATE_FORMAT).to_string()],
            Self::row_to_stored,
        )
        .optional()
        .map_err(store_error)
    }

    /// Every stored day for a region, oldest first.
    pub fn list_region(&self, region_id: &str) -> Result<Vec<StoredForecastRow>, ForecastError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "{} WHERE area_code = ?1 ORDER BY date ASC",
                SELECT_COLUMNS
            ))
            .map_err(store_error)?;

        let rows = stmt
            .query_map(params![region_id], Self::row_to_stored)
            .map_err(store_error)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(store_error)
    }

    /// Number of rows stored for the key (0 or 1).
    pub fn count(&self, region_id: &str, date: NaiveDate) -> Result<u32, ForecastError> {
        self.conn
            .lock()
            .query_row(
                "SELECT COUNT(*) FROM weather_forecasts WHERE area_code = ?1 AND date = ?2",
                params![region_id, date.format(DATE_FORMAT).to_string()],
                |row| row.get(0),
            )
            .map_err(store_error)
    }

    #[cfg(test)]
    pub(crate) fn execute_batch_for_test(&self, sql: &str) -> rusqlite::Result<()> {
        self.conn.lock().execute_batch(sql)
    }

    fn row_to_stored(row: &rusqlite::Row) -> rusqlite::Result<StoredForecastRow> {
        let date_str: String = row.get(2)?;
        let updated_at_str: String = row.get(6)?;

        let date = NaiveDate::parse_from_str(&date_str, DATE_FORMAT).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let updated_at = parse_timestamp(&updated_at_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                6,
                rusqlite::types::Type::Text,
                format!("invalid timestamp '{}'", updated_at_str).into(),
            )
        })?;

        Ok(StoredForecastRow {
            region_id: row.get(0)?,
            region_name: row.get(1)?,
            date,
            weather: row.get(3)?,
            temp_max: row.get(4)?,
            temp_min: row.get(5)?,
            updated_at,
        })
    }
}

/// Accepts RFC 3339 and SQLite's `CURRENT_TIMESTAMP` format (UTC).
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .map(|dt| dt.and_utc())
                .ok()
        })
}

fn store_error(e: rusqlite::Error) -> ForecastError {
    ForecastError::Store(e.into_database_error())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn row(region_id: &str, day: NaiveDate, weather: &str) -> StoredForecastRow {
        StoredForecastRow {
            region_id: region_id.to_string(),
            region_name: "Region1".to_string(),
            date: day,
            weather: weather.to_string(),
            temp_max: Some("12".to_string()),
            temp_min: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let store = ForecastStore::in_memory().unwrap();
        store.upsert(&row("A1", date(2024, 1, 1), "晴れ")).unwrap();

        let stored = store.get("A1", date(2024, 1, 1)).unwrap().unwrap();
        assert_eq!(stored.weather, "晴れ");
        assert_eq!(stored.temp_max.as_deref(), Some("12"));
        assert_eq!(stored.temp_min, None);
    }

    #[test]
    fn test_upsert_replaces_existing_key() {
        let store = ForecastStore::in_memory().unwrap();
        let first = row("A1", date(2024, 1, 1), "晴れ");
        let mut second = row("A1", date(2024, 1, 1), "雨");
        second.updated_at = first.updated_at + chrono::Duration::minutes(5);

        store.upsert(&first).unwrap();
        store.upsert(&second).unwrap();

        let stored = store.get("A1", date(2024, 1, 1)).unwrap().unwrap();
        assert_eq!(stored.weather, "雨");
        assert_eq!(stored.updated_at.timestamp(), second.updated_at.timestamp());
        assert_eq!(store.count("A1", date(2024, 1, 1)).unwrap(), 1);
    }

    #[test]
    fn test_missing_key_is_none() {
        let store = ForecastStore::in_memory().unwrap();
        store.upsert(&row("A1", date(2024, 1, 1), "晴れ")).unwrap();

        assert!(store.get("A1", date(2024, 1, 2)).unwrap().is_none());
        assert!(store.get("A2", date(2024, 1, 1)).unwrap().is_none());
        assert_eq!(store.count("A2", date(2024, 1, 1)).unwrap(), 0);
    }

    #[test]
    fn test_ensure_schema_is_idempotent() {
        let store = ForecastStore::in_memory().unwrap();
        store.upsert(&row("A1", date(2024, 1, 1), "晴れ")).unwrap();

        store.ensure_schema().unwrap();
        store.ensure_schema().unwrap();

        assert!(store.get("A1", date(2024, 1, 1)).unwrap().is_some());
    }

    #[test]
    fn test_reset_schema_clears_rows() {
        let store = ForecastStore::in_memory().unwrap();
        store.upsert(&row("A1", date(2024, 1, 1), "晴れ")).unwrap();

        store.reset_schema().unwrap();

        assert!(store.get("A1", date(2024, 1, 1)).unwrap().is_none());
        store.upsert(&row("A1", date(2024, 1, 1), "雨")).unwrap();
        assert_eq!(store.count("A1", date(2024, 1, 1)).unwrap(), 1);
    }

    #[test]
    fn test_list_region_ordered_by_date() {
        let store = ForecastStore::in_memory().unwrap();
        store.upsert(&row("A1", date(2024, 1, 3), "雪")).unwrap();
        store.upsert(&row("A1", date(2024, 1, 1), "晴れ")).unwrap();
        store.upsert(&row("A2", date(2024, 1, 2), "雨")).unwrap();

        let rows = store.list_region("A1").unwrap();
        let dates: Vec<_> = rows.iter().map(|r| r.date).collect();
        assert_eq!(dates, [date(2024, 1, 1), date(2024, 1, 3)]);
    }

    #[test]
    fn test_rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history").join("weather_history.db");

        {
            let store = ForecastStore::open(&path).unwrap();
            store.upsert(&row("A1", date(2024, 1, 1), "晴れ")).unwrap();
        }

        let store = ForecastStore::open(&path).unwrap();
        let stored = store.get("A1", date(2024, 1, 1)).unwrap().unwrap();
        assert_eq!(stored.weather, "晴れ");
    }

    #[test]
    fn test_concurrent_upserts_keep_one_row() {
        let store = std::sync::Arc::new(ForecastStore::in_memory().unwrap());

        let handles: Vec<_> = ["晴れ", "雨", "くもり", "雪"]
            .into_iter()
            .map(|weather| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.upsert(&row("A1", date(2024, 1, 1), weather)).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.count("A1", date(2024, 1, 1)).unwrap(), 1);
    }

    #[test]
    fn test_parse_timestamp_accepts_sqlite_default() {
        let parsed = parse_timestamp("2024-01-01 03:04:05").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-01-01T03:04:05+00:00");
        assert!(parse_timestamp("yesterday").is_none());
    }
}
