//! Live sensor readings per piece of equipment.
//!
//! [`SensorSource`] is the seam to the building's telemetry. The mock
//! source serves a fixed lookup table (two demo units unless the config
//! provides `[sensors.equipment.<ID>]` tables); the history source reads
//! the newest `sensor_history` row and falls back to the table for
//! equipment it has never seen.
//!
//! [`load_history_csv`] fills `sensor_history` from a CSV export with
//! columns `timestamp,equipment_id,temperature,vibration,pressure`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::SensorsConfig;
use crate::db::SqlDatabase;
use crate::migrate::init_sensor_history_schema;
use crate::models::SensorReadings;

#[async_trait]
pub trait SensorSource: Send + Sync {
    /// Latest readings, or `None` for unknown equipment.
    async fn fetch(&self, equipment_id: &str) -> Result<Option<SensorReadings>>;
}

fn readings(pairs: &[(&str, f64)]) -> SensorReadings {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

/// The demo units served when no table is configured.
pub fn default_equipment() -> BTreeMap<String, SensorReadings> {
    let mut table = BTreeMap::new();
    table.insert(
        "HVAC-01".to_string(),
        readings(&[("temperature", 72.0), ("vibration", 0.21), ("pressure", 12.3)]),
    );
    table.insert(
        "CHILLER-02".to_string(),
        readings(&[("temperature", 45.0), ("vibration", 0.15), ("pressure", 22.0)]),
    );
    table
}

pub struct MockSensorSource {
    table: BTreeMap<String, SensorReadings>,
}

impl MockSensorSource {
    pub fn new(table: BTreeMap<String, SensorReadings>) -> Self {
        Self { table }
    }

    pub fn from_config(config: &SensorsConfig) -> Self {
        if config.equipment.is_empty() {
            Self::new(default_equipment())
        } else {
            Self::new(config.equipment.clone())
        }
    }

    fn lookup(&self, equipment_id: &str) -> Option<SensorReadings> {
        self.table
            .get(equipment_id)
            .filter(|r| !r.is_empty())
            .cloned()
    }
}

impl Default for MockSensorSource {
    fn default() -> Self {
        Self::new(default_equipment())
    }
}

#[async_trait]
impl SensorSource for MockSensorSource {
    async fn fetch(&self, equipment_id: &str) -> Result<Option<SensorReadings>> {
        Ok(self.lookup(equipment_id))
    }
}

/// Newest `sensor_history` row per equipment, mock table as fallback.
pub struct HistorySensorSource {
    db: SqlDatabase,
    fallback: MockSensorSource,
}

const LATEST_SQL: &str = "SELECT temperature, vibration, pressure FROM sensor_history \
     WHERE equipment_id = $1 ORDER BY timestamp DESC LIMIT 1";

impl HistorySensorSource {
    pub fn new(db: SqlDatabase, fallback: MockSensorSource) -> Self {
        Self { db, fallback }
    }

    async fn latest(&self, equipment_id: &str) -> Result<Option<SensorReadings>> {
        type Latest = (Option<f64>, Option<f64>, Option<f64>);
        let row: Option<Latest> = match &self.db {
            SqlDatabase::Sqlite(pool) => {
                sqlx::query_as(LATEST_SQL)
                    .bind(equipment_id)
                    .fetch_optional(pool)
                    .await?
            }
            SqlDatabase::Postgres(pool) => {
                sqlx::query_as(LATEST_SQL)
                    .bind(equipment_id)
                    .fetch_optional(pool)
                    .await?
            }
        };

        Ok(row.map(|(temperature, vibration, pressure)| {
            [
                ("temperature", temperature),
                ("vibration", vibration),
                ("pressure", pressure),
            ]
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k.to_string(), v)))
            .collect()
        }))
    }
}

#[async_trait]
impl SensorSource for HistorySensorSource {
    async fn fetch(&self, equipment_id: &str) -> Result<Option<SensorReadings>> {
        match self.latest(equipment_id).await {
            Ok(Some(r)) if !r.is_empty() => Ok(Some(r)),
            Ok(_) => self.fallback.fetch(equipment_id).await,
            Err(e) => {
                tracing::warn!(equipment_id, error = %e, "sensor history unavailable");
                self.fallback.fetch(equipment_id).await
            }
        }
    }
}

/// Normalise an ISO-8601 timestamp to `YYYY-MM-DDTHH:MM:SS` (UTC when an
/// offset is given) so rows sort chronologically as text.
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
    let raw = raw.trim();

    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc().format(FORMAT).to_string());
    }
    let formats = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    for fmt in formats {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.format(FORMAT).to_string());
        }
    }
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.format(FORMAT).to_string())
}

const INSERT_HISTORY_SQL: &str = "INSERT INTO sensor_history \
     (timestamp, equipment_id, temperature, vibration, pressure) \
     VALUES ($1, $2, $3, $4, $5) \
     ON CONFLICT (equipment_id, timestamp) DO NOTHING";

/// Load a sensor history CSV. Returns the number of new rows; rows already
/// present (same equipment and timestamp) are skipped.
pub async fn load_history_csv(db: &SqlDatabase, path: &Path) -> Result<usize> {
    init_sensor_history_schema(db).await?;

    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h.trim() == name);

    let (Some(ts_col), Some(id_col)) = (column("timestamp"), column("equipment_id")) else {
        bail!("{}: CSV must have timestamp and equipment_id columns", path.display());
    };
    let value_cols = [column("temperature"), column("vibration"), column("pressure")];

    let mut inserted = 0usize;
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        let line = i + 2;

        let raw_ts = record.get(ts_col).unwrap_or("");
        let Some(timestamp) = normalize_timestamp(raw_ts) else {
            bail!("{} line {}: invalid timestamp '{}'", path.display(), line, raw_ts);
        };
        let equipment_id = record.get(id_col).unwrap_or("").trim().to_string();
        if equipment_id.is_empty() {
            bail!("{} line {}: empty equipment_id", path.display(), line);
        }

        let mut values = [None; 3];
        for (slot, col) in values.iter_mut().zip(value_cols) {
            let raw = col.and_then(|c| record.get(c)).unwrap_or("").trim();
            if !raw.is_empty() {
                let v: f64 = raw.parse().with_context(|| {
                    format!("{} line {}: invalid number '{}'", path.display(), line, raw)
                })?;
                *slot = Some(v);
            }
        }

        let affected = match db {
            SqlDatabase::Sqlite(pool) => sqlx::query(INSERT_HISTORY_SQL)
                .bind(&timestamp)
                .bind(&equipment_id)
                .bind(values[0])
                .bind(values[1])
                .bind(values[2])
                .execute(pool)
                .await?
                .rows_affected(),
            SqlDatabase::Postgres(pool) => sqlx::query(INSERT_HISTORY_SQL)
                .bind(&timestamp)
                .bind(&equipment_id)
                .bind(values[0])
                .bind(values[1])
                .bind(values[2])
                .execute(pool)
                .await?
                .rows_affected(),
        };
        inserted += affected as usize;
    }

    Ok(inserted)
}
