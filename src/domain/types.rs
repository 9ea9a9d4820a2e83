//! Shared types for the telemetry engine

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Newtype wrapper for sensor IDs to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorId(pub String);

impl SensorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SensorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SensorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Vehicle/sensor pairing as returned by the directory
///
/// Replaced wholesale on every resolution; fields are never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedEntity {
    #[serde(default, alias = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub vehicle_number: String,
    #[serde(default)]
    pub assigned_driver: String,
    pub sensor_id: SensorId,
    /// Litres; the directory stores whatever the registration form sent
    #[serde(default, deserialize_with = "deserialize_capacity")]
    pub fuel_tank_capacity: Option<f64>,
}

/// Point-in-time sensor reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub sensor_id: SensorId,
    pub latitude: f64,
    pub longitude: f64,
    /// Percent, 0-100
    pub fuel_level: f64,
    #[serde(default)]
    pub tilt_detected: bool,
    #[serde(default)]
    pub valve_open: bool,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// Alert pushed by the stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub sensor_id: SensorId,
    /// Free-form category label ("Low Fuel", "Geofence Deviation", ...)
    #[serde(rename = "alert")]
    pub category: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    pub fn classify(&self) -> AlertCategory {
        AlertCategory::classify(&self.category)
    }
}

/// Presentation bucket for an alert label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertCategory {
    Fuel,
    Geofence,
    Other,
}

impl AlertCategory {
    /// Case-insensitive substring match; fuel wins over geofence
    pub fn classify(label: &str) -> Self {
        let label = label.to_lowercase();
        if label.contains("fuel") {
            AlertCategory::Fuel
        } else if label.contains("deviation") || label.contains("geofence") {
            AlertCategory::Geofence
        } else {
            AlertCategory::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCategory::Fuel => "fuel",
            AlertCategory::Geofence => "geofence",
            AlertCategory::Other => "other",
        }
    }
}

/// Trend chart sample derived from a reading of the tracked sensor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub fuel_level: f64,
    pub time: String,
}

impl HistoryPoint {
    pub fn from_reading(reading: &SensorReading) -> Self {
        Self { fuel_level: reading.fuel_level, time: format_time(reading.timestamp) }
    }
}

/// Wall-clock time of day in the local zone, as shown on the trend axis
pub fn format_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%H:%M:%S").to_string()
}

fn parse_timestamp_str(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    // Offset-less ISO 8601 is taken as UTC
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Timestamp as either an ISO 8601 string or epoch milliseconds
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct TimestampVisitor;

    impl<'de> Visitor<'de> for TimestampVisitor {
        type Value = DateTime<Utc>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("an ISO 8601 string or epoch milliseconds")
        }

        fn visit_str<E>(self, value: &str) -> Result<DateTime<Utc>, E>
        where
            E: de::Error,
        {
            parse_timestamp_str(value)
                .ok_or_else(|| E::custom(format!("invalid timestamp {value:?}")))
        }

        fn visit_u64<E>(self, value: u64) -> Result<DateTime<Utc>, E>
        where
            E: de::Error,
        {
            let ms = i64::try_from(value).map_err(|_| E::custom("timestamp out of range"))?;
            self.visit_i64(ms)
        }

        fn visit_i64<E>(self, value: i64) -> Result<DateTime<Utc>, E>
        where
            E: de::Error,
        {
            DateTime::from_timestamp_millis(value).ok_or_else(|| E::custom("timestamp out of range"))
        }

        fn visit_f64<E>(self, value: f64) -> Result<DateTime<Utc>, E>
        where
            E: de::Error,
        {
            self.visit_i64(value as i64)
        }
    }

    deserializer.deserialize_any(TimestampVisitor)
}

/// Tank capacity as a number, a numeric string, or absent
fn deserialize_capacity<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_category_classify() {
        assert_eq!(AlertCategory::classify("Low Fuel"), AlertCategory::Fuel);
        assert_eq!(AlertCategory::classify("FUEL THEFT"), AlertCategory::Fuel);
        assert_eq!(AlertCategory::classify("Route Deviation"), AlertCategory::Geofence);
        assert_eq!(AlertCategory::classify("geofence breach"), AlertCategory::Geofence);
        assert_eq!(AlertCategory::classify("Tilt Detected"), AlertCategory::Other);
    }

    #[test]
    fn test_decode_alert_iso_timestamp() {
        let json = r#"{"sensor_id": "S1", "alert": "Low Fuel", "timestamp": "2026-01-05T16:41:30.048+00:00"}"#;
        let alert: AlertEvent = serde_json::from_str(json).unwrap();
        assert_eq!(alert.sensor_id, SensorId::from("S1"));
        assert_eq!(alert.category, "Low Fuel");
        assert_eq!(alert.timestamp.timestamp_millis(), 1767631290048);
    }

    #[test]
    fn test_decode_reading_naive_and_epoch_timestamps() {
        let naive = r#"{
            "sensor_id": "S1", "latitude": 23.69, "longitude": 85.27,
            "fuel_level": 42, "tilt_detected": true, "valve_open": false,
            "timestamp": "2026-01-05T16:41:30.123456"
        }"#;
        let reading: SensorReading = serde_json::from_str(naive).unwrap();
        assert_eq!(reading.fuel_level, 42.0);
        assert!(reading.tilt_detected);
        assert_eq!(reading.timestamp.timestamp(), 1767631290);

        let epoch = r#"{
            "sensor_id": "S1", "latitude": 0, "longitude": 0,
            "fuel_level": 10.5, "timestamp": 1767631290000
        }"#;
        let reading: SensorReading = serde_json::from_str(epoch).unwrap();
        assert_eq!(reading.timestamp.timestamp(), 1767631290);
        assert!(!reading.valve_open);
    }

    #[test]
    fn test_decode_reading_rejects_bad_timestamp() {
        let json = r#"{"sensor_id": "S1", "latitude": 0, "longitude": 0, "fuel_level": 1, "timestamp": "yesterday"}"#;
        assert!(serde_json::from_str::<SensorReading>(json).is_err());
    }

    #[test]
    fn test_decode_entity_capacity_variants() {
        let json = r#"[
            {"_id": "a1", "vehicle_number": "JH01", "assigned_driver": "Ravi", "sensor_id": "S1", "fuel_tank_capacity": "120"},
            {"vehicle_number": "JH02", "sensor_id": "S2", "fuel_tank_capacity": 80.5},
            {"vehicle_number": "JH03", "sensor_id": "S3"}
        ]"#;
        let entities: Vec<TrackedEntity> = serde_json::from_str(json).unwrap();
        assert_eq!(entities[0].id.as_deref(), Some("a1"));
        assert_eq!(entities[0].fuel_tank_capacity, Some(120.0));
        assert_eq!(entities[1].fuel_tank_capacity, Some(80.5));
        assert_eq!(entities[1].assigned_driver, "");
        assert_eq!(entities[2].fuel_tank_capacity, None);
    }

    #[test]
    fn test_history_point_from_reading() {
        let ts = DateTime::from_timestamp_millis(1767631290048).unwrap();
        let reading = SensorReading {
            sensor_id: SensorId::from("S1"),
            latitude: 0.0,
            longitude: 0.0,
            fuel_level: 42.0,
            tilt_detected: false,
            valve_open: false,
            timestamp: ts,
        };
        let point = HistoryPoint::from_reading(&reading);
        assert_eq!(point.fuel_level, 42.0);
        assert_eq!(point.time, format_time(ts));
        assert_eq!(point.time.len(), 8);
    }
}
