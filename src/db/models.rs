use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Mirrors the `CHECK` constraint on `sensors.type`.
///
/// Every kind carries a fixed unit label. Values arriving over the serial
/// link are keyed by the snake_case name, so this is also the set of keys the
/// ingestion path accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Temperature,
    Humidity,
    Light,
    SoilMoisture,
    Distance,
    Pressure,
    Co2,
    MagneticField,
}

impl SensorType {
    pub const ALL: [SensorType; 8] = [
        SensorType::Temperature,
        SensorType::Humidity,
        SensorType::Light,
        SensorType::SoilMoisture,
        SensorType::Distance,
        SensorType::Pressure,
        SensorType::Co2,
        SensorType::MagneticField,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SensorType::Temperature => "temperature",
            SensorType::Humidity => "humidity",
            SensorType::Light => "light",
            SensorType::SoilMoisture => "soil_moisture",
            SensorType::Distance => "distance",
            SensorType::Pressure => "pressure",
            SensorType::Co2 => "co2",
            SensorType::MagneticField => "magnetic_field",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            SensorType::Temperature => "°C",
            SensorType::Humidity => "%",
            SensorType::Light => "lux",
            SensorType::SoilMoisture => "%",
            SensorType::Distance => "cm",
            SensorType::Pressure => "hPa",
            SensorType::Co2 => "ppm",
            SensorType::MagneticField => "µT",
        }
    }

    /// Default name given to a sensor created alongside a project,
    /// e.g. `soil_moisture` → `"Soil Moisture Sensor"`.
    pub fn display_name(self) -> String {
        let words: Vec<String> = self
            .as_str()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            })
            .collect();
        format!("{} Sensor", words.join(" "))
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sensor type: {0:?}")]
pub struct UnknownSensorType(pub String);

impl FromStr for SensorType {
    type Err = UnknownSensorType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SensorType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownSensorType(s.to_owned()))
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct ProjectSummary {
    pub id: i64,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Sensor {
    pub id: i64,
    pub name: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub sensor_type: SensorType,
    pub project_id: i64,
    pub enabled: bool,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// One point of a sensor's time series.
#[derive(Debug, Clone, Copy, FromRow, PartialEq)]
pub struct ReadingPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_str_accepts_every_known_kind() {
        for kind in SensorType::ALL {
            assert_eq!(kind.as_str().parse::<SensorType>().unwrap(), kind);
        }
    }

    #[test]
    fn from_str_rejects_unknown_kind() {
        let err = "voltage".parse::<SensorType>().unwrap_err();
        assert_eq!(err, UnknownSensorType("voltage".into()));
    }

    #[test]
    fn units_match_wire_table() {
        assert_eq!(SensorType::Temperature.unit(), "°C");
        assert_eq!(SensorType::SoilMoisture.unit(), "%");
        assert_eq!(SensorType::Co2.unit(), "ppm");
        assert_eq!(SensorType::MagneticField.unit(), "µT");
    }

    #[test]
    fn display_name_title_cases_words() {
        assert_eq!(SensorType::Temperature.display_name(), "Temperature Sensor");
        assert_eq!(SensorType::SoilMoisture.display_name(), "Soil Moisture Sensor");
        assert_eq!(SensorType::Co2.display_name(), "Co2 Sensor");
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&SensorType::MagneticField).unwrap();
        assert_eq!(json, "\"magnetic_field\"");
    }
}
