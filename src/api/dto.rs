use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::{ReadingPoint, Sensor, SensorType};

/// Request body for `POST /api/projects`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProjectRequest {
    /// Required; must be unique.
    pub name: Option<String>,
    pub description: Option<String>,
    /// Sensor types to create with the project, one sensor each.
    /// Names that are not a known type are ignored.
    #[serde(default)]
    pub sensors: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateProjectResponse {
    pub success: bool,
    pub id: i64,
}

/// Entry of `GET /api/sensors/available`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AvailableSensorDto {
    /// Placeholder of the form `new_<type>`; not a database id.
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub sensor_type: SensorType,
    pub unit: String,
}

impl From<SensorType> for AvailableSensorDto {
    fn from(kind: SensorType) -> Self {
        Self {
            id: format!("new_{kind}"),
            name: kind.display_name(),
            sensor_type: kind,
            unit: kind.unit().to_owned(),
        }
    }
}

/// Request body for `POST /api/sensors/{id}/toggle`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ToggleSensorRequest {
    pub enabled: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ToggleSensorResponse {
    pub success: bool,
    pub id: i64,
    pub enabled: bool,
}

/// Response for `GET /api/sensors/{id}/data`.
///
/// `data` holds `[timestamp, value]` pairs, oldest first.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SensorDataDto {
    #[serde(rename = "type")]
    pub sensor_type: SensorType,
    pub unit: String,
    #[schema(value_type = Vec<Vec<Value>>)]
    pub data: Vec<(DateTime<Utc>, f64)>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
}

impl SensorDataDto {
    pub fn new(sensor: &Sensor, points: Vec<ReadingPoint>) -> Self {
        Self {
            sensor_type: sensor.sensor_type,
            unit: sensor.sensor_type.unit().to_owned(),
            data: points.into_iter().map(|p| (p.timestamp, p.value)).collect(),
            min_value: sensor.min_value,
            max_value: sensor.max_value,
        }
    }
}
