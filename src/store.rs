use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    db::{
        encode_timestamp,
        models::{ProjectSummary, ReadingPoint, Sensor, SensorType},
    },
    frame::Payload,
};

/// Upper bound on points returned by [`ReadingStore::recent_readings`].
pub const READINGS_QUERY_LIMIT: i64 = 500;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("project name must not be empty")]
    InvalidName,
    #[error("a project named {0:?} already exists")]
    ProjectExists(String),
    #[error("window of {0} minutes is out of range")]
    InvalidWindow(i64),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// What one frame turned into.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSummary {
    pub inserted: usize,
    /// Keys that are not a known sensor type.
    pub unknown_types: Vec<String>,
    /// Known types whose value could not be read as a number.
    pub rejected_values: Vec<String>,
    pub failed_inserts: usize,
}

#[derive(Debug, Clone)]
pub struct ReadingStore {
    pool: SqlitePool,
}

impl ReadingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // -----------------------------------------------------------------------
    // Ingestion
    // -----------------------------------------------------------------------

    /// Fans every `(type, value)` pair of `payload` out to each enabled
    /// sensor of that type, across all projects.
    ///
    /// One transaction per frame. A value that is not numeric, or a single
    /// failed insert, is logged and skipped without affecting the other keys.
    pub async fn record_frame(
        &self,
        payload: &Payload,
        timestamp: DateTime<Utc>,
    ) -> Result<RecordSummary, StoreError> {
        let ts = encode_timestamp(timestamp);
        let mut summary = RecordSummary::default();
        // Write lock up front: a deferred transaction that reads and then
        // writes fails outright if an API write commits in between.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        for (key, raw) in payload {
            let Ok(sensor_type) = key.parse::<SensorType>() else {
                debug!(key = %key, "No sensor type for key; skipping");
                summary.unknown_types.push(key.clone());
                continue;
            };

            let sensor_ids: Vec<i64> =
                match sqlx::query_scalar("SELECT id FROM sensors WHERE type = ? AND enabled = 1")
                    .bind(sensor_type)
                    .fetch_all(&mut *tx)
                    .await
                {
                    Ok(ids) => ids,
                    Err(e) => {
                        warn!(sensor_type = %sensor_type, error = %e, "Failed to look up sensors; key skipped");
                        continue;
                    }
                };
            debug!(sensor_type = %sensor_type, count = sensor_ids.len(), "Enabled sensors for type");

            if sensor_ids.is_empty() {
                continue;
            }

            let Some(value) = numeric_value(raw) else {
                for sensor_id in &sensor_ids {
                    warn!(sensor_id, sensor_type = %sensor_type, value = %raw, "Value is not numeric; reading dropped");
                }
                summary.rejected_values.push(key.clone());
                continue;
            };

            for sensor_id in sensor_ids {
                let inserted = sqlx::query("INSERT INTO readings (sensor_id, value, timestamp) VALUES (?, ?, ?)")
                    .bind(sensor_id)
                    .bind(value)
                    .bind(&ts)
                    .execute(&mut *tx)
                    .await;
                match inserted {
                    Ok(_) => summary.inserted += 1,
                    Err(e) => {
                        warn!(sensor_id, error = %e, "Failed to store reading");
                        summary.failed_inserts += 1;
                    }
                }
            }
        }

        tx.commit().await?;
        Ok(summary)
    }

    /// Points for `sensor_id` newer than `now - minutes`, oldest first,
    /// capped at [`READINGS_QUERY_LIMIT`].
    pub async fn recent_readings(
        &self,
        sensor_id: i64,
        minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReadingPoint>, StoreError> {
        let since = TimeDelta::try_minutes(minutes)
            .filter(|window| *window > TimeDelta::zero())
            .and_then(|window| now.checked_sub_signed(window))
            .ok_or(StoreError::InvalidWindow(minutes))?;
        let since = encode_timestamp(since);
        let points = sqlx::query_as::<_, ReadingPoint>(
            r#"
            SELECT timestamp, value
            FROM readings
            WHERE sensor_id = ?
              AND timestamp > ?
            ORDER BY timestamp ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(sensor_id)
        .bind(since)
        .bind(READINGS_QUERY_LIMIT)
        .fetch_all(&self.pool)
        .await?;
        Ok(points)
    }

    // -----------------------------------------------------------------------
    // Projects
    // -----------------------------------------------------------------------

    pub async fn list_projects(&self) -> Result<Vec<ProjectSummary>, StoreError> {
        let projects = sqlx::query_as::<_, ProjectSummary>(
            "SELECT id, name, description FROM projects ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(projects)
    }

    /// Creates the project and one enabled sensor per entry of
    /// `sensor_types`, atomically. Returns the new project id.
    pub async fn create_project(
        &self,
        name: &str,
        description: &str,
        sensor_types: &[SensorType],
    ) -> Result<i64, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::InvalidName);
        }

        let now = encode_timestamp(Utc::now());
        let mut tx = self.pool.begin().await?;

        let project_id = sqlx::query("INSERT INTO projects (name, description, created_at) VALUES (?, ?, ?)")
            .bind(name)
            .bind(description)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    StoreError::ProjectExists(name.to_owned())
                }
                other => StoreError::Database(other),
            })?
            .last_insert_rowid();

        for sensor_type in sensor_types {
            sqlx::query("INSERT INTO sensors (name, type, project_id, created_at) VALUES (?, ?, ?, ?)")
                .bind(sensor_type.display_name())
                .bind(sensor_type)
                .bind(project_id)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        info!(project_id, name = %name, sensors = sensor_types.len(), "Project created");
        Ok(project_id)
    }

    /// Removes the project; its sensors and their readings go with it.
    pub async fn delete_project(&self, project_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(project_id, "Project deleted");
        }
        Ok(deleted)
    }

    // -----------------------------------------------------------------------
    // Sensors
    // -----------------------------------------------------------------------

    pub async fn project_sensors(&self, project_id: i64) -> Result<Vec<Sensor>, StoreError> {
        let sensors = sqlx::query_as::<_, Sensor>(
            r#"
            SELECT id, name, type, project_id, enabled, min_value, max_value, created_at
            FROM sensors
            WHERE project_id = ?
            ORDER BY name, id
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(sensors)
    }

    pub async fn sensor(&self, sensor_id: i64) -> Result<Option<Sensor>, StoreError> {
        let sensor = sqlx::query_as::<_, Sensor>(
            r#"
            SELECT id, name, type, project_id, enabled, min_value, max_value, created_at
            FROM sensors
            WHERE id = ?
            "#,
        )
        .bind(sensor_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sensor)
    }

    /// Returns `false` when no sensor has `sensor_id`.
    pub async fn set_sensor_enabled(&self, sensor_id: i64, enabled: bool) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE sensors SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(sensor_id)
            .execute(&self.pool)
            .await?;
        let found = result.rows_affected() > 0;
        if found {
            info!(sensor_id, enabled, "Sensor toggled");
        }
        Ok(found)
    }
}

/// Numbers are taken as-is; numeric strings such as `"21.5"` are accepted
/// too. Anything else is not a reading.
fn numeric_value(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    async fn reading_count(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM readings")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn sensor_ids(store: &ReadingStore, project_id: i64) -> Vec<i64> {
        store
            .project_sensors(project_id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect()
    }

    // -----------------------------------------------------------------------
    // record_frame
    // -----------------------------------------------------------------------

    #[sqlx::test(migrations = "./migrations")]
    async fn fans_out_to_enabled_sensors_across_projects(pool: SqlitePool) {
        let store = ReadingStore::new(pool.clone());
        let greenhouse = store.create_project("Greenhouse", "", &[SensorType::Temperature]).await.unwrap();
        let garage = store.create_project("Garage", "", &[SensorType::Temperature]).await.unwrap();
        let shed = store.create_project("Shed", "", &[SensorType::Temperature]).await.unwrap();
        let disabled = sensor_ids(&store, shed).await[0];
        store.set_sensor_enabled(disabled, false).await.unwrap();

        let summary = store
            .record_frame(&payload(json!({ "temperature": 22.1 })), Utc::now())
            .await
            .unwrap();

        assert_eq!(summary.inserted, 2);
        assert_eq!(reading_count(&pool).await, 2);
        for project in [greenhouse, garage] {
            let id = sensor_ids(&store, project).await[0];
            let points = store.recent_readings(id, 60, Utc::now()).await.unwrap();
            assert_eq!(points.len(), 1);
            assert_eq!(points[0].value, 22.1);
        }
        assert!(store.recent_readings(disabled, 60, Utc::now()).await.unwrap().is_empty());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn unknown_types_are_skipped(pool: SqlitePool) {
        let store = ReadingStore::new(pool.clone());
        store.create_project("Lab", "", &[SensorType::Humidity]).await.unwrap();

        let summary = store
            .record_frame(&payload(json!({ "voltage": 3.3, "humidity": 40 })), Utc::now())
            .await
            .unwrap();

        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.unknown_types, vec!["voltage".to_owned()]);
        assert_eq!(reading_count(&pool).await, 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn non_numeric_value_does_not_abort_sibling_keys(pool: SqlitePool) {
        let store = ReadingStore::new(pool.clone());
        store
            .create_project("Lab", "", &[SensorType::Light, SensorType::Pressure, SensorType::Co2])
            .await
            .unwrap();

        let summary = store
            .record_frame(
                &payload(json!({ "co2": "412", "light": "bright", "pressure": 1013.25 })),
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.rejected_values, vec!["light".to_owned()]);
        assert_eq!(reading_count(&pool).await, 2);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn disabling_a_sensor_leaves_siblings_receiving(pool: SqlitePool) {
        let store = ReadingStore::new(pool.clone());
        let project = store
            .create_project("Twin", "", &[SensorType::Distance, SensorType::Distance])
            .await
            .unwrap();
        let ids = sensor_ids(&store, project).await;
        store.set_sensor_enabled(ids[0], false).await.unwrap();

        store
            .record_frame(&payload(json!({ "distance": 12.5 })), Utc::now())
            .await
            .unwrap();

        assert!(store.recent_readings(ids[0], 60, Utc::now()).await.unwrap().is_empty());
        assert_eq!(store.recent_readings(ids[1], 60, Utc::now()).await.unwrap().len(), 1);
    }

    // -----------------------------------------------------------------------
    // recent_readings
    // -----------------------------------------------------------------------

    #[sqlx::test(migrations = "./migrations")]
    async fn recent_readings_respects_window_and_order(pool: SqlitePool) {
        let store = ReadingStore::new(pool.clone());
        let project = store.create_project("Lab", "", &[SensorType::Temperature]).await.unwrap();
        let id = sensor_ids(&store, project).await[0];
        let now = Utc::now();

        for (age_minutes, value) in [(90, 1.0), (5, 3.0), (30, 2.0), (1, 4.0)] {
            store
                .record_frame(&payload(json!({ "temperature": value })), now - Duration::minutes(age_minutes))
                .await
                .unwrap();
        }

        let points = store.recent_readings(id, 60, now).await.unwrap();
        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
        assert!(points.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(points.iter().all(|p| p.timestamp > now - Duration::minutes(60)));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn recent_readings_is_capped(pool: SqlitePool) {
        let store = ReadingStore::new(pool.clone());
        let project = store.create_project("Lab", "", &[SensorType::Light]).await.unwrap();
        let id = sensor_ids(&store, project).await[0];
        let now = Utc::now();

        for i in 0..(READINGS_QUERY_LIMIT + 20) {
            store
                .record_frame(&payload(json!({ "light": i })), now - Duration::seconds(i))
                .await
                .unwrap();
        }

        let points = store.recent_readings(id, 60, now).await.unwrap();
        assert_eq!(points.len() as i64, READINGS_QUERY_LIMIT);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn out_of_range_window_is_an_error(pool: SqlitePool) {
        let store = ReadingStore::new(pool);
        let project = store.create_project("Lab", "", &[SensorType::Light]).await.unwrap();
        let id = sensor_ids(&store, project).await[0];

        for minutes in [i64::MAX, 1_000_000_000_000, 0, -5] {
            assert!(matches!(
                store.recent_readings(id, minutes, Utc::now()).await,
                Err(StoreError::InvalidWindow(m)) if m == minutes
            ));
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn frames_survive_concurrent_sensor_writes(pool: SqlitePool) {
        let store = ReadingStore::new(pool.clone());
        let project = store
            .create_project("Lab", "", &[SensorType::Humidity, SensorType::Pressure])
            .await
            .unwrap();
        let toggled = sensor_ids(&store, project).await[0];

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..50 {
                    store.set_sensor_enabled(toggled, i % 2 == 0).await.unwrap();
                }
            })
        };
        for i in 0..50 {
            let summary = store
                .record_frame(&payload(json!({ "humidity": i, "pressure": 1000 + i })), Utc::now())
                .await
                .unwrap();
            assert_eq!(summary.failed_inserts, 0);
            assert!(summary.inserted >= 1);
        }
        writer.await.unwrap();
    }

    // -----------------------------------------------------------------------
    // Projects
    // -----------------------------------------------------------------------

    #[sqlx::test(migrations = "./migrations")]
    async fn create_project_names_sensors_after_type(pool: SqlitePool) {
        let store = ReadingStore::new(pool);
        let project = store
            .create_project("Garden", "Raised beds", &[SensorType::SoilMoisture])
            .await
            .unwrap();

        let sensors = store.project_sensors(project).await.unwrap();
        assert_eq!(sensors.len(), 1);
        assert_eq!(sensors[0].name, "Soil Moisture Sensor");
        assert_eq!(sensors[0].sensor_type, SensorType::SoilMoisture);
        assert!(sensors[0].enabled);
        assert_eq!(sensors[0].min_value, None);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn duplicate_project_name_is_rejected_without_side_effects(pool: SqlitePool) {
        let store = ReadingStore::new(pool.clone());
        store.create_project("Garden", "", &[SensorType::Light]).await.unwrap();

        let err = store
            .create_project("Garden", "again", &[SensorType::Light, SensorType::Humidity])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ProjectExists(ref name) if name == "Garden"));

        let projects: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects").fetch_one(&pool).await.unwrap();
        let sensors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sensors").fetch_one(&pool).await.unwrap();
        assert_eq!(projects, 1);
        assert_eq!(sensors, 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn blank_project_name_is_rejected(pool: SqlitePool) {
        let store = ReadingStore::new(pool);
        assert!(matches!(
            store.create_project("   ", "", &[]).await,
            Err(StoreError::InvalidName)
        ));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn list_projects_orders_by_name(pool: SqlitePool) {
        let store = ReadingStore::new(pool);
        store.create_project("Zeta", "", &[]).await.unwrap();
        store.create_project("Alpha", "first", &[]).await.unwrap();

        let projects = store.list_projects().await.unwrap();
        let names: Vec<&str> = projects.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Zeta"]);
        assert_eq!(projects[0].description, "first");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn delete_project_cascades_only_to_its_own_rows(pool: SqlitePool) {
        let store = ReadingStore::new(pool.clone());
        let doomed = store.create_project("Doomed", "", &[SensorType::Temperature]).await.unwrap();
        let kept = store.create_project("Kept", "", &[SensorType::Temperature]).await.unwrap();
        store
            .record_frame(&payload(json!({ "temperature": 19.0 })), Utc::now())
            .await
            .unwrap();
        assert_eq!(reading_count(&pool).await, 2);

        assert!(store.delete_project(doomed).await.unwrap());

        assert!(store.project_sensors(doomed).await.unwrap().is_empty());
        let kept_sensor = sensor_ids(&store, kept).await[0];
        assert_eq!(store.recent_readings(kept_sensor, 60, Utc::now()).await.unwrap().len(), 1);
        assert_eq!(reading_count(&pool).await, 1);
        assert!(!store.delete_project(doomed).await.unwrap());
    }

    // -----------------------------------------------------------------------
    // Sensors
    // -----------------------------------------------------------------------

    #[sqlx::test(migrations = "./migrations")]
    async fn toggling_unknown_sensor_reports_not_found(pool: SqlitePool) {
        let store = ReadingStore::new(pool);
        assert!(!store.set_sensor_enabled(999, true).await.unwrap());
        assert!(store.sensor(999).await.unwrap().is_none());
    }

    #[test]
    fn numeric_value_accepts_numbers_and_numeric_strings() {
        assert_eq!(numeric_value(&json!(21)), Some(21.0));
        assert_eq!(numeric_value(&json!(-3.5)), Some(-3.5));
        assert_eq!(numeric_value(&json!(" 7.25 ")), Some(7.25));
        assert_eq!(numeric_value(&json!("NaN")), None);
        assert_eq!(numeric_value(&json!(true)), None);
        assert_eq!(numeric_value(&json!(null)), None);
    }
}
