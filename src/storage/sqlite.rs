//! SQLite storage backend implementation
//!
//! This module provides a SQLite-based implementation of the `MonitorStore` trait.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Status writes from check tasks don't block history reads
//! - **Foreign keys**: Deleting a device or service cascades to its logs
//! - **Migrations**: Automatic schema versioning with sqlx

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite, Transaction};
use tracing::{debug, info, instrument};

use super::backend::{HealthStatus, MonitorStore};
use super::error::{StorageError, StorageResult};
use super::schema::{
    DeviceRecord, DowntimeInterval, LatencySample, NewDevice, NewService, ServiceRecord,
};
use crate::{DeviceId, EntityRef, EntityStatus, ServiceId};

/// SQLite storage backend
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteStore {
    /// Open (or create) the database and run migrations
    ///
    /// ```no_run
    /// # use nodepulse::storage::sqlite::SqliteStore;
    /// # async fn example() -> anyhow::Result<()> {
    /// let store = SqliteStore::new("./nodepulse.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    /// Split an entity into the (device_id, service_id) column pair
    fn entity_columns(entity: EntityRef) -> (Option<DeviceId>, Option<ServiceId>) {
        match entity {
            EntityRef::Device(id) => (Some(id), None),
            EntityRef::Service(id) => (None, Some(id)),
        }
    }

    fn entity_from_row(row: &SqliteRow) -> StorageResult<EntityRef> {
        let device_id: Option<i64> = row.try_get("device_id")?;
        let service_id: Option<i64> = row.try_get("service_id")?;
        match (device_id, service_id) {
            (Some(id), None) => Ok(EntityRef::Device(id)),
            (None, Some(id)) => Ok(EntityRef::Service(id)),
            _ => Err(StorageError::QueryFailed(
                "log row must reference exactly one device or service".to_string(),
            )),
        }
    }

    fn downtime_from_row(row: &SqliteRow) -> StorageResult<DowntimeInterval> {
        Ok(DowntimeInterval {
            id: row.try_get("id")?,
            entity: Self::entity_from_row(row)?,
            down_at: Self::millis_to_timestamp(row.try_get("down_at")?),
            up_at: row
                .try_get::<Option<i64>, _>("up_at")?
                .map(Self::millis_to_timestamp),
            duration: row.try_get("duration")?,
        })
    }

    fn service_from_row(row: &SqliteRow) -> StorageResult<ServiceRecord> {
        let status: String = row.try_get("last_status")?;
        Ok(ServiceRecord {
            id: row.try_get("id")?,
            device_id: row.try_get("device_id")?,
            service_name: row.try_get("service_name")?,
            port_number: row.try_get::<i64, _>("port_number")? as u16,
            check_interval: row.try_get::<i64, _>("check_interval")? as u64,
            last_status: EntityStatus::parse_lossy(&status),
            last_down_at: row
                .try_get::<Option<i64>, _>("last_down_at")?
                .map(Self::millis_to_timestamp),
        })
    }

    fn device_from_row(row: &SqliteRow, services: Vec<ServiceRecord>) -> StorageResult<DeviceRecord> {
        let status: String = row.try_get("last_status")?;
        Ok(DeviceRecord {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            ip_address: row.try_get("ip_address")?,
            kind: row.try_get("device_type")?,
            ping_interval: row.try_get::<i64, _>("ping_interval")? as u64,
            last_status: EntityStatus::parse_lossy(&status),
            services,
        })
    }

    async fn services_of(&self, device_id: DeviceId) -> StorageResult<Vec<ServiceRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, device_id, service_name, port_number, check_interval,
                   last_status, last_down_at
            FROM services
            WHERE device_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::service_from_row).collect()
    }

    async fn insert_service(
        tx: &mut Transaction<'_, Sqlite>,
        device_id: DeviceId,
        service: &NewService,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO services (device_id, service_name, port_number, check_interval)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(device_id)
        .bind(&service.service_name)
        .bind(service.port_number as i64)
        .bind(service.resolved_check_interval() as i64)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn require_device(&self, id: DeviceId) -> StorageResult<DeviceRecord> {
        self.get_device(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("device #{id}")))
    }
}

#[async_trait]
impl MonitorStore for SqliteStore {
    #[instrument(skip(self))]
    async fn load_devices(&self) -> StorageResult<Vec<DeviceRecord>> {
        let device_rows = sqlx::query(
            r#"
            SELECT id, name, ip_address, device_type, ping_interval, last_status
            FROM devices
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let service_rows = sqlx::query(
            r#"
            SELECT id, device_id, service_name, port_number, check_interval,
                   last_status, last_down_at
            FROM services
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut services: HashMap<DeviceId, Vec<ServiceRecord>> = HashMap::new();
        for row in &service_rows {
            let service = Self::service_from_row(row)?;
            services.entry(service.device_id).or_default().push(service);
        }

        let devices = device_rows
            .iter()
            .map(|row| -> StorageResult<DeviceRecord> {
                let id: DeviceId = row.try_get("id")?;
                Self::device_from_row(row, services.remove(&id).unwrap_or_default())
            })
            .collect::<StorageResult<Vec<_>>>()?;

        debug!("loaded {} devices", devices.len());
        Ok(devices)
    }

    async fn get_device(&self, id: DeviceId) -> StorageResult<Option<DeviceRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, ip_address, device_type, ping_interval, last_status
            FROM devices
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let services = self.services_of(id).await?;
                Ok(Some(Self::device_from_row(&row, services)?))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, device), fields(name = %device.name))]
    async fn create_device(&self, device: NewDevice) -> StorageResult<DeviceRecord> {
        let mut tx = self.pool.begin().await?;

        let id = sqlx::query(
            r#"
            INSERT INTO devices (name, ip_address, device_type, ping_interval)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&device.name)
        .bind(&device.ip_address)
        .bind(&device.kind)
        .bind(device.resolved_ping_interval() as i64)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for service in &device.services {
            Self::insert_service(&mut tx, id, service).await?;
        }
        tx.commit().await?;

        debug!("created device {}", id);
        self.require_device(id).await
    }

    #[instrument(skip(self, device))]
    async fn update_device(
        &self,
        id: DeviceId,
        device: NewDevice,
    ) -> StorageResult<Option<DeviceRecord>> {
        let Some(existing) = self.get_device(id).await? else {
            return Ok(None);
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE devices SET name = ?, ip_address = ?, device_type = ?, ping_interval = ?
            WHERE id = ?
            "#,
        )
        .bind(&device.name)
        .bind(&device.ip_address)
        .bind(&device.kind)
        .bind(device.resolved_ping_interval() as i64)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let kept: Vec<ServiceId> = device
            .services
            .iter()
            .filter_map(|s| s.id)
            .filter(|sid| existing.services.iter().any(|old| old.id == *sid))
            .collect();

        // Logs of dropped services go with them through ON DELETE CASCADE.
        for old in existing.services.iter().filter(|s| !kept.contains(&s.id)) {
            sqlx::query("DELETE FROM services WHERE id = ?")
                .bind(old.id)
                .execute(&mut *tx)
                .await?;
        }

        for service in &device.services {
            match service.id.filter(|sid| kept.contains(sid)) {
                Some(sid) => {
                    sqlx::query(
                        r#"
                        UPDATE services SET service_name = ?, port_number = ?, check_interval = ?
                        WHERE id = ?
                        "#,
                    )
                    .bind(&service.service_name)
                    .bind(service.port_number as i64)
                    .bind(service.resolved_check_interval() as i64)
                    .bind(sid)
                    .execute(&mut *tx)
                    .await?;
                }
                None => Self::insert_service(&mut tx, id, service).await?,
            }
        }

        tx.commit().await?;
        self.get_device(id).await
    }

    #[instrument(skip(self))]
    async fn delete_device(&self, id: DeviceId) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM devices WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(entity = %entity))]
    async fn update_status(
        &self,
        entity: EntityRef,
        status: EntityStatus,
        last_down_at: Option<DateTime<Utc>>,
    ) -> StorageResult<()> {
        let result = match entity {
            EntityRef::Device(id) => {
                sqlx::query("UPDATE devices SET last_status = ? WHERE id = ?")
                    .bind(status.as_str())
                    .bind(id)
                    .execute(&self.pool)
                    .await?
            }
            EntityRef::Service(id) => {
                sqlx::query(
                    r#"
                    UPDATE services
                    SET last_status = ?, last_down_at = COALESCE(?, last_down_at)
                    WHERE id = ?
                    "#,
                )
                .bind(status.as_str())
                .bind(last_down_at.as_ref().map(Self::timestamp_to_millis))
                .bind(id)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(entity.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(entity = %entity))]
    async fn open_downtime(
        &self,
        entity: EntityRef,
        down_at: DateTime<Utc>,
    ) -> StorageResult<DowntimeInterval> {
        let (device_id, service_id) = Self::entity_columns(entity);
        let id = sqlx::query(
            "INSERT INTO downtime_logs (device_id, service_id, down_at) VALUES (?, ?, ?)",
        )
        .bind(device_id)
        .bind(service_id)
        .bind(Self::timestamp_to_millis(&down_at))
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(DowntimeInterval {
            id,
            entity,
            down_at,
            up_at: None,
            duration: None,
        })
    }

    async fn find_open_downtime(
        &self,
        entity: EntityRef,
    ) -> StorageResult<Option<DowntimeInterval>> {
        let (device_id, service_id) = Self::entity_columns(entity);
        let row = sqlx::query(
            r#"
            SELECT id, device_id, service_id, down_at, up_at, duration
            FROM downtime_logs
            WHERE device_id IS ? AND service_id IS ? AND up_at IS NULL
            ORDER BY down_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(device_id)
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::downtime_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn close_downtime(
        &self,
        id: i64,
        up_at: DateTime<Utc>,
        duration_secs: i64,
    ) -> StorageResult<()> {
        let result = sqlx::query("UPDATE downtime_logs SET up_at = ?, duration = ? WHERE id = ?")
            .bind(Self::timestamp_to_millis(&up_at))
            .bind(duration_secs)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("downtime interval {id}")));
        }
        Ok(())
    }

    async fn append_latency(&self, sample: LatencySample) -> StorageResult<()> {
        let (device_id, service_id) = Self::entity_columns(sample.entity);
        sqlx::query(
            "INSERT INTO latency_logs (device_id, service_id, latency, timestamp) VALUES (?, ?, ?, ?)",
        )
        .bind(device_id)
        .bind(service_id)
        .bind(sample.latency)
        .bind(Self::timestamp_to_millis(&sample.timestamp))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn downtime_history(
        &self,
        entity: EntityRef,
        limit: usize,
    ) -> StorageResult<Vec<DowntimeInterval>> {
        let (device_id, service_id) = Self::entity_columns(entity);
        let rows = sqlx::query(
            r#"
            SELECT id, device_id, service_id, down_at, up_at, duration
            FROM downtime_logs
            WHERE device_id IS ? AND service_id IS ?
            ORDER BY down_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(device_id)
        .bind(service_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::downtime_from_row).collect()
    }

    async fn latency_history(
        &self,
        entity: EntityRef,
        limit: usize,
    ) -> StorageResult<Vec<LatencySample>> {
        let (device_id, service_id) = Self::entity_columns(entity);
        let rows = sqlx::query(
            r#"
            SELECT device_id, service_id, latency, timestamp
            FROM latency_logs
            WHERE device_id IS ? AND service_id IS ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(device_id)
        .bind(service_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut samples = rows
            .iter()
            .map(|row| -> StorageResult<LatencySample> {
                Ok(LatencySample {
                    entity: Self::entity_from_row(row)?,
                    latency: row.try_get("latency")?,
                    timestamp: Self::millis_to_timestamp(row.try_get("timestamp")?),
                })
            })
            .collect::<StorageResult<Vec<_>>>()?;
        // Reverse to get chronological order (oldest first)
        samples.reverse();
        Ok(samples)
    }

    async fn load_settings(&self) -> StorageResult<HashMap<String, String>> {
        let rows = sqlx::query("SELECT key, value FROM settings")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> StorageResult<(String, String)> {
                Ok((row.try_get("key")?, row.try_get("value")?))
            })
            .collect()
    }

    #[instrument(skip_all, fields(count = settings.len()))]
    async fn save_settings(&self, settings: HashMap<String, String>) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in settings {
            sqlx::query(
                r#"
                INSERT INTO settings (key, value) VALUES (?, ?)
                ON CONFLICT (key) DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let result = sqlx::query("SELECT 1").fetch_one(&self.pool).await;

        match result {
            Ok(_) => {
                let devices: i64 = sqlx::query("SELECT COUNT(*) AS count FROM devices")
                    .fetch_one(&self.pool)
                    .await?
                    .try_get("count")?;

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata: HashMap::from([
                        ("backend".to_string(), "sqlite".to_string()),
                        ("path".to_string(), self.db_path.clone()),
                        ("devices".to_string(), devices.to_string()),
                    ]),
                })
            }
            Err(e) => Ok(HealthStatus {
                healthy: false,
                message: format!("SQLite health check failed: {}", e),
                metadata: HashMap::from([("backend".to_string(), "sqlite".to_string())]),
            }),
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
