//! `SQLite` implementation of [`DeviceRepository`].

use std::future::Future;
use std::str::FromStr;

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqlitePool};

use portbridge_app::ports::DeviceRepository;
use portbridge_domain::device::{Device, DeviceParams};
use portbridge_domain::error::{BridgeError, NotFoundError};
use portbridge_domain::id::DeviceId;
use portbridge_domain::time::Timestamp;

use crate::error::{StorageError, decode};

/// Wrapper for converting database rows into domain [`Device`].
struct Wrapper(Device);

impl Wrapper {
    fn maybe(value: Option<Self>) -> Option<Device> {
        value.map(|w| w.0)
    }
}

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: String = row.try_get("id")?;
        let params: String = row.try_get("params")?;
        let last_seen: Option<String> = row.try_get("last_seen")?;

        let id = DeviceId::from_str(&id).map_err(decode)?;
        let params: DeviceParams = serde_json::from_str(&params).map_err(decode)?;
        let last_seen = last_seen
            .map(|value| chrono::DateTime::parse_from_rfc3339(&value).map(|at| at.to_utc()))
            .transpose()
            .map_err(decode)?;

        Ok(Self(Device {
            id,
            code: row.try_get("code")?,
            name: row.try_get("name")?,
            model: row.try_get("model")?,
            vendor: row.try_get("vendor")?,
            kind: row.try_get("kind")?,
            description: row.try_get("description")?,
            params,
            online: row.try_get("online")?,
            last_seen,
        }))
    }
}

const INSERT: &str = r"
    INSERT INTO devices (id, code, name, model, vendor, kind, description, params, online, last_seen)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
";
const SELECT_BY_ID: &str = "SELECT * FROM devices WHERE id = ?";
const SELECT_BY_CODE: &str = "SELECT * FROM devices WHERE code = ?";
const SELECT_ALL: &str = "SELECT * FROM devices ORDER BY name, code";
const UPDATE: &str = r"
    UPDATE devices
    SET code = ?, name = ?, model = ?, vendor = ?, kind = ?, description = ?, params = ?,
        online = ?, last_seen = ?
    WHERE id = ?
";
const UPDATE_STATUS: &str = "UPDATE devices SET online = ?, last_seen = ? WHERE id = ?";
const DELETE_PORTS: &str = "DELETE FROM ports WHERE device_id = ?";
const DELETE_BY_ID: &str = "DELETE FROM devices WHERE id = ?";

fn format_time(at: Option<Timestamp>) -> Option<String> {
    at.map(|at| at.to_rfc3339())
}

/// `SQLite`-backed device repository.
pub struct SqliteDeviceRepository {
    pool: SqlitePool,
}

impl SqliteDeviceRepository {
    /// Create a new repository using the given connection pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl DeviceRepository for SqliteDeviceRepository {
    fn create(&self, device: Device) -> impl Future<Output = Result<Device, BridgeError>> + Send {
        let pool = self.pool.clone();
        async move {
            let params = serde_json::to_string(&device.params).map_err(StorageError::from)?;
            sqlx::query(INSERT)
                .bind(device.id.to_string())
                .bind(&device.code)
                .bind(&device.name)
                .bind(&device.model)
                .bind(&device.vendor)
                .bind(&device.kind)
                .bind(&device.description)
                .bind(params)
                .bind(device.online)
                .bind(format_time(device.last_seen))
                .execute(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(device)
        }
    }

    fn get_by_id(
        &self,
        id: DeviceId,
    ) -> impl Future<Output = Result<Option<Device>, BridgeError>> + Send {
        let pool = self.pool.clone();
        async move {
            let row: Option<Wrapper> = sqlx::query_as(SELECT_BY_ID)
                .bind(id.to_string())
                .fetch_optional(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(Wrapper::maybe(row))
        }
    }

    fn find_by_code(
        &self,
        code: &str,
    ) -> impl Future<Output = Result<Option<Device>, BridgeError>> + Send {
        let pool = self.pool.clone();
        let code = code.to_string();
        async move {
            let row: Option<Wrapper> = sqlx::query_as(SELECT_BY_CODE)
                .bind(code)
                .fetch_optional(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(Wrapper::maybe(row))
        }
    }

    fn get_all(&self) -> impl Future<Output = Result<Vec<Device>, BridgeError>> + Send {
        let pool = self.pool.clone();
        async move {
            let rows: Vec<Wrapper> = sqlx::query_as(SELECT_ALL)
                .fetch_all(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(rows.into_iter().map(|w| w.0).collect())
        }
    }

    fn update(&self, device: Device) -> impl Future<Output = Result<Device, BridgeError>> + Send {
        let pool = self.pool.clone();
        async move {
            let params = serde_json::to_string(&device.params).map_err(StorageError::from)?;
            let result = sqlx::query(UPDATE)
                .bind(&device.code)
                .bind(&device.name)
                .bind(&device.model)
                .bind(&device.vendor)
                .bind(&device.kind)
                .bind(&device.description)
                .bind(params)
                .bind(device.online)
                .bind(format_time(device.last_seen))
                .bind(device.id.to_string())
                .execute(&pool)
                .await
                .map_err(StorageError::from)?;

            if result.rows_affected() == 0 {
                return Err(NotFoundError {
                    entity: "Device",
                    id: device.id.to_string(),
                }
                .into());
            }
            Ok(device)
        }
    }

    fn set_status(
        &self,
        id: DeviceId,
        online: bool,
        last_seen: Timestamp,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send {
        let pool = self.pool.clone();
        async move {
            sqlx::query(UPDATE_STATUS)
                .bind(online)
                .bind(last_seen.to_rfc3339())
                .bind(id.to_string())
                .execute(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(())
        }
    }

    fn delete(&self, id: DeviceId) -> impl Future<Output = Result<(), BridgeError>> + Send {
        let pool = self.pool.clone();
        async move {
            let mut tx = pool.begin().await.map_err(StorageError::from)?;
            sqlx::query(DELETE_PORTS)
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(StorageError::from)?;
            sqlx::query(DELETE_BY_ID)
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(StorageError::from)?;
            tx.commit().await.map_err(StorageError::from)?;

            Ok(())
        }
    }
}
