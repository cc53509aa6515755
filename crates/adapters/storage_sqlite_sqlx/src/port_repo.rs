//! `SQLite` implementation of [`PortRepository`].

use std::future::Future;
use std::str::FromStr;

use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqliteConnection, SqlitePool};

use portbridge_app::ports::PortRepository;
use portbridge_domain::error::{BridgeError, NotFoundError};
use portbridge_domain::id::DeviceId;
use portbridge_domain::port::{Direction, Port, PortKind, PortParams};

use crate::error::{StorageError, decode};

/// Wrapper for converting database rows into domain types without polluting
/// domain structs with database concerns.
struct Wrapper(Port);

impl Wrapper {
    fn maybe(value: Option<Self>) -> Option<Port> {
        value.map(|w| w.0)
    }
}

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let device_id: String = row.try_get("device_id")?;
        let direction: Option<String> = row.try_get("direction")?;
        let kind: Option<String> = row.try_get("kind")?;
        let value: Option<String> = row.try_get("value")?;
        let extra: String = row.try_get("extra")?;
        let params: String = row.try_get("params")?;
        let updated_at: String = row.try_get("updated_at")?;

        let device_id = DeviceId::from_str(&device_id).map_err(decode)?;
        let value: Option<Value> = value
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(decode)?;
        let extra: Map<String, Value> = serde_json::from_str(&extra).map_err(decode)?;
        let params: PortParams = serde_json::from_str(&params).map_err(decode)?;
        let updated_at = chrono::DateTime::parse_from_rfc3339(&updated_at)
            .map_err(decode)?
            .to_utc();

        Ok(Self(Port {
            device_id,
            code: row.try_get("code")?,
            title: row.try_get("title")?,
            direction: direction.map(Direction::from),
            kind: kind.map(PortKind::new),
            type_raw: row.try_get("type_raw")?,
            value,
            unit: row.try_get("unit")?,
            mqtt: row.try_get("mqtt")?,
            href: row.try_get("href")?,
            group_title: row.try_get("group_title")?,
            group_href: row.try_get("group_href")?,
            is_virtual: row.try_get("is_virtual")?,
            extra,
            params,
            updated_at,
        }))
    }
}

/// Insert a port, or refresh everything but its params.
const UPSERT: &str = r"
    INSERT INTO ports (device_id, code, title, direction, kind, type_raw, value, unit, mqtt, href,
                       group_title, group_href, is_virtual, extra, params, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT (device_id, code) DO UPDATE SET
        title = excluded.title,
        direction = excluded.direction,
        kind = excluded.kind,
        type_raw = excluded.type_raw,
        value = excluded.value,
        unit = excluded.unit,
        mqtt = excluded.mqtt,
        href = excluded.href,
        group_title = excluded.group_title,
        group_href = excluded.group_href,
        is_virtual = excluded.is_virtual,
        extra = excluded.extra,
        updated_at = excluded.updated_at
";
const SELECT_ONE: &str = "SELECT * FROM ports WHERE device_id = ? AND code = ?";
const SELECT_BY_DEVICE: &str = "SELECT * FROM ports WHERE device_id = ? ORDER BY rowid";
const SELECT_PUBLISHED: &str = r"
    SELECT * FROM ports
    WHERE json_extract(params, '$.hub_published') = 1
    ORDER BY device_id, code
";
const UPDATE_PARAMS: &str = "UPDATE ports SET params = ? WHERE device_id = ? AND code = ?";

/// A port with its JSON columns already serialized.
struct Encoded {
    port: Port,
    value: Option<String>,
    extra: String,
    params: String,
}

impl Encoded {
    fn new(port: Port) -> Result<Self, StorageError> {
        Ok(Self {
            value: port.value.as_ref().map(serde_json::to_string).transpose()?,
            extra: serde_json::to_string(&port.extra)?,
            params: serde_json::to_string(&port.params)?,
            port,
        })
    }

    async fn upsert(self, conn: &mut SqliteConnection) -> Result<(), StorageError> {
        let port = self.port;
        sqlx::query(UPSERT)
            .bind(port.device_id.to_string())
            .bind(port.code)
            .bind(port.title)
            .bind(port.direction.map(String::from))
            .bind(port.kind.map(|kind| kind.as_str().to_string()))
            .bind(port.type_raw)
            .bind(self.value)
            .bind(port.unit)
            .bind(port.mqtt)
            .bind(port.href)
            .bind(port.group_title)
            .bind(port.group_href)
            .bind(port.is_virtual)
            .bind(self.extra)
            .bind(self.params)
            .bind(port.updated_at.to_rfc3339())
            .execute(conn)
            .await?;
        Ok(())
    }
}

/// `SQLite`-backed port table.
pub struct SqlitePortRepository {
    pool: SqlitePool,
}

impl SqlitePortRepository {
    /// Create a new repository using the given connection pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl PortRepository for SqlitePortRepository {
    fn upsert(&self, port: Port) -> impl Future<Output = Result<(), BridgeError>> + Send {
        let pool = self.pool.clone();
        async move {
            let port = Encoded::new(port)?;
            let mut conn = pool.acquire().await.map_err(StorageError::from)?;
            port.upsert(&mut *conn).await?;
            Ok(())
        }
    }

    fn upsert_many(&self, ports: Vec<Port>) -> impl Future<Output = Result<(), BridgeError>> + Send {
        let pool = self.pool.clone();
        async move {
            let encoded = ports
                .into_iter()
                .map(Encoded::new)
                .collect::<Result<Vec<_>, _>>()?;
            let count = encoded.len();

            let mut tx = pool.begin().await.map_err(StorageError::from)?;
            for port in encoded {
                port.upsert(&mut *tx).await?;
            }
            tx.commit().await.map_err(StorageError::from)?;

            tracing::trace!(count, "ports upserted");
            Ok(())
        }
    }

    fn get(
        &self,
        device_id: DeviceId,
        code: &str,
    ) -> impl Future<Output = Result<Option<Port>, BridgeError>> + Send {
        let pool = self.pool.clone();
        let code = code.to_string();
        async move {
            let row: Option<Wrapper> = sqlx::query_as(SELECT_ONE)
                .bind(device_id.to_string())
                .bind(code)
                .fetch_optional(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(Wrapper::maybe(row))
        }
    }

    fn list_by_device(
        &self,
        device_id: DeviceId,
    ) -> impl Future<Output = Result<Vec<Port>, BridgeError>> + Send {
        let pool = self.pool.clone();
        async move {
            let rows: Vec<Wrapper> = sqlx::query_as(SELECT_BY_DEVICE)
                .bind(device_id.to_string())
                .fetch_all(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(rows.into_iter().map(|w| w.0).collect())
        }
    }

    fn list_published(&self) -> impl Future<Output = Result<Vec<Port>, BridgeError>> + Send {
        let pool = self.pool.clone();
        async move {
            let rows: Vec<Wrapper> = sqlx::query_as(SELECT_PUBLISHED)
                .fetch_all(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(rows.into_iter().map(|w| w.0).collect())
        }
    }

    fn save_params(
        &self,
        device_id: DeviceId,
        code: &str,
        params: PortParams,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send {
        let pool = self.pool.clone();
        let code = code.to_string();
        async move {
            let params = serde_json::to_string(&params).map_err(StorageError::from)?;
            let result = sqlx::query(UPDATE_PARAMS)
                .bind(params)
                .bind(device_id.to_string())
                .bind(&code)
                .execute(&pool)
                .await
                .map_err(StorageError::from)?;

            if result.rows_affected() == 0 {
                return Err(NotFoundError {
                    entity: "Port",
                    id: code,
                }
                .into());
            }
            Ok(())
        }
    }
}
