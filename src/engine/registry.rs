//! Firmware Registry
//!
//! Durable record of known firmware versions, keyed by version string.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::database::{Database, DatabaseError};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Registry task failed: {0}")]
    Task(String),
}

/// Metadata for one uploaded firmware binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareRecord {
    pub version: String,
    pub storage_key: String,
    pub resolved_url: Option<String>,
    pub description: String,
    pub size_bytes: u64,
    /// Lowercase MD5 hex of the stored payload
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

/// Metadata store consumed by the FOTA pipelines.
///
/// Implementations must make `upsert` atomic per version.
pub trait FirmwareRegistry: Send + Sync {
    /// Most recently created active record
    fn latest_active(&self) -> Result<Option<FirmwareRecord>, RegistryError>;

    fn get_by_version(&self, version: &str) -> Result<Option<FirmwareRecord>, RegistryError>;

    /// Insert, or replace every field of the record with the same version
    fn upsert(&self, record: &FirmwareRecord) -> Result<(), RegistryError>;

    /// All records, newest first
    fn list(&self) -> Result<Vec<FirmwareRecord>, RegistryError>;

    fn ping(&self) -> Result<(), RegistryError>;
}

const SELECT_COLUMNS: &str =
    "version, blob_name, blob_url, description, file_size, checksum, created_at, is_active";

/// Registry backed by the `firmwares` table
#[derive(Clone)]
pub struct SqliteRegistry {
    db: Database,
}

impl SqliteRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<FirmwareRecord> {
        let created_at: String = row.get(6)?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;
        let size: i64 = row.get(4)?;

        Ok(FirmwareRecord {
            version: row.get(0)?,
            storage_key: row.get(1)?,
            resolved_url: row.get(2)?,
            description: row.get(3)?,
            size_bytes: size.max(0) as u64,
            checksum: row.get(5)?,
            created_at,
            is_active: row.get(7)?,
        })
    }
}

/// Fixed-width timestamp so text ordering matches time ordering
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl FirmwareRegistry for SqliteRegistry {
    fn latest_active(&self) -> Result<Option<FirmwareRecord>, RegistryError> {
        let conn = self.db.get_connection()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM firmwares
                     WHERE is_active = 1
                     ORDER BY created_at DESC, id DESC
                     LIMIT 1"
                ),
                [],
                Self::from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn get_by_version(&self, version: &str) -> Result<Option<FirmwareRecord>, RegistryError> {
        let conn = self.db.get_connection()?;
        let record = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM firmwares WHERE version = ?1"),
                params![version],
                Self::from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn upsert(&self, record: &FirmwareRecord) -> Result<(), RegistryError> {
        let conn = self.db.get_connection()?;
        conn.execute(
            "INSERT INTO firmwares
                (version, blob_name, blob_url, description, file_size, checksum, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (version) DO UPDATE SET
                blob_name = excluded.blob_name,
                blob_url = excluded.blob_url,
                description = excluded.description,
                file_size = excluded.file_size,
                checksum = excluded.checksum,
                is_active = excluded.is_active,
                created_at = excluded.created_at",
            params![
                record.version,
                record.storage_key,
                record.resolved_url,
                record.description,
                record.size_bytes as i64,
                record.checksum,
                record.is_active,
                format_timestamp(&record.created_at),
            ],
        )?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<FirmwareRecord>, RegistryError> {
        let conn = self.db.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM firmwares ORDER BY created_at DESC, id DESC"
        ))?;
        let records = stmt
            .query_map([], Self::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn ping(&self) -> Result<(), RegistryError> {
        Ok(self.db.ping()?)
    }
}
