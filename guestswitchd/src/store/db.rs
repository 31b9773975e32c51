use std::path::Path;
use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use shared::types::AccessoryRecord;

/// Persists accessory records across restarts.
pub struct AccessoryDb {
    conn: Connection,
}

impl AccessoryDb {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL mode")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS accessories (
                id            TEXT PRIMARY KEY,
                display_name  TEXT NOT NULL,
                context       TEXT NOT NULL,
                registered_at TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(Self { conn })
    }

    /// Store a new record. Returns false if the id was already registered,
    /// in which case the stored record is left untouched.
    pub fn insert(&self, record: &AccessoryRecord) -> Result<bool> {
        let context_json = serde_json::to_string(&record.context)
            .context("Failed to serialize accessory context")?;

        let inserted = self.conn.execute(
            r#"
            INSERT INTO accessories (id, display_name, context, registered_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO NOTHING
            "#,
            params![
                &record.id,
                &record.display_name,
                &context_json,
                record.registered_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert accessory")?;

        Ok(inserted > 0)
    }

    /// Remove a record. Returns true if one existed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM accessories WHERE id = ?1",
            params![id],
        )
        .context("Failed to remove accessory")?;
        Ok(removed > 0)
    }

    /// Get all records
    pub fn get_all(&self) -> Result<Vec<AccessoryRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, display_name, context, registered_at
                 FROM accessories ORDER BY registered_at, id"
            )
            .context("Failed to prepare query")?;

        let records = stmt
            .query_map([], Self::row_to_record)
            .context("Failed to query accessories")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect accessories")?;

        Ok(records)
    }

    #[cfg(test)]
    pub fn get(&self, id: &str) -> Result<Option<AccessoryRecord>> {
        use rusqlite::OptionalExtension;

        let result = self
            .conn
            .query_row(
                "SELECT id, display_name, context, registered_at
                 FROM accessories WHERE id = ?1",
                params![id],
                Self::row_to_record,
            )
            .optional()
            .context("Failed to query accessory")?;

        Ok(result)
    }

    fn row_to_record(row: &rusqlite::Row) -> Result<AccessoryRecord, rusqlite::Error> {
        let context_json: String = row.get(2)?;
        let registered_at_str: String = row.get(3)?;

        let context = serde_json::from_str(&context_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                Box::new(e),
            ))?;

        let registered_at = chrono::DateTime::parse_from_rfc3339(&registered_at_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                Box::new(e),
            ))?
            .with_timezone(&chrono::Utc);

        Ok(AccessoryRecord {
            id: row.get(0)?,
            display_name: row.get(1)?,
            context,
            registered_at,
        })
    }
}
