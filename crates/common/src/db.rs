//! SQLite persistence for the simulated block storage service

use crate::types::{Volume, VolumeBackup};
use crate::Result;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Tables holding resource records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Volumes,
    VolumeBackups,
}

impl Table {
    fn as_str(&self) -> &'static str {
        match self {
            Table::Volumes => "volumes",
            Table::VolumeBackups => "volume_backups",
        }
    }
}

/// Indexed columns stored next to the JSON body of a record
#[derive(Debug, Clone)]
pub struct RowKeys {
    pub id: String,
    pub compartment_id: String,
    pub parent_id: Option<String>,
    pub display_name: String,
    pub lifecycle_state: String,
    pub time_created: i64,
}

/// A record that can be persisted in one of the resource tables
pub trait StoredResource: Serialize + DeserializeOwned {
    const TABLE: Table;

    fn keys(&self) -> RowKeys;
}

impl StoredResource for Volume {
    const TABLE: Table = Table::Volumes;

    fn keys(&self) -> RowKeys {
        RowKeys {
            id: self.id.clone(),
            compartment_id: self.compartment_id.clone(),
            parent_id: None,
            display_name: self.display_name.clone(),
            lifecycle_state: self.lifecycle_state.to_string(),
            time_created: self.time_created.timestamp_micros(),
        }
    }
}

impl StoredResource for VolumeBackup {
    const TABLE: Table = Table::VolumeBackups;

    fn keys(&self) -> RowKeys {
        RowKeys {
            id: self.id.clone(),
            compartment_id: self.compartment_id.clone(),
            parent_id: Some(self.volume_id.clone()),
            display_name: self.display_name.clone(),
            lifecycle_state: self.lifecycle_state.to_string(),
            time_created: self.time_created.timestamp_micros(),
        }
    }
}

/// Filters for [`Database::list`]
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub compartment_id: Option<String>,
    pub parent_id: Option<String>,
    pub display_name: Option<String>,
    pub lifecycle_state: Option<String>,
}

/// Database wrapper for state persistence
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Volumes table
            CREATE TABLE IF NOT EXISTS volumes (
                id TEXT PRIMARY KEY,
                compartment_id TEXT NOT NULL,
                parent_id TEXT,
                display_name TEXT NOT NULL,
                lifecycle_state TEXT NOT NULL,
                body TEXT NOT NULL,
                time_created INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                generation INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_volumes_compartment ON volumes(compartment_id);

            -- Volume backups table
            CREATE TABLE IF NOT EXISTS volume_backups (
                id TEXT PRIMARY KEY,
                compartment_id TEXT NOT NULL,
                parent_id TEXT,
                display_name TEXT NOT NULL,
                lifecycle_state TEXT NOT NULL,
                body TEXT NOT NULL,
                time_created INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                generation INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_volume_backups_compartment ON volume_backups(compartment_id);
            CREATE INDEX IF NOT EXISTS idx_volume_backups_volume ON volume_backups(parent_id);

            -- Tag definitions referenced by defined tags
            CREATE TABLE IF NOT EXISTS tag_definitions (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (namespace, key)
            );
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    // ========================================================================
    // Generic record operations
    // ========================================================================

    /// Insert a record
    pub fn insert<R: StoredResource>(&self, record: &R) -> Result<()> {
        let keys = record.keys();
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();

        conn.execute(
            &format!(
                "INSERT INTO {} (id, compartment_id, parent_id, display_name, lifecycle_state, body, time_created, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                R::TABLE.as_str()
            ),
            params![
                keys.id,
                keys.compartment_id,
                keys.parent_id,
                keys.display_name,
                keys.lifecycle_state,
                serde_json::to_string(record)?,
                keys.time_created,
                now,
            ],
        )?;

        debug!("Inserted {} with id {}", R::TABLE.as_str(), keys.id);
        Ok(())
    }

    /// Replace a stored record, returning false if it does not exist
    pub fn update<R: StoredResource>(&self, record: &R) -> Result<bool> {
        let keys = record.keys();
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();

        let rows = conn.execute(
            &format!(
                "UPDATE {} SET display_name = ?1, lifecycle_state = ?2, body = ?3, updated_at = ?4,
                 generation = generation + 1 WHERE id = ?5",
                R::TABLE.as_str()
            ),
            params![
                keys.display_name,
                keys.lifecycle_state,
                serde_json::to_string(record)?,
                now,
                keys.id,
            ],
        )?;

        debug!("Updated {} with id {}", R::TABLE.as_str(), keys.id);
        Ok(rows > 0)
    }

    /// Get a record by ID
    pub fn get<R: StoredResource>(&self, id: &str) -> Result<Option<R>> {
        let conn = self.conn.lock();

        let body: Option<String> = conn
            .query_row(
                &format!("SELECT body FROM {} WHERE id = ?1", R::TABLE.as_str()),
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    /// List records matching the query, newest first
    pub fn list<R: StoredResource>(&self, query: &ListQuery) -> Result<Vec<R>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(&format!(
            "SELECT body FROM {}
             WHERE (?1 IS NULL OR compartment_id = ?1)
               AND (?2 IS NULL OR parent_id = ?2)
               AND (?3 IS NULL OR display_name = ?3)
               AND (?4 IS NULL OR lifecycle_state = ?4)
             ORDER BY time_created DESC, id ASC",
            R::TABLE.as_str()
        ))?;

        let rows = stmt.query_map(
            params![
                query.compartment_id,
                query.parent_id,
                query.display_name,
                query.lifecycle_state,
            ],
            |row| row.get::<_, String>(0),
        )?;

        let mut results = Vec::new();
        for body in rows {
            results.push(serde_json::from_str(&body?)?);
        }

        Ok(results)
    }

    /// Delete a record
    pub fn delete(&self, table: Table, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", table.as_str()),
            params![id],
        )?;

        if rows > 0 {
            debug!("Deleted {} with id {}", table.as_str(), id);
        }

        Ok(rows > 0)
    }

    /// Check if a record exists
    pub fn exists(&self, table: Table, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE id = ?1", table.as_str()),
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // ========================================================================
    // Tag definitions
    // ========================================================================

    /// Register a tag key in a namespace
    pub fn define_tag(&self, namespace: &str, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();

        conn.execute(
            "INSERT OR IGNORE INTO tag_definitions (namespace, key, created_at) VALUES (?1, ?2, ?3)",
            params![namespace, key, now],
        )?;

        Ok(())
    }

    /// Check whether a tag key has been defined
    pub fn tag_defined(&self, namespace: &str, key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tag_definitions WHERE namespace = ?1 AND key = ?2",
            params![namespace, key],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;
    use chrono::{Duration, Utc};

    fn backup(id: &str, volume_id: &str, name: &str, age_secs: i64) -> VolumeBackup {
        VolumeBackup {
            id: id.to_string(),
            compartment_id: "comp".to_string(),
            volume_id: volume_id.to_string(),
            display_name: name.to_string(),
            freeform_tags: FreeformTags::new(),
            defined_tags: DefinedTags::new(),
            lifecycle_state: VolumeBackupLifecycleState::Available,
            backup_type: VolumeBackupType::Incremental,
            source_type: VolumeBackupSourceType::Manual,
            time_created: Utc::now() - Duration::seconds(age_secs),
            time_request_received: None,
            expiration_time: None,
            size_in_gbs: None,
            unique_size_in_gbs: None,
        }
    }

    #[test]
    fn test_crud() {
        let db = Database::open_memory().unwrap();

        let mut record = backup("b1", "v1", "first", 0);
        db.insert(&record).unwrap();

        let fetched: VolumeBackup = db.get("b1").unwrap().unwrap();
        assert_eq!(fetched, record);

        record.display_name = "renamed".to_string();
        assert!(db.update(&record).unwrap());
        let fetched: VolumeBackup = db.get("b1").unwrap().unwrap();
        assert_eq!(fetched.display_name, "renamed");

        assert!(db.delete(Table::VolumeBackups, "b1").unwrap());
        assert!(!db.exists(Table::VolumeBackups, "b1").unwrap());
        assert!(db.get::<VolumeBackup>("b1").unwrap().is_none());
    }

    #[test]
    fn test_list_filters_and_orders_newest_first() {
        let db = Database::open_memory().unwrap();
        db.insert(&backup("old", "v1", "a", 100)).unwrap();
        db.insert(&backup("new", "v1", "a", 1)).unwrap();
        db.insert(&backup("other", "v2", "b", 50)).unwrap();

        let all: Vec<VolumeBackup> = db.list(&ListQuery::default()).unwrap();
        let ids: Vec<_> = all.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "other", "old"]);

        let on_v1: Vec<VolumeBackup> = db
            .list(&ListQuery {
                parent_id: Some("v1".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(on_v1.len(), 2);

        let named: Vec<VolumeBackup> = db
            .list(&ListQuery {
                display_name: Some("b".into()),
                lifecycle_state: Some("AVAILABLE".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].id, "other");
    }

    #[test]
    fn test_records_survive_reopen() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("blockstore.db");

        {
            let db = Database::open(&path).unwrap();
            db.insert(&backup("b1", "v1", "kept", 0)).unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert!(db.exists(Table::VolumeBackups, "b1").unwrap());
    }

    #[test]
    fn test_tag_definitions() {
        let db = Database::open_memory().unwrap();
        assert!(!db.tag_defined("ops", "owner").unwrap());
        db.define_tag("ops", "owner").unwrap();
        db.define_tag("ops", "owner").unwrap();
        assert!(db.tag_defined("ops", "owner").unwrap());
    }
}
