//! Generic SQLite-backed persistence for any `Record` type.
//!
//! Each collection gets its own table (`id TEXT PRIMARY KEY`, `updated_at
//! INTEGER`, `data TEXT` holding the serialized record) plus a companion JSONL
//! file that every write is appended to, giving a human-diffable audit trail
//! alongside the queryable SQLite copy. Indexed fields are not modeled as
//! real SQL columns — collections vary too much for that to stay generic —
//! so `list`/`delete_by_index` filter in Rust after a full-table fetch. This
//! keeps the store simple at the cost of O(n) scans, acceptable for the
//! collection sizes TaskDaemon actually manages.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::record::{Filter, IndexValue, Record, matches_filters};

/// A single open store, rooted at a directory on disk.
///
/// All operations take the connection's mutex, matching the single-writer /
/// concurrent-readers model described for the hot local store: SQLite's own
/// file lock already serializes writers across processes, the in-process
/// mutex just avoids `SQLITE_BUSY` races between concurrent callers in the
/// same daemon.
pub struct Store {
    conn: Mutex<Connection>,
    root: PathBuf,
}

impl Store {
    /// Open (creating if necessary) a store rooted at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;

        let db_path = root.join("store.sqlite3");
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        debug!(root = %root.display(), "Store::open: opened");
        Ok(Self {
            conn: Mutex::new(conn),
            root,
        })
    }

    /// Open an in-memory store (tests only).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "journal_mode", "MEMORY")?;
        Ok(Self {
            conn: Mutex::new(conn),
            root: PathBuf::from(":memory:"),
        })
    }

    fn ensure_table(conn: &Connection, collection: &str) -> Result<()> {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS \"{collection}\" (
                    id TEXT PRIMARY KEY,
                    updated_at INTEGER NOT NULL,
                    data TEXT NOT NULL
                )"
            ),
            [],
        )?;
        Ok(())
    }

    fn jsonl_path(&self, collection: &str) -> Option<PathBuf> {
        if self.root == PathBuf::from(":memory:") {
            return None;
        }
        Some(self.root.join(format!("{collection}.jsonl")))
    }

    fn append_jsonl<T: Record>(&self, record: &T) -> Result<()> {
        let Some(path) = self.jsonl_path(T::collection_name()) else {
            return Ok(());
        };
        let line = serde_json::to_string(record)?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Insert a new record. Returns its id.
    pub fn create<T: Record>(&self, record: T) -> Result<String> {
        debug!(collection = T::collection_name(), id = record.id(), "Store::create");
        let conn = self.conn.lock().map_err(|_| StoreError::LockUnavailable {
            path: self.root.display().to_string(),
        })?;
        Self::ensure_table(&conn, T::collection_name())?;

        let data = serde_json::to_string(&record)?;
        conn.execute(
            &format!("INSERT INTO \"{}\" (id, updated_at, data) VALUES (?1, ?2, ?3)", T::collection_name()),
            rusqlite::params![record.id(), record.updated_at(), data],
        )?;
        drop(conn);
        self.append_jsonl(&record)?;
        Ok(record.id().to_string())
    }

    /// Fetch a record by id, if present.
    pub fn get<T: Record>(&self, id: &str) -> Result<Option<T>> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockUnavailable {
            path: self.root.display().to_string(),
        })?;
        Self::ensure_table(&conn, T::collection_name())?;

        let mut stmt = conn.prepare(&format!("SELECT data FROM \"{}\" WHERE id = ?1", T::collection_name()))?;
        let mut rows = stmt.query(rusqlite::params![id])?;
        if let Some(row) = rows.next()? {
            let data: String = row.get(0)?;
            Ok(Some(serde_json::from_str(&data)?))
        } else {
            Ok(None)
        }
    }

    /// Replace an existing record in place (must already exist).
    pub fn update<T: Record>(&self, record: &T) -> Result<()> {
        debug!(collection = T::collection_name(), id = record.id(), "Store::update");
        let conn = self.conn.lock().map_err(|_| StoreError::LockUnavailable {
            path: self.root.display().to_string(),
        })?;
        Self::ensure_table(&conn, T::collection_name())?;

        let data = serde_json::to_string(record)?;
        let changed = conn.execute(
            &format!("UPDATE \"{}\" SET updated_at = ?2, data = ?3 WHERE id = ?1", T::collection_name()),
            rusqlite::params![record.id(), record.updated_at(), data],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                collection: T::collection_name(),
                id: record.id().to_string(),
            });
        }
        drop(conn);
        self.append_jsonl(record)?;
        Ok(())
    }

    /// Insert-or-replace: convenience for callers that don't track whether a
    /// record already exists.
    pub fn upsert<T: Record>(&self, record: T) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockUnavailable {
            path: self.root.display().to_string(),
        })?;
        Self::ensure_table(&conn, T::collection_name())?;

        let data = serde_json::to_string(&record)?;
        conn.execute(
            &format!(
                "INSERT INTO \"{}\" (id, updated_at, data) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at, data = excluded.data",
                T::collection_name()
            ),
            rusqlite::params![record.id(), record.updated_at(), data],
        )?;
        drop(conn);
        self.append_jsonl(&record)?;
        Ok(())
    }

    /// List all records matching every filter (ANDed).
    pub fn list<T: Record>(&self, filters: &[Filter]) -> Result<Vec<T>> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockUnavailable {
            path: self.root.display().to_string(),
        })?;
        Self::ensure_table(&conn, T::collection_name())?;

        let mut stmt = conn.prepare(&format!("SELECT data FROM \"{}\" ORDER BY updated_at DESC", T::collection_name()))?;
        let rows = stmt.query_map([], |row| {
            let data: String = row.get(0)?;
            Ok(data)
        })?;

        let mut out = Vec::new();
        for row in rows {
            let data = row?;
            let record: T = serde_json::from_str(&data)?;
            if filters.is_empty() || matches_filters(&record.indexed_fields(), filters) {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Delete a record by id. Returns whether a row was removed.
    pub fn delete<T: Record>(&self, id: &str) -> Result<bool> {
        debug!(collection = T::collection_name(), id, "Store::delete");
        let conn = self.conn.lock().map_err(|_| StoreError::LockUnavailable {
            path: self.root.display().to_string(),
        })?;
        Self::ensure_table(&conn, T::collection_name())?;

        let changed = conn.execute(
            &format!("DELETE FROM \"{}\" WHERE id = ?1", T::collection_name()),
            rusqlite::params![id],
        )?;
        Ok(changed > 0)
    }

    /// Delete every record whose indexed field `field` equals `value`.
    /// Returns the number of records removed.
    pub fn delete_by_index<T: Record>(&self, field: &str, value: IndexValue) -> Result<usize> {
        let filter = Filter::eq(field, value);
        let victims: Vec<T> = self.list(std::slice::from_ref(&filter))?;
        let mut count = 0;
        for v in &victims {
            if self.delete::<T>(v.id())? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Rebuild is a no-op placeholder returning the current row count: this
    /// store has no standalone index tables to rebuild since filtering is
    /// done in-process, but the operation is kept so callers that expect a
    /// maintenance hook (matching `taskstore`'s original SQLite+JSONL design)
    /// have something to call after a bulk JSONL import.
    pub fn rebuild_indexes<T: Record>(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockUnavailable {
            path: self.root.display().to_string(),
        })?;
        Self::ensure_table(&conn, T::collection_name())?;
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", T::collection_name()), [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Flush the WAL to the main database file.
    pub fn sync(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockUnavailable {
            path: self.root.display().to_string(),
        })?;
        conn.pragma_update(None, "wal_checkpoint", "TRUNCATE")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Widget {
        id: String,
        updated_at: i64,
        color: String,
    }

    impl Record for Widget {
        fn id(&self) -> &str {
            &self.id
        }
        fn updated_at(&self) -> i64 {
            self.updated_at
        }
        fn collection_name() -> &'static str {
            "widgets"
        }
        fn indexed_fields(&self) -> HashMap<String, IndexValue> {
            let mut m = HashMap::new();
            m.insert("color".to_string(), IndexValue::String(self.color.clone()));
            m
        }
    }

    #[test]
    fn create_and_get_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let w = Widget {
            id: "w1".into(),
            updated_at: 1,
            color: "red".into(),
        };
        store.create(w.clone()).unwrap();

        let fetched: Widget = store.get("w1").unwrap().unwrap();
        assert_eq!(fetched, w);
    }

    #[test]
    fn get_missing_returns_none() {
        let store = Store::open_in_memory().unwrap();
        let fetched: Option<Widget> = store.get("nope").unwrap();
        assert!(fetched.is_none());
    }

    #[test]
    fn update_requires_existing_row() {
        let store = Store::open_in_memory().unwrap();
        let w = Widget {
            id: "w1".into(),
            updated_at: 1,
            color: "red".into(),
        };
        let err = store.update(&w).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn list_filters_by_indexed_field() {
        let store = Store::open_in_memory().unwrap();
        store
            .create(Widget {
                id: "w1".into(),
                updated_at: 1,
                color: "red".into(),
            })
            .unwrap();
        store
            .create(Widget {
                id: "w2".into(),
                updated_at: 2,
                color: "blue".into(),
            })
            .unwrap();

        let red = store
            .list::<Widget>(&[Filter::eq("color", IndexValue::String("red".into()))])
            .unwrap();
        assert_eq!(red.len(), 1);
        assert_eq!(red[0].id, "w1");
    }

    #[test]
    fn delete_removes_row() {
        let store = Store::open_in_memory().unwrap();
        store
            .create(Widget {
                id: "w1".into(),
                updated_at: 1,
                color: "red".into(),
            })
            .unwrap();

        assert!(store.delete::<Widget>("w1").unwrap());
        assert!(store.get::<Widget>("w1").unwrap().is_none());
        assert!(!store.delete::<Widget>("w1").unwrap());
    }

    #[test]
    fn delete_by_index_removes_all_matching() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..3 {
            store
                .create(Widget {
                    id: format!("w{i}"),
                    updated_at: i,
                    color: "red".into(),
                })
                .unwrap();
        }
        store
            .create(Widget {
                id: "blue1".into(),
                updated_at: 9,
                color: "blue".into(),
            })
            .unwrap();

        let removed = store
            .delete_by_index::<Widget>("color", IndexValue::String("red".into()))
            .unwrap();
        assert_eq!(removed, 3);
        assert_eq!(store.list::<Widget>(&[]).unwrap().len(), 1);
    }

    #[test]
    fn upsert_inserts_then_replaces() {
        let store = Store::open_in_memory().unwrap();
        let w = Widget {
            id: "w1".into(),
            updated_at: 1,
            color: "red".into(),
        };
        store.upsert(w.clone()).unwrap();
        assert_eq!(store.get::<Widget>("w1").unwrap().unwrap().color, "red");

        let w2 = Widget {
            color: "green".into(),
            updated_at: 2,
            ..w
        };
        store.upsert(w2).unwrap();
        assert_eq!(store.get::<Widget>("w1").unwrap().unwrap().color, "green");
    }
}
