//! SQLite-backed indexed store.

use super::{check_key, Access, StorageBackend, StoreRecord};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension, TransactionBehavior};
use serde_json::{Map, Number, Value};
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How a table lays out its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLayout {
    /// `(id TEXT PRIMARY KEY, record TEXT NOT NULL)` with the record as JSON.
    Document,
    /// One column per field, keyed by an `id` column. Read-only.
    Columns,
}

struct Handle {
    conn: Connection,
    layout: RowLayout,
}

/// Backend storing one record per row, keyed by id.
///
/// Tables this store creates use [`RowLayout::Document`]. An existing table
/// written by another service may instead keep one column per field
/// ([`RowLayout::Columns`]); such a table is read by mapping column names
/// onto the record's fields and can only be opened read-only.
///
/// SQLite provides per-key atomicity; the mutex only exists because
/// [`Connection`] is not `Sync`. The connection is opened lazily in
/// read-only mode so that a database created after startup is picked up.
pub struct IndexedStore<R> {
    path: PathBuf,
    table: String,
    access: Access,
    busy_timeout: Duration,
    conn: Mutex<Option<Handle>>,
    _marker: PhantomData<fn() -> R>,
}

impl<R: StoreRecord> IndexedStore<R> {
    /// Open the store. In read-write mode the database file and table are
    /// created immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid table name or an existing
    /// read-write table without a `record` column, or a storage error if a
    /// read-write database cannot be created.
    pub fn open(path: PathBuf, table: &str, access: Access, busy_timeout: Duration) -> Result<Self> {
        validate_table_name(table)?;

        let store = Self {
            path,
            table: table.to_string(),
            access,
            busy_timeout,
            conn: Mutex::new(None),
            _marker: PhantomData,
        };

        if access == Access::ReadWrite {
            let handle = store.connect()?;
            *store.conn.lock() = handle;
            info!("Opened indexed store {}", store.describe());
        }

        Ok(store)
    }

    /// Path of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Layout of the table, or `None` if a read-only store does not exist yet.
    ///
    /// # Errors
    ///
    /// Same as [`StorageBackend::get`].
    pub fn layout(&self) -> Result<Option<RowLayout>> {
        self.with_connection(|_, layout| Ok(layout))
    }

    fn connect(&self) -> Result<Option<Handle>> {
        match self.access {
            Access::ReadWrite => {
                if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(dir).map_err(|e| {
                        Error::StorageUnavailable(format!("creating {}: {e}", dir.display()))
                    })?;
                }
                let conn = Connection::open(&self.path).map_err(|e| self.sqlite_error(e))?;
                conn.busy_timeout(self.busy_timeout)
                    .map_err(|e| self.sqlite_error(e))?;
                conn.execute(
                    &format!(
                        "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY, record TEXT NOT NULL)",
                        self.table
                    ),
                    [],
                )
                .map_err(|e| self.sqlite_error(e))?;
                match self.detect_layout(&conn)? {
                    Some(RowLayout::Document) => Ok(Some(Handle {
                        conn,
                        layout: RowLayout::Document,
                    })),
                    _ => Err(Error::Config(format!(
                        "{} has no record column and cannot be written",
                        self.describe()
                    ))),
                }
            }
            Access::ReadOnly => {
                if !self.path.exists() {
                    debug!("Indexed store {} does not exist yet", self.path.display());
                    return Ok(None);
                }
                let conn = Connection::open_with_flags(
                    &self.path,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )
                .map_err(|e| self.sqlite_error(e))?;
                conn.busy_timeout(self.busy_timeout)
                    .map_err(|e| self.sqlite_error(e))?;
                if let Some(layout) = self.detect_layout(&conn)? {
                    debug!("Reading {} as {layout:?} rows", self.describe());
                    Ok(Some(Handle { conn, layout }))
                } else {
                    debug!("Table {} not present in {}", self.table, self.path.display());
                    Ok(None)
                }
            }
        }
    }

    /// Inspect the table's columns. `None` if the table does not exist.
    fn detect_layout(&self, conn: &Connection) -> Result<Option<RowLayout>> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({})", self.table))
            .map_err(|e| self.sqlite_error(e))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<String>>>())
            .map_err(|e| self.sqlite_error(e))?;

        if columns.is_empty() {
            Ok(None)
        } else if columns.iter().any(|c| c == "record") {
            Ok(Some(RowLayout::Document))
        } else if columns.iter().any(|c| c == "id") {
            Ok(Some(RowLayout::Columns))
        } else {
            Err(Error::Config(format!(
                "{} has neither a record nor an id column",
                self.describe()
            )))
        }
    }

    /// Run `f` against the connection, opening it first if needed.
    ///
    /// Returns `Ok(None)` if a read-only store does not exist yet. A failed
    /// call drops the cached connection so the next call reconnects.
    fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection, RowLayout) -> Result<T>,
    ) -> Result<Option<T>> {
        let mut guard = self.conn.lock();
        if guard.is_none() {
            *guard = self.connect()?;
        }
        let Some(handle) = guard.as_mut() else {
            return Ok(None);
        };

        match f(&mut handle.conn, handle.layout) {
            Ok(value) => Ok(Some(value)),
            Err(e @ Error::StorageUnavailable(_)) => {
                *guard = None;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.access {
            Access::ReadWrite => Ok(()),
            Access::ReadOnly => Err(Error::StorageUnavailable(format!(
                "{} is opened read-only",
                self.describe()
            ))),
        }
    }

    fn decode(&self, key: &str, text: &str) -> Result<R> {
        serde_json::from_str(text).map_err(|e| {
            Error::CorruptStore(format!("{} row {key:?}: {e}", self.describe()))
        })
    }

    fn decode_columns(&self, key: &str, fields: Map<String, Value>) -> Result<R> {
        serde_json::from_value(Value::Object(fields)).map_err(|e| {
            Error::CorruptStore(format!("{} row {key:?}: {e}", self.describe()))
        })
    }

    fn encode(&self, record: &R) -> Result<String> {
        serde_json::to_string(record)
            .map_err(|e| Error::StorageUnavailable(format!("encoding record: {e}")))
    }

    fn sqlite_error(&self, err: rusqlite::Error) -> Error {
        if let rusqlite::Error::SqliteFailure(ffi, _) = &err {
            if matches!(ffi.code, ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase) {
                return Error::CorruptStore(format!("{}: {err}", self.describe()));
            }
        }
        Error::StorageUnavailable(format!("{}: {err}", self.describe()))
    }

    fn upsert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (id, record) VALUES (?1, ?2) \
             ON CONFLICT(id) DO UPDATE SET record = excluded.record",
            self.table
        )
    }

    fn get_document(&self, conn: &Connection, key: &str) -> Result<Option<R>> {
        let sql = format!("SELECT record FROM {} WHERE id = ?1", self.table);
        conn.query_row(&sql, params![key], |row| row.get::<_, String>(0))
            .optional()
            .map_err(|e| self.sqlite_error(e))?
            .map(|text| self.decode(key, &text))
            .transpose()
    }

    fn get_columns(&self, conn: &Connection, key: &str) -> Result<Option<R>> {
        let mut stmt = conn
            .prepare(&format!("SELECT * FROM {} WHERE id = ?1", self.table))
            .map_err(|e| self.sqlite_error(e))?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        stmt.query_row(params![key], |row| {
            let mut fields = Map::new();
            for (i, name) in names.iter().enumerate() {
                fields.insert(name.clone(), column_value(row.get_ref(i)?));
            }
            Ok(fields)
        })
        .optional()
        .map_err(|e| self.sqlite_error(e))?
        .map(|fields| self.decode_columns(key, fields))
        .transpose()
    }
}

impl<R: StoreRecord> StorageBackend<R> for IndexedStore<R> {
    fn get(&self, key: &str) -> Result<Option<R>> {
        let found = self.with_connection(|conn, layout| match layout {
            RowLayout::Document => self.get_document(conn, key),
            RowLayout::Columns => self.get_columns(conn, key),
        })?;
        Ok(found.flatten())
    }

    fn put(&self, key: &str, record: &R) -> Result<()> {
        check_key(key, record)?;
        self.ensure_writable()?;
        let encoded = self.encode(record)?;

        self.with_connection(|conn, _| {
            conn.execute(&self.upsert_sql(), params![key, encoded])
                .map(|_| ())
                .map_err(|e| self.sqlite_error(e))
        })?
        .ok_or_else(|| Error::StorageUnavailable(format!("{} is not open", self.describe())))
    }

    fn append_or_upsert(
        &self,
        key: &str,
        record: R,
        keep_existing: &dyn Fn(&R) -> bool,
    ) -> Result<R> {
        check_key(key, &record)?;
        self.ensure_writable()?;
        let encoded = self.encode(&record)?;
        let select = format!("SELECT record FROM {} WHERE id = ?1", self.table);

        self.with_connection(|conn, _| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| self.sqlite_error(e))?;

            let existing: Option<String> = tx
                .query_row(&select, params![key], |row| row.get(0))
                .optional()
                .map_err(|e| self.sqlite_error(e))?;

            if let Some(text) = existing {
                match self.decode(key, &text) {
                    Ok(existing) if keep_existing(&existing) => return Ok(existing),
                    Ok(_) => {}
                    Err(e) => warn!("Overwriting unreadable row: {e}"),
                }
            }

            tx.execute(&self.upsert_sql(), params![key, encoded])
                .map_err(|e| self.sqlite_error(e))?;
            tx.commit().map_err(|e| self.sqlite_error(e))?;
            Ok(record)
        })?
        .ok_or_else(|| Error::StorageUnavailable(format!("{} is not open", self.describe())))
    }

    fn len(&self) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table);
        let count = self.with_connection(|conn, _| {
            conn.query_row(&sql, [], |row| row.get::<_, i64>(0))
                .map_err(|e| self.sqlite_error(e))
        })?;
        Ok(count.map_or(0, |n| usize::try_from(n).unwrap_or(0)))
    }

    fn describe(&self) -> String {
        format!("indexed:{}#{}", self.path.display(), self.table)
    }
}

/// JSON value for one SQLite column. Blobs carry no record fields.
fn column_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => Value::Null,
        ValueRef::Integer(n) => Value::from(n),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn validate_table_name(table: &str) -> Result<()> {
    let mut chars = table.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid table name: {table:?}")))
    }
}
