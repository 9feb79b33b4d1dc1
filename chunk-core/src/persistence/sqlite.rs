//! SQLite profile storage.
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS user_profiles (
//!     user_id    TEXT PRIMARY KEY,
//!     data       BLOB NOT NULL,
//!     updated_at TEXT NOT NULL,
//!     checksum   TEXT
//! );
//! ```
//!
//! The profile is stored as JSON in a BLOB so new profile fields never need
//! a schema migration. A CRC-32 of the JSON bytes is checked on every read.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info, warn};

use super::{crc32_hex, ProfileBackend};
use crate::config::PersistenceConfig;
use crate::error::{ChunkError, Result};
use crate::types::{UserId, UserProfile};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS user_profiles (
    user_id    TEXT PRIMARY KEY,
    data       BLOB NOT NULL,
    updated_at TEXT NOT NULL,
    checksum   TEXT
);";

/// Profile backend over a single SQLite database.
///
/// The connection sits behind a mutex; SQLite serialises writers anyway and
/// profile rows are small.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    config: PersistenceConfig,
    db_path: PathBuf,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("db_path", &self.db_path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SqliteBackend {
    /// Open (or create) the database at `path` and ensure the schema exists.
    ///
    /// # Errors
    /// Returns [`ChunkError::Database`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&db_path, flags)?;

        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(SCHEMA)?;

        info!(
            path = %db_path.display(),
            wal = config.wal_mode,
            "Profile database opened"
        );

        Ok(Self {
            conn: Mutex::new(conn),
            config: config.clone(),
            db_path,
        })
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    /// Returns [`ChunkError::Database`] on SQLite failures.
    pub fn open_in_memory(config: &PersistenceConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            config: config.clone(),
            db_path: PathBuf::from(":memory:"),
        })
    }

    /// Remove a user's stored row. Returns whether a row existed.
    ///
    /// # Errors
    /// Returns [`ChunkError::Database`] on SQLite failures.
    pub fn delete(&self, user: &UserId) -> Result<bool> {
        let deleted = self
            .conn
            .lock()
            .execute("DELETE FROM user_profiles WHERE user_id = ?1", params![user.as_str()])?;
        Ok(deleted > 0)
    }

    /// Number of stored profiles.
    ///
    /// # Errors
    /// Returns [`ChunkError::Database`] on SQLite failures.
    pub fn profile_count(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .lock()
                .query_row("SELECT COUNT(*) FROM user_profiles", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    // ------------------------------------------------------------------
    // Backup
    // ------------------------------------------------------------------

    /// Copy the database to `dest_path` with SQLite's online-backup API.
    ///
    /// # Errors
    /// Returns [`ChunkError::Database`] on SQLite failures.
    pub fn backup<P: AsRef<Path>>(&self, dest_path: P) -> Result<()> {
        let start = Instant::now();
        let mut dest = Connection::open(dest_path.as_ref())?;
        let conn = self.conn.lock();
        let backup = rusqlite::backup::Backup::new(&conn, &mut dest)?;
        backup.run_to_completion(256, Duration::from_millis(50), None)?;

        info!(
            dest = %dest_path.as_ref().display(),
            elapsed_ms = start.elapsed().as_millis(),
            "Profile database backup completed"
        );
        Ok(())
    }

    /// Write `<db>.bak.1`, shifting older backups up and keeping at most
    /// `backup_count` of them.
    ///
    /// # Errors
    /// Returns [`ChunkError::Database`] or [`ChunkError::Io`] on failure.
    pub fn create_rotating_backup(&self) -> Result<()> {
        let max = self.config.backup_count;
        if self.db_path.as_os_str() == ":memory:" || max == 0 {
            return Ok(());
        }

        for i in (1..max).rev() {
            let src = self.backup_path(i);
            if src.exists() {
                std::fs::rename(&src, self.backup_path(i + 1))?;
            }
        }
        let oldest = self.backup_path(max + 1);
        if oldest.exists() {
            std::fs::remove_file(&oldest)?;
        }

        self.backup(self.backup_path(1))?;
        debug!(max_backups = max, "Rotating backup created");
        Ok(())
    }

    fn backup_path(&self, n: u32) -> PathBuf {
        let mut p = self.db_path.clone();
        let ext = format!(
            "{}.bak.{n}",
            p.extension()
                .map_or(String::new(), |e| e.to_string_lossy().into_owned())
        );
        p.set_extension(ext);
        p
    }

    /// Path to the database file (`:memory:` for in-memory databases).
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run `PRAGMA integrity_check`. Returns `true` when the database is sound.
    ///
    /// # Errors
    /// Returns [`ChunkError::Database`] if the pragma itself fails.
    pub fn integrity_check(&self) -> Result<bool> {
        let result: String =
            self.conn
                .lock()
                .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }
}

impl ProfileBackend for SqliteBackend {
    fn read(&self, user: &UserId) -> Result<Option<UserProfile>> {
        let start = Instant::now();
        let row: Option<(Vec<u8>, Option<String>)> = {
            let conn = self.conn.lock();
            let mut stmt =
                conn.prepare_cached("SELECT data, checksum FROM user_profiles WHERE user_id = ?1")?;
            let row = stmt
                .query_row(params![user.as_str()], |row| Ok((row.get(0)?, row.get(1)?)))
                .optional()?;
            row
        };

        let Some((data, stored_checksum)) = row else {
            return Ok(None);
        };

        if self.config.checksum_enabled {
            if let Some(expected) = stored_checksum {
                let actual = crc32_hex(&data);
                if expected != actual {
                    warn!(
                        user = %user,
                        expected = %expected,
                        actual = %actual,
                        "Profile checksum mismatch, stored data may be corrupt"
                    );
                }
            }
        }

        let profile: UserProfile =
            serde_json::from_slice(&data).map_err(|e| ChunkError::Serialization(e.to_string()))?;

        debug!(
            user = %user,
            facts = profile.facts.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Loaded profile"
        );
        Ok(Some(profile))
    }

    fn write(&self, user: &UserId, profile: &UserProfile) -> Result<()> {
        let start = Instant::now();
        let json =
            serde_json::to_vec(profile).map_err(|e| ChunkError::Serialization(e.to_string()))?;
        let checksum = self.config.checksum_enabled.then(|| crc32_hex(&json));
        let now = Utc::now().to_rfc3339();

        self.conn.lock().execute(
            "INSERT INTO user_profiles (user_id, data, updated_at, checksum)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at,
                checksum = excluded.checksum",
            params![user.as_str(), json, now, checksum],
        )?;

        debug!(
            user = %user,
            facts = profile.facts.len(),
            bytes = json.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Saved profile"
        );
        Ok(())
    }

    fn users(&self) -> Result<Vec<UserId>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT user_id FROM user_profiles ORDER BY user_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut users = Vec::new();
        for row in rows {
            users.push(UserId(row?));
        }
        Ok(users)
    }
}
