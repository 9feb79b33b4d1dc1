//! Durable storage for user profiles.
//!
//! The profile store only needs two operations from storage: read a whole
//! profile and write a whole profile. Each backend serialises the profile as
//! JSON; where that JSON lives is the backend's business.
//!
//! - [`SqliteBackend`]: one row per user, checksummed, with backups.
//! - [`JsonDirBackend`]: one pretty-printed file per user.
//! - [`MemoryBackend`]: in-process map for tests and benchmarks.

mod json;
mod sqlite;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::PersistenceConfig;
use crate::error::{ChunkError, Result};
use crate::types::{UserId, UserProfile};

pub use json::JsonDirBackend;
pub use sqlite::SqliteBackend;

/// Whole-profile key/value storage.
///
/// Implementations must be safe to share between threads. Calls may block;
/// async callers should run them on a blocking pool.
pub trait ProfileBackend: Send + Sync + fmt::Debug {
    /// Load a user's profile, or `None` if nothing was ever written.
    ///
    /// # Errors
    /// Returns an error if storage cannot be read or the stored data is
    /// undecodable.
    fn read(&self, user: &UserId) -> Result<Option<UserProfile>>;

    /// Replace a user's stored profile.
    ///
    /// # Errors
    /// Returns an error if the write did not reach storage.
    fn write(&self, user: &UserId, profile: &UserProfile) -> Result<()>;

    /// Every user with a stored profile.
    ///
    /// # Errors
    /// Returns an error if storage cannot be enumerated.
    fn users(&self) -> Result<Vec<UserId>>;
}

/// Open the backend named by `config.backend`.
///
/// # Errors
/// Returns [`ChunkError::Config`] for an unknown backend name, or the
/// backend's own error if it cannot be opened.
pub fn open_backend(config: &PersistenceConfig) -> Result<Arc<dyn ProfileBackend>> {
    match config.backend.as_str() {
        "sqlite" => {
            if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Ok(Arc::new(SqliteBackend::open(&config.path, config)?))
        }
        "json" => Ok(Arc::new(JsonDirBackend::open(&config.path)?)),
        "memory" => Ok(Arc::new(MemoryBackend::new())),
        other => Err(ChunkError::Config(format!(
            "unknown persistence backend '{other}' (expected sqlite, json, or memory)"
        ))),
    }
}

// ---------------------------------------------------------------------------
// MemoryBackend
// ---------------------------------------------------------------------------

/// Volatile backend. Profiles are stored as clones.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    profiles: RwLock<HashMap<UserId, UserProfile>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl ProfileBackend for MemoryBackend {
    fn read(&self, user: &UserId) -> Result<Option<UserProfile>> {
        Ok(self.profiles.read().get(user).cloned())
    }

    fn write(&self, user: &UserId, profile: &UserProfile) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ChunkError::Persistence {
                user: user.to_string(),
                reason: "memory backend is set to fail writes".to_string(),
            });
        }
        self.profiles.write().insert(user.clone(), profile.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn users(&self) -> Result<Vec<UserId>> {
        let mut users: Vec<UserId> = self.profiles.read().keys().cloned().collect();
        users.sort();
        Ok(users)
    }
}

// ---------------------------------------------------------------------------
// CRC-32 checksum helper
// ---------------------------------------------------------------------------

/// CRC-32 (ISO 3309) of `data` as lowercase hex.
pub(crate) fn crc32_hex(data: &[u8]) -> String {
    format!("{:08x}", crc32_compute(data))
}

fn crc32_compute(data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB8_8320;
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            if crc & 1 == 1 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}
