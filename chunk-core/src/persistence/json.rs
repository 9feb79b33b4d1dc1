//! One JSON file per user.
//!
//! Files are named after the user id. ASCII letters, digits and `_` are kept
//! as they are; every other byte becomes `-` followed by two lowercase hex
//! digits, so distinct ids always map to distinct files. Writes land in a
//! temp file first and are renamed into place so a crash never leaves half a
//! profile on disk.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::ProfileBackend;
use crate::error::{ChunkError, Result};
use crate::types::{UserId, UserProfile};

/// Profile backend over a directory of `<user>.json` files.
#[derive(Debug)]
pub struct JsonDirBackend {
    dir: PathBuf,
}

impl JsonDirBackend {
    /// Use `dir` as the profile directory, creating it if needed.
    ///
    /// # Errors
    /// Returns [`ChunkError::Io`] if the directory cannot be created.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        info!(dir = %dir.display(), "Profile directory opened");
        Ok(Self { dir })
    }

    /// File that holds a user's profile.
    #[must_use]
    pub fn profile_path(&self, user: &UserId) -> PathBuf {
        self.dir.join(format!("{}.json", encode_file_stem(user.as_str())))
    }
}

/// Injective mapping from a user id to a file stem.
fn encode_file_stem(id: &str) -> String {
    let mut stem = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' {
            stem.push(char::from(byte));
        } else {
            let _ = write!(stem, "-{byte:02x}");
        }
    }
    stem
}

impl ProfileBackend for JsonDirBackend {
    fn read(&self, user: &UserId) -> Result<Option<UserProfile>> {
        let path = self.profile_path(user);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let profile: UserProfile =
            serde_json::from_slice(&bytes).map_err(|e| ChunkError::Serialization(e.to_string()))?;
        if profile.user_id != *user {
            return Err(ChunkError::Persistence {
                user: user.to_string(),
                reason: format!("{} holds the profile of {}", path.display(), profile.user_id),
            });
        }
        Ok(Some(profile))
    }

    fn write(&self, user: &UserId, profile: &UserProfile) -> Result<()> {
        let path = self.profile_path(user);
        let json = serde_json::to_vec_pretty(profile)
            .map_err(|e| ChunkError::Serialization(e.to_string()))?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, &path)?;

        debug!(user = %user, bytes = json.len(), "Saved profile file");
        Ok(())
    }

    fn users(&self) -> Result<Vec<UserId>> {
        let mut users = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(bytes) = fs::read(&path).ok()
                    && let Ok(profile) = serde_json::from_slice::<UserProfile>(&bytes)
                {
                    users.push(profile.user_id);
                }
            }
        }
        users.sort();
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = JsonDirBackend::open(dir.path()).expect("open");
        let user = UserId::new("1234");
        let mut profile = UserProfile::new(user.clone());
        profile.topics.insert("astronomy".into());

        backend.write(&user, &profile).expect("write");
        assert_eq!(backend.read(&user).expect("read"), Some(profile));
        assert!(dir.path().join("1234.json").exists());
        assert!(!dir.path().join("1234.json.tmp").exists());
    }

    #[test]
    fn missing_file_reads_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = JsonDirBackend::open(dir.path()).expect("open");
        assert!(backend.read(&UserId::new("ghost")).expect("read").is_none());
    }

    #[test]
    fn hostile_ids_stay_inside_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = JsonDirBackend::open(dir.path()).expect("open");
        let path = backend.profile_path(&UserId::new("../../etc/passwd"));
        assert_eq!(path.parent(), Some(dir.path()));
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some("-2e-2e-2f-2e-2e-2fetc-2fpasswd.json")
        );
    }

    #[test]
    fn similar_ids_get_separate_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = JsonDirBackend::open(dir.path()).expect("open");
        let dotted = UserId::new("a.b");
        let underscored = UserId::new("a_b");
        let dashed = UserId::new("a-2eb");

        let mut secret = UserProfile::new(dotted.clone());
        secret.topics.insert("secret of a".into());
        backend.write(&dotted, &secret).expect("write dotted");
        backend
            .write(&underscored, &UserProfile::new(underscored.clone()))
            .expect("write underscored");
        backend.write(&dashed, &UserProfile::new(dashed.clone())).expect("write dashed");

        let loaded = backend.read(&dotted).expect("read").expect("stored");
        assert_eq!(loaded.user_id, dotted);
        assert!(loaded.topics.contains("secret of a"));
        assert_eq!(backend.read(&underscored).expect("read").map(|p| p.user_id), Some(underscored));
        assert_eq!(backend.users().expect("users").len(), 3);
    }

    #[test]
    fn file_holding_another_user_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = JsonDirBackend::open(dir.path()).expect("open");
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        backend.write(&alice, &UserProfile::new(alice.clone())).expect("write");
        fs::copy(backend.profile_path(&alice), backend.profile_path(&bob)).expect("copy");

        let err = backend.read(&bob).expect_err("mismatched owner");
        assert!(matches!(err, ChunkError::Persistence { .. }));
    }

    #[test]
    fn users_reads_ids_from_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = JsonDirBackend::open(dir.path()).expect("open");
        for id in ["a/b", "c"] {
            let user = UserId::new(id);
            backend.write(&user, &UserProfile::new(user.clone())).expect("write");
        }
        assert_eq!(
            backend.users().expect("users"),
            vec![UserId::new("a/b"), UserId::new("c")]
        );
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = JsonDirBackend::open(dir.path()).expect("open");
        fs::write(dir.path().join("bad.json"), b"{not json").expect("write");
        let err = backend.read(&UserId::new("bad")).expect_err("corrupt");
        assert!(matches!(err, ChunkError::Serialization(_)));
    }
}
