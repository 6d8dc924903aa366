//! Persisted session state.
//!
//! The session is stored as three independent string entries:
//! `access_token`, `refresh_token` and `user_email`. Only the session
//! manager writes them.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use parking_lot::Mutex;
use thiserror::Error;

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    AccessToken,
    RefreshToken,
    UserEmail,
}

impl StoreKey {
    pub const ALL: [StoreKey; 3] = [
        StoreKey::AccessToken,
        StoreKey::RefreshToken,
        StoreKey::UserEmail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::AccessToken => "access_token",
            StoreKey::RefreshToken => "refresh_token",
            StoreKey::UserEmail => "user_email",
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Session file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session file is corrupt: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Keychain access failed: {0}")]
    Keyring(#[from] keyring::Error),
}

pub trait SessionStore: Send + Sync {
    fn get(&self, key: StoreKey) -> Result<Option<String>, StoreError>;

    fn set(&self, key: StoreKey, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: StoreKey) -> Result<(), StoreError>;

    /// Remove every session entry.
    fn clear(&self) -> Result<(), StoreError> {
        for key in StoreKey::ALL {
            self.remove(key)?;
        }
        Ok(())
    }
}

/// The three persisted entries, read together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredSession {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user_email: Option<String>,
}

impl StoredSession {
    pub fn load(store: &dyn SessionStore) -> Result<Self, StoreError> {
        Ok(Self {
            access_token: store.get(StoreKey::AccessToken)?,
            refresh_token: store.get(StoreKey::RefreshToken)?,
            user_email: store.get(StoreKey::UserEmail)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.user_email.is_none()
    }

    /// All three entries, or None if any is missing or blank.
    pub fn complete(&self) -> Option<(&str, &str, &str)> {
        fn non_blank(v: &Option<String>) -> Option<&str> {
            v.as_deref().filter(|s| !s.trim().is_empty())
        }
        Some((
            non_blank(&self.access_token)?,
            non_blank(&self.refresh_token)?,
            non_blank(&self.user_email)?,
        ))
    }
}

/// Session entries kept as one JSON object in the cache directory.
pub struct FileStore {
    cache_dir: PathBuf,
    // Serializes read-modify-write of the file
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            lock: Mutex::new(()),
        }
    }

    fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }

    fn read_entries(&self) -> Result<HashMap<String, String>, StoreError> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let contents = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn write_entries(&self, entries: &HashMap<String, String>) -> Result<(), StoreError> {
        let path = self.session_path();
        if entries.is_empty() {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(entries)?;

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&path)?;
        // mode() only applies on creation
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(contents.as_bytes())?;
        Ok(())
    }
}

impl SessionStore for FileStore {
    fn get(&self, key: StoreKey) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock();
        Ok(self.read_entries()?.remove(key.as_str()))
    }

    fn set(&self, key: StoreKey, value: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        // A corrupt file is replaced rather than blocking new sessions
        let mut entries = self.read_entries().unwrap_or_default();
        entries.insert(key.as_str().to_string(), value.to_string());
        self.write_entries(&entries)
    }

    fn remove(&self, key: StoreKey) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        let mut entries = self.read_entries().unwrap_or_default();
        entries.remove(key.as_str());
        self.write_entries(&entries)
    }

    fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// In-process store for sessions that should not outlive the process.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<StoreKey, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: StoreKey) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(&key).cloned())
    }

    fn set(&self, key: StoreKey, value: &str) -> Result<(), StoreError> {
        self.entries.lock().insert(key, value.to_string());
        Ok(())
    }

    fn remove(&self, key: StoreKey) -> Result<(), StoreError> {
        self.entries.lock().remove(&key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.entries.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise_store(store: &dyn SessionStore) {
        assert_eq!(store.get(StoreKey::AccessToken).unwrap(), None);

        store.set(StoreKey::AccessToken, "T1").unwrap();
        store.set(StoreKey::RefreshToken, "R1").unwrap();
        store.set(StoreKey::UserEmail, "a@b.com").unwrap();
        assert_eq!(store.get(StoreKey::AccessToken).unwrap().as_deref(), Some("T1"));

        store.set(StoreKey::AccessToken, "T2").unwrap();
        let loaded = StoredSession::load(store).unwrap();
        assert_eq!(loaded.complete(), Some(("T2", "R1", "a@b.com")));

        store.remove(StoreKey::RefreshToken).unwrap();
        let loaded = StoredSession::load(store).unwrap();
        assert_eq!(loaded.refresh_token, None);
        assert_eq!(loaded.complete(), None);
        assert!(!loaded.is_empty());

        store.clear().unwrap();
        assert!(StoredSession::load(store).unwrap().is_empty());
    }

    #[test]
    fn test_memory_store() {
        exercise_store(&MemoryStore::new());
    }

    #[test]
    fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"));
        exercise_store(&store);
        assert!(!dir.path().join("nested").join(SESSION_FILE).exists());
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        FileStore::new(dir.path().to_path_buf())
            .set(StoreKey::UserEmail, "a@b.com")
            .unwrap();

        let reopened = FileStore::new(dir.path().to_path_buf());
        assert_eq!(
            reopened.get(StoreKey::UserEmail).unwrap().as_deref(),
            Some("a@b.com")
        );
    }

    #[test]
    fn test_file_store_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SESSION_FILE), "{not json").unwrap();
        let store = FileStore::new(dir.path().to_path_buf());

        assert!(matches!(store.get(StoreKey::AccessToken), Err(StoreError::Json(_))));

        // Writing over a corrupt file starts fresh
        store.set(StoreKey::AccessToken, "T1").unwrap();
        assert_eq!(store.get(StoreKey::AccessToken).unwrap().as_deref(), Some("T1"));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SESSION_FILE);
        std::fs::write(&path, "{}").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let store = FileStore::new(dir.path().to_path_buf());
        store.set(StoreKey::RefreshToken, "R1").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        store.clear().unwrap();
        store.set(StoreKey::AccessToken, "T1").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_complete_rejects_blank_values() {
        let stored = StoredSession {
            access_token: Some("T1".into()),
            refresh_token: Some("  ".into()),
            user_email: Some("a@b.com".into()),
        };
        assert_eq!(stored.complete(), None);
    }

    #[test]
    fn test_store_key_names() {
        let names: Vec<_> = StoreKey::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(names, ["access_token", "refresh_token", "user_email"]);
    }
}
