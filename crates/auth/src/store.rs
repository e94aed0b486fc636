use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tracing::{debug, warn};
use workdesk_core::{Credential, Error, Result};

/// Durable home for the single shared credential.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<Credential>>;
    /// Must not return until the credential is durable.
    fn save(&self, credential: &Credential) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// JSON token file, replaced atomically on every save.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "token.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<Credential>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        match serde_json::from_str::<Credential>(&content) {
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                // An unreadable token is as good as none: consent runs again.
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable token file");
                Ok(None)
            }
        }
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_vec_pretty(credential)?;
        let tmp_path = self.tmp_path();

        {
            let mut file = File::create(&tmp_path)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
            }
            file.write_all(&content)?;
            file.sync_all()?;
        }

        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            Error::Storage(format!("Atomic rename of token file failed: {}", e))
        })?;

        #[cfg(unix)]
        {
            if let Some(parent) = self.path.parent() {
                if let Ok(dir) = File::open(parent) {
                    let _ = dir.sync_all();
                }
            }
        }

        debug!(path = %self.path.display(), "Token persisted");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
            debug!(path = %self.path.display(), "Token file removed");
        }
        Ok(())
    }
}

/// In-process store, for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryTokenStore {
    inner: Mutex<Option<Credential>>,
    saves: AtomicUsize,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            inner: Mutex::new(Some(credential)),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<Credential>>> {
        self.inner
            .lock()
            .map_err(|_| Error::Storage("token store lock poisoned".to_string()))
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<Credential>> {
        Ok(self.lock()?.clone())
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        *self.lock()? = Some(credential.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.lock()? = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn sample() -> Credential {
        Credential {
            access_token: "ya29.token".into(),
            refresh_token: Some("1//refresh".into()),
            expiry: Utc.timestamp_opt(1_800_000_000, 123_456_789).unwrap(),
            granted_scopes: ["https://www.googleapis.com/auth/drive".to_string()]
                .into_iter()
                .collect(),
        }
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));
        assert!(store.load().unwrap().is_none());

        store.save(&sample()).unwrap();
        let reopened = FileTokenStore::new(dir.path().join("token.json"));
        assert_eq!(reopened.load().unwrap(), Some(sample()));
        assert!(!dir.path().join("token.json.tmp").exists());
    }

    #[test]
    fn test_file_store_overwrite_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));
        store.save(&sample()).unwrap();

        let mut newer = sample();
        newer.access_token = "ya29.newer".into();
        newer.expiry = Utc::now() + Duration::hours(1);
        store.save(&newer).unwrap();
        assert_eq!(store.load().unwrap().unwrap().access_token, "ya29.newer");

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        store.clear().unwrap();
    }

    #[test]
    fn test_file_store_ignores_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, "not json").unwrap();
        let store = FileTokenStore::new(path);
        assert!(store.load().unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));
        store.save(&sample()).unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_memory_store_counts_saves() {
        let store = MemoryTokenStore::new();
        store.save(&sample()).unwrap();
        store.save(&sample()).unwrap();
        assert_eq!(store.save_count(), 2);
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
