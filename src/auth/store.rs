use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use super::credential::Credential;
use super::error::AuthError;

/// Durable storage for the single current credential of one client id.
///
/// `save` replaces the stored value as a whole; a concurrent `load` observes
/// either the old or the new credential. `delete` is idempotent. Backends
/// report an unusable store as [`AuthError::Storage`], never as `Ok(None)`.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn save(&self, credential: &Credential) -> Result<(), AuthError>;
    async fn load(&self) -> Result<Option<Credential>, AuthError>;
    async fn delete(&self) -> Result<(), AuthError>;
}

/// Process-local store, mostly for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryCredentialStore {
    slot: RwLock<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            slot: RwLock::new(Some(credential)),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn save(&self, credential: &Credential) -> Result<(), AuthError> {
        *self.slot.write().await = Some(credential.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<Credential>, AuthError> {
        Ok(self.slot.read().await.clone())
    }

    async fn delete(&self) -> Result<(), AuthError> {
        self.slot.write().await.take();
        Ok(())
    }
}

/// Configuration for file-backed credential storage.
#[derive(Debug, Clone)]
pub struct CredentialStoreConfig {
    pub base_dir: PathBuf,
    pub client_id: String,
}

impl CredentialStoreConfig {
    pub fn new(base_dir: PathBuf, client_id: impl Into<String>) -> Self {
        Self {
            base_dir,
            client_id: client_id.into(),
        }
    }

    pub fn default_dir() -> PathBuf {
        default_data_dir()
    }
}

/// File-backed store writing one TOML file per client id.
///
/// Writes go to a sibling temp file that is renamed into place, so readers
/// never see a partially written credential.
///
/// # Example
/// ```no_run
/// use gitlab_oauth::auth::{Credential, CredentialStore, FileCredentialStore, CredentialStoreConfig};
///
/// # async fn run() -> Result<(), gitlab_oauth::auth::AuthError> {
/// let store = FileCredentialStore::new(CredentialStoreConfig::new(
///     std::path::PathBuf::from("/tmp/gitlab-oauth"),
///     "my-client-id",
/// ));
/// let credential = Credential {
///     access_token: "access".to_string(),
///     token_type: "Bearer".to_string(),
///     expires_in: 7200,
///     refresh_token: "refresh".to_string(),
///     created_at: 1_700_000_000,
/// };
/// store.save(&credential).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    client_id: String,
    // Serializes writers so two saves cannot race on the temp file.
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(config: CredentialStoreConfig) -> Self {
        let path = credential_path(&config.base_dir, &config.client_id);
        Self {
            path,
            client_id: config.client_id,
            write_lock: Mutex::new(()),
        }
    }

    pub fn new_default(client_id: impl Into<String>) -> Self {
        Self::new(CredentialStoreConfig::new(default_data_dir(), client_id))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_parent(path: &Path) -> Result<(), AuthError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(storage_error)?;
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn save(&self, credential: &Credential) -> Result<(), AuthError> {
        let _guard = self.write_lock.lock().await;
        Self::ensure_parent(&self.path).await?;
        let file = CredentialFile {
            version: 1,
            client_id: self.client_id.clone(),
            saved_at: Utc::now(),
            credential: credential.clone(),
        };
        let serialized = toml::to_string(&file)?;
        let tmp = self.path.with_extension("toml.tmp");
        tokio::fs::write(&tmp, serialized)
            .await
            .map_err(storage_error)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(storage_error)?;
        }
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(storage_error)?;
        tracing::debug!(path = %self.path.display(), "credential saved");
        Ok(())
    }

    async fn load(&self) -> Result<Option<Credential>, AuthError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(storage_error(err)),
        };
        let file: CredentialFile = toml::from_str(&raw)?;
        Ok(Some(file.credential))
    }

    async fn delete(&self) -> Result<(), AuthError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "credential deleted");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(storage_error(err)),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct CredentialFile {
    version: u32,
    client_id: String,
    saved_at: DateTime<Utc>,
    credential: Credential,
}

fn storage_error(err: std::io::Error) -> AuthError {
    AuthError::Storage(err.to_string())
}

fn credential_path(base_dir: &Path, client_id: &str) -> PathBuf {
    base_dir.join(format!("{}.toml", normalize_label(client_id)))
}

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "gitlabexplorer", "gitlab-oauth")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".gitlab-oauth"))
}

fn normalize_label(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "default".to_string();
    }
    let mut out = String::with_capacity(trimmed.len());
    for ch in trimmed.chars() {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_alphanumeric() || lower == '-' {
            out.push(lower);
        } else {
            out.push('-');
        }
    }
    if out.trim_matches('-').is_empty() {
        "default".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, FileCredentialStore) {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(CredentialStoreConfig::new(
            dir.path().to_path_buf(),
            "client-123",
        ));
        (dir, store)
    }

    fn credential(access: &str) -> Credential {
        Credential {
            access_token: access.to_string(),
            token_type: "Bearer".to_string(),
            expires_in: 7200,
            refresh_token: "refresh".to_string(),
            created_at: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn file_round_trip_works() {
        let (_dir, store) = temp_store();
        store.save(&credential("access")).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, credential("access"));
    }

    #[tokio::test]
    async fn save_overwrites_previous_credential() {
        let (_dir, store) = temp_store();
        store.save(&credential("first")).await.unwrap();
        store.save(&credential("second")).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "second");
        assert!(!store.path().with_extension("toml.tmp").exists());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, store) = temp_store();
        store.delete().await.unwrap();
        store.save(&credential("access")).await.unwrap();
        store.delete().await.unwrap();
        store.delete().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_serialization_error() {
        let (_dir, store) = temp_store();
        tokio::fs::write(store.path(), "not = [valid").await.unwrap();
        assert!(matches!(
            store.load().await,
            Err(AuthError::Serialization(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, store) = temp_store();
        store.save(&credential("access")).await.unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn memory_store_round_trip_and_delete() {
        let store = MemoryCredentialStore::new();
        assert!(store.load().await.unwrap().is_none());
        store.save(&credential("access")).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(credential("access")));
        store.delete().await.unwrap();
        store.delete().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[test]
    fn client_id_is_normalized_into_file_name() {
        let path = credential_path(Path::new("/base"), "Abc/123 xyz");
        assert_eq!(path, PathBuf::from("/base/abc-123-xyz.toml"));
        let path = credential_path(Path::new("/base"), "  ");
        assert_eq!(path, PathBuf::from("/base/default.toml"));
    }
}
