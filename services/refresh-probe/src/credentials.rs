//! Credential storage for the probe's OAuth tokens
//!
//! Holds one access/refresh token pair in memory and mirrors it to a JSON
//! file. Writes use atomic temp-file + rename with 0600 permissions. The
//! access token is read synchronously on every request by the bearer
//! interceptor, so the in-memory copy sits behind a `std::sync::RwLock`
//! that is never held across an await.

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use common::Secret;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::token::TokenResponse;

/// On-disk format.
///
/// `expires` is a unix timestamp in milliseconds (absolute, not a delta).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCredential {
    #[serde(rename = "type")]
    credential_type: String,
    refresh: String,
    access: String,
    expires: u64,
}

struct Tokens {
    access: Secret<String>,
    refresh: Secret<String>,
    expires: u64,
}

impl Tokens {
    fn to_stored(&self) -> StoredCredential {
        StoredCredential {
            credential_type: "oauth".into(),
            refresh: self.refresh.expose().clone(),
            access: self.access.expose().clone(),
            expires: self.expires,
        }
    }
}

/// Thread-safe credential file manager.
pub struct CredentialStore {
    path: PathBuf,
    tokens: RwLock<Tokens>,
    /// Serializes file writes
    write_lock: Mutex<()>,
}

impl CredentialStore {
    /// Load credentials from the given file path.
    ///
    /// A missing file yields empty tokens; the first request then fails
    /// with 401 and the refresh uses whatever `set_refresh_token` provided.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let tokens = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let stored: StoredCredential = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(path = %path.display(), expires = stored.expires, "loaded credentials");
            Tokens {
                access: Secret::new(stored.access),
                refresh: Secret::new(stored.refresh),
                expires: stored.expires,
            }
        } else {
            info!(path = %path.display(), "credential file not found, starting with empty tokens");
            Tokens {
                access: Secret::new(String::new()),
                refresh: Secret::new(String::new()),
                expires: 0,
            }
        };

        Ok(Self {
            path,
            tokens: RwLock::new(tokens),
            write_lock: Mutex::new(()),
        })
    }

    /// `Authorization` header value for the current access token.
    pub fn bearer(&self) -> String {
        self.read(|t| t.access.bearer())
    }

    pub fn refresh_token(&self) -> Secret<String> {
        self.read(|t| t.refresh.clone())
    }

    /// Expiry of the current access token, unix milliseconds.
    pub fn expires(&self) -> u64 {
        self.read(|t| t.expires)
    }

    /// Override the refresh token in memory only.
    pub fn set_refresh_token(&self, refresh: Secret<String>) {
        let mut tokens = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        tokens.refresh.replace(refresh.expose().clone());
    }

    /// Apply a token endpoint response and persist it.
    ///
    /// The refresh token is kept when the response does not rotate it.
    pub async fn update(&self, token: TokenResponse) -> Result<()> {
        let _write = self.write_lock.lock().await;
        let stored = {
            let mut tokens = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
            tokens.access.replace(token.access_token);
            if let Some(refresh) = token.refresh_token {
                tokens.refresh.replace(refresh);
            }
            tokens.expires = now_millis().saturating_add(token.expires_in.saturating_mul(1000));
            tokens.to_stored()
        };
        debug!(expires = stored.expires, "updated tokens");
        write_atomic(&self.path, &stored).await
    }

    fn read<R>(&self, f: impl FnOnce(&Tokens) -> R) -> R {
        let tokens = self.tokens.read().unwrap_or_else(PoisonError::into_inner);
        f(&*tokens)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Write the credential to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets 0600 permissions since the file contains OAuth tokens.
async fn write_atomic(path: &Path, data: &StoredCredential) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotated(access: &str, refresh: Option<&str>) -> TokenResponse {
        TokenResponse {
            access_token: access.into(),
            refresh_token: refresh.map(Into::into),
            expires_in: 3600,
        }
    }

    async fn seeded(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("credentials.json");
        let json = r#"{"type":"oauth","refresh":"rt_1","access":"at_1","expires":1735500000000}"#;
        tokio::fs::write(&path, json).await.unwrap();
        path
    }

    #[tokio::test]
    async fn loads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::load(seeded(&dir).await).await.unwrap();

        assert_eq!(store.bearer(), "Bearer at_1");
        assert_eq!(store.refresh_token().expose(), "rt_1");
        assert_eq!(store.expires(), 1735500000000);
    }

    #[tokio::test]
    async fn missing_file_starts_empty_without_creating_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = CredentialStore::load(path.clone()).await.unwrap();
        assert_eq!(store.bearer(), "Bearer ");
        assert!(store.refresh_token().expose().is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let err = CredentialStore::load(path).await.err().unwrap();
        assert!(matches!(err, Error::CredentialParse(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn update_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = seeded(&dir).await;
        let store = CredentialStore::load(path.clone()).await.unwrap();

        let before = now_millis();
        store.update(rotated("at_2", Some("rt_2"))).await.unwrap();
        assert_eq!(store.bearer(), "Bearer at_2");
        assert!(store.expires() >= before + 3_600_000);

        let reloaded = CredentialStore::load(path).await.unwrap();
        assert_eq!(reloaded.bearer(), "Bearer at_2");
        assert_eq!(reloaded.refresh_token().expose(), "rt_2");
    }

    #[tokio::test]
    async fn update_keeps_refresh_token_when_not_rotated() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::load(seeded(&dir).await).await.unwrap();

        store.update(rotated("at_2", None)).await.unwrap();
        assert_eq!(store.refresh_token().expose(), "rt_1");
    }

    #[tokio::test]
    async fn huge_expires_in_saturates_instead_of_overflowing() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::load(seeded(&dir).await).await.unwrap();

        let token = TokenResponse {
            access_token: "at_2".into(),
            refresh_token: None,
            expires_in: u64::MAX,
        };
        store.update(token).await.unwrap();
        assert_eq!(store.expires(), u64::MAX);
        assert_eq!(store.bearer(), "Bearer at_2");
    }

    #[tokio::test]
    async fn refresh_override_is_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = seeded(&dir).await;
        let store = CredentialStore::load(path.clone()).await.unwrap();

        store.set_refresh_token(Secret::new("rt_env".into()));
        assert_eq!(store.refresh_token().expose(), "rt_env");

        let on_disk = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(on_disk.contains("rt_1"));
    }

    #[tokio::test]
    async fn update_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = CredentialStore::load(path.clone()).await.unwrap();

        store.update(rotated("at_2", Some("rt_2"))).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed["type"], "oauth");
        assert_eq!(parsed["access"], "at_2");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = seeded(&dir).await;
        let store = CredentialStore::load(path.clone()).await.unwrap();
        store.update(rotated("at_2", None)).await.unwrap();

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "credential file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn concurrent_updates_leave_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = seeded(&dir).await;
        let store = std::sync::Arc::new(CredentialStore::load(path.clone()).await.unwrap());

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update(rotated(&format!("at_{i}"), None))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: StoredCredential = serde_json::from_str(&contents).unwrap();
        assert_eq!(format!("Bearer {}", parsed.access), store.bearer());
    }
}
