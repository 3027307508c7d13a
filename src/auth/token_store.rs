//! Encrypted single-file token persistence
//!
//! The process owns exactly one [`TokenRecord`]. It lives on disk as a sealed
//! [`EncryptedBlob`] and in memory as a lazily loaded mirror. Every read and
//! write goes through one async mutex, which keeps file writes strictly
//! serialized.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt as _;
use tokio::sync::Mutex;

use crate::auth::crypto::{self, EncryptedBlob, EncryptionKey};
use crate::error::{Result, VitalgateError};

// ---------------------------------------------------------------------------
// TokenRecord
// ---------------------------------------------------------------------------

/// The upstream credentials granted to this deployment.
///
/// `Debug` is implemented by hand so that tokens never reach logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Bearer token presented to the data API
    pub access_token: String,

    /// Long-lived token used to mint new access tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Space-delimited granted scopes
    #[serde(default)]
    pub scope: String,

    /// Absolute expiry of `access_token`
    #[serde(with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,

    /// Usually `"bearer"`
    pub token_type: String,
}

impl TokenRecord {
    /// Returns `true` when less than `buffer` remains before expiry.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{Duration, Utc};
    /// use vitalgate::auth::token_store::TokenRecord;
    ///
    /// let record = TokenRecord {
    ///     access_token: "a".into(),
    ///     refresh_token: Some("r".into()),
    ///     scope: "read:sleep".into(),
    ///     expires_at: Utc::now() + Duration::minutes(2),
    ///     token_type: "bearer".into(),
    /// };
    /// assert!(record.needs_refresh(Duration::minutes(5)));
    /// assert!(!record.needs_refresh(Duration::seconds(30)));
    /// ```
    pub fn needs_refresh(&self, buffer: Duration) -> bool {
        self.expires_at - Utc::now() < buffer
    }
}

impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"[redacted]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[redacted]"),
            )
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Token-free summary of the current connection, served by `/oauth/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStatus {
    /// Whether a decryptable record is present
    pub connected: bool,
    /// Expiry of the current access token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Granted scopes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenStatus {
    fn from_record(record: Option<&TokenRecord>) -> Self {
        match record {
            Some(r) => Self {
                connected: true,
                expires_at: Some(r.expires_at),
                scope: Some(r.scope.clone()),
            },
            None => Self {
                connected: false,
                expires_at: None,
                scope: None,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// TokenStore
// ---------------------------------------------------------------------------

enum Mirror {
    Unloaded,
    Loaded(Option<TokenRecord>),
}

/// Owner of the encrypted token file and its in-memory copy.
pub struct TokenStore {
    path: PathBuf,
    key: EncryptionKey,
    mirror: Mutex<Mirror>,
}

impl TokenStore {
    /// Creates a store backed by `path`. Nothing is read until first use.
    pub fn new(path: impl Into<PathBuf>, key: EncryptionKey) -> Self {
        Self {
            path: path.into(),
            key,
            mirror: Mutex::new(Mirror::Unloaded),
        }
    }

    /// Location of the token file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current record, or `None` when nothing usable is stored.
    ///
    /// A missing file, a malformed blob, an unknown blob version, and a
    /// failed authentication tag all yield `None`. A failed tag points at
    /// tampering or a rotated key: it is logged as a distinct warning and the
    /// file is removed.
    pub async fn load(&self) -> Option<TokenRecord> {
        let mut mirror = self.mirror.lock().await;
        if let Mirror::Loaded(record) = &*mirror {
            return record.clone();
        }
        let record = self.read_from_disk().await;
        *mirror = Mirror::Loaded(record.clone());
        record
    }

    /// Seals and atomically persists `record`, replacing any previous one.
    ///
    /// The in-memory mirror is updated before the write so that a rotated
    /// refresh token is not lost for this process if the disk write fails.
    ///
    /// # Errors
    ///
    /// Returns IO or serialization errors from writing the file.
    pub async fn save(&self, record: &TokenRecord) -> Result<()> {
        let mut mirror = self.mirror.lock().await;
        *mirror = Mirror::Loaded(Some(record.clone()));

        let plaintext = serde_json::to_vec(record)?;
        let blob = crypto::seal(&plaintext, &self.key)?;
        let encoded = serde_json::to_vec_pretty(&blob)?;
        self.write_atomic(&encoded).await?;

        tracing::info!(
            path = %self.path.display(),
            expires_at = %record.expires_at,
            "Persisted upstream token"
        );
        Ok(())
    }

    /// Removes the stored record. Calling this on an empty store is a no-op.
    ///
    /// # Errors
    ///
    /// Returns IO errors other than "not found".
    pub async fn clear(&self) -> Result<()> {
        let mut mirror = self.mirror.lock().await;
        *mirror = Mirror::Loaded(None);
        self.remove_file().await
    }

    /// Connection summary derived from the current record.
    pub async fn status(&self) -> TokenStatus {
        TokenStatus::from_record(self.load().await.as_ref())
    }

    async fn read_from_disk(&self) -> Option<TokenRecord> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No token file present");
                return None;
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Token file unreadable; treating as absent");
                return None;
            }
        };

        let blob: EncryptedBlob = match serde_json::from_slice(&raw) {
            Ok(blob) => blob,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Token file is malformed; treating as absent");
                return None;
            }
        };

        let plaintext = match crypto::open(&blob, &self.key) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                if matches!(
                    e.downcast_ref::<VitalgateError>(),
                    Some(VitalgateError::CryptoFailure)
                ) {
                    tracing::warn!(
                        path = %self.path.display(),
                        "Token file failed authentication (tampered or wrong key); clearing"
                    );
                    if let Err(e) = self.remove_file().await {
                        tracing::error!(path = %self.path.display(), error = %e, "Failed to remove unreadable token file");
                    }
                } else {
                    tracing::warn!(path = %self.path.display(), error = %e, "Token file format rejected; treating as absent");
                }
                return None;
            }
        };

        match serde_json::from_slice::<TokenRecord>(&plaintext) {
            Ok(record) => Some(record),
            Err(_) => {
                tracing::warn!(path = %self.path.display(), "Decrypted token payload is malformed; treating as absent");
                None
            }
        }
    }

    async fn remove_file(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "Cleared upstream token");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VitalgateError::Io(e).into()),
        }
    }

    async fn write_atomic(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&tmp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
