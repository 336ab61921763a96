//! Durable access token persistence.
//!
//! The capability interface is exactly four operations so that adapters
//! backed by files, databases, or secret managers stay interchangeable.
//! `load` reports "no token" as `None`, never as an error.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::auth::AccessToken;
use crate::config::Environment;
use crate::error::EtradeError;

/// Pluggable access token storage.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persist the token, replacing any stored one.
    async fn save(&self, token: &AccessToken) -> Result<(), EtradeError>;

    /// Load the stored token. `None` when absent or unreadable.
    async fn load(&self) -> Option<AccessToken>;

    /// Remove the stored token, if any.
    async fn clear(&self) -> Result<(), EtradeError>;

    /// True when a token is stored.
    async fn has_token(&self) -> bool;
}

/// File-backed token store, one JSON file per environment.
///
/// Saves are atomic (write to a temp file, then rename into place) so a
/// crash mid-write cannot corrupt the previous token, and the file is
/// restricted to owner read/write on Unix.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Store for the given environment under the default XDG data
    /// directory (`$XDG_DATA_HOME/etrade-client/`).
    #[must_use]
    pub fn new(environment: Environment) -> Self {
        Self::with_base_dir(default_data_dir(), environment)
    }

    /// Store for the given environment under an explicit base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>, environment: Environment) -> Self {
        let path = base_dir
            .into()
            .join(format!("tokens-{}.json", environment.as_str()));
        Self { path }
    }

    /// Path of the token file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map_or_else(|| "tokens.json".into(), std::ffi::OsStr::to_os_string);
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn save(&self, token: &AccessToken) -> Result<(), EtradeError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EtradeError::Store(format!("create {}: {e}", parent.display())))?;
        }

        let json = serde_json::to_vec_pretty(token)
            .map_err(|e| EtradeError::Store(e.to_string()))?;

        let temp = self.temp_path();
        tokio::fs::write(&temp, &json)
            .await
            .map_err(|e| EtradeError::Store(format!("write {}: {e}", temp.display())))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&temp, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| EtradeError::Store(format!("chmod {}: {e}", temp.display())))?;
        }

        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| EtradeError::Store(format!("rename {}: {e}", self.path.display())))
    }

    async fn load(&self) -> Option<AccessToken> {
        let raw = tokio::fs::read_to_string(&self.path).await.ok()?;
        serde_json::from_str(&raw).ok()
    }

    async fn clear(&self) -> Result<(), EtradeError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EtradeError::Store(format!(
                "remove {}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn has_token(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }
}

/// XDG-compliant data directory for token files.
fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("etrade-client")
}
