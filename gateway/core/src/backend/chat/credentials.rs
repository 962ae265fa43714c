//! Persisted session credentials
//!
//! Each chat account keeps two files under the auth directory:
//!
//! - `{email}_accessToken.json`: `{"accessToken": "...", "expires": "<RFC3339>"}`
//! - `{email}_cookies.json`: `[{"name", "value", "domain", "path"}, ...]`
//!
//! A missing or empty file is not an error; the account simply starts
//! unauthenticated. Writes create the directory and replace the file through a
//! temporary sibling and a rename.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cookie that must never be replayed into a session
pub const CSRF_COOKIE: &str = "__Host-next-auth.csrf-token";

/// Credential store failures
#[derive(Debug, Error)]
pub enum CredentialError {
    /// File system failure
    #[error("credential file {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// File content is not the expected JSON
    #[error("credential file {path} is malformed: {source}")]
    Malformed {
        /// File involved
        path: PathBuf,
        /// Underlying error
        source: serde_json::Error,
    },
}

/// Bearer token with its expiry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    /// Bearer value
    #[serde(rename = "accessToken")]
    pub access_token: String,
    /// Instant after which the backend rejects the token
    pub expires: DateTime<Utc>,
}

impl AccessToken {
    /// Whether the token is still usable at `now`
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires
    }
}

/// One browser cookie
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCookie {
    #[allow(missing_docs)]
    pub name: String,
    #[allow(missing_docs)]
    pub value: String,
    #[allow(missing_docs)]
    #[serde(default)]
    pub domain: String,
    #[allow(missing_docs)]
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_path() -> String {
    "/".to_string()
}

/// Replace cookies by name, appending new ones
pub fn merge_cookies(into: &mut Vec<StoredCookie>, updates: impl IntoIterator<Item = StoredCookie>) {
    for update in updates {
        match into.iter_mut().find(|c| c.name == update.name) {
            Some(existing) => *existing = update,
            None => into.push(update),
        }
    }
}

/// Per-account token and cookie files
#[derive(Clone, Debug)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    /// Store rooted at `dir`; the directory is created on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the files
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn token_path(&self, email: &str) -> PathBuf {
        self.dir.join(format!("{email}_accessToken.json"))
    }

    fn cookies_path(&self, email: &str) -> PathBuf {
        self.dir.join(format!("{email}_cookies.json"))
    }

    /// Load the persisted token, `None` when there is none
    ///
    /// Expired tokens are returned as well; callers decide what to do with them.
    pub async fn load_token(&self, email: &str) -> Result<Option<AccessToken>, CredentialError> {
        read_json(&self.token_path(email)).await
    }

    /// Persist a token
    pub async fn save_token(&self, email: &str, token: &AccessToken) -> Result<(), CredentialError> {
        self.write_json(&self.token_path(email), token).await
    }

    /// Load persisted cookies, empty when there are none
    pub async fn load_cookies(&self, email: &str) -> Result<Vec<StoredCookie>, CredentialError> {
        Ok(read_json(&self.cookies_path(email)).await?.unwrap_or_default())
    }

    /// Persist cookies
    pub async fn save_cookies(
        &self,
        email: &str,
        cookies: &[StoredCookie],
    ) -> Result<(), CredentialError> {
        self.write_json(&self.cookies_path(email), &cookies).await
    }

    async fn write_json<T: Serialize + ?Sized>(
        &self,
        path: &Path,
        value: &T,
    ) -> Result<(), CredentialError> {
        let io_err = |source| CredentialError::Io {
            path: path.to_path_buf(),
            source,
        };

        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;

        let bytes = serde_json::to_vec_pretty(value).map_err(|source| CredentialError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, path).await.map_err(io_err)?;

        tracing::info!(path = %path.display(), "Save success");
        Ok(())
    }
}

async fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>, CredentialError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(CredentialError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| CredentialError::Malformed {
            path: path.to_path_buf(),
            source,
        })
}
