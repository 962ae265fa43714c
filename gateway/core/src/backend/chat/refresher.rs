//! Session refresher contract
//!
//! Minting fresh credentials for a chat account means driving a real browser
//! through the login flow. That work is blocking and slow, so the contract is
//! a plain synchronous trait and callers run it on the blocking thread pool
//! (see `ChatAgent::refresh_session`).

use std::process::{Command, Stdio};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use super::credentials::{AccessToken, StoredCookie};
use crate::config::AccountConfig;

/// Credentials produced by a refresher
#[derive(Clone, Debug)]
pub struct RefreshedSession {
    /// New bearer token
    pub access_token: AccessToken,
    /// Full browser cookie set after login
    pub cookies: Vec<StoredCookie>,
}

/// Why a refresh failed
#[derive(Debug, Error)]
pub enum RefreshError {
    /// No refresher is configured
    #[error("no session refresher configured for {0}")]
    Unavailable(String),

    /// The helper could not be started or exited unsuccessfully
    #[error("session refresher for {email} failed: {message}")]
    Failed {
        /// Account email
        email: String,
        /// Exit status or spawn error and stderr excerpt
        message: String,
    },

    /// The helper printed something other than the expected JSON
    #[error("session refresher for {email} printed invalid output: {source}")]
    InvalidOutput {
        /// Account email
        email: String,
        /// Parse error
        source: serde_json::Error,
    },
}

/// Mints fresh credentials for an account
///
/// Implementations block. Failure is unrecoverable for the current call, for
/// example when the login flow hits an interactive challenge.
pub trait SessionRefresher: Send + Sync {
    /// Log in as `account` and return its new credentials
    fn refresh(&self, account: &AccountConfig) -> Result<RefreshedSession, RefreshError>;
}

/// Refresher used when no helper is configured
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailableRefresher;

impl SessionRefresher for UnavailableRefresher {
    fn refresh(&self, account: &AccountConfig) -> Result<RefreshedSession, RefreshError> {
        Err(RefreshError::Unavailable(account.email.clone()))
    }
}

/// Runs an external helper program
///
/// The helper receives `GATEWAY_ACCOUNT_EMAIL` and `GATEWAY_ACCOUNT_PASSWORD`
/// in its environment and prints one JSON object on stdout:
///
/// ```json
/// {"access_token": "...", "expires": "2024-01-01T00:00:00Z", "cookies": [...]}
/// ```
#[derive(Clone, Debug)]
pub struct CommandRefresher {
    program: String,
    args: Vec<String>,
}

#[derive(Deserialize)]
struct HelperOutput {
    access_token: String,
    expires: DateTime<Utc>,
    #[serde(default)]
    cookies: Vec<StoredCookie>,
}

impl CommandRefresher {
    /// Build from an argv; `None` when the argv is empty
    #[must_use]
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl SessionRefresher for CommandRefresher {
    fn refresh(&self, account: &AccountConfig) -> Result<RefreshedSession, RefreshError> {
        let failed = |message: String| RefreshError::Failed {
            email: account.email.clone(),
            message,
        };

        tracing::warn!(source = %account.email, program = %self.program, "Running session refresher");

        let output = Command::new(&self.program)
            .args(&self.args)
            .env("GATEWAY_ACCOUNT_EMAIL", &account.email)
            .env("GATEWAY_ACCOUNT_PASSWORD", &account.password)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| failed(format!("spawn {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let excerpt: String = stderr.chars().take(200).collect();
            return Err(failed(format!("{}: {excerpt}", output.status)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: HelperOutput =
            serde_json::from_str(stdout.trim()).map_err(|source| RefreshError::InvalidOutput {
                email: account.email.clone(),
                source,
            })?;

        Ok(RefreshedSession {
            access_token: AccessToken {
                access_token: parsed.access_token,
                expires: parsed.expires,
            },
            cookies: parsed.cookies,
        })
    }
}
