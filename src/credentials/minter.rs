//! Credential minting collaborator.
//!
//! Turning a messaging-platform login session into a fresh web-app
//! credential happens outside this crate. `CommandMinter` shells out to a
//! helper program per session file; the helper may prompt on the terminal
//! for a one-time code, so stdin and stderr are inherited and the call has
//! no timeout.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{info, warn};

use super::CredentialStore;
use crate::types::{Credential, RacerError};

const SESSION_PREFIX: &str = "session_";
const SESSION_SUFFIX: &str = ".session";

/// Marker of the init data inside a web-app launch URL.
const WEB_APP_DATA_MARKER: &str = "#tgWebAppData=";
const WEB_APP_VERSION_MARKER: &str = "&tgWebAppVersion=";

/// Produces a fresh credential from a stored authentication session.
#[async_trait]
pub trait CredentialMinter: Send + Sync {
    async fn mint(&self, session: &Path) -> Result<Credential, RacerError>;
}

// ---------------------------------------------------------------------------
// Session files
// ---------------------------------------------------------------------------

/// Directory of `session_*.session` files, ordered by name.
#[derive(Debug, Clone)]
pub struct SessionDirectory {
    dir: PathBuf,
}

impl SessionDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// List session files lexicographically. A missing directory is empty.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            warn!(dir = %self.dir.display(), "Session directory not found");
            return Ok(Vec::new());
        }

        let mut sessions = Vec::new();
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list sessions in {}", self.dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            let is_session = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(SESSION_PREFIX) && n.ends_with(SESSION_SUFFIX))
                .unwrap_or(false);
            if is_session && path.is_file() {
                sessions.push(path);
            }
        }
        sessions.sort();
        Ok(sessions)
    }
}

/// Session backing credential slot `index` (`index mod sessionCount`).
///
/// Known limitation: the mapping is purely positional and is not corrected
/// when the store and the session directory differ in size or order.
pub fn session_for_index(sessions: &[PathBuf], index: usize) -> Option<&PathBuf> {
    if sessions.is_empty() {
        None
    } else {
        sessions.get(index % sessions.len())
    }
}

/// Mint from every session and append the new credentials (duplicates
/// skipped). Failing sessions are logged and skipped. Returns the number
/// of credentials added.
pub async fn mint_from_sessions(
    minter: &dyn CredentialMinter,
    sessions: &[PathBuf],
    store: &mut CredentialStore,
) -> Result<usize> {
    let mut added = 0;
    for session in sessions {
        match minter.mint(session).await {
            Ok(credential) => {
                if store.append(credential)? {
                    added += 1;
                    info!(session = %session.display(), "Saved new credential");
                } else {
                    info!(session = %session.display(), "Credential already stored, skipping");
                }
            }
            Err(e) => {
                warn!(session = %session.display(), error = %e, "Failed to mint credential");
            }
        }
    }
    Ok(added)
}

// ---------------------------------------------------------------------------
// External helper
// ---------------------------------------------------------------------------

/// Runs `program [args..] <session-path>` and reads the credential from
/// the last non-empty stdout line.
#[derive(Debug, Clone)]
pub struct CommandMinter {
    program: String,
    args: Vec<String>,
}

impl CommandMinter {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl CredentialMinter for CommandMinter {
    async fn mint(&self, session: &Path) -> Result<Credential, RacerError> {
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(session)
            .stdin(Stdio::inherit())
            .stderr(Stdio::inherit())
            .stdout(Stdio::piped())
            .output()
            .await
            .map_err(|e| RacerError::Minting(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            return Err(RacerError::Minting(format!(
                "{} exited with {} for {}",
                self.program,
                output.status,
                session.display()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        extract_credential(&stdout)
    }
}

/// Accepts either raw init data or a web-app launch URL carrying it in the
/// `tgWebAppData` fragment.
pub fn extract_credential(output: &str) -> Result<Credential, RacerError> {
    let line = output
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .ok_or_else(|| RacerError::Minting("helper printed nothing".into()))?;

    let raw = match line.split_once(WEB_APP_DATA_MARKER) {
        Some((_, fragment)) => {
            let data = fragment
                .split(WEB_APP_VERSION_MARKER)
                .next()
                .unwrap_or(fragment);
            urlencoding::decode(data)
                .map_err(|e| RacerError::Minting(format!("invalid web-app data: {e}")))?
                .into_owned()
        }
        None => line.to_string(),
    };

    let credential = Credential::new(raw);
    credential
        .identity()
        .map_err(|e| RacerError::Minting(format!("helper returned an unusable credential: {e}")))?;
    Ok(credential)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
