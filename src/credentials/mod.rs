//! Credential persistence.
//!
//! Keeps the ordered list of account credentials in a flat text file, one
//! credential per line. Position matters: index `i` maps to session file
//! `i mod sessionCount` when a dead credential is re-minted, so every
//! mutation preserves the order of the remaining entries.
//!
//! No locking: the automation loop is the only writer.

pub mod minter;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::types::Credential;

/// File-backed, duplicate-free credential list.
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    entries: Vec<Credential>,
}

impl CredentialStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = read_entries(&path)?;
        info!(path = %path.display(), count = entries.len(), "Credential store loaded");
        Ok(Self { path, entries })
    }

    /// Discard in-memory state and re-read the file.
    pub fn reload(&mut self) -> Result<()> {
        self.entries = read_entries(&self.path)?;
        debug!(count = self.entries.len(), "Credential store reloaded");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[Credential] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&Credential> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, credential: &Credential) -> bool {
        self.entries.contains(credential)
    }

    /// Append at the end. Returns false (and writes nothing) for a duplicate.
    pub fn append(&mut self, credential: Credential) -> Result<bool> {
        if credential.is_empty() || self.contains(&credential) {
            return Ok(false);
        }
        let mut next = self.entries.clone();
        next.push(credential);
        self.commit(next)?;
        Ok(true)
    }

    /// Insert at `index` (clamped to the end), shifting later entries.
    /// Returns false for a duplicate.
    pub fn insert(&mut self, index: usize, credential: Credential) -> Result<bool> {
        if credential.is_empty() || self.contains(&credential) {
            return Ok(false);
        }
        let mut next = self.entries.clone();
        next.insert(index.min(next.len()), credential);
        self.commit(next)?;
        Ok(true)
    }

    /// Overwrite the entry at `index`. Returns false for a duplicate.
    pub fn replace(&mut self, index: usize, credential: Credential) -> Result<bool> {
        if index >= self.entries.len() {
            anyhow::bail!(
                "Credential index {index} out of range (store has {})",
                self.entries.len()
            );
        }
        if credential.is_empty() || self.contains(&credential) {
            return Ok(false);
        }
        let mut next = self.entries.clone();
        next[index] = credential;
        self.commit(next)?;
        Ok(true)
    }

    /// Remove and persist the entry at `index`.
    pub fn remove(&mut self, index: usize) -> Result<Credential> {
        if index >= self.entries.len() {
            anyhow::bail!(
                "Credential index {index} out of range (store has {})",
                self.entries.len()
            );
        }
        let mut next = self.entries.clone();
        let removed = next.remove(index);
        self.commit(next)?;
        Ok(removed)
    }

    /// Write `next` to disk, then adopt it. On a failed write the
    /// in-memory list is left as it was.
    fn commit(&mut self, next: Vec<Credential>) -> Result<()> {
        let mut contents = String::new();
        for entry in &next {
            contents.push_str(entry.as_str());
            contents.push('\n');
        }
        std::fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write credentials to {}", self.path.display()))?;
        debug!(path = %self.path.display(), count = next.len(), "Credentials persisted");
        self.entries = next;
        Ok(())
    }
}

fn read_entries(path: &Path) -> Result<Vec<Credential>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read credentials from {}", path.display()))?;

    let mut entries: Vec<Credential> = Vec::new();
    for (line_no, line) in raw.lines().enumerate() {
        let credential = Credential::new(line.trim_end_matches('\r'));
        if credential.is_empty() {
            continue;
        }
        if entries.contains(&credential) {
            warn!(
                path = %path.display(),
                line = line_no + 1,
                index = entries.len(),
                "Duplicate credential dropped; later entries shift down one slot"
            );
            continue;
        }
        entries.push(credential);
    }
    Ok(entries)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
