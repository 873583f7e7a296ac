//! Persisted session record
//!
//! A single record `{sessionCode, companyInfo}` under a fixed key. Only the
//! session manager writes it.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::types::CompanyInfo;
use crate::{Error, Result};

/// Fixed key of the persisted session record
pub const SESSION_STORE_KEY: &str = "auditpro_tally_connection";

/// Session record written on successful connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    /// Session code of the desktop bridge
    pub session_code: String,
    /// Company fetched during the handshake
    pub company_info: CompanyInfo,
}

/// Storage for the persisted session record
pub trait SessionStore: Send + Sync {
    /// Load the record; `Err` when present but unreadable
    fn load(&self) -> Result<Option<PersistedSession>>;

    /// Replace the record
    fn save(&self, session: &PersistedSession) -> Result<()>;

    /// Remove the record (no-op when absent)
    fn clear(&self) -> Result<()>;
}

/// JSON file under a state directory
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    /// Store at `<dir>/auditpro_tally_connection.json`
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{}.json", SESSION_STORE_KEY)),
        }
    }

    /// Record file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<PersistedSession>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| Error::Store(format!("corrupt session record: {}", e)))
    }

    fn save(&self, session: &PersistedSession) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(session)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process store holding the serialized record
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    slot: Mutex<Option<String>>,
}

impl MemorySessionStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preloaded with raw JSON (which may be malformed)
    pub fn from_raw(json: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(json.into())),
        }
    }

    /// Whether a record is present
    pub fn is_empty(&self) -> bool {
        self.slot.lock().is_none()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<PersistedSession>> {
        match self.slot.lock().as_deref() {
            Some(raw) => serde_json::from_str(raw)
                .map(Some)
                .map_err(|e| Error::Store(format!("corrupt session record: {}", e))),
            None => Ok(None),
        }
    }

    fn save(&self, session: &PersistedSession) -> Result<()> {
        *self.slot.lock() = Some(serde_json::to_string(session)?);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot.lock() = None;
        Ok(())
    }
}
