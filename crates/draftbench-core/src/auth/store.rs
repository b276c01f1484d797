//! Token persistence slots and the resolution policy across them.
//!
//! A token can live in up to three places: an in-process session slot, a JSON
//! credential cache (`credentials.json`, written with 0600 permissions), and
//! on desktop builds a raw durable token file that survives cache resets and
//! reinstalls. `TokenStorage` owns the precedence and write-back policy so
//! the session controller never touches a backing store directly.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::paths;

/// A single token backing store.
///
/// Empty values read back as `None`; writing the empty string clears the slot.
pub trait TokenSlot: Send + Sync {
    /// Reads the stored token, if any.
    fn read(&self) -> Result<Option<String>>;

    /// Stores the token, replacing any previous value.
    fn write(&self, token: &str) -> Result<()>;
}

/// In-process slot, scoped to the current session.
///
/// Also the substitute used by tests for the on-disk slots.
#[derive(Debug, Clone, Default)]
pub struct MemorySlot(Arc<Mutex<Option<String>>>);

impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a slot pre-populated with a token.
    pub fn with_token(token: &str) -> Self {
        Self(Arc::new(Mutex::new(Some(token.to_string()))))
    }
}

impl TokenSlot for MemorySlot {
    fn read(&self) -> Result<Option<String>> {
        let guard = self
            .0
            .lock()
            .map_err(|_| anyhow::anyhow!("session token slot poisoned"))?;
        Ok(guard.clone().filter(|t| !t.is_empty()))
    }

    fn write(&self, token: &str) -> Result<()> {
        let mut guard = self
            .0
            .lock()
            .map_err(|_| anyhow::anyhow!("session token slot poisoned"))?;
        *guard = Some(token.to_string());
        Ok(())
    }
}

/// On-disk credential cache structure.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct CredentialCache {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
}

/// JSON credential cache slot (`credentials.json`).
#[derive(Debug, Clone)]
pub struct CacheSlot {
    path: PathBuf,
}

impl CacheSlot {
    /// Cache slot at `${DRAFTBENCH_HOME}/credentials.json`.
    pub fn at_default_path() -> Self {
        Self::at(paths::credentials_path())
    }

    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }
}

impl TokenSlot for CacheSlot {
    fn read(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path).with_context(|| {
            format!("Failed to read credential cache from {}", self.path.display())
        })?;
        let cache: CredentialCache = serde_json::from_str(&contents).with_context(|| {
            format!(
                "Failed to parse credential cache from {}",
                self.path.display()
            )
        })?;

        Ok(cache.token.filter(|t| !t.is_empty()))
    }

    fn write(&self, token: &str) -> Result<()> {
        let cache = CredentialCache {
            token: Some(token.to_string()),
        };
        let contents =
            serde_json::to_string_pretty(&cache).context("Failed to serialize credential cache")?;
        write_restricted(&self.path, &contents)
    }
}

/// Raw durable token file slot.
///
/// Holds the bare token text. Logout overwrites the file with the empty
/// string rather than deleting it.
#[derive(Debug, Clone)]
pub struct FileSlot {
    path: PathBuf,
}

impl FileSlot {
    /// File slot at `${DRAFTBENCH_HOME}/token`.
    pub fn at_default_path() -> Self {
        Self::at(paths::token_file_path())
    }

    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }
}

impl TokenSlot for FileSlot {
    fn read(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read token file from {}", self.path.display()))?;
        let token = contents.trim();
        Ok((!token.is_empty()).then(|| token.to_string()))
    }

    fn write(&self, token: &str) -> Result<()> {
        write_restricted(&self.path, token)
    }
}

/// Writes a credential file with restricted permissions (0600).
fn write_restricted(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .with_context(|| format!("Failed to open {} for writing", path.display()))?;
        file.write_all(contents.as_bytes())
            .with_context(|| format!("Failed to write to {}", path.display()))?;
    }

    #[cfg(not(unix))]
    {
        fs::write(path, contents)
            .with_context(|| format!("Failed to write to {}", path.display()))?;
    }

    Ok(())
}

/// Token storage across all backing slots.
///
/// Precedence on resolution: explicit override > context token > session slot
/// > cache slot > durable file. After any successful resolution the token is
/// written back to the cache (and durable file, when present) so all slots
/// converge to the same value.
pub struct TokenStorage {
    session: Box<dyn TokenSlot>,
    cache: Box<dyn TokenSlot>,
    durable: Option<Box<dyn TokenSlot>>,
}

impl TokenStorage {
    pub fn new(
        session: Box<dyn TokenSlot>,
        cache: Box<dyn TokenSlot>,
        durable: Option<Box<dyn TokenSlot>>,
    ) -> Self {
        Self {
            session,
            cache,
            durable,
        }
    }

    /// Desktop layout: credential cache plus durable token file.
    pub fn desktop() -> Self {
        Self::new(
            Box::new(MemorySlot::new()),
            Box::new(CacheSlot::at_default_path()),
            Some(Box::new(FileSlot::at_default_path())),
        )
    }

    /// Layout without a durable file; anonymous sessions are allowed.
    pub fn ephemeral() -> Self {
        Self::new(
            Box::new(MemorySlot::new()),
            Box::new(CacheSlot::at_default_path()),
            None,
        )
    }

    /// Whether a durable token file backs this storage.
    pub fn is_file_backed(&self) -> bool {
        self.durable.is_some()
    }

    /// First available fast-path token (session, then cache), used to seed
    /// the session context at startup. The durable file is not consulted.
    pub fn peek(&self) -> Option<String> {
        if let Ok(Some(token)) = self.session.read() {
            return Some(token);
        }
        self.cache.read().ok().flatten()
    }

    /// Whether any slot currently holds a token.
    pub fn any_persisted(&self) -> bool {
        if self.peek().is_some() {
            return true;
        }
        self.durable
            .as_ref()
            .is_some_and(|slot| matches!(slot.read(), Ok(Some(_))))
    }

    /// Resolves the current token and converges the slots onto it.
    ///
    /// Returns the empty string when no token exists anywhere (an anonymous
    /// session). An explicit override is returned as-is with no persistence
    /// side effects.
    pub fn resolve(
        &self,
        context_token: Option<&str>,
        override_token: Option<&str>,
    ) -> Result<String> {
        if let Some(token) = override_token.map(str::trim).filter(|t| !t.is_empty()) {
            return Ok(token.to_string());
        }

        let mut candidate = context_token
            .filter(|t| !t.is_empty())
            .map(ToString::to_string);
        if candidate.is_none() {
            candidate = self.session.read()?;
        }
        if candidate.is_none() {
            candidate = self.cache.read()?;
        }
        if let Some(token) = candidate {
            self.sync(&token)?;
            return Ok(token);
        }

        // Fast stores are empty; the durable file is the last resort.
        let Some(durable) = &self.durable else {
            return Ok(String::new());
        };
        match durable.read()? {
            Some(token) => {
                self.cache.write(&token)?;
                Ok(token)
            }
            None => Ok(String::new()),
        }
    }

    /// Writes the token to the cache slot and the durable file when present.
    pub fn sync(&self, token: &str) -> Result<()> {
        self.cache.write(token)?;
        if let Some(durable) = &self.durable {
            durable.write(token)?;
        }
        Ok(())
    }

    /// Clears every slot. The durable file is overwritten with the empty
    /// string rather than removed.
    pub fn clear(&self) -> Result<()> {
        self.session.write("")?;
        self.cache.write("")?;
        if let Some(durable) = &self.durable {
            durable.write("")?;
        }
        Ok(())
    }
}
