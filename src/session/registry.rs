use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use super::Session;
use crate::backend::FileBackend;
use crate::config::{ResourceConfig, CONFIG_FILE};
use crate::types::{Result, StrataError};

/// Open file-backed resources, keyed by directory.
///
/// Owned by the caller: create one at startup, share it by reference and call
/// [`Registry::close_all`] on shutdown. Opening a directory that is already
/// open returns the existing session, so every handle shares one writer slot.
#[derive(Default)]
pub struct Registry {
    open: Mutex<HashMap<PathBuf, Session>>,
}

fn key_for(dir: &Path) -> Result<PathBuf> {
    Ok(fs::canonicalize(dir)?)
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a resource in `dir`, persists `config` and opens it.
    pub fn create_resource(&self, dir: impl AsRef<Path>, config: ResourceConfig) -> Result<Session> {
        let dir = dir.as_ref();
        config.validate()?;
        fs::create_dir_all(dir)?;
        if dir.join(CONFIG_FILE).exists() {
            return Err(StrataError::Usage("resource already exists"));
        }
        config.save(dir)?;
        info!(dir = %dir.display(), revisioning = %config.revisioning, "registry.create");
        self.open_resource(dir)
    }

    /// Opens the resource in `dir`, or returns the session already open on it.
    pub fn open_resource(&self, dir: impl AsRef<Path>) -> Result<Session> {
        let dir = dir.as_ref();
        if !dir.join(CONFIG_FILE).exists() {
            return Err(StrataError::NotFound("resource"));
        }
        let key = key_for(dir)?;
        let mut open = self.open.lock();
        if let Some(session) = open.get(&key) {
            return Ok(session.clone());
        }
        let config = ResourceConfig::load(&key)?;
        let backend = FileBackend::open(&key)?;
        let session = Session::open(Arc::new(backend), config)?;
        open.insert(key, session.clone());
        Ok(session)
    }

    /// True when `dir` is open through this registry.
    pub fn is_open(&self, dir: impl AsRef<Path>) -> bool {
        match key_for(dir.as_ref()) {
            Ok(key) => self.open.lock().contains_key(&key),
            Err(_) => false,
        }
    }

    /// Closes the session open on `dir`.
    pub fn close_resource(&self, dir: impl AsRef<Path>) -> Result<()> {
        let key = key_for(dir.as_ref())?;
        let mut open = self.open.lock();
        let session = open
            .get(&key)
            .ok_or(StrataError::Usage("resource is not open"))?;
        session.close()?;
        open.remove(&key);
        Ok(())
    }

    /// Deletes every revision of the resource in `dir`, keeping its
    /// configuration. Refuses while the resource is open.
    pub fn truncate_resource(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        let config = ResourceConfig::load(dir)?;
        let key = key_for(dir)?;
        let open = self.open.lock();
        if open.contains_key(&key) {
            return Err(StrataError::Usage("cannot truncate an open resource"));
        }
        fs::remove_dir_all(&key)?;
        fs::create_dir_all(&key)?;
        config.save(&key)?;
        info!(dir = %key.display(), "registry.truncate");
        Ok(())
    }

    /// Closes every open session. Sessions that refuse to close (an active
    /// writer) stay registered and the first error is returned.
    pub fn close_all(&self) -> Result<()> {
        let mut open = self.open.lock();
        let mut first_err = None;
        open.retain(|dir, session| match session.close() {
            Ok(()) => false,
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "registry.close_all.refused");
                first_err.get_or_insert(err);
                true
            }
        });
        first_err.map_or(Ok(()), Err)
    }
}
