#![forbid(unsafe_code)]
//! Per-resource configuration persisted next to the resource data.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::revisioning::RevisioningKind;
use crate::types::{Result, StrataError};

/// Name of the configuration file inside a resource directory.
pub const CONFIG_FILE: &str = "resource.json";

/// Configuration supplied when creating a resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Strategy used to persist and rebuild data pages.
    pub revisioning: RevisioningKind,
    /// Fragments a reader may need to rebuild one page.
    pub revisions_to_restore: u32,
    /// Capacity of the shared page cache, in pages.
    pub cache_pages: usize,
    /// Maximum number of concurrently leased backend readers.
    pub reader_pool_size: usize,
    /// Capacity of each read transaction's rebuilt-page cache.
    pub txn_page_cache: usize,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            revisioning: RevisioningKind::Incremental,
            revisions_to_restore: 4,
            cache_pages: 1024,
            reader_pool_size: 8,
            txn_page_cache: 16,
        }
    }
}

impl ResourceConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the revisioning strategy.
    pub fn with_revisioning(mut self, kind: RevisioningKind) -> Self {
        self.revisioning = kind;
        self
    }

    /// Sets how many fragments may make up one page.
    pub fn with_revisions_to_restore(mut self, revisions: u32) -> Self {
        self.revisions_to_restore = revisions;
        self
    }

    /// Sets the shared page cache capacity.
    pub fn with_cache_pages(mut self, pages: usize) -> Self {
        self.cache_pages = pages;
        self
    }

    /// Sets the reader pool size.
    pub fn with_reader_pool_size(mut self, readers: usize) -> Self {
        self.reader_pool_size = readers;
        self
    }

    /// Sets the per-transaction page cache capacity.
    pub fn with_txn_page_cache(mut self, pages: usize) -> Self {
        self.txn_page_cache = pages;
        self
    }

    /// Checks the settings for consistency.
    pub fn validate(&self) -> Result<()> {
        let min = self.revisioning.min_revisions_to_restore();
        if self.revisions_to_restore < min {
            return Err(StrataError::Config(format!(
                "{} revisioning needs revisions_to_restore >= {min}, got {}",
                self.revisioning, self.revisions_to_restore
            )));
        }
        for (name, value) in [
            ("cache_pages", self.cache_pages),
            ("reader_pool_size", self.reader_pool_size),
            ("txn_page_cache", self.txn_page_cache),
        ] {
            if value == 0 {
                return Err(StrataError::Config(format!("{name} must be at least 1")));
            }
        }
        Ok(())
    }

    /// Loads the configuration stored in `dir`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join(CONFIG_FILE);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StrataError::NotFound("resource configuration"))
            }
            Err(err) => return Err(err.into()),
        };
        let config: Self = serde_json::from_str(&raw)
            .map_err(|err| StrataError::Config(format!("{}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration into `dir`.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        self.validate()?;
        let json = serde_json::to_string_pretty(self)
            .map_err(|err| StrataError::Config(err.to_string()))?;
        fs::write(dir.as_ref().join(CONFIG_FILE), json)?;
        Ok(())
    }
}
