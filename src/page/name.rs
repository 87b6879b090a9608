use std::collections::BTreeMap;

use xxhash_rust::xxh64::xxh64;

use crate::primitives::bytes::{PageCursor, PageWriter};
use crate::types::{NameKey, Result, StrataError};

/// Interned names of one revision, keyed by a hash of the name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NamePage {
    names: BTreeMap<u32, String>,
}

impl NamePage {
    /// Creates an empty page.
    pub fn new() -> Self {
        Self::default()
    }

    /// Name stored under `key`.
    pub fn get(&self, key: NameKey) -> Option<&str> {
        self.names.get(&key.0).map(String::as_str)
    }

    /// Key under which `name` is stored, without inserting it.
    pub fn lookup(&self, name: &str) -> Option<NameKey> {
        let mut key = name_hash(name);
        loop {
            match self.names.get(&key) {
                Some(existing) if existing == name => return Some(NameKey(key)),
                Some(_) => key = key.wrapping_add(1),
                None => return None,
            }
        }
    }

    /// Interns `name`, returning its key. Collisions probe the next key.
    pub fn intern(&mut self, name: &str) -> NameKey {
        let mut key = name_hash(name);
        loop {
            match self.names.get(&key) {
                Some(existing) if existing == name => return NameKey(key),
                Some(_) => key = key.wrapping_add(1),
                None => {
                    self.names.insert(key, name.to_owned());
                    return NameKey(key);
                }
            }
        }
    }

    /// Number of interned names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when no name was interned.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub(crate) fn encode_body(&self, w: &mut PageWriter) -> Result<()> {
        let count = u32::try_from(self.names.len())
            .map_err(|_| StrataError::Invalid("too many names"))?;
        w.put_u32(count);
        for (key, name) in &self.names {
            w.put_u32(*key);
            w.put_len_prefixed(name.as_bytes())?;
        }
        Ok(())
    }

    pub(crate) fn decode_body(c: &mut PageCursor<'_>) -> Result<Self> {
        let count = c.get_u32()?;
        let mut names = BTreeMap::new();
        for _ in 0..count {
            let key = c.get_u32()?;
            let raw = c.get_len_prefixed()?;
            let name = std::str::from_utf8(raw)
                .map_err(|_| StrataError::Corruption("name is not valid UTF-8"))?;
            names.insert(key, name.to_owned());
        }
        Ok(Self { names })
    }
}

fn name_hash(name: &str) -> u32 {
    xxh64(name.as_bytes(), 0) as u32
}
