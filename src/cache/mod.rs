#![forbid(unsafe_code)]
//! Bounded cache of decoded committed pages.
//!
//! The cache is a lookup table only: every entry can be rebuilt from the
//! backend, and evicting one never loses data. Pages are immutable once
//! committed, so entries are shared as `Arc<Page>`.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, trace};

use crate::backend::{Backend, BackendReader};
use crate::page::{Page, PageAddr};
use crate::types::{Result, StrataError};

/// Counters describing cache behavior.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups served from memory.
    pub hits: u64,
    /// Lookups that went to the backend.
    pub misses: u64,
    /// Entries pushed out by capacity pressure.
    pub evictions: u64,
    /// Entries currently resident.
    pub resident: usize,
    /// Readers currently leased from the pool.
    pub leased_readers: usize,
}

/// Shared page cache with a leased pool of backend readers.
pub struct PageCache {
    backend: Arc<dyn Backend>,
    pages: Mutex<LruCache<u64, Arc<Page>>>,
    loading: Mutex<HashMap<u64, Arc<Mutex<()>>>>,
    pool: ReaderPool,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

struct ReaderPool {
    state: Mutex<PoolState>,
    available: Condvar,
    capacity: usize,
}

struct PoolState {
    idle: Vec<Box<dyn BackendReader>>,
    leased: usize,
}

/// Scoped reader lease. The reader goes back to the pool on drop, including
/// when the read or the decode fails.
struct ReaderLease<'a> {
    pool: &'a ReaderPool,
    reader: Option<Box<dyn BackendReader>>,
}

impl ReaderLease<'_> {
    fn read(&mut self, addr: PageAddr) -> Result<Vec<u8>> {
        match self.reader.as_mut() {
            Some(reader) => reader.read(addr),
            None => Err(StrataError::Usage("reader lease already released")),
        }
    }
}

impl Drop for ReaderLease<'_> {
    fn drop(&mut self) {
        let mut state = self.pool.state.lock();
        state.leased -= 1;
        if let Some(reader) = self.reader.take() {
            state.idle.push(reader);
        }
        drop(state);
        self.pool.available.notify_one();
    }
}

impl ReaderPool {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                leased: 0,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    fn lease(&self, backend: &dyn Backend) -> Result<ReaderLease<'_>> {
        let mut state = self.state.lock();
        loop {
            if let Some(reader) = state.idle.pop() {
                state.leased += 1;
                return Ok(ReaderLease {
                    pool: self,
                    reader: Some(reader),
                });
            }
            if state.leased < self.capacity {
                state.leased += 1;
                drop(state);
                return match backend.reader() {
                    Ok(reader) => Ok(ReaderLease {
                        pool: self,
                        reader: Some(reader),
                    }),
                    Err(err) => {
                        let mut state = self.state.lock();
                        state.leased -= 1;
                        drop(state);
                        self.available.notify_one();
                        Err(err)
                    }
                };
            }
            self.available.wait(&mut state);
        }
    }

    fn leased(&self) -> usize {
        self.state.lock().leased
    }
}

impl PageCache {
    /// Creates a cache holding at most `capacity` pages and at most
    /// `readers` concurrently leased backend readers.
    pub fn new(backend: Arc<dyn Backend>, capacity: usize, readers: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| StrataError::Config("cache capacity must be at least 1".into()))?;
        if readers == 0 {
            return Err(StrataError::Config("reader pool must hold at least 1 reader".into()));
        }
        Ok(Self {
            backend,
            pages: Mutex::new(LruCache::new(capacity)),
            loading: Mutex::new(HashMap::new()),
            pool: ReaderPool::new(readers),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    /// Returns the page at `addr`, loading it from the backend on a miss.
    ///
    /// Concurrent misses on the same address load the page once; the other
    /// callers wait and then observe the cached entry.
    pub fn get(&self, addr: PageAddr) -> Result<Arc<Page>> {
        if let Some(page) = self.lookup(addr.key) {
            return Ok(page);
        }
        let gate = self
            .loading
            .lock()
            .entry(addr.key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let loaded = {
            let _held = gate.lock();
            let resident = self.pages.lock().get(&addr.key).cloned();
            match resident {
                Some(page) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    trace!(key = addr.key, "cache.hit");
                    Ok(page)
                }
                None => self.load(addr),
            }
        };
        self.release_gate(addr.key, &gate);
        loaded
    }

    /// Drops the load gate of `key` unless a later miss already replaced it.
    fn release_gate(&self, key: u64, gate: &Arc<Mutex<()>>) {
        let mut loading = self.loading.lock();
        if loading
            .get(&key)
            .is_some_and(|current| Arc::ptr_eq(current, gate))
        {
            loading.remove(&key);
        }
    }

    fn lookup(&self, key: u64) -> Option<Arc<Page>> {
        let page = self.pages.lock().get(&key).cloned();
        if page.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key, "cache.hit");
        }
        page
    }

    fn load(&self, addr: PageAddr) -> Result<Arc<Page>> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = addr.key, len = addr.len, "cache.miss");
        let bytes = {
            let mut lease = self.pool.lease(self.backend.as_ref())?;
            lease.read(addr)?
        };
        let page = Arc::new(Page::decode_at(addr, &bytes)?);
        self.insert(addr, page.clone());
        Ok(page)
    }

    /// Makes a freshly persisted page resident.
    pub fn insert(&self, addr: PageAddr, page: Arc<Page>) {
        let evicted = self.pages.lock().push(addr.key, page);
        if let Some((key, _)) = evicted {
            if key != addr.key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                trace!(key, "cache.evict");
            }
        }
    }

    /// Drops every resident page.
    pub fn clear(&self) {
        self.pages.lock().clear();
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            resident: self.pages.lock().len(),
            leased_readers: self.pool.leased(),
        }
    }
}
