use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use anyhow::Context;
use lru::LruCache;
use serde::Serialize;

use super::unit::{CodeUnit, UnitLoader};

struct CachedUnit {
    unit: Arc<dyn CodeUnit>,
    modified: Option<SystemTime>,
    last_access: Instant,
}

struct CacheInner {
    units: LruCache<PathBuf, CachedUnit>,
    last_sweep: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct CachedUnitInfo {
    pub path: PathBuf,
    pub idle_secs: u64,
    /// References held outside the cache, i.e. executions in progress.
    pub in_use: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub cached_units: usize,
    pub capacity: usize,
    pub ttl_secs: u64,
    pub units: Vec<CachedUnitInfo>,
}

/// Loaded units keyed by absolute path; a changed modification time counts as
/// a different unit. Least-recently-used units are evicted past `capacity` and
/// idle ones after `ttl`. Evicting only drops the cache's `Arc`, so a unit that
/// is executing stays alive until its call returns.
pub struct UnitCache {
    inner: Mutex<CacheInner>,
    capacity: NonZeroUsize,
    ttl: Duration,
    sweep_every: Duration,
}

impl UnitCache {
    pub fn new(capacity: usize, ttl: Duration, sweep_every: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(CacheInner {
                units: LruCache::new(capacity),
                last_sweep: Instant::now(),
            }),
            capacity,
            ttl,
            sweep_every,
        }
    }

    pub fn get_or_load(
        &self,
        path: &Path,
        loader: &dyn UnitLoader,
    ) -> anyhow::Result<Arc<dyn CodeUnit>> {
        let abs = std::fs::canonicalize(path)
            .with_context(|| format!("task file {} is not readable", path.display()))?;
        let modified = std::fs::metadata(&abs).and_then(|m| m.modified()).ok();

        {
            let mut g = self.lock();
            self.sweep_if_due(&mut g);
            if let Some(entry) = g.units.get_mut(&abs) {
                if entry.modified == modified && entry.last_access.elapsed() <= self.ttl {
                    entry.last_access = Instant::now();
                    return Ok(entry.unit.clone());
                }
            }
            if g.units.pop(&abs).is_some() {
                tracing::debug!(path = %abs.display(), "cached unit is stale, reloading");
            }
        }

        // Load outside the lock; a slow loader must not block other lookups.
        let unit = loader.load(&abs)?;

        let mut g = self.lock();
        let evicted = g.units.push(
            abs.clone(),
            CachedUnit {
                unit: unit.clone(),
                modified,
                last_access: Instant::now(),
            },
        );
        if let Some((old, _)) = evicted.filter(|(k, _)| k != &abs) {
            tracing::debug!(path = %old.display(), "evicted unit from cache");
        }
        Ok(unit)
    }

    pub fn clear(&self) -> usize {
        let mut g = self.lock();
        let count = g.units.len();
        g.units.clear();
        tracing::info!(count, "cleared unit cache");
        count
    }

    pub fn len(&self) -> usize {
        self.lock().units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let g = self.lock();
        CacheStats {
            cached_units: g.units.len(),
            capacity: self.capacity.get(),
            ttl_secs: self.ttl.as_secs(),
            units: g
                .units
                .iter()
                .map(|(path, entry)| CachedUnitInfo {
                    path: path.clone(),
                    idle_secs: entry.last_access.elapsed().as_secs(),
                    in_use: Arc::strong_count(&entry.unit).saturating_sub(1),
                })
                .collect(),
        }
    }

    fn sweep_if_due(&self, g: &mut CacheInner) {
        if g.last_sweep.elapsed() < self.sweep_every {
            return;
        }
        g.last_sweep = Instant::now();

        let stale: Vec<PathBuf> = g
            .units
            .iter()
            .filter(|(_, entry)| entry.last_access.elapsed() > self.ttl)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &stale {
            g.units.pop(path);
        }
        if !stale.is_empty() {
            tracing::info!(count = stale.len(), "removed idle units from cache");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
