use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::common::{CacheConfig, CacheError, ResourceKey};

use super::{ResourceGuard, ResourceLoader};

/// A resident resource and the number of callers holding it
struct CacheEntry<R> {
    resource: Arc<R>,
    ref_count: usize,
}

/// Metadata guarded by the cache lock
struct CacheState<R> {
    /// Present keys (ref_count >= 1)
    entries: HashMap<ResourceKey, CacheEntry<R>>,
    /// Keys whose loader call is in flight
    loading: HashSet<ResourceKey>,
    /// Slots taken by present + loading keys
    reserved: usize,
}

/// ResourceCache is a bounded, keyed, reference-counted cache.
///
/// Every key is either absent, loading or present. A miss reserves a slot and
/// calls the [`ResourceLoader`] without holding the lock, so a slow load only
/// stalls callers asking for the same key. Those callers sleep on a condition
/// variable until the load resolves and then start over.
///
/// A resource stays resident while at least one caller holds it. The holder
/// count drops with [`release`](Self::release); at zero the resource goes
/// back to the loader and its slot is freed.
pub struct ResourceCache<L: ResourceLoader> {
    /// Collaborator producing and taking back resources
    loader: L,
    /// Upper bound on reserved slots, None when unbounded
    max_resources: Option<NonZeroUsize>,
    /// Shared metadata
    state: Mutex<CacheState<L::Resource>>,
    /// Signalled whenever an in-flight load finishes, successfully or not
    load_finished: Condvar,
    /// Number of gets served from a resident entry
    hits: AtomicU64,
    /// Number of gets that invoked the loader
    misses: AtomicU64,
}

impl<L: ResourceLoader> ResourceCache<L> {
    /// Creates a cache holding at most `max_resources` entries.
    /// A bound of zero or less means unbounded.
    pub fn new(max_resources: i64, loader: L) -> Self {
        Self::with_config(CacheConfig::from_max_resources(max_resources), loader)
    }

    /// Creates a cache from an explicit configuration.
    pub fn with_config(config: CacheConfig, loader: L) -> Self {
        Self {
            loader,
            max_resources: config.max_resources,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                loading: HashSet::new(),
                reserved: 0,
            }),
            load_finished: Condvar::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the resource for `key`, loading it on a miss.
    ///
    /// Each successful call must be paired with one [`release`](Self::release).
    /// Fails with [`CacheError::Full`] when the key is absent and every slot is
    /// taken, and with [`CacheError::Load`] when the loader fails. Neither
    /// failure leaves a reservation behind.
    pub fn get(&self, key: ResourceKey) -> Result<Arc<L::Resource>, CacheError<L::Error>> {
        {
            let mut state = self.state.lock();
            loop {
                if state.loading.contains(&key) {
                    self.load_finished.wait(&mut state);
                    continue;
                }

                if let Some(entry) = state.entries.get_mut(&key) {
                    entry.ref_count += 1;
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Arc::clone(&entry.resource));
                }

                if let Some(max) = self.max_resources {
                    if state.reserved >= max.get() {
                        debug!(key, reserved = state.reserved, "cache full");
                        return Err(CacheError::Full);
                    }
                }

                state.reserved += 1;
                state.loading.insert(key);
                break;
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let reservation = LoadReservation::new(self, key);

        match self.loader.load(key) {
            Ok(resource) => {
                let resource = Arc::new(resource);
                reservation.install(Arc::clone(&resource));
                debug!(key, "resource loaded");
                Ok(resource)
            }
            Err(err) => {
                drop(reservation);
                warn!(key, "resource load failed");
                Err(CacheError::Load(err))
            }
        }
    }

    /// Like [`get`](Self::get), but hands back a guard that releases the key
    /// when dropped.
    pub fn pin(&self, key: ResourceKey) -> Result<ResourceGuard<'_, L>, CacheError<L::Error>> {
        let resource = self.get(key)?;
        Ok(ResourceGuard::new(self, key, resource))
    }

    /// Drops one reference to `key`. Unknown keys are ignored.
    ///
    /// When the last reference goes, the resource is handed back to the
    /// loader and its slot is freed.
    pub fn release(&self, key: ResourceKey) {
        let mut state = self.state.lock();

        let Some(entry) = state.entries.get_mut(&key) else {
            return;
        };
        entry.ref_count -= 1;
        if entry.ref_count > 0 {
            return;
        }

        if let Some(entry) = state.entries.remove(&key) {
            state.reserved -= 1;
            self.loader.release(key, entry.resource);
            debug!(key, "resource released");
        }
    }

    /// Force-releases every resident resource regardless of its holder count.
    ///
    /// Meant for shutdown. Loads still in flight keep their reservation and
    /// install normally when they finish; gets racing with close may observe
    /// either state.
    pub fn close(&self) {
        let mut state = self.state.lock();
        let entries = std::mem::take(&mut state.entries);
        state.reserved -= entries.len();

        let count = entries.len();
        for (key, entry) in entries {
            self.loader.release(key, entry.resource);
        }
        debug!(released = count, "cache closed");
    }

    /// Returns the number of present plus loading entries.
    pub fn len(&self) -> usize {
        self.state.lock().reserved
    }

    /// Returns true if nothing is resident or loading.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the configured bound, None when unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.max_resources.map(NonZeroUsize::get)
    }

    /// Returns true if `key` is resident.
    pub fn contains(&self, key: ResourceKey) -> bool {
        self.state.lock().entries.contains_key(&key)
    }

    /// Returns the holder count of a resident key.
    pub fn ref_count(&self, key: ResourceKey) -> Option<usize> {
        self.state.lock().entries.get(&key).map(|e| e.ref_count)
    }

    /// Returns the number of gets served without calling the loader.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Returns the number of gets that called the loader.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Returns the loader backing this cache.
    pub fn loader(&self) -> &L {
        &self.loader
    }
}

impl<L: ResourceLoader> Drop for ResourceCache<L> {
    fn drop(&mut self) {
        // Hand back anything the owner never released
        let state = self.state.get_mut();
        for (key, entry) in state.entries.drain() {
            self.loader.release(key, entry.resource);
        }
        state.reserved = 0;
    }
}

/// A slot taken for an in-flight load.
///
/// Dropping it without calling `install` (loader error or panic) gives the
/// slot back and wakes any waiters.
struct LoadReservation<'a, L: ResourceLoader> {
    cache: &'a ResourceCache<L>,
    key: ResourceKey,
    armed: bool,
}

impl<'a, L: ResourceLoader> LoadReservation<'a, L> {
    fn new(cache: &'a ResourceCache<L>, key: ResourceKey) -> Self {
        Self {
            cache,
            key,
            armed: true,
        }
    }

    fn install(mut self, resource: Arc<L::Resource>) {
        let mut state = self.cache.state.lock();
        state.loading.remove(&self.key);
        state.entries.insert(
            self.key,
            CacheEntry {
                resource,
                ref_count: 1,
            },
        );
        drop(state);

        self.armed = false;
        self.cache.load_finished.notify_all();
    }
}

impl<L: ResourceLoader> Drop for LoadReservation<'_, L> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let mut state = self.cache.state.lock();
        state.loading.remove(&self.key);
        state.reserved -= 1;
        drop(state);

        self.cache.load_finished.notify_all();
    }
}
