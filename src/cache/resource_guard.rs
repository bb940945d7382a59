use std::ops::Deref;
use std::sync::Arc;

use crate::common::ResourceKey;

use super::{ResourceCache, ResourceLoader};

/// RAII handle on a cached resource.
/// Releases its reference on the cache when dropped.
pub struct ResourceGuard<'a, L: ResourceLoader> {
    /// The cache the resource was taken from
    cache: &'a ResourceCache<L>,
    /// Key of the guarded resource
    key: ResourceKey,
    /// The resource itself (kept alive for the guard's lifetime)
    resource: Arc<L::Resource>,
}

impl<'a, L: ResourceLoader> ResourceGuard<'a, L> {
    pub(crate) fn new(
        cache: &'a ResourceCache<L>,
        key: ResourceKey,
        resource: Arc<L::Resource>,
    ) -> Self {
        Self {
            cache,
            key,
            resource,
        }
    }

    /// Returns the key of the guarded resource.
    pub fn key(&self) -> ResourceKey {
        self.key
    }

    /// Returns a shared handle to the resource.
    pub fn resource(&self) -> &Arc<L::Resource> {
        &self.resource
    }

    /// Drops this guard, releasing the resource.
    pub fn drop_guard(self) {
        drop(self);
    }
}

impl<L: ResourceLoader> Deref for ResourceGuard<'_, L> {
    type Target = L::Resource;

    fn deref(&self) -> &Self::Target {
        &self.resource
    }
}

impl<L: ResourceLoader> Drop for ResourceGuard<'_, L> {
    fn drop(&mut self) {
        self.cache.release(self.key);
    }
}
