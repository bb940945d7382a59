use std::sync::Arc;

use crate::common::ResourceKey;

/// Supplies miss-fill and eviction behavior to a [`ResourceCache`].
///
/// The cache never constructs or destroys resources itself. A page cache, for
/// example, would read the page from disk in `load` and write it back in
/// `release` if it is dirty.
///
/// `release` is called while the cache's internal lock is held, so an
/// implementation must not call back into the same cache.
///
/// [`ResourceCache`]: super::ResourceCache
pub trait ResourceLoader {
    /// The cached value, shared with callers across threads
    type Resource: Send + Sync;
    /// Error returned when a resource cannot be produced
    type Error;

    /// Produces the resource for `key`. Runs without the cache lock held.
    fn load(&self, key: ResourceKey) -> Result<Self::Resource, Self::Error>;

    /// Takes back a resource whose last holder has released it.
    /// Failures here are the loader's own concern.
    fn release(&self, key: ResourceKey, resource: Arc<Self::Resource>);
}
