//! Memoization stores used by a loader.
//!
//! A [`Cache`] maps a key's projection to the key's [`Thunk`], so concurrent
//! loads of a key that is still in flight share one computation. A
//! [`DataCache`] optionally holds plain resolved values that outlive the
//! thunk that produced them.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

use crate::{context::Context, key::Key, thunk::Thunk};

/// Storage for a loader's thunks. Any implementation can be plugged in with
/// [`LoaderBuilder::cache`](crate::LoaderBuilder::cache); the loader makes
/// lookup-then-insert atomic on its side, so implementations only need each
/// individual method to be thread-safe.
pub trait Cache<K, V>: Send + Sync {
    fn get(&self, ctx: &Context, key: &Key<K>) -> Option<Thunk<V>>;

    fn set(&self, ctx: &Context, key: &Key<K>, thunk: Thunk<V>);

    /// Remove the entry for `key`. Returns true if there was one.
    fn delete(&self, ctx: &Context, key: &Key<K>) -> bool;

    fn clear(&self);
}

impl<K, V, C> Cache<K, V> for Arc<C>
where
    C: Cache<K, V> + ?Sized,
{
    fn get(&self, ctx: &Context, key: &Key<K>) -> Option<Thunk<V>> {
        C::get(self, ctx, key)
    }

    fn set(&self, ctx: &Context, key: &Key<K>, thunk: Thunk<V>) {
        C::set(self, ctx, key, thunk)
    }

    fn delete(&self, ctx: &Context, key: &Key<K>) -> bool {
        C::delete(self, ctx, key)
    }

    fn clear(&self) {
        C::clear(self)
    }
}

/// The default cache: an unbounded map that lives as long as its loader.
///
/// This is well suited to a loader created per request (or per unit of work)
/// and discarded afterwards. It has no eviction, so it is a poor fit for a
/// long-lived loader.
pub struct InMemoryCache<V> {
    items: RwLock<HashMap<Arc<str>, Thunk<V>>>,
}

impl<V> InMemoryCache<V> {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// True if there is an entry for the projection `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.items.read().contains_key(id)
    }
}

impl<V> Default for InMemoryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Cache<K, V> for InMemoryCache<V>
where
    V: Send + Sync,
{
    fn get(&self, _ctx: &Context, key: &Key<K>) -> Option<Thunk<V>> {
        self.items.read().get(key.id()).cloned()
    }

    fn set(&self, _ctx: &Context, key: &Key<K>, thunk: Thunk<V>) {
        self.items
            .write()
            .insert(Arc::clone(key.shared_id()), thunk);
    }

    fn delete(&self, _ctx: &Context, key: &Key<K>) -> bool {
        self.items.write().remove(key.id()).is_some()
    }

    fn clear(&self) {
        self.items.write().clear();
    }
}

/// A cache that stores nothing. Every load goes to a batch (loads of the
/// same key inside a single window are still merged), and `prime` has no
/// effect.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl<K, V> Cache<K, V> for NoCache {
    fn get(&self, _ctx: &Context, _key: &Key<K>) -> Option<Thunk<V>> {
        None
    }

    fn set(&self, _ctx: &Context, _key: &Key<K>, _thunk: Thunk<V>) {}

    fn delete(&self, _ctx: &Context, _key: &Key<K>) -> bool {
        false
    }

    fn clear(&self) {}
}

/// A secondary store of resolved values.
///
/// A loader with a data cache checks it before anything else; a hit returns
/// an already-resolved thunk and the key never enters a batch. Every
/// successful result of a dispatch is written to it.
pub trait DataCache<K, V>: Send + Sync {
    fn get(&self, ctx: &Context, key: &Key<K>) -> Option<V>;

    fn set(&self, ctx: &Context, key: &Key<K>, value: V);

    fn delete(&self, ctx: &Context, key: &Key<K>) -> bool;

    fn clear(&self);
}

impl<K, V, C> DataCache<K, V> for Arc<C>
where
    C: DataCache<K, V> + ?Sized,
{
    fn get(&self, ctx: &Context, key: &Key<K>) -> Option<V> {
        C::get(self, ctx, key)
    }

    fn set(&self, ctx: &Context, key: &Key<K>, value: V) {
        C::set(self, ctx, key, value)
    }

    fn delete(&self, ctx: &Context, key: &Key<K>) -> bool {
        C::delete(self, ctx, key)
    }

    fn clear(&self) {
        C::clear(self)
    }
}

/// An unbounded in-memory [`DataCache`].
pub struct InMemoryDataCache<V> {
    values: RwLock<HashMap<Arc<str>, V>>,
}

impl<V> InMemoryDataCache<V> {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl<V> Default for InMemoryDataCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> DataCache<K, V> for InMemoryDataCache<V>
where
    V: Clone + Send + Sync,
{
    fn get(&self, _ctx: &Context, key: &Key<K>) -> Option<V> {
        self.values.read().get(key.id()).cloned()
    }

    fn set(&self, _ctx: &Context, key: &Key<K>, value: V) {
        self.values
            .write()
            .insert(Arc::clone(key.shared_id()), value);
    }

    fn delete(&self, _ctx: &Context, key: &Key<K>) -> bool {
        self.values.write().remove(key.id()).is_some()
    }

    fn clear(&self) {
        self.values.write().clear();
    }
}
