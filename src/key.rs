//! Keys passed into a loader, and the ordered key lists handed to a batch
//! function.

use std::{
    borrow::Borrow,
    collections::HashMap,
    fmt::{self, Debug, Display, Formatter},
    hash::{Hash, Hasher},
    ops::Deref,
    rc::Rc,
    sync::Arc,
};

use crate::error::Error;

/// The string projection of a raw key. Two raw values with the same
/// projection are the same key, as far as caching and batching are
/// concerned, so the projection must be unique per distinct value.
///
/// Implemented for strings, integers, `char` and `bool` using their
/// `Display` rendering. Implement it yourself for composite keys:
///
/// ```
/// use thunkloader::{CacheKey, Key};
///
/// struct UserKey {
///     tenant: u32,
///     id: u64,
/// }
///
/// impl CacheKey for UserKey {
///     fn cache_key(&self) -> String {
///         format!("{}/{}", self.tenant, self.id)
///     }
/// }
///
/// let key = Key::new(UserKey { tenant: 3, id: 10 });
/// assert_eq!(key.id(), "3/10");
/// ```
pub trait CacheKey {
    fn cache_key(&self) -> String;
}

macro_rules! display_cache_key {
    ($($ty:ty),* $(,)?) => {$(
        impl CacheKey for $ty {
            #[inline]
            fn cache_key(&self) -> String {
                self.to_string()
            }
        }
    )*};
}

display_cache_key! {
    str, String, char, bool,
    u8, u16, u32, u64, u128, usize,
    i8, i16, i32, i64, i128, isize,
}

impl<T: CacheKey + ?Sized> CacheKey for &T {
    fn cache_key(&self) -> String {
        T::cache_key(self)
    }
}

impl<T: CacheKey + ?Sized> CacheKey for Box<T> {
    fn cache_key(&self) -> String {
        T::cache_key(self)
    }
}

impl<T: CacheKey + ?Sized> CacheKey for Rc<T> {
    fn cache_key(&self) -> String {
        T::cache_key(self)
    }
}

impl<T: CacheKey + ?Sized> CacheKey for Arc<T> {
    fn cache_key(&self) -> String {
        T::cache_key(self)
    }
}

/// A raw key paired with its string projection.
///
/// Equality and hashing only look at the projection; the raw value is what
/// the batch function receives.
#[derive(Clone)]
pub struct Key<K> {
    raw: K,
    id: Arc<str>,
}

impl<K: CacheKey> Key<K> {
    pub fn new(raw: K) -> Self {
        let id = raw.cache_key().into();
        Self { raw, id }
    }
}

impl<K> Key<K> {
    /// Build a key with an explicit projection, for raw types that don't
    /// implement [`CacheKey`].
    pub fn with_id(raw: K, id: impl Into<Arc<str>>) -> Self {
        Self { raw, id: id.into() }
    }

    /// The cache identity of this key.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn raw(&self) -> &K {
        &self.raw
    }

    pub fn into_raw(self) -> K {
        self.raw
    }

    pub(crate) fn shared_id(&self) -> &Arc<str> {
        &self.id
    }
}

impl<K: CacheKey> From<K> for Key<K> {
    fn from(raw: K) -> Self {
        Key::new(raw)
    }
}

impl<K> PartialEq for Key<K> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<K> Eq for Key<K> {}

impl<K> Hash for Key<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl<K> Borrow<str> for Key<K> {
    fn borrow(&self) -> &str {
        &self.id
    }
}

impl<K> Display for Key<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl<K> Debug for Key<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Key").field(&self.id).finish()
    }
}

/// An ordered list of keys, as passed to a batch function. The order is the
/// order in which the keys were first requested in the window, and the batch
/// function must return its results in the same order.
///
/// Keys in a batch are unique. Use [`values`], [`results`], or [`align_by`]
/// to produce a result list that is guaranteed to line up with the keys.
///
/// [`values`]: Keys::values
/// [`results`]: Keys::results
/// [`align_by`]: Keys::align_by
#[derive(Clone, PartialEq, Eq)]
pub struct Keys<K> {
    keys: Vec<Key<K>>,
}

impl<K: CacheKey> Keys<K> {
    /// Build a key list from raw values, projecting each with [`CacheKey`].
    pub fn from_raw(raw: impl IntoIterator<Item = K>) -> Self {
        raw.into_iter().map(Key::new).collect()
    }
}

impl<K> Keys<K> {
    pub fn new() -> Self {
        Self { keys: Vec::new() }
    }

    /// The projection of every key, in order.
    pub fn ids(&self) -> Vec<&str> {
        self.keys.iter().map(Key::id).collect()
    }

    /// The raw value of every key, in order.
    pub fn raw(&self) -> impl Iterator<Item = &K> + Clone {
        self.keys.iter().map(Key::raw)
    }

    pub fn into_raw(self) -> Vec<K> {
        self.keys.into_iter().map(Key::into_raw).collect()
    }

    /// Compute a value for every key. The returned list is aligned with the
    /// keys by construction.
    pub fn values<V>(&self, mut get_value: impl FnMut(&K) -> V) -> Vec<Result<V, Error>> {
        self.results(move |key| Ok(get_value(key)))
    }

    /// Fallible version of `values`. Unlike a `collect` into a `Result`, an
    /// error for one key doesn't stop the remaining keys from being computed;
    /// each key gets its own result.
    pub fn results<V>(
        &self,
        get_result: impl FnMut(&K) -> Result<V, Error>,
    ) -> Vec<Result<V, Error>> {
        self.raw().map(get_result).collect()
    }

    /// Pair an unordered collection of fetched values with these keys,
    /// matching on projection. Keys with no matching value get an
    /// [`Error::Missing`]; values matching no key are ignored, as are
    /// duplicates after the first.
    pub fn align_by<V>(
        &self,
        values: impl IntoIterator<Item = V>,
        mut id_of: impl FnMut(&V) -> String,
    ) -> Vec<Result<V, Error>>
    where
        V: Clone,
    {
        let mut by_id: HashMap<String, V> = HashMap::new();
        for value in values {
            by_id.entry(id_of(&value)).or_insert(value);
        }

        self.keys
            .iter()
            .map(|key| {
                by_id.get(key.id()).cloned().ok_or_else(|| Error::Missing {
                    key: key.id().to_owned(),
                })
            })
            .collect()
    }
}

impl<K> Default for Keys<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Deref for Keys<K> {
    type Target = [Key<K>];

    fn deref(&self) -> &[Key<K>] {
        &self.keys
    }
}

impl<K> From<Vec<Key<K>>> for Keys<K> {
    fn from(keys: Vec<Key<K>>) -> Self {
        Self { keys }
    }
}

impl<K> FromIterator<Key<K>> for Keys<K> {
    fn from_iter<I: IntoIterator<Item = Key<K>>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

impl<K> IntoIterator for Keys<K> {
    type Item = Key<K>;
    type IntoIter = std::vec::IntoIter<Key<K>>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.into_iter()
    }
}

impl<'a, K> IntoIterator for &'a Keys<K> {
    type Item = &'a Key<K>;
    type IntoIter = std::slice::Iter<'a, Key<K>>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}

impl<K> Debug for Keys<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.keys.iter().map(Key::id))
            .finish()
    }
}
