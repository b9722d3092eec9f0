//! Loader configuration.

use std::{num::NonZeroUsize, sync::Arc, time::Duration};

use crate::{
    batch::BatchFn,
    cache::{Cache, DataCache, InMemoryCache, NoCache},
    loader::Loader,
    logger::{Logger, SilentLogger, TracingLogger},
    trace::{NoopTracer, Tracer},
};

/// How long a window collects keys by default before it is dispatched.
pub const DEFAULT_WAIT: Duration = Duration::from_millis(16);

/// The scheduling rules for a loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// The maximum number of unique keys per batch. A window is dispatched
    /// immediately when it reaches this many keys, regardless of `wait`.
    /// `None` means unbounded.
    pub batch_capacity: Option<NonZeroUsize>,

    /// How long a window collects keys, starting from the first load into
    /// it.
    pub wait: Duration,

    /// If set, the batch function receives a context detached from the
    /// caller's deadline and cancellation, bounded by this timeout instead.
    /// If unset, it receives the context of the first load in its window.
    pub max_timeout: Option<Duration>,

    /// Remove each key's cache entry as soon as its batch is delivered, so
    /// the cache only merges loads that overlap in time.
    pub clear_cache_on_batch: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            batch_capacity: None,
            wait: DEFAULT_WAIT,
            max_timeout: None,
            clear_cache_on_batch: false,
        }
    }
}

/// Builds a [`Loader`]. Every option is independent and has a default; see
/// [`Config`] for the scheduling options.
///
/// ```
/// use std::time::Duration;
/// use thunkloader::{Context, Keys, Loader};
///
/// let loader = Loader::builder(|_: &Context, keys: &Keys<u64>| {
///     keys.values(|id| format!("user {}", id))
/// })
/// .batch_capacity(100)
/// .wait(Duration::from_millis(2))
/// .build();
///
/// let user = loader.load(&Context::background(), 7u64);
/// assert_eq!(user.get().unwrap(), "user 7");
/// ```
pub struct LoaderBuilder<K, V> {
    batch_fn: Box<dyn BatchFn<K, V>>,
    config: Config,
    cache: Option<Arc<dyn Cache<K, V>>>,
    data_cache: Option<Arc<dyn DataCache<K, V>>>,
    tracer: Option<Arc<dyn Tracer<K, V>>>,
    logger: Option<Arc<dyn Logger>>,
}

impl<K, V> LoaderBuilder<K, V>
where
    K: Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(batch_fn: impl BatchFn<K, V>) -> Self {
        Self {
            batch_fn: Box::new(batch_fn),
            config: Config::default(),
            cache: None,
            data_cache: None,
            tracer: None,
            logger: None,
        }
    }

    /// Replace every scheduling option at once.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Use `cache` instead of a fresh [`InMemoryCache`]. Pass an `Arc` to
    /// keep a handle on the cache.
    pub fn cache(mut self, cache: impl Cache<K, V> + 'static) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    /// Disable memoization; shorthand for `.cache(NoCache)`.
    pub fn no_cache(self) -> Self {
        self.cache(NoCache)
    }

    pub fn data_cache(mut self, data_cache: impl DataCache<K, V> + 'static) -> Self {
        self.data_cache = Some(Arc::new(data_cache));
        self
    }

    /// Limit batches to `capacity` unique keys. 0 means unbounded.
    pub fn batch_capacity(mut self, capacity: usize) -> Self {
        self.config.batch_capacity = NonZeroUsize::new(capacity);
        self
    }

    pub fn wait(mut self, wait: Duration) -> Self {
        self.config.wait = wait;
        self
    }

    pub fn max_timeout(mut self, timeout: Duration) -> Self {
        self.config.max_timeout = Some(timeout);
        self
    }

    pub fn clear_cache_on_batch(mut self) -> Self {
        self.config.clear_cache_on_batch = true;
        self
    }

    pub fn tracer(mut self, tracer: impl Tracer<K, V> + 'static) -> Self {
        self.tracer = Some(Arc::new(tracer));
        self
    }

    pub fn logger(mut self, logger: impl Logger + 'static) -> Self {
        self.logger = Some(Arc::new(logger));
        self
    }

    /// Don't report contained batch failures anywhere.
    pub fn silent(self) -> Self {
        self.logger(SilentLogger)
    }

    pub fn build(self) -> Loader<K, V> {
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(InMemoryCache::<V>::new()));
        let tracer = self.tracer.unwrap_or_else(|| Arc::new(NoopTracer));
        let logger = self.logger.unwrap_or_else(|| Arc::new(TracingLogger));

        Loader::from_parts(
            self.batch_fn,
            self.config,
            cache,
            self.data_cache,
            tracer,
            logger,
        )
    }
}
