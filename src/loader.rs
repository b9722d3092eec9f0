//! The loader: the front end that callers load keys through, and the
//! dispatcher that drives each batch window to completion.

use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
    thread,
};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tracing::Level;

use crate::{
    batch::{self, BatchFn, Failure},
    cache::{Cache, DataCache},
    config::{Config, LoaderBuilder},
    context::Context,
    error::Error,
    key::{Key, Keys},
    logger::Logger,
    thunk::{Resolver, Thunk, ThunkMany},
    trace::Tracer,
    window::{Push, SealedBatch, Window},
};

/// A request coalescer over a batch function.
///
/// Every [`load`] returns a [`Thunk`] immediately. Loads that arrive close
/// together are collected into a window, and once the window's wait has
/// elapsed (or it reaches its capacity) all of its keys are passed to the
/// batch function in a single call, on a background thread. Each thunk then
/// receives the result for its own key.
///
/// Loaded thunks are memoized in the loader's [`Cache`], so loading a key
/// again returns the same computation, whether it is still in flight or long
/// resolved. [`clear`], [`clear_all`] and [`prime`] manage the cache.
///
/// A loader is cheap to clone; clones share the same cache and windows.
///
/// [`load`]: Loader::load
/// [`clear`]: Loader::clear
/// [`clear_all`]: Loader::clear_all
/// [`prime`]: Loader::prime
pub struct Loader<K, V> {
    inner: Arc<Inner<K, V>>,
}

struct Inner<K, V> {
    batch_fn: Box<dyn BatchFn<K, V>>,
    config: Config,
    cache: Arc<dyn Cache<K, V>>,

    // Held across lookup-then-insert, so two loads racing on the same key
    // can't both miss.
    cache_lock: Mutex<()>,
    data_cache: Option<Arc<dyn DataCache<K, V>>>,
    tracer: Arc<dyn Tracer<K, V>>,
    logger: Arc<dyn Logger>,

    // The window currently collecting keys, if any.
    window: ArcSwapOption<Window<K, V>>,
}

impl<K, V> Loader<K, V>
where
    K: Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a loader with the default configuration.
    pub fn new(batch_fn: impl BatchFn<K, V>) -> Self {
        LoaderBuilder::new(batch_fn).build()
    }

    pub fn builder(batch_fn: impl BatchFn<K, V>) -> LoaderBuilder<K, V> {
        LoaderBuilder::new(batch_fn)
    }

    pub(crate) fn from_parts(
        batch_fn: Box<dyn BatchFn<K, V>>,
        config: Config,
        cache: Arc<dyn Cache<K, V>>,
        data_cache: Option<Arc<dyn DataCache<K, V>>>,
        tracer: Arc<dyn Tracer<K, V>>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Loader {
            inner: Arc::new(Inner {
                batch_fn,
                config,
                cache,
                cache_lock: Mutex::new(()),
                data_cache,
                tracer,
                logger,
                window: ArcSwapOption::empty(),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Load a single key.
    ///
    /// This never blocks on the batch function. If the key is cached, the
    /// cached computation is returned; otherwise the key joins the current
    /// window. The returned thunk observes the computation through `ctx`:
    /// if `ctx` ends first, that thunk reports the context's error, but the
    /// key stays in its batch.
    pub fn load(&self, ctx: &Context, key: impl Into<Key<K>>) -> Thunk<V> {
        let key = key.into();
        let (ctx, finish) = self.inner.tracer.trace_load(ctx, &key);

        let thunk = self.inner.load_key(ctx, key);
        finish(&thunk);
        thunk
    }

    /// Load several keys at once. Every key is loaded as if by [`load`], so
    /// they share windows, dedupe and memoization with every other load.
    ///
    /// [`load`]: Loader::load
    pub fn load_many<I>(&self, ctx: &Context, keys: I) -> ThunkMany<V>
    where
        I: IntoIterator,
        I::Item: Into<Key<K>>,
    {
        let keys: Keys<K> = keys.into_iter().map(Into::into).collect();
        let (ctx, finish) = self.inner.tracer.trace_load_many(ctx, &keys);

        let thunks = keys.into_iter().map(|key| self.load(&ctx, key)).collect();
        let many = ThunkMany::new(ctx, thunks);

        finish(&many);
        many
    }

    /// Remove `key` from the cache (and the data cache), so the next load of
    /// it goes to a batch again.
    pub fn clear(&self, ctx: &Context, key: impl Into<Key<K>>) -> &Self {
        let key = key.into();

        {
            let _guard = self.inner.cache_lock.lock();
            self.inner.cache.delete(ctx, &key);
        }

        if let Some(ref data_cache) = self.inner.data_cache {
            data_cache.delete(ctx, &key);
        }

        self
    }

    /// Empty the cache (and the data cache).
    pub fn clear_all(&self) -> &Self {
        {
            let _guard = self.inner.cache_lock.lock();
            self.inner.cache.clear();
        }

        if let Some(ref data_cache) = self.inner.data_cache {
            data_cache.clear();
        }

        self
    }

    /// Cache `value` for `key`, unless the key already has an entry. An
    /// existing entry, pending or resolved, is never overwritten; to replace
    /// one, [`clear`](Loader::clear) it first.
    pub fn prime(&self, ctx: &Context, key: impl Into<Key<K>>, value: V) -> &Self {
        let key = key.into();
        let _guard = self.inner.cache_lock.lock();

        if self.inner.cache.get(ctx, &key).is_none() {
            self.inner.cache.set(ctx, &key, Thunk::ready(value));
        }

        self
    }
}

impl<K, V> Inner<K, V>
where
    K: Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn load_key(self: &Arc<Self>, ctx: Context, key: Key<K>) -> Thunk<V> {
        if let Some(ref data_cache) = self.data_cache {
            if let Some(value) = data_cache.get(&ctx, &key) {
                tracing::trace!(key = key.id(), "data cache hit");
                return Thunk::ready(value).with_context(ctx);
            }
        }

        let (thunk, resolver) = {
            let _guard = self.cache_lock.lock();

            if let Some(cached) = self.cache.get(&ctx, &key) {
                tracing::trace!(key = key.id(), "cache hit");
                return cached.with_context(ctx);
            }

            let (thunk, resolver) = Thunk::pending(ctx.clone());
            self.cache.set(&ctx, &key, thunk.clone());
            (thunk, resolver)
        };

        self.enqueue(&ctx, key, resolver);
        thunk
    }

    /// Put a request into the current window, opening a new window if there
    /// is none or the current one is sealed.
    fn enqueue(self: &Arc<Self>, ctx: &Context, mut key: Key<K>, mut resolver: Resolver<V>) {
        loop {
            let (window, opened) = match self.window.load_full() {
                Some(window) => (window, false),
                None => {
                    let window = Arc::new(Window::new());
                    let previous = self
                        .window
                        .compare_and_swap(&None::<Arc<Window<K, V>>>, Some(Arc::clone(&window)));

                    // Somebody else opened a window first; use theirs.
                    if previous.is_some() {
                        continue;
                    }

                    tracing::debug!("opened batch window");
                    (window, true)
                }
            };

            let push = window.push(ctx, key, resolver, self.config.batch_capacity);

            // The dispatcher is only started once the window holds a request,
            // so its wait is measured from the first load, and a zero wait
            // never seals a window before the load that opened it is in.
            if opened {
                self.start_dispatch(&window);
            }

            match push {
                Push::Queued { len, sealed } => {
                    if sealed {
                        tracing::debug!(len, "batch window reached capacity");
                        self.retire(&window);
                    }
                    return;
                }
                Push::Joined => return,
                Push::Closed(returned_key, returned_resolver) => {
                    key = returned_key;
                    resolver = returned_resolver;
                    self.retire(&window);
                }
            }
        }
    }

    /// Stop routing new loads to `window`, if it is still the current one.
    fn retire(&self, window: &Arc<Window<K, V>>) {
        let current = Some(Arc::clone(window));
        let _ = self
            .window
            .compare_and_swap(&current, None::<Arc<Window<K, V>>>);
    }

    fn start_dispatch(self: &Arc<Self>, window: &Arc<Window<K, V>>) {
        let spawned = {
            let inner = Arc::clone(self);
            let window = Arc::clone(window);

            thread::Builder::new()
                .name(String::from("thunkloader-dispatch"))
                .spawn(move || inner.dispatch(&window))
        };

        if let Err(err) = spawned {
            self.logger.log(
                Level::WARN,
                &format!("couldn't spawn a dispatch thread, dispatching inline: {err}"),
            );
            self.dispatch(window);
        }
    }

    fn dispatch(&self, window: &Arc<Window<K, V>>) {
        window.wait(self.config.wait);

        let batch = window.seal();
        self.retire(window);

        if let Some(batch) = batch {
            self.run_batch(batch);
        }
    }

    fn run_batch(&self, batch: SealedBatch<K, V>) {
        let SealedBatch { ctx, requests } = batch;

        // With a max timeout the batch is cut loose from the first caller's
        // deadline and cancellation, keeping only its values.
        let ctx = match self.config.max_timeout {
            Some(timeout) => ctx.detached().with_timeout(timeout),
            None => ctx,
        };

        let (keys, waiting): (Vec<Key<K>>, Vec<Vec<Resolver<V>>>) = requests
            .into_iter()
            .map(|request| (request.key, request.resolvers))
            .unzip();
        let keys = Keys::from(keys);

        let (ctx, finish) = self.tracer.trace_batch(&ctx, &keys);
        tracing::debug!(count = keys.len(), "dispatching batch");

        let (results, panicked) = match batch::run_guarded(&*self.batch_fn, &ctx, &keys) {
            Ok(results) => {
                self.store(&ctx, &keys, &results);
                (results, false)
            }
            Err(failure) => {
                let panicked = matches!(failure, Failure::Panicked(..));
                (self.contain(&keys, failure), panicked)
            }
        };

        // A panic says nothing about the keys themselves, so it isn't
        // memoized; the next load of any of these keys starts over.
        if panicked || self.config.clear_cache_on_batch {
            self.evict(&ctx, &keys, &waiting);
        }

        for (outcome, resolvers) in results.iter().zip(waiting) {
            for resolver in resolvers {
                resolver.resolve(outcome.clone());
            }
        }

        finish(&results);
    }

    /// Copy the successful results of a batch into the data cache.
    fn store(&self, ctx: &Context, keys: &Keys<K>, results: &[Result<V, Error>]) {
        if let Some(ref data_cache) = self.data_cache {
            for (key, result) in keys.iter().zip(results) {
                if let Ok(value) = result {
                    data_cache.set(ctx, key, value.clone());
                }
            }
        }
    }

    /// Turn a failed batch into one error per key, and report it.
    fn contain(&self, keys: &Keys<K>, failure: Failure) -> Vec<Result<V, Error>> {
        let error = failure.to_error();
        self.logger.log(Level::ERROR, &error.to_string());

        keys.iter().map(|_| Err(error.clone())).collect()
    }

    /// Remove the cache entries this batch is about to settle. An entry that
    /// was cleared and reloaded while the batch ran belongs to a newer
    /// computation, and stays.
    fn evict(&self, ctx: &Context, keys: &Keys<K>, waiting: &[Vec<Resolver<V>>]) {
        let _guard = self.cache_lock.lock();

        for (key, resolvers) in keys.iter().zip(waiting) {
            let owned = match self.cache.get(ctx, key) {
                Some(cached) => resolvers.iter().any(|pending| pending.settles(&cached)),
                None => false,
            };

            if owned {
                self.cache.delete(ctx, key);
            }
        }
    }
}

impl<K, V> Clone for Loader<K, V> {
    fn clone(&self) -> Self {
        Loader {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Debug for Loader<K, V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("config", &self.inner.config)
            .field("collecting", &self.inner.window.load().is_some())
            .finish()
    }
}
