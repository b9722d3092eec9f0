//! A single batch window: the requests collected between the first load
//! into the window and its dispatch.

use std::{collections::HashMap, mem, num::NonZeroUsize, sync::Arc, time::Duration};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use crate::{context::Context, key::Key, thunk::Resolver};

/// One unique key in a window, and every resolver waiting on it. There is
/// usually exactly one resolver; more appear when the loader's cache doesn't
/// memoize, and the same key is loaded twice in one window.
pub(crate) struct BatchRequest<K, V> {
    pub(crate) key: Key<K>,
    pub(crate) resolvers: Vec<Resolver<V>>,
}

/// Everything taken out of a window when it is sealed, in enqueue order.
pub(crate) struct SealedBatch<K, V> {
    /// The context of the first load into the window.
    pub(crate) ctx: Context,
    pub(crate) requests: Vec<BatchRequest<K, V>>,
}

struct Collecting<K, V> {
    sealed: bool,
    ctx: Option<Context>,
    requests: Vec<BatchRequest<K, V>>,
    index: HashMap<Arc<str>, usize>,
}

/// Result of offering a request to a window.
pub(crate) enum Push<K, V> {
    /// The key was added to the window. `sealed` is true if this key filled
    /// the window to capacity.
    Queued { len: usize, sealed: bool },

    /// The key was already pending in this window; the resolver now waits on
    /// that request.
    Joined,

    /// The window was already sealed, so the request is handed back to be
    /// put in the next one.
    Closed(Key<K>, Resolver<V>),
}

pub(crate) struct Window<K, V> {
    state: Mutex<Collecting<K, V>>,
    force: Sender<()>,
    forced: Receiver<()>,
}

impl<K, V> Window<K, V> {
    pub(crate) fn new() -> Self {
        let (force, forced) = channel::bounded(1);

        Self {
            state: Mutex::new(Collecting {
                sealed: false,
                ctx: None,
                requests: Vec::new(),
                index: HashMap::new(),
            }),
            force,
            forced,
        }
    }

    /// Offer a request to this window. Reaching `capacity` seals the window
    /// on the spot and signals the dispatcher, so no further key can join.
    pub(crate) fn push(
        &self,
        ctx: &Context,
        key: Key<K>,
        resolver: Resolver<V>,
        capacity: Option<NonZeroUsize>,
    ) -> Push<K, V> {
        let mut state = self.state.lock();

        if state.sealed {
            return Push::Closed(key, resolver);
        }

        if let Some(&position) = state.index.get(key.id()) {
            state.requests[position].resolvers.push(resolver);
            return Push::Joined;
        }

        if state.ctx.is_none() {
            state.ctx = Some(ctx.clone());
        }

        let position = state.requests.len();
        state.index.insert(Arc::clone(key.shared_id()), position);
        state.requests.push(BatchRequest {
            key,
            resolvers: vec![resolver],
        });

        let len = state.requests.len();
        let sealed = matches!(capacity, Some(capacity) if len >= capacity.get());
        if sealed {
            state.sealed = true;
            // The channel has room for exactly this one signal
            let _ = self.force.try_send(());
        }

        Push::Queued { len, sealed }
    }

    /// Block until the window's wait elapses or its capacity is reached.
    pub(crate) fn wait(&self, wait: Duration) {
        let _ = self.forced.recv_timeout(wait);
    }

    /// Close the window to new requests and take everything in it. Returns
    /// None if the window closed without any requests.
    pub(crate) fn seal(&self) -> Option<SealedBatch<K, V>> {
        let mut state = self.state.lock();
        state.sealed = true;
        state.index.clear();

        let requests = mem::take(&mut state.requests);
        let ctx = state.ctx.take()?;

        if requests.is_empty() {
            None
        } else {
            Some(SealedBatch { ctx, requests })
        }
    }
}
