//! Thunks: memoized, single-resolution handles on a value that a batch
//! dispatch will deliver.
//!
//! A thunk is backed by a [`Slot`], a one-shot cell written exactly once by
//! the [`Resolver`] that the loader parks in the batch window. Waiting on a
//! slot never polls: blocked threads wait for the slot's `ready` channel to
//! disconnect, and blocked futures are woken through the slot's [`WakerSet`].

use std::{
    fmt::{self, Debug, Formatter},
    future::Future,
    mem,
    pin::Pin,
    sync::Arc,
    task::{self, Poll},
};

use crossbeam::channel::{self, Receiver, Sender};
use futures_timer::Delay;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use thiserror::Error;

use crate::{
    context::Context,
    error::Error,
    wakerset::{Token, WakerSet},
};

struct Slot<V> {
    outcome: OnceCell<Result<V, Error>>,

    // Never carries a message. The resolver holds the only sender; dropping
    // it disconnects this receiver and releases every blocked thread.
    ready: Receiver<()>,
    wakers: Mutex<WakerSet>,
}

impl<V> Slot<V> {
    fn pending() -> (Arc<Self>, Sender<()>) {
        let (sender, ready) = channel::bounded(0);
        let slot = Arc::new(Slot {
            outcome: OnceCell::new(),
            ready,
            wakers: Mutex::new(WakerSet::default()),
        });

        (slot, sender)
    }
}

/// The write half of a thunk. Exactly one resolver exists per pending thunk;
/// it lives in a batch window until the window is dispatched.
///
/// A resolver that is dropped without being resolved settles its slot with
/// [`Error::Dropped`], so no waiter can hang on a lost request.
pub(crate) struct Resolver<V> {
    slot: Arc<Slot<V>>,
    _ready: Sender<()>,
}

impl<V> Resolver<V> {
    pub(crate) fn resolve(self, outcome: Result<V, Error>) {
        // Notification happens in drop
        let _ = self.slot.outcome.set(outcome);
    }

    /// True if `thunk` will be settled by this resolver.
    pub(crate) fn settles(&self, thunk: &Thunk<V>) -> bool {
        Arc::ptr_eq(&self.slot, &thunk.slot)
    }
}

impl<V> Drop for Resolver<V> {
    fn drop(&mut self) {
        let _ = self.slot.outcome.set(Err(Error::Dropped));

        let wakers = mem::take(&mut *self.slot.wakers.lock());
        wakers.wake_all();

        // `_ready` is dropped after this, disconnecting the blocked threads.
    }
}

impl<V> Debug for Resolver<V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("resolved", &self.slot.outcome.get().is_some())
            .field("waiting", &self.slot.wakers.lock().len())
            .finish()
    }
}

/// A handle on the eventual result for one key.
///
/// Calling [`get`] blocks the current thread until the key's batch has been
/// dispatched, then returns its result. Every later call returns the same
/// result immediately. Thunks can be cloned and shared freely between
/// threads; all clones observe the same single resolution.
///
/// Each thunk carries the context of the call that produced it. If that
/// context ends before the value arrives, [`get`] returns the context's
/// error, but the underlying request stays in its batch, and other callers
/// waiting on the same key are unaffected.
///
/// [`get`]: Thunk::get
pub struct Thunk<V> {
    slot: Arc<Slot<V>>,
    ctx: Context,
}

impl<V> Thunk<V> {
    /// Create an unresolved thunk and the resolver that will settle it.
    pub(crate) fn pending(ctx: Context) -> (Self, Resolver<V>) {
        let (slot, sender) = Slot::pending();
        let resolver = Resolver {
            slot: Arc::clone(&slot),
            _ready: sender,
        };

        (Thunk { slot, ctx }, resolver)
    }

    /// Create a thunk that is already resolved to `outcome`.
    pub fn resolved(outcome: Result<V, Error>) -> Self {
        let (slot, sender) = Slot::pending();
        let _ = slot.outcome.set(outcome);
        drop(sender);

        Thunk {
            slot,
            ctx: Context::background(),
        }
    }

    /// Create a thunk that is already resolved to `value`.
    pub fn ready(value: V) -> Self {
        Self::resolved(Ok(value))
    }

    /// The same shared computation, observed through a different context.
    pub(crate) fn with_context(&self, ctx: Context) -> Self {
        Thunk {
            slot: Arc::clone(&self.slot),
            ctx,
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn is_resolved(&self) -> bool {
        self.slot.outcome.get().is_some()
    }

    /// True if both handles refer to the same underlying computation.
    pub fn shares_slot_with(&self, other: &Thunk<V>) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl<V: Clone> Thunk<V> {
    /// Block until this thunk is resolved, or until its context ends.
    pub fn get(&self) -> Result<V, Error> {
        if let Some(outcome) = self.slot.outcome.get() {
            return outcome.clone();
        }

        self.ctx.wait_on(&self.slot.ready)?;

        match self.slot.outcome.get() {
            Some(outcome) => outcome.clone(),
            None => Err(Error::Dropped),
        }
    }

    /// Get the result without blocking, if it has arrived.
    pub fn try_get(&self) -> Option<Result<V, Error>> {
        self.slot.outcome.get().cloned()
    }

    /// Wait for this thunk asynchronously. Any number of futures (and
    /// blocked threads) can wait on the same thunk at once.
    pub fn resolve(&self) -> ThunkFuture<V> {
        ThunkFuture {
            thunk: self.clone(),
            token: None,
            timer: None,
        }
    }
}

impl<V> Clone for Thunk<V> {
    fn clone(&self) -> Self {
        Thunk {
            slot: Arc::clone(&self.slot),
            ctx: self.ctx.clone(),
        }
    }
}

impl<V: Debug> Debug for Thunk<V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thunk")
            .field("outcome", &self.slot.outcome.get())
            .field("ctx", &self.ctx)
            .finish()
    }
}

/// Future returned by [`Thunk::resolve`].
pub struct ThunkFuture<V> {
    thunk: Thunk<V>,
    token: Option<Token>,
    timer: Option<Delay>,
}

impl<V: Clone> Future for ThunkFuture<V> {
    type Output = Result<V, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Self::Output> {
        let this = Pin::into_inner(self);

        {
            // The outcome is checked under the waker lock. A resolver sets
            // the outcome before it takes the wakers, so either we see the
            // outcome here or our waker is in the set it takes.
            let mut wakers = this.thunk.slot.wakers.lock();

            if let Some(outcome) = this.thunk.slot.outcome.get() {
                if let Some(token) = this.token.take() {
                    wakers.discard_waker(token);
                }
                return Poll::Ready(outcome.clone());
            }

            match this.token {
                Some(ref token) => wakers.replace_waker(token, cx.waker()),
                None => this.token = Some(wakers.add_waker(cx.waker().clone())),
            }
        }

        match this.thunk.ctx.poll_done(cx, &mut this.timer) {
            Poll::Ready(err) => Poll::Ready(Err(err.into())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<V> Drop for ThunkFuture<V> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.thunk.slot.wakers.lock().discard_waker(token);
        }
    }
}

impl<V: Debug> Debug for ThunkFuture<V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThunkFuture")
            .field("thunk", &self.thunk)
            .field("registered", &self.token.is_some())
            .finish()
    }
}

/// An error for one key of a [`ThunkMany`], tagged with the key's position.
#[derive(Debug, Clone, Error)]
#[error("key {index}: {error}")]
pub struct IndexedError {
    pub index: usize,
    pub error: Error,
}

/// The combined result of a [`ThunkMany`]. `data` is aligned with the
/// requested keys; a position whose load failed holds `None` and has an
/// entry in `errors`.
#[derive(Debug, Clone)]
pub struct ResultMany<V> {
    pub data: Vec<Option<V>>,
    pub errors: Vec<IndexedError>,
}

impl<V> ResultMany<V> {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// All the values, or the first error by position.
    pub fn into_result(self) -> Result<Vec<V>, IndexedError> {
        match self.errors.into_iter().next() {
            Some(err) => Err(err),
            // With no errors every slot is filled
            None => Ok(self.data.into_iter().flatten().collect()),
        }
    }
}

struct ManyInner<V> {
    thunks: Vec<Thunk<V>>,
    ctx: Context,
    resolved: OnceCell<ResultMany<V>>,
}

/// A handle on the results of several keys at once, as returned by
/// [`Loader::load_many`](crate::Loader::load_many).
///
/// Errors never short-circuit: every key is waited for, and each failure is
/// reported with its position. Like [`Thunk`], the combined result is
/// computed once and then returned on every call.
pub struct ThunkMany<V> {
    inner: Arc<ManyInner<V>>,
}

impl<V> ThunkMany<V> {
    pub(crate) fn new(ctx: Context, thunks: Vec<Thunk<V>>) -> Self {
        ThunkMany {
            inner: Arc::new(ManyInner {
                thunks,
                ctx,
                resolved: OnceCell::new(),
            }),
        }
    }

    /// The individual thunks, in key order.
    pub fn thunks(&self) -> &[Thunk<V>] {
        &self.inner.thunks
    }

    pub fn len(&self) -> usize {
        self.inner.thunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.thunks.is_empty()
    }
}

impl<V: Clone> ThunkMany<V> {
    /// Block until every key is resolved.
    pub fn get(&self) -> ResultMany<V> {
        if let Some(resolved) = self.inner.resolved.get() {
            return resolved.clone();
        }

        let outcomes = self.inner.thunks.iter().map(Thunk::get);
        self.settle(outcomes.collect())
    }

    /// Wait for every key asynchronously.
    pub async fn resolve(&self) -> ResultMany<V> {
        if let Some(resolved) = self.inner.resolved.get() {
            return resolved.clone();
        }

        let mut outcomes = Vec::with_capacity(self.inner.thunks.len());
        for thunk in &self.inner.thunks {
            outcomes.push(thunk.resolve().await);
        }

        self.settle(outcomes)
    }

    fn settle(&self, outcomes: Vec<Result<V, Error>>) -> ResultMany<V> {
        let mut data = Vec::with_capacity(outcomes.len());
        let mut errors = Vec::new();

        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(value) => data.push(Some(value)),
                Err(error) => {
                    data.push(None);
                    errors.push(IndexedError { index, error });
                }
            }
        }

        let many = ResultMany { data, errors };

        // An ended context means some thunks gave up waiting rather than
        // resolving; don't memoize that.
        if self.inner.ctx.err().is_none() {
            let _ = self.inner.resolved.set(many.clone());
        }

        many
    }
}

impl<V> Clone for ThunkMany<V> {
    fn clone(&self) -> Self {
        ThunkMany {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Debug> Debug for ThunkMany<V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThunkMany")
            .field("thunks", &self.inner.thunks)
            .field("resolved", &self.inner.resolved.get())
            .finish()
    }
}
