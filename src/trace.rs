//! Observability hooks around loads and batches.

use tracing::{field, Span};

use crate::{
    context::Context,
    error::Error,
    key::{Key, Keys},
    thunk::{Thunk, ThunkMany},
};

pub type LoadFinish<V> = Box<dyn FnOnce(&Thunk<V>) + Send>;
pub type LoadManyFinish<V> = Box<dyn FnOnce(&ThunkMany<V>) + Send>;
pub type BatchFinish<V> = Box<dyn FnOnce(&[Result<V, Error>]) + Send>;

/// A tracer is told when loads start and batches run. Each hook may return a
/// replacement context (to carry a span, say), and a callback that is
/// invoked once the operation is done.
///
/// Tracers are purely observational: the loader uses the returned context,
/// but nothing a tracer does can change which keys are batched or what any
/// caller receives.
pub trait Tracer<K, V>: Send + Sync {
    /// Called at the start of every `load`. The finish callback receives the
    /// thunk `load` is about to return.
    fn trace_load(&self, ctx: &Context, key: &Key<K>) -> (Context, LoadFinish<V>);

    /// Called at the start of every `load_many`.
    fn trace_load_many(&self, ctx: &Context, keys: &Keys<K>) -> (Context, LoadManyFinish<V>);

    /// Called before the batch function runs. The finish callback receives
    /// the results delivered to the window, whether they came from the batch
    /// function or from a contained failure.
    fn trace_batch(&self, ctx: &Context, keys: &Keys<K>) -> (Context, BatchFinish<V>);
}

/// The default tracer, which does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl<K, V> Tracer<K, V> for NoopTracer {
    fn trace_load(&self, ctx: &Context, _key: &Key<K>) -> (Context, LoadFinish<V>) {
        (ctx.clone(), Box::new(|_| {}))
    }

    fn trace_load_many(&self, ctx: &Context, _keys: &Keys<K>) -> (Context, LoadManyFinish<V>) {
        (ctx.clone(), Box::new(|_| {}))
    }

    fn trace_batch(&self, ctx: &Context, _keys: &Keys<K>) -> (Context, BatchFinish<V>) {
        (ctx.clone(), Box::new(|_| {}))
    }
}

/// A tracer that opens a `tracing` span for every load, load_many and
/// batch.
///
/// The span is stored in the returned context, so a batch span is parented
/// on the span of the load that opened its window.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTracer;

fn parent_of(ctx: &Context) -> Option<tracing::Id> {
    ctx.value::<Span>().and_then(Span::id)
}

impl<K, V> Tracer<K, V> for TracingTracer {
    fn trace_load(&self, ctx: &Context, key: &Key<K>) -> (Context, LoadFinish<V>) {
        let span = tracing::debug_span!(
            parent: parent_of(ctx),
            "thunkloader.load",
            key = key.id(),
            resolved = field::Empty,
        );

        let ctx = ctx.with_value(span.clone());
        let finish: LoadFinish<V> = Box::new(move |thunk| {
            span.record("resolved", thunk.is_resolved());
        });

        (ctx, finish)
    }

    fn trace_load_many(&self, ctx: &Context, keys: &Keys<K>) -> (Context, LoadManyFinish<V>) {
        let span = tracing::debug_span!(
            parent: parent_of(ctx),
            "thunkloader.load_many",
            keys = ?keys,
            count = keys.len(),
        );

        let ctx = ctx.with_value(span.clone());
        let finish: LoadManyFinish<V> = Box::new(move |_thunks| drop(span));

        (ctx, finish)
    }

    fn trace_batch(&self, ctx: &Context, keys: &Keys<K>) -> (Context, BatchFinish<V>) {
        let span = tracing::debug_span!(
            parent: parent_of(ctx),
            "thunkloader.batch",
            keys = ?keys,
            count = keys.len(),
            errors = field::Empty,
        );

        let ctx = ctx.with_value(span.clone());
        let finish: BatchFinish<V> = Box::new(move |results| {
            let errors = results.iter().filter(|result| result.is_err()).count();
            span.record("errors", errors);
        });

        (ctx, finish)
    }
}
