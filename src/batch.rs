//! The batch function contract, and the guard that runs it.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
};

use crate::{context::Context, error::Error, key::Keys};

/// A batch function resolves every key of a sealed window in one call.
///
/// It receives the keys in the order they were first requested, and must
/// return exactly one result per key, in the same order. A result list of
/// the wrong length isn't fatal: every request in that window receives an
/// [`Error::CountMismatch`] instead. A panic isn't fatal either: every
/// request in the window receives an [`Error::Panic`].
///
/// Implemented for any `Fn(&Context, &Keys<K>) -> Vec<Result<V, Error>>`.
/// The helpers on [`Keys`] build correctly aligned result lists.
pub trait BatchFn<K, V>: Send + Sync + 'static {
    fn load(&self, ctx: &Context, keys: &Keys<K>) -> Vec<Result<V, Error>>;
}

impl<K, V, F> BatchFn<K, V> for F
where
    F: Fn(&Context, &Keys<K>) -> Vec<Result<V, Error>> + Send + Sync + 'static,
{
    #[inline]
    fn load(&self, ctx: &Context, keys: &Keys<K>) -> Vec<Result<V, Error>> {
        self(ctx, keys)
    }
}

/// How a guarded batch call went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Failure {
    Panicked(String),
    Mismatched { keys: usize, results: usize },
}

impl Failure {
    pub(crate) fn to_error(&self) -> Error {
        match *self {
            Failure::Panicked(ref message) => Error::Panic(message.clone()),
            Failure::Mismatched { keys, results } => Error::CountMismatch { keys, results },
        }
    }
}

/// Call the batch function, containing panics and checking that the result
/// list lines up with the key list.
pub(crate) fn run_guarded<K: 'static, V: 'static>(
    batch_fn: &dyn BatchFn<K, V>,
    ctx: &Context,
    keys: &Keys<K>,
) -> Result<Vec<Result<V, Error>>, Failure> {
    // The batch function only ever sees shared references, and the loader's
    // own state is not touched while it runs, so nothing is left half-updated
    // by an unwind.
    let results = panic::catch_unwind(AssertUnwindSafe(|| batch_fn.load(ctx, keys)))
        .map_err(|payload| Failure::Panicked(panic_message(&*payload)))?;

    if results.len() != keys.len() {
        return Err(Failure::Mismatched {
            keys: keys.len(),
            results: results.len(),
        });
    }

    Ok(results)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("non-string panic payload")
    }
}
