use std::{error::Error as StdError, sync::Arc};

use thiserror::Error;

use crate::context::ContextError;

/// The error half of every thunk resolution.
///
/// Errors are shared between every caller waiting on the same key, so this
/// type is cheaply cloneable; resolver errors are kept behind an `Arc`.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// The batch function reported an error for this particular key.
    #[error("{0}")]
    Resolver(Arc<dyn StdError + Send + Sync>),

    /// The batch function panicked. Every request in the window receives
    /// this error, and none of them are memoized.
    #[error("Panic received in batch function: {0}")]
    Panic(String),

    /// The batch function returned a result list that wasn't the same length
    /// as its key list.
    #[error(
        "the batch function returned {results} results for {keys} keys; \
         it must return exactly one result per key, in key order"
    )]
    CountMismatch { keys: usize, results: usize },

    /// A value set passed to [`Keys::align_by`](crate::Keys::align_by) had
    /// no entry for this key.
    #[error("no value was returned for key {key:?}")]
    Missing { key: String },

    /// The caller's context was canceled or reached its deadline before the
    /// value arrived.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// The pending request was discarded without ever being dispatched.
    #[error("the batch request was dropped before a result was delivered")]
    Dropped,
}

impl Error {
    /// Wrap an arbitrary error (or message) as a per-key resolver error.
    ///
    /// ```
    /// use thunkloader::Error;
    ///
    /// let err = Error::resolver("no such user");
    /// assert_eq!(err.to_string(), "no such user");
    /// ```
    pub fn resolver<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Error::Resolver(Arc::from(err.into()))
    }

    /// True if this error came from a panicking batch function.
    pub fn is_panic(&self) -> bool {
        matches!(self, Error::Panic(..))
    }

    /// If this error is a context error, return it.
    pub fn context_error(&self) -> Option<ContextError> {
        match *self {
            Error::Context(err) => Some(err),
            _ => None,
        }
    }
}
