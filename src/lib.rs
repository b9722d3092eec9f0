//! Thunkloader is a Rust implementation of the
//! [dataloader pattern](https://github.com/graphql/dataloader) originally
//! created by Facebook. It coalesces many individual "load this key"
//! requests, issued independently from anywhere in a unit of work, into a
//! few bulk calls to a batch function, then hands each requester the result
//! for its own key. The requesters never know that batching happened.
//!
//! ## Overview
//!
//! Suppose you have a backend that can fetch users in bulk, but the code that
//! needs users (say, the resolvers of a graph query) only ever asks for one
//! at a time. First, write a batch function. It receives the keys of one
//! batch, in the order they were first requested, and must return exactly
//! one result per key, in the same order:
//!
//! ```
//! use thunkloader::{Context, Error, Keys};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! fn fetch_users(_ctx: &Context, ids: &Keys<u64>) -> Vec<Result<User, Error>> {
//!     ids.values(|&id| User {
//!         id,
//!         name: format!("user {}", id),
//!     })
//! }
//! ```
//!
//! The helpers on [`Keys`] ([`values`], [`results`] and [`align_by`]) build a
//! correctly aligned result list, including when the backend returns its
//! rows in some other order.
//!
//! Then create a [`Loader`] around it, and load keys. [`load`] returns a
//! [`Thunk`] right away; calling [`Thunk::get`] blocks until the key's batch
//! has run. Every load made within the loader's wait window (16ms by
//! default) lands in the same batch:
//!
//! ```
//! # use thunkloader::{Context, Error, Keys};
//! # #[derive(Debug, Clone, PartialEq)] struct User { id: u64, name: String }
//! # fn fetch_users(_ctx: &Context, ids: &Keys<u64>) -> Vec<Result<User, Error>> {
//! #     ids.values(|&id| User { id, name: format!("user {}", id) })
//! # }
//! use thunkloader::Loader;
//!
//! let loader = Loader::new(fetch_users);
//! let ctx = Context::background();
//!
//! let alice = loader.load(&ctx, 1u64);
//! let bob = loader.load(&ctx, 2u64);
//!
//! // Both keys are resolved by one call to `fetch_users`
//! assert_eq!(alice.get().unwrap().name, "user 1");
//! assert_eq!(bob.get().unwrap().name, "user 2");
//! ```
//!
//! Thunks are memoized. Loading a key that has already been loaded returns
//! the same computation, whether it's still in flight or long finished, so
//! each key reaches the batch function at most once per loader. Use
//! [`clear`], [`clear_all`] and [`prime`] to manage the cache, or configure
//! the loader with a [`LoaderBuilder`]:
//!
//! ```
//! # use thunkloader::{Context, Keys};
//! use std::time::Duration;
//! use thunkloader::Loader;
//!
//! let loader = Loader::builder(|_: &Context, keys: &Keys<String>| {
//!     keys.values(|key| key.to_uppercase())
//! })
//! .batch_capacity(50)
//! .wait(Duration::from_millis(2))
//! .max_timeout(Duration::from_secs(1))
//! .build();
//!
//! let ctx = Context::background();
//! loader.prime(&ctx, String::from("b"), String::from("primed"));
//!
//! let many = loader.load_many(&ctx, vec![String::from("a"), String::from("b")]);
//! assert_eq!(many.get().into_result().unwrap(), ["A", "primed"]);
//! ```
//!
//! ## Contexts
//!
//! Every load takes a [`Context`], which carries an optional deadline, any
//! number of cancellation signals, and typed values. A thunk waits through
//! the context of the load that produced it: if the context ends first,
//! [`Thunk::get`] returns [`Error::Context`]. That only releases the one
//! caller; the key stays in its batch, and everybody else waiting on it gets
//! the value.
//!
//! The batch function receives the context of the first load in its window.
//! If the loader has a [`max_timeout`](LoaderBuilder::max_timeout), the batch
//! function instead receives a copy of that context detached from its
//! deadline and cancellation, bounded by the max timeout, so one impatient
//! caller can't abort work that its co-batched callers still need.
//!
//! ## Async
//!
//! Thunks can also be awaited, with [`Thunk::resolve`] and
//! [`ThunkMany::resolve`]. The futures are runtime-agnostic: the batch runs
//! on the loader's own dispatch thread, and the future is woken when its
//! result is delivered.
//!
//! ```
//! use futures::executor::block_on;
//! use thunkloader::{Context, Keys, Loader};
//!
//! let loader = Loader::new(|_: &Context, keys: &Keys<u32>| keys.values(|n| n * 2));
//! let thunk = loader.load(&Context::background(), 21u32);
//!
//! assert_eq!(block_on(thunk.resolve()).unwrap(), 42);
//! ```
//!
//! ## Design notes
//!
//! ### Failure containment
//!
//! A batch function that panics, or that returns the wrong number of
//! results, doesn't take the loader down with it. The panic is caught at the
//! dispatch boundary and every request of that window receives an
//! [`Error::Panic`] carrying the panic message (a mismatch produces
//! [`Error::CountMismatch`] instead). The loader stays usable, and because a
//! panic says nothing about the keys themselves, panicked keys are removed
//! from the cache so the next load tries them again. Per-key errors, on the
//! other hand, are memoized exactly like values.
//!
//! ### Keys
//!
//! A [`Key`] pairs a raw key with a string projection that serves as its
//! identity in the cache and in a window. Raw key types don't need to be
//! `Hash` or `Eq`; they implement [`CacheKey`] (or are wrapped with
//! [`Key::with_id`]) to say how they are projected. Two keys are the same
//! key exactly when their projections are equal.
//!
//! ### Windows
//!
//! Exactly one window collects keys at a time. The first load into a window
//! starts a dispatch thread, which waits out the window (or until the window
//! is filled to capacity), seals it, and runs the batch. Loads arriving after
//! the seal go into the next window, which may start collecting while the
//! previous batch is still running.
//!
//! [`values`]: Keys::values
//! [`results`]: Keys::results
//! [`align_by`]: Keys::align_by
//! [`load`]: Loader::load
//! [`clear`]: Loader::clear
//! [`clear_all`]: Loader::clear_all
//! [`prime`]: Loader::prime

mod batch;
mod cache;
mod config;
mod context;
mod error;
mod key;
mod loader;
mod logger;
mod thunk;
mod trace;
mod wakerset;
mod window;

pub use batch::BatchFn;
pub use cache::{Cache, DataCache, InMemoryCache, InMemoryDataCache, NoCache};
pub use config::{Config, LoaderBuilder, DEFAULT_WAIT};
pub use context::{CancelHandle, Context, ContextError};
pub use error::Error;
pub use key::{CacheKey, Key, Keys};
pub use loader::Loader;
pub use logger::{Logger, SilentLogger, TracingLogger};
pub use thunk::{IndexedError, ResultMany, Thunk, ThunkFuture, ThunkMany};
pub use trace::{BatchFinish, LoadFinish, LoadManyFinish, NoopTracer, Tracer, TracingTracer};
