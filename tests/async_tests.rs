//! These tests ensure that thunks can be awaited, and that waiting futures
//! are notified when their value is delivered.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context as TaskContext, Poll},
    thread,
    time::Duration,
};

use cooked_waker::{IntoWaker, ViaRawPointer, Wake, WakeRef};
use futures::{executor, future, FutureExt};
use thunkloader::{Context, ContextError, Error, Keys, Loader};

/// A waker that stores true if it has been awoken
#[derive(Debug, Clone, Default)]
struct BoolWaker {
    cell: Arc<AtomicBool>,
}

impl BoolWaker {
    fn is_signaled(&self) -> bool {
        self.cell.load(Ordering::SeqCst)
    }
}

impl WakeRef for BoolWaker {
    fn wake_by_ref(&self) {
        self.cell.store(true, Ordering::SeqCst)
    }
}

impl Wake for BoolWaker {}

// SAFETY: delegates to the inner `Arc`, which upholds the pointer contract.
unsafe impl ViaRawPointer for BoolWaker {
    type Target = AtomicBool;

    fn into_raw(self) -> *mut AtomicBool {
        Arc::into_raw(self.cell) as *mut AtomicBool
    }

    unsafe fn from_raw(ptr: *mut AtomicBool) -> Self {
        BoolWaker {
            cell: Arc::from_raw(ptr as *const AtomicBool),
        }
    }
}

fn stringify() -> Loader<usize, String> {
    Loader::new(|_: &Context, keys: &Keys<usize>| keys.values(|value| value.to_string()))
}

#[test]
fn simple_test() {
    let loader = stringify();
    let ctx = Context::background();

    let thunk1 = loader.load(&ctx, 10usize);
    let thunk2 = loader.load(&ctx, 20usize);

    let res1 = executor::block_on(thunk1.resolve());
    let res2 = executor::block_on(thunk2.resolve());

    assert_eq!(res1.unwrap(), "10");
    assert_eq!(res2.unwrap(), "20");
}

#[test]
fn many_futures_on_one_thunk() {
    let loader = stringify();
    let thunk = loader.load(&Context::background(), 1usize);

    let (res1, res2) = executor::block_on(future::join(thunk.resolve(), thunk.resolve()));

    assert_eq!(res1.unwrap(), "1");
    assert_eq!(res2.unwrap(), "1");
}

#[test]
fn resolve_many() {
    let loader = stringify();
    let many = loader.load_many(&Context::background(), vec![1usize, 2, 3]);

    let result = executor::block_on(many.resolve());
    assert_eq!(result.into_result().unwrap(), ["1", "2", "3"]);

    // Memoized, so the blocking accessor returns at once
    assert_eq!(many.get().data.len(), 3);
}

#[test]
fn delivery_wakes_the_future() {
    let loader = stringify();
    let thunk = loader.load(&Context::background(), 5usize);

    let waker = BoolWaker::default();
    let task_waker = waker.clone().into_waker();
    let mut cx = TaskContext::from_waker(&task_waker);

    let mut fut = thunk.resolve();
    assert!(fut.poll_unpin(&mut cx).is_pending());
    assert!(!waker.is_signaled());

    // Blocking on a clone returns only once the value has been delivered
    assert_eq!(thunk.get().unwrap(), "5");
    assert!(waker.is_signaled());

    assert!(matches!(fut.poll_unpin(&mut cx), Poll::Ready(Ok(ref value)) if value == "5"));
}

#[test]
fn dropped_futures_are_forgotten() {
    let loader = stringify();
    let thunk = loader.load(&Context::background(), 6usize);

    let waker = BoolWaker::default();
    let task_waker = waker.clone().into_waker();
    let mut cx = TaskContext::from_waker(&task_waker);

    let mut fut = thunk.resolve();
    assert!(fut.poll_unpin(&mut cx).is_pending());
    drop(fut);

    assert_eq!(thunk.get().unwrap(), "6");
    assert!(!waker.is_signaled());
}

#[test]
fn resolved_thunks_are_ready_immediately() {
    let loader = stringify();
    let ctx = Context::background();
    loader.prime(&ctx, 3usize, String::from("three"));

    let waker = BoolWaker::default().into_waker();
    let mut cx = TaskContext::from_waker(&waker);

    let mut fut = loader.load(&ctx, 3usize).resolve();
    assert!(matches!(
        fut.poll_unpin(&mut cx),
        Poll::Ready(Ok(ref value)) if value == "three"
    ));
}

#[test]
fn deadline_ends_the_wait() {
    let loader = Loader::new(|_: &Context, keys: &Keys<u8>| {
        thread::sleep(Duration::from_millis(100));
        keys.values(|&key| key)
    });

    let ctx = Context::background().with_timeout(Duration::from_millis(10));
    let thunk = loader.load(&ctx, 1u8);

    let result = executor::block_on(thunk.resolve());
    assert!(matches!(
        result,
        Err(Error::Context(ContextError::DeadlineExceeded))
    ));
}

#[test]
fn cancel_ends_the_wait() {
    let loader = Loader::new(|_: &Context, keys: &Keys<u8>| {
        thread::sleep(Duration::from_millis(100));
        keys.values(|&key| key)
    });

    let (ctx, handle) = Context::background().with_cancel();
    let thunk = loader.load(&ctx, 1u8);

    let canceler = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        handle.cancel();
    });

    let result = executor::block_on(thunk.resolve());
    assert_eq!(
        result.unwrap_err().context_error(),
        Some(ContextError::Canceled)
    );

    canceler.join().unwrap();
}
