//! These tests are intended to ensure that a batch function is called the
//! correct number of times, with the correct keys, for different
//! configurations

use std::{sync::Arc, thread, time::Duration};

use parking_lot::Mutex;
use thunkloader::{Context, Error, Keys, Loader, LoaderBuilder};

/// Records the keys of every call to a batch function.
#[derive(Debug, Clone, Default)]
struct Recorder {
    batches: Arc<Mutex<Vec<Vec<String>>>>,
}

impl Recorder {
    fn record<K>(&self, keys: &Keys<K>) {
        let ids = keys.ids().into_iter().map(String::from).collect();
        self.batches.lock().push(ids);
    }

    fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().clone()
    }

    fn calls(&self) -> usize {
        self.batches.lock().len()
    }
}

fn identity(recorder: &Recorder) -> LoaderBuilder<&'static str, String> {
    let recorder = recorder.clone();

    Loader::builder(move |_: &Context, keys: &Keys<&'static str>| {
        recorder.record(keys);
        keys.values(|key| key.to_string())
    })
}

#[test]
fn simple_test() {
    let recorder = Recorder::default();
    let loader = identity(&recorder).build();
    let ctx = Context::background();

    let thunk1 = loader.load(&ctx, "1");
    let thunk2 = loader.load(&ctx, "2");
    let thunk3 = loader.load(&ctx, "3");

    assert_eq!(thunk1.get().unwrap(), "1");
    assert_eq!(thunk2.get().unwrap(), "2");
    assert_eq!(thunk3.get().unwrap(), "3");
    assert_eq!(recorder.batches(), [["1", "2", "3"]]);
}

#[test]
fn thunks_are_repeatable() {
    let recorder = Recorder::default();
    let loader = identity(&recorder).build();

    let thunk = loader.load(&Context::background(), "a");

    assert_eq!(thunk.get().unwrap(), "a");
    assert!(thunk.is_resolved());
    assert_eq!(thunk.try_get().unwrap().unwrap(), "a");
    assert_eq!(thunk.get().unwrap(), "a");
    assert_eq!(recorder.calls(), 1);
}

#[test]
fn capacity_test() {
    let recorder = Recorder::default();
    let loader = identity(&recorder).batch_capacity(2).build();
    let ctx = Context::background();

    let thunk1 = loader.load(&ctx, "1");
    let thunk2 = loader.load(&ctx, "2");
    let thunk3 = loader.load(&ctx, "3");

    assert_eq!(thunk1.get().unwrap(), "1");
    assert_eq!(thunk2.get().unwrap(), "2");
    assert_eq!(thunk3.get().unwrap(), "3");

    // The full window dispatches immediately; the remainder waits out its
    // own window.
    assert_eq!(recorder.batches(), vec![vec!["1", "2"], vec!["3"]]);
}

#[test]
fn zero_wait_capacity_test() {
    let recorder = Recorder::default();
    let loader = identity(&recorder)
        .wait(Duration::ZERO)
        .batch_capacity(2)
        .build();
    let ctx = Context::background();

    let thunk1 = loader.load(&ctx, "1");
    let thunk2 = loader.load(&ctx, "2");
    let thunk3 = loader.load(&ctx, "3");

    assert_eq!(thunk1.get().unwrap(), "1");
    assert_eq!(thunk2.get().unwrap(), "2");
    assert_eq!(thunk3.get().unwrap(), "3");

    // Both windows may be in flight at once, so only their contents are
    // ordered
    let mut batches = recorder.batches();
    batches.sort();
    assert_eq!(batches, vec![vec!["1", "2"], vec!["3"]]);
}

#[test]
fn capacity_splits_many_loads_into_ceil_n_over_m_calls() {
    let recorder = Recorder::default();
    let loader = identity(&recorder).batch_capacity(3).build();

    const KEYS: [&str; 8] = ["a", "b", "c", "d", "e", "f", "g", "h"];
    let result = loader.load_many(&Context::background(), KEYS).get();

    assert_eq!(result.into_result().unwrap(), KEYS);

    // Full windows dispatch concurrently, so calls may be recorded in any
    // order; each one still holds its keys in enqueue order.
    let mut batches = recorder.batches();
    batches.sort();
    assert_eq!(
        batches,
        vec![vec!["a", "b", "c"], vec!["d", "e", "f"], vec!["g", "h"]]
    );
}

#[test]
fn test_duplicate_keys() {
    let recorder = Recorder::default();
    let loader = identity(&recorder).build();
    let ctx = Context::background();

    let thunk1 = loader.load(&ctx, "1");
    let thunk2 = loader.load(&ctx, "1");
    let thunk3 = loader.load(&ctx, "2");

    assert!(thunk1.shares_slot_with(&thunk2));
    assert_eq!(thunk1.get().unwrap(), "1");
    assert_eq!(thunk2.get().unwrap(), "1");
    assert_eq!(thunk3.get().unwrap(), "2");
    assert_eq!(recorder.batches(), [["1", "2"]]);
}

#[test]
fn duplicate_keys_are_merged_without_a_cache() {
    let recorder = Recorder::default();
    let loader = identity(&recorder).no_cache().build();
    let ctx = Context::background();

    let thunk1 = loader.load(&ctx, "1");
    let thunk2 = loader.load(&ctx, "1");

    // Separate computations, but one entry in the batch
    assert!(!thunk1.shares_slot_with(&thunk2));
    assert_eq!(thunk1.get().unwrap(), "1");
    assert_eq!(thunk2.get().unwrap(), "1");
    assert_eq!(recorder.batches(), [["1"]]);

    // Nothing is memoized across windows
    assert_eq!(loader.load(&ctx, "1").get().unwrap(), "1");
    assert_eq!(recorder.calls(), 2);
}

/// Load from several threads, and confirm that a single batch call was made
/// fulfilling all of them
#[test]
fn test_threaded() {
    let recorder = Recorder::default();
    let loader = identity(&recorder).wait(Duration::from_millis(50)).build();
    let loader_ref = &loader;

    const KEYS: [&str; 4] = ["0", "1", "2", "3"];

    let result: Vec<String> = crossbeam::scope(move |s| {
        let threads: Vec<_> = KEYS
            .iter()
            .enumerate()
            .map(move |(i, &key)| {
                s.spawn(move |_s| {
                    thread::sleep(Duration::from_millis(i as u64 + 2));
                    loader_ref.load(&Context::background(), key).get().unwrap()
                })
            })
            .collect();

        threads.into_iter().map(|t| t.join().unwrap()).collect()
    })
    .unwrap();

    assert_eq!(result, KEYS);
    assert_eq!(recorder.calls(), 1);
    assert_eq!(recorder.batches()[0].len(), 4);
}

#[test]
fn loads_during_a_dispatch_open_the_next_window() {
    let recorder = Recorder::default();
    let loader = {
        let recorder = recorder.clone();
        Loader::builder(move |_: &Context, keys: &Keys<&'static str>| {
            recorder.record(keys);
            thread::sleep(Duration::from_millis(60));
            keys.values(|key| key.to_string())
        })
        .wait(Duration::from_millis(5))
        .build()
    };
    let ctx = Context::background();

    let first = loader.load(&ctx, "a");

    // By now the first window is sealed and its batch is running
    thread::sleep(Duration::from_millis(25));
    let second = loader.load(&ctx, "b");

    assert_eq!(first.get().unwrap(), "a");
    assert_eq!(second.get().unwrap(), "b");
    assert_eq!(recorder.batches(), vec![vec!["a"], vec!["b"]]);
}

#[test]
fn mismatched_result_count() {
    let loader = Loader::builder(|_: &Context, keys: &Keys<u32>| {
        let mut results = keys.values(|key| key * 10);
        results.pop();
        results
    })
    .silent()
    .build();

    let result = loader.load_many(&Context::background(), 0u32..10).get();

    assert_eq!(result.len(), 10);
    assert!(result.data.iter().all(Option::is_none));
    assert_eq!(result.errors.len(), 10);

    for (index, error) in result.errors.iter().enumerate() {
        assert_eq!(error.index, index);
        assert!(matches!(
            error.error,
            Error::CountMismatch {
                keys: 10,
                results: 9
            }
        ));
    }
}

#[test]
fn errors_are_isolated_per_key() {
    let recorder = Recorder::default();
    let loader = {
        let recorder = recorder.clone();
        Loader::builder(move |_: &Context, keys: &Keys<&'static str>| {
            recorder.record(keys);
            keys.results(|&key| match key {
                "bad" => Err(Error::resolver(format!("no such key: {}", key))),
                key => Ok(key.len()),
            })
        })
        .build()
    };
    let ctx = Context::background();

    let good = loader.load(&ctx, "good");
    let bad = loader.load(&ctx, "bad");
    let other = loader.load(&ctx, "other");

    assert_eq!(good.get().unwrap(), 4);
    assert_eq!(bad.get().unwrap_err().to_string(), "no such key: bad");
    assert_eq!(other.get().unwrap(), 5);

    // The error is memoized like any other result
    assert!(loader.load(&ctx, "bad").get().is_err());
    assert_eq!(recorder.calls(), 1);
}

#[test]
fn align_by_matches_unordered_rows() {
    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: u32,
    }

    let loader = Loader::new(|_: &Context, keys: &Keys<u32>| {
        // A backend that returns rows in its own order, and skips unknown ids
        let rows = keys
            .raw()
            .filter(|&&id| id != 404)
            .map(|&id| Row { id })
            .collect::<Vec<_>>()
            .into_iter()
            .rev();

        keys.align_by(rows, |row| row.id.to_string())
    });

    let result = loader
        .load_many(&Context::background(), vec![1u32, 404, 3])
        .get();

    assert_eq!(result.data[0].as_ref().unwrap().id, 1);
    assert_eq!(result.data[2].as_ref().unwrap().id, 3);
    assert!(result.data[1].is_none());
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].index, 1);
    assert!(matches!(result.errors[0].error, Error::Missing { ref key } if key == "404"));
}

#[test]
fn clear_cache_on_batch_always_rebatches() {
    let recorder = Recorder::default();
    let loader = identity(&recorder).clear_cache_on_batch().build();
    let ctx = Context::background();

    assert_eq!(loader.load(&ctx, "a").get().unwrap(), "a");
    assert_eq!(loader.load(&ctx, "a").get().unwrap(), "a");
    assert_eq!(recorder.batches(), vec![vec!["a"], vec!["a"]]);
}

#[test]
fn composite_keys_batch_by_projection() {
    use thunkloader::{CacheKey, Key};

    #[derive(Debug, Clone)]
    struct Point {
        x: i32,
        y: i32,
    }

    impl CacheKey for Point {
        fn cache_key(&self) -> String {
            format!("{},{}", self.x, self.y)
        }
    }

    let recorder = Recorder::default();
    let loader = {
        let recorder = recorder.clone();
        Loader::builder(move |_: &Context, keys: &Keys<Point>| {
            recorder.record(keys);
            keys.values(|point| point.x * point.y)
        })
        .build()
    };
    let ctx = Context::background();

    let thunk1 = loader.load(&ctx, Point { x: 2, y: 3 });
    let thunk2 = loader.load(&ctx, Point { x: 2, y: 3 });
    let thunk3 = loader.load(&ctx, Key::with_id(Point { x: 4, y: 5 }, "custom"));

    assert_eq!(thunk1.get().unwrap(), 6);
    assert_eq!(thunk2.get().unwrap(), 6);
    assert_eq!(thunk3.get().unwrap(), 20);
    assert_eq!(recorder.batches(), [["2,3", "custom"]]);
}
