//! End-to-end memoization over the JSON-file backend.
//!
//! Separate `Memoizer` instances over the same cache directory stand in for
//! separate process invocations: nothing is shared between them except the
//! filesystem.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use memovault_storage::{CallArgs, JsonFileBackend, Memoizer};

fn quick_backend(dir: &std::path::Path) -> JsonFileBackend {
    JsonFileBackend::new(dir)
        .with_poll_interval(Duration::from_millis(15))
        .with_deadlock_age(Duration::from_secs(60))
}

fn square_engine(
    dir: &std::path::Path,
    calls: Arc<AtomicUsize>,
) -> Memoizer<JsonFileBackend, impl Fn(&CallArgs) -> i64, i64> {
    Memoizer::new(
        move |args: &CallArgs| {
            calls.fetch_add(1, Ordering::SeqCst);
            let x = args.positional()[0].as_i64().unwrap();
            x * x
        },
        "square",
        quick_backend(dir),
    )
}

fn args(x: i64) -> CallArgs {
    CallArgs::new().arg(x).unwrap()
}

#[test]
fn result_survives_across_engine_instances() {
    let dir = TempDir::new().unwrap();

    let first_calls = Arc::new(AtomicUsize::new(0));
    let first = square_engine(dir.path(), Arc::clone(&first_calls));
    assert_eq!(first.run(&args(5)).unwrap(), 25);
    assert_eq!(first_calls.load(Ordering::SeqCst), 1);

    // A fresh engine over the same directory, as a later invocation would
    // construct, must answer from the cache.
    let second_calls = Arc::new(AtomicUsize::new(0));
    let second = square_engine(dir.path(), Arc::clone(&second_calls));
    assert_eq!(second.run(&args(5)).unwrap(), 25);
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn concurrent_engines_compute_once() {
    let dir = TempDir::new().unwrap();
    let total_calls = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();

    for _ in 0..3 {
        let path = dir.path().to_path_buf();
        let total_calls = Arc::clone(&total_calls);
        handles.push(thread::spawn(move || {
            let engine = Memoizer::new(
                move |args: &CallArgs| {
                    total_calls.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(50));
                    args.positional()[0].as_i64().unwrap() * 2
                },
                "double",
                quick_backend(&path),
            );
            engine.run(&args(21)).unwrap()
        }));
    }

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 42);
    }
    assert_eq!(
        total_calls.load(Ordering::SeqCst),
        1,
        "only one engine may compute"
    );
}

#[test]
fn lock_files_are_cleaned_up_after_run() {
    let dir = TempDir::new().unwrap();
    let engine = square_engine(dir.path(), Arc::new(AtomicUsize::new(0)));
    engine.run(&args(3)).unwrap();

    let names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(names.len(), 1, "only the cache entry should remain: {names:?}");
    assert!(names[0].starts_with("square_"));
    assert!(names[0].ends_with(".json"));
}

#[test]
fn invalidate_on_call_recomputes_and_keeps_one_entry() {
    let dir = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let engine = square_engine(dir.path(), Arc::clone(&calls)).invalidate_on_call(true);

    assert_eq!(engine.run(&args(4)).unwrap(), 16);
    assert_eq!(engine.run(&args(4)).unwrap(), 16);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let entries = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(entries, 1);
}

#[test]
fn structured_results_roundtrip() {
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Summary {
        total: i64,
        labels: Vec<String>,
    }

    let dir = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let engine: Memoizer<_, _, Summary> = Memoizer::new(
        move |args: &CallArgs| {
            counter.fetch_add(1, Ordering::SeqCst);
            Summary {
                total: args.positional().iter().filter_map(|v| v.as_i64()).sum(),
                labels: vec!["a".to_string(), "b".to_string()],
            }
        },
        "summarize",
        quick_backend(dir.path()),
    );

    let call = CallArgs::new().arg(1).unwrap().arg(2).unwrap();
    let computed = engine.run(&call).unwrap();
    let cached = engine.run(&call).unwrap();

    assert_eq!(computed, cached);
    assert_eq!(
        cached,
        Summary {
            total: 3,
            labels: vec!["a".to_string(), "b".to_string()],
        }
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn separate_prefixes_do_not_share_entries() {
    let dir = TempDir::new().unwrap();

    let batch_calls = Arc::new(AtomicUsize::new(0));
    let batch =
        square_engine(dir.path(), Arc::clone(&batch_calls)).with_prefix("batch");
    let nightly_calls = Arc::new(AtomicUsize::new(0));
    let nightly =
        square_engine(dir.path(), Arc::clone(&nightly_calls)).with_prefix("nightly");

    batch.run(&args(5)).unwrap();
    nightly.run(&args(5)).unwrap();

    assert_eq!(batch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(nightly_calls.load(Ordering::SeqCst), 1);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
}
