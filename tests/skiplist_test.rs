//! Concurrency tests for the skiplist
//!
//! Exercises arbitrary interleavings of insert/remove/scan from multiple
//! threads against the ordered-set invariants.

use anukram::skiplist::SkipList;
use crossbeam_epoch as epoch;
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_concurrent_inserts_distinct_keys() {
    let list: Arc<SkipList<u64, u64>> = Arc::new(SkipList::new());
    let threads = 8;
    let per_thread = 1_000u64;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads as u64)
        .map(|t| {
            let list = Arc::clone(&list);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..per_thread {
                    let key = t * per_thread + i;
                    assert!(list.insert(key, key * 10));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let total = threads as u64 * per_thread;
    assert_eq!(list.len(), total as usize);
    let guard = epoch::pin();
    let keys: Vec<u64> = list.iter(&guard).map(|e| *e.key()).collect();
    assert_eq!(keys, (0..total).collect::<Vec<_>>());
}

#[test]
fn test_interleaved_insert_remove_resolution() {
    // Each thread owns a disjoint key set; it inserts every key and
    // removes the even ones. A final single-threaded scan must yield
    // exactly the keys whose operations resolve to "present".
    let list: Arc<SkipList<u64, ()>> = Arc::new(SkipList::new());
    let threads = 8u64;
    let per_thread = 500u64;
    let barrier = Arc::new(Barrier::new(threads as usize));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let list = Arc::clone(&list);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..per_thread {
                    let key = i * threads + t;
                    assert!(list.insert(key, ()));
                    if key % 2 == 0 {
                        assert!(list.remove(&key));
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let guard = epoch::pin();
    let keys: Vec<u64> = list.iter(&guard).map(|e| *e.key()).collect();
    let expected: Vec<u64> = (0..threads * per_thread).filter(|k| k % 2 == 1).collect();
    assert_eq!(keys, expected);
}

#[test]
fn test_concurrent_same_key_insert_exactly_one_wins() {
    let list: Arc<SkipList<u64, u64>> = Arc::new(SkipList::new());
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads as u64)
        .map(|t| {
            let list = Arc::clone(&list);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                list.insert(42, t)
            })
        })
        .collect();
    let wins = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(wins, 1);
    assert_eq!(list.len(), 1);
}

#[test]
fn test_concurrent_same_key_remove_exactly_one_wins() {
    let list: Arc<SkipList<u64, ()>> = Arc::new(SkipList::new());
    list.insert(7, ());
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let list = Arc::clone(&list);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                list.remove(&7)
            })
        })
        .collect();
    let wins = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(wins, 1);
    assert!(list.is_empty());
}

#[test]
fn test_scan_during_concurrent_writes() {
    let list: Arc<SkipList<u64, ()>> = Arc::new(SkipList::new());
    // Seed entries that every scan must observe.
    for k in (0..1_000).map(|k| k * 2) {
        list.insert(k, ());
    }
    let seeded: Vec<u64> = (0..1_000).map(|k| k * 2).collect();

    let writer = {
        let list = Arc::clone(&list);
        thread::spawn(move || {
            for k in (0..1_000).map(|k| k * 2 + 1) {
                list.insert(k, ());
            }
        })
    };

    for _ in 0..20 {
        let guard = epoch::pin();
        let keys: Vec<u64> = list.iter(&guard).map(|e| *e.key()).collect();
        // Ascending, and no seeded entry missing.
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        let mut it = keys.iter().peekable();
        for want in &seeded {
            while let Some(k) = it.peek() {
                if **k < *want {
                    it.next();
                } else {
                    break;
                }
            }
            assert_eq!(it.next(), Some(want));
        }
    }
    writer.join().unwrap();
    assert_eq!(list.len(), 2_000);
}
