//! Multi-threaded scenarios exercising the crate only through its public
//! API, in the style of a stress test rather than a unit test: real OS
//! threads, real contention, assertions on the aggregate outcome.

use cpurc::{CounterHandle, DropOutcome};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Scenario A: create, clone once, drop in creation order.
#[test]
fn scenario_a_single_clone_drop_order() {
    let h1 = CounterHandle::new(4, 0).unwrap();
    let h2 = h1.clone_on_current_cpu();
    assert_eq!(h1.destroy(), DropOutcome::StillAlive);
    assert_eq!(h2.destroy(), DropOutcome::LastReference);
}

/// Scenario B: 99 clones, dropped in reverse acquisition order. Only the
/// very last drop should observe LastReference.
#[test]
fn scenario_b_ninety_nine_clones_reverse_drop() {
    let h1 = CounterHandle::new(8, 0).unwrap();
    let mut clones = Vec::with_capacity(99);
    for _ in 0..99u32 {
        clones.push(h1.clone_on_current_cpu());
    }
    assert_eq!(h1.use_count(), 100);

    clones.reverse();
    for h in clones {
        assert_eq!(h.destroy(), DropOutcome::StillAlive);
    }
    assert_eq!(h1.destroy(), DropOutcome::LastReference);
}

/// Scenario C: 16 threads each clone a shared handle 10,000 times into a
/// local vector, then drop every local clone. The main thread drops the
/// original last. Exactly one LastReference must be observed across the
/// whole run, regardless of interleaving.
#[test]
fn scenario_c_balanced_bookkeeping_under_concurrent_clone_drop() {
    const THREADS: u32 = 16;
    const CLONES_PER_THREAD: usize = 10_000;

    let h1 = Arc::new(CounterHandle::new(16, 0).unwrap());
    let last_reference_count = Arc::new(AtomicU32::new(0));

    let mut joins = Vec::with_capacity(THREADS as usize);
    for _ in 0..THREADS {
        let h1 = Arc::clone(&h1);
        let last_reference_count = Arc::clone(&last_reference_count);
        joins.push(std::thread::spawn(move || {
            let mut local = Vec::with_capacity(CLONES_PER_THREAD);
            for _ in 0..CLONES_PER_THREAD {
                local.push(h1.clone_on_current_cpu());
            }
            for h in local {
                if h.destroy() == DropOutcome::LastReference {
                    last_reference_count.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }
    for j in joins {
        j.join().unwrap();
    }

    let h1 = Arc::into_inner(h1).expect("every clone has already been destroyed");
    if h1.destroy() == DropOutcome::LastReference {
        last_reference_count.fetch_add(1, Ordering::Relaxed);
    }

    assert_eq!(last_reference_count.load(Ordering::Relaxed), 1);
}

/// Invariant 3 from the testable-properties list: a handle is null iff its
/// backing word is zero — `CounterHandle::NULL` is the only null value and
/// every freshly created handle is non-null.
#[test]
fn null_handle_uniqueness() {
    assert!(CounterHandle::NULL.is_null());
    let h = CounterHandle::new(4, 0).unwrap();
    assert!(!h.is_null());
    h.destroy();
}

/// Invariant 5: under strictly serial use, `use_count` tracks `n` clones
/// then `n` drops symmetrically.
#[test]
fn use_count_monotonic_under_serial_clone_then_drop() {
    const N: usize = 50;
    let h1 = CounterHandle::new(4, 0).unwrap();
    let mut clones = Vec::with_capacity(N);
    for _ in 0..N {
        clones.push(h1.clone_on_current_cpu());
        assert_eq!(h1.use_count(), clones.len() as i64 + 1);
    }
    while let Some(h) = clones.pop() {
        assert_eq!(h1.use_count(), clones.len() as i64 + 2);
        h.destroy();
    }
    assert_eq!(h1.destroy(), DropOutcome::LastReference);
}
