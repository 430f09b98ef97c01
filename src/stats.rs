//! Observability counters, enabled by the `stats` feature.
//!
//! All counters use `Relaxed` ordering — they are purely observational and
//! never participate in the mark/rebase or weak-upgrade protocols, which
//! get their ordering guarantees from the `Slab`/`Arena` atomics directly.
//!
//! # Usage
//!
//! ```ignore
//! let snap = cpurc::stats::snapshot();
//! println!("arenas created: {}", snap.arenas_created);
//! ```
//!
//! Obtain a [`Snapshot`] with [`snapshot()`]. Individual counter loads are
//! individually atomic but not globally consistent with each other.

use core::sync::atomic::{AtomicU64, Ordering};

pub(crate) struct Stats {
    /// Arenas allocated via `Arena::create`.
    pub arenas_created: AtomicU64,
    /// Arenas freed via `Arena::destroy`.
    pub arenas_destroyed: AtomicU64,
    /// Strong handles produced by `CounterHandle::new`.
    pub handles_created: AtomicU64,
    /// Strong handles produced by `clone_on_current_cpu`.
    pub handles_cloned: AtomicU64,
    /// Strong handles consumed by `destroy`, excluding already-null ones.
    pub handles_destroyed: AtomicU64,
    /// Times an increment found its CPU's bit already claimed by a
    /// concurrent marker, so it deferred to that thread's rebase instead of
    /// marking (and rebasing) itself.
    pub mark_retries: AtomicU64,
    /// Weak handles produced by `downgrade`.
    pub weak_handles_created: AtomicU64,
    /// Weak handles consumed by `destroy`.
    pub weak_handles_destroyed: AtomicU64,
    /// `WeakCounterHandle::upgrade` calls that produced a strong handle.
    pub weak_upgrades_succeeded: AtomicU64,
    /// `WeakCounterHandle::upgrade` calls that observed a dead counter.
    pub weak_upgrades_failed: AtomicU64,
    /// `ArenaManager::acquire_handle` calls that claimed a free slot.
    pub slots_acquired: AtomicU64,
    /// Slots returned to `available_slots_mask` once fully released.
    pub slots_released: AtomicU64,
}

impl Stats {
    const fn new() -> Self {
        Self {
            arenas_created: AtomicU64::new(0),
            arenas_destroyed: AtomicU64::new(0),
            handles_created: AtomicU64::new(0),
            handles_cloned: AtomicU64::new(0),
            handles_destroyed: AtomicU64::new(0),
            mark_retries: AtomicU64::new(0),
            weak_handles_created: AtomicU64::new(0),
            weak_handles_destroyed: AtomicU64::new(0),
            weak_upgrades_succeeded: AtomicU64::new(0),
            weak_upgrades_failed: AtomicU64::new(0),
            slots_acquired: AtomicU64::new(0),
            slots_released: AtomicU64::new(0),
        }
    }
}

pub(crate) static STATS: Stats = Stats::new();

/// A point-in-time snapshot of every observability counter.
///
/// Fields are plain `u64` values loaded from the global atomics. The
/// snapshot as a whole is not globally consistent — concurrent activity on
/// other threads may land between two of the loads that built it. For
/// monitoring purposes this is always sufficient.
#[derive(Clone, Copy, Debug, Default)]
pub struct Snapshot {
    pub arenas_created: u64,
    pub arenas_destroyed: u64,
    pub handles_created: u64,
    pub handles_cloned: u64,
    pub handles_destroyed: u64,
    pub mark_retries: u64,
    pub weak_handles_created: u64,
    pub weak_handles_destroyed: u64,
    pub weak_upgrades_succeeded: u64,
    pub weak_upgrades_failed: u64,
    pub slots_acquired: u64,
    pub slots_released: u64,
}

/// Load every counter with `Relaxed` ordering and return a [`Snapshot`].
pub fn snapshot() -> Snapshot {
    let s = &STATS;
    Snapshot {
        arenas_created: s.arenas_created.load(Ordering::Relaxed),
        arenas_destroyed: s.arenas_destroyed.load(Ordering::Relaxed),
        handles_created: s.handles_created.load(Ordering::Relaxed),
        handles_cloned: s.handles_cloned.load(Ordering::Relaxed),
        handles_destroyed: s.handles_destroyed.load(Ordering::Relaxed),
        mark_retries: s.mark_retries.load(Ordering::Relaxed),
        weak_handles_created: s.weak_handles_created.load(Ordering::Relaxed),
        weak_handles_destroyed: s.weak_handles_destroyed.load(Ordering::Relaxed),
        weak_upgrades_succeeded: s.weak_upgrades_succeeded.load(Ordering::Relaxed),
        weak_upgrades_failed: s.weak_upgrades_failed.load(Ordering::Relaxed),
        slots_acquired: s.slots_acquired.load(Ordering::Relaxed),
        slots_released: s.slots_released.load(Ordering::Relaxed),
    }
}
