//! `CounterHandle`: a single tagged machine word combining an arena
//! pointer with the CPU it was created on.
//!
//! The low 7 bits of the word hold the origin CPU (0..=127, folded from
//! whatever the CPU-id oracle reports — see [`Arena::fold_cpu`]); the
//! remaining high bits hold the arena pointer, which
//! [`crate::arena::ARENA_ALIGN`] guarantees are free for tagging. A zero
//! word is the null handle.

use core::ptr::NonNull;

use crate::arena::Arena;
use crate::config::ArenaConfig;
use crate::error::{CpurcError, DropOutcome};

const CPU_BITS: u32 = 7;
const CPU_MASK: usize = (1 << CPU_BITS) - 1;

#[inline]
fn pack(arena: NonNull<Arena>, cpu: u32) -> usize {
    let ptr = arena.as_ptr() as usize;
    debug_assert_eq!(ptr & CPU_MASK, 0, "arena pointer is not 128-byte aligned");
    debug_assert!((cpu as usize) <= CPU_MASK);
    ptr | cpu as usize
}

#[inline]
fn unpack(word: usize) -> (NonNull<Arena>, u32) {
    let cpu = (word & CPU_MASK) as u32;
    let ptr = (word & !CPU_MASK) as *mut Arena;
    // SAFETY: a non-null handle always packs a pointer returned by
    // `Arena::create` (or a slot inside a `SlotArena`, which has the same
    // alignment guarantee).
    (unsafe { NonNull::new_unchecked(ptr) }, cpu)
}

/// A strong reference to one CPU-sharded counter.
///
/// Move-only: cloning is an explicit, fallible-looking but infallible
/// operation ([`CounterHandle::clone_on_current_cpu`]) because a clone must
/// decide *which* CPU's slab to attribute the new reference to, and that
/// choice is never the same as a bitwise copy of the handle.
#[repr(transparent)]
pub struct CounterHandle {
    word: usize,
}

impl CounterHandle {
    /// The null handle. Every operation on it is a no-op, matching
    /// the idempotent-destroy contract below.
    pub const NULL: CounterHandle = CounterHandle { word: 0 };

    /// Allocate a fresh arena for `num_cpus` CPUs and return a handle
    /// holding the first strong reference, attributed to `origin_cpu`.
    pub fn new(num_cpus: u32, origin_cpu: u32) -> Result<CounterHandle, CpurcError> {
        let arena = Arena::create(num_cpus)?;
        let a = unsafe { arena.as_ref() };
        let cpu = a.fold_cpu(origin_cpu);
        a.increment(cpu);
        crate::stat_inc!(handles_created);
        Ok(CounterHandle {
            word: pack(arena, cpu),
        })
    }

    /// Like [`CounterHandle::new`], but shaped by a validated [`ArenaConfig`]
    /// (e.g. `ArenaConfig::detected()`) rather than a bare CPU count.
    pub fn with_config(config: ArenaConfig, origin_cpu: u32) -> Result<CounterHandle, CpurcError> {
        Self::new(config.num_cpus, origin_cpu)
    }

    /// Build a handle around a slot already claimed from a
    /// `manager::GroupInner` — the slot's arena exists and is owned, but
    /// carries no strong reference yet.
    #[cfg(feature = "manager")]
    pub(crate) fn from_claimed_slot(arena: NonNull<Arena>, origin_cpu: u32) -> CounterHandle {
        let a = unsafe { arena.as_ref() };
        let cpu = a.fold_cpu(origin_cpu);
        a.increment(cpu);
        crate::stat_inc!(handles_created);
        CounterHandle {
            word: pack(arena, cpu),
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.word == 0
    }

    /// Produce a new strong reference to the same counter, attributed to
    /// the calling thread's current CPU (queried internally from
    /// [`cpuid::current_cpu`]). A null handle clones to another null
    /// handle.
    ///
    /// The clone's slab may differ from the slab this handle itself is
    /// attributed to — that is the point of sharding: two threads cloning
    /// the same handle on two distinct CPUs touch two distinct cache
    /// lines.
    pub fn clone_on_current_cpu(&self) -> CounterHandle {
        if self.is_null() {
            return CounterHandle::NULL;
        }
        let (arena, _origin) = unpack(self.word);
        let a = unsafe { arena.as_ref() };
        let cpu = a.fold_cpu(cpuid::current_cpu());
        a.increment(cpu);
        crate::stat_inc!(handles_cloned);
        CounterHandle {
            word: pack(arena, cpu),
        }
    }

    /// Consume this handle, releasing its strong reference.
    ///
    /// Returns [`DropOutcome::NotOwned`] for an already-null handle,
    /// [`DropOutcome::LastReference`] when this was the reference that
    /// brought the arena's used-CPU mask to zero (the caller now owns the
    /// payload's teardown), and [`DropOutcome::StillAlive`] otherwise.
    pub fn destroy(self) -> DropOutcome {
        if self.is_null() {
            return DropOutcome::NotOwned;
        }
        let (arena, cpu) = unpack(self.word);
        let a = unsafe { arena.as_ref() };
        let outcome = a.decrement(cpu);
        if outcome == DropOutcome::LastReference && a.is_fully_released() {
            unsafe { Arena::reclaim_or_destroy(arena) };
        }
        crate::stat_inc!(handles_destroyed);
        core::mem::forget(self);
        outcome
    }

    /// Approximate number of live strong references sharing this counter.
    pub fn use_count(&self) -> i64 {
        if self.is_null() {
            return 0;
        }
        let (arena, _) = unpack(self.word);
        unsafe { arena.as_ref() }.use_count()
    }

    /// The CPU this specific handle's reference is attributed to.
    pub fn origin_cpu(&self) -> Option<u32> {
        if self.is_null() {
            return None;
        }
        let (_, cpu) = unpack(self.word);
        Some(cpu)
    }

    /// Derive a weak reference, attributed to the calling thread's current
    /// CPU (queried internally from [`cpuid::current_cpu`]).
    #[cfg(feature = "weak")]
    pub fn downgrade(&self) -> WeakCounterHandle {
        if self.is_null() {
            return WeakCounterHandle::NULL;
        }
        let (arena, _) = unpack(self.word);
        let a = unsafe { arena.as_ref() };
        let cpu = a.fold_cpu(cpuid::current_cpu());
        a.increment_weak(cpu);
        crate::stat_inc!(weak_handles_created);
        WeakCounterHandle {
            word: pack(arena, cpu),
        }
    }
}

impl Drop for CounterHandle {
    fn drop(&mut self) {
        debug_assert!(
            self.is_null(),
            "CounterHandle dropped without calling destroy() — leaks the reference"
        );
    }
}

unsafe impl Send for CounterHandle {}
unsafe impl Sync for CounterHandle {}

/// A weak reference: observes whether the counter is still alive without
/// keeping the payload alive itself.
#[cfg(feature = "weak")]
#[repr(transparent)]
pub struct WeakCounterHandle {
    word: usize,
}

#[cfg(feature = "weak")]
impl WeakCounterHandle {
    pub const NULL: WeakCounterHandle = WeakCounterHandle { word: 0 };

    #[inline]
    pub fn is_null(&self) -> bool {
        self.word == 0
    }

    /// Attempt to resurrect a strong reference, attributed to the calling
    /// thread's current CPU (queried internally from [`cpuid::current_cpu`]).
    /// Fails once the strong side has already reached zero, even if this
    /// weak handle (and thus the arena) is still alive.
    pub fn upgrade(&self) -> Option<CounterHandle> {
        if self.is_null() {
            return None;
        }
        let (arena, origin) = unpack(self.word);
        let a = unsafe { arena.as_ref() };
        if a.try_upgrade(origin) {
            crate::stat_inc!(weak_upgrades_succeeded);
            let cpu = a.fold_cpu(cpuid::current_cpu());
            if cpu != origin {
                // The upgrade landed on the origin slab; move the new
                // strong reference onto the caller's own slab and release
                // the temporary one, so the handle returned is attributed
                // to `current_cpu` like any other fresh reference.
                a.increment(cpu);
                a.decrement(origin);
                return Some(CounterHandle {
                    word: pack(arena, cpu),
                });
            }
            return Some(CounterHandle {
                word: pack(arena, origin),
            });
        }
        crate::stat_inc!(weak_upgrades_failed);
        None
    }

    pub fn destroy(self) -> DropOutcome {
        if self.is_null() {
            return DropOutcome::NotOwned;
        }
        let (arena, cpu) = unpack(self.word);
        let fully_released = unsafe { arena.as_ref() }.decrement_weak(cpu);
        if fully_released {
            unsafe { Arena::reclaim_or_destroy(arena) };
        }
        crate::stat_inc!(weak_handles_destroyed);
        core::mem::forget(self);
        DropOutcome::StillAlive
    }
}

#[cfg(feature = "weak")]
impl Drop for WeakCounterHandle {
    fn drop(&mut self) {
        debug_assert!(
            self.is_null(),
            "WeakCounterHandle dropped without calling destroy() — leaks the reference"
        );
    }
}

#[cfg(feature = "weak")]
unsafe impl Send for WeakCounterHandle {}
#[cfg(feature = "weak")]
unsafe impl Sync for WeakCounterHandle {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_handle_is_idempotent() {
        let h = CounterHandle::NULL;
        assert!(h.is_null());
        assert_eq!(h.use_count(), 0);
        assert_eq!(h.destroy(), DropOutcome::NotOwned);
    }

    #[test]
    fn new_handle_has_use_count_one() {
        let h = CounterHandle::new(4, 0).unwrap();
        assert_eq!(h.use_count(), 1);
        assert_eq!(h.origin_cpu(), Some(0));
        assert_eq!(h.destroy(), DropOutcome::LastReference);
    }

    #[test]
    fn with_config_matches_new() {
        let h = CounterHandle::with_config(ArenaConfig::new(4), 0).unwrap();
        assert_eq!(h.use_count(), 1);
        assert_eq!(h.origin_cpu(), Some(0));
        assert_eq!(h.destroy(), DropOutcome::LastReference);
    }

    #[test]
    fn clone_increments_use_count_and_destroy_balances() {
        let h1 = CounterHandle::new(4, 0).unwrap();
        let h2 = h1.clone_on_current_cpu();
        assert_eq!(h1.use_count(), 2);
        assert_eq!(h2.use_count(), 2);
        assert_eq!(h1.destroy(), DropOutcome::StillAlive);
        assert_eq!(h2.destroy(), DropOutcome::LastReference);
    }

    #[cfg(feature = "weak")]
    #[test]
    fn weak_upgrade_after_strong_drop_fails() {
        let h = CounterHandle::new(4, 0).unwrap();
        let w = h.downgrade();
        assert_eq!(h.destroy(), DropOutcome::LastReference);
        assert!(w.upgrade().is_none());
        assert_eq!(w.destroy(), DropOutcome::StillAlive);
    }

    #[cfg(feature = "weak")]
    #[test]
    fn weak_upgrade_while_strong_alive_succeeds() {
        let h = CounterHandle::new(4, 0).unwrap();
        let w = h.downgrade();
        let upgraded = w.upgrade().expect("strong side still alive");
        assert_eq!(upgraded.use_count(), 2);
        assert_eq!(upgraded.destroy(), DropOutcome::StillAlive);
        assert_eq!(h.destroy(), DropOutcome::StillAlive);
        assert_eq!(w.destroy(), DropOutcome::StillAlive);
    }
}
