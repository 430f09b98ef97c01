//! Per-CPU counter slab with a tri-state disabled/initialising/active
//! protocol.
//!
//! A slab is a single cache-line-isolated atomic signed integer. The sign
//! and magnitude of the stored value *is* the state:
//!
//! - `Disabled`: `counter == i32::MIN`. No live references attributed here.
//! - `Initialising`: `counter ∈ [i32::MIN + 1, -1]`. An increment raced
//!   ahead of the thread that is marking this CPU active; the count is
//!   encoded as an offset from `i32::MIN` so it can be rebased once
//!   marking completes.
//! - `Active`: `counter >= 1`. Number of live references.
//!
//! Convention adopted for an ambiguity in the source material (one revision
//! returns "was last" as true, another as false): [`decrement`] returns
//! [`DecrementOutcome::JustWentToZero`] when *this* call was the one that
//! zeroed the slab. This is the only convention used anywhere in the crate.

use core::sync::atomic::{AtomicI32, Ordering};

/// `counter == DISABLED` means no CPU is attributed to this slab.
const DISABLED: i32 = i32::MIN;

/// Outcome of [`Slab::try_activating_increment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementOutcome {
    /// The slab was Active before this call; the increment landed in the
    /// normal counting range. No further action needed.
    AlreadyActive,
    /// The slab was Disabled or Initialising. The caller must attempt to
    /// mark this CPU's bit in the arena's used-CPU mask and, on success,
    /// call [`Slab::rebase_from_disabled`].
    StillDisabled,
}

/// Outcome of [`Slab::decrement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecrementOutcome {
    /// The slab still has at least one live reference after this call.
    StillAlive,
    /// This decrement brought the slab to exactly zero *and* the
    /// Active→Disabled CAS succeeded. The caller must clear this CPU's
    /// bit in the arena's used-CPU mask.
    JustWentToZero,
    /// The slab reached zero, but before the Active→Disabled CAS could
    /// land, another thread re-incremented it (a fresh reference arrived
    /// between this decrement and the CAS). The slab is still alive; no
    /// bit-clear is needed.
    RaceLostStillAlive,
}

/// A cache-line-isolated per-CPU reference count.
///
/// `#[repr(align(64))]` ensures no two slabs, and no slab and any arena
/// header field, ever share a cache line — the whole point of sharding
/// the count per CPU is for concurrent increments on distinct CPUs to
/// touch distinct cache lines.
#[repr(C, align(64))]
pub struct Slab {
    counter: AtomicI32,
}

impl Slab {
    /// A new slab, in the Disabled state.
    pub const fn new() -> Self {
        Self {
            counter: AtomicI32::new(DISABLED),
        }
    }

    /// Attempt an increment without first establishing that this CPU is
    /// marked active. Always performs the `fetch_add`; the return value
    /// tells the caller whether the slab was already active (common case)
    /// or whether it needs to go through the mark/rebase protocol.
    ///
    /// Acquire ordering: the first increment on a slab must synchronise
    /// with whatever payload the surrounding smart pointer was constructed
    /// to guard, the same way a `shared_ptr`'s first reference count
    /// publishes the managed object.
    #[inline]
    pub fn try_activating_increment(&self) -> IncrementOutcome {
        let prev = self.counter.fetch_add(1, Ordering::Acquire);
        if prev >= 0 {
            IncrementOutcome::AlreadyActive
        } else {
            IncrementOutcome::StillDisabled
        }
    }

    /// Rebase a Disabled/Initialising counter onto the positive counting
    /// range, preserving any increments that landed while this slab was
    /// still marked inactive.
    ///
    /// Must only be called immediately after the caller has won the race
    /// to set this CPU's bit in the arena's used-CPU mask — see the
    /// marking protocol in `arena.rs`.
    pub fn rebase_from_disabled(&self) {
        let mut current = self.counter.load(Ordering::Relaxed);
        loop {
            debug_assert!(current < 0, "rebase called on an already-active slab");
            // Map [i32::MIN + 1, -1] onto [1, ..]; current - DISABLED is the
            // count of increments that landed during the Initialising window.
            let desired = (current - DISABLED).max(1);
            match self.counter.compare_exchange_weak(
                current,
                desired,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Decrement the slab. acq_rel: the thread that observes
    /// `JustWentToZero` must see every memory effect performed by every
    /// copy of the handle that contributed to this slab's count.
    #[inline]
    pub fn decrement(&self) -> DecrementOutcome {
        let prev = self.counter.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev >= 1, "decrement observed a non-positive slab");
        if prev != 1 {
            return DecrementOutcome::StillAlive;
        }

        match self.counter.compare_exchange(
            0,
            DISABLED,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => DecrementOutcome::JustWentToZero,
            Err(_) => DecrementOutcome::RaceLostStillAlive,
        }
    }

    /// Approximate current value for observability (`Arena::use_count`).
    /// Not used in any control-flow decision — only non-negative values
    /// count as live references.
    #[inline]
    pub fn approximate_count(&self) -> i64 {
        let v = self.counter.load(Ordering::Relaxed);
        if v >= 0 { v as i64 } else { 0 }
    }

    /// CAS loop used by `WeakCounterHandle::upgrade`: succeeds iff the slab
    /// is currently `Active` (count >= 1), failing rather than resurrecting
    /// a slab that has already gone to zero or was never activated.
    #[cfg(feature = "weak")]
    #[inline]
    pub fn try_increment(&self) -> bool {
        let mut current = self.counter.load(Ordering::Relaxed);
        loop {
            if current < 1 {
                return false;
            }
            match self.counter.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }
}

impl Default for Slab {
    fn default() -> Self {
        Self::new()
    }
}
