//! Arena: an allocation owning one `Slab` per CPU, plus (with the `weak`
//! feature) a shadow array of weak slabs.
//!
//! An arena is reached only through a raw, 128-byte-aligned pointer — the
//! same pointer a `CounterHandle` packs into its high bits (see `handle.rs`).
//! There is deliberately no safe owning wrapper here; `Arena` is a building
//! block for `CounterHandle` and `ArenaManager`, both of which manage its
//! lifetime explicitly via `create`/`destroy`.

use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "manager")]
use core::sync::atomic::AtomicPtr;

use alloc::alloc::{alloc_zeroed, dealloc};

use crate::config::ArenaConfig;
use crate::error::{CpurcError, DropOutcome};
use crate::slab::{DecrementOutcome, IncrementOutcome, Slab};

/// Alignment mandated to leave at least 7 free low bits in
/// any pointer to an `Arena`, enough to tag a CPU index 0..=127.
pub const ARENA_ALIGN: usize = 128;

/// Width of the used-CPU bitmask. `num_cpus` is clamped onto this range at
/// `create` time (rather than growing the mask) per the CPU-count-clamp
/// decision for hosts that report more CPUs than the mask can address; a
/// given *cpu index* is separately folded onto `0..num_cpus` for each
/// arena via [`Arena::fold_cpu`], since an individual arena's slab array can
/// be narrower than this constant (e.g. an `ArenaManager` slot sized for
/// fewer CPUs than the host reports).
pub const MAX_CPUS: u32 = 64;

#[repr(C)]
struct ArenaHeader {
    used_cpus: AtomicU64,
    #[cfg(feature = "weak")]
    used_weak_cpus: AtomicU64,
    num_cpus: u32,
    size_bytes: usize,
    // Backlink used by `ArenaManager` to reclaim a slot
    // instead of freeing it outright once it is fully released. Null for
    // an arena created directly via `Arena::create`. `alloc_zeroed` gives
    // a null pointer by default, which is exactly "not manager-owned".
    #[cfg(feature = "manager")]
    owner_group: AtomicPtr<crate::manager::GroupInner>,
    #[cfg(feature = "manager")]
    owner_slot: u32,
}

/// Header followed by a trailing `Slab` array (and, with `weak`, a second
/// trailing array of equal length immediately after it).
///
/// There is no Rust-level field for the trailing arrays: their length is
/// only known once `num_cpus` is chosen at `create` time, so all access
/// goes through pointer arithmetic in [`Arena::slab_ptr`].
#[repr(C)]
pub struct Arena {
    header: ArenaHeader,
}

impl Arena {
    fn slabs_offset() -> usize {
        core::mem::size_of::<ArenaHeader>().next_multiple_of(core::mem::align_of::<Slab>())
    }

    /// Size/alignment of a single arena's backing allocation. Shared with
    /// `manager::GroupInner`, which stamps 64 of these out back-to-back in
    /// one allocation instead of calling `create` per slot.
    pub(crate) fn layout_for(num_cpus: u32) -> Layout {
        let slab_bytes = core::mem::size_of::<Slab>() * num_cpus as usize;
        #[cfg(feature = "weak")]
        let total = Self::slabs_offset() + slab_bytes * 2;
        #[cfg(not(feature = "weak"))]
        let total = Self::slabs_offset() + slab_bytes;
        Layout::from_size_align(total, ARENA_ALIGN).expect("arena size overflow")
    }

    /// Number of per-CPU slabs this arena was created with.
    #[inline]
    pub fn num_cpus(&self) -> u32 {
        self.header.num_cpus
    }

    /// Fold a reported CPU index onto `0..self.num_cpus()`. Folding is safe
    /// because the mark/rebase protocol only needs *some* disjoint slab per
    /// concurrent writer, not a bijection with physical CPUs — two physical
    /// CPUs sharing a folded slab just means they share a cache line, not
    /// correctness loss.
    ///
    /// This must fold against *this arena's own* slab count, not the
    /// crate-wide [`MAX_CPUS`]: an arena (e.g. an `ArenaManager` slot) can
    /// be created with fewer slabs than the host reports CPUs, and a CPU
    /// index that only fits under the global bound would still index past
    /// the end of this arena's trailing slab array.
    #[inline]
    pub fn fold_cpu(&self, cpu: u32) -> u32 {
        cpu % self.header.num_cpus
    }

    /// Total size of the backing allocation, for observability/debugging.
    #[inline]
    pub fn size_bytes(&self) -> usize {
        self.header.size_bytes
    }

    #[inline]
    unsafe fn slab_ptr(this: *mut Arena, cpu: u32, weak: bool) -> *mut Slab {
        let base = this as *mut u8;
        let offset = Self::slabs_offset();
        let num_cpus = unsafe { (*this).header.num_cpus } as usize;
        let slab_size = core::mem::size_of::<Slab>();
        let column = if weak { num_cpus * slab_size } else { 0 };
        unsafe { base.add(offset + column + cpu as usize * slab_size) as *mut Slab }
    }

    #[inline]
    fn slab(&self, cpu: u32) -> &Slab {
        debug_assert!(cpu < self.header.num_cpus);
        unsafe { &*Self::slab_ptr(self as *const Arena as *mut Arena, cpu, false) }
    }

    #[cfg(feature = "weak")]
    #[inline]
    fn weak_slab(&self, cpu: u32) -> &Slab {
        debug_assert!(cpu < self.header.num_cpus);
        unsafe { &*Self::slab_ptr(self as *const Arena as *mut Arena, cpu, true) }
    }

    /// Stamp a freshly-allocated, zeroed block of at least `layout_for(num_cpus)`
    /// bytes into a valid, all-Disabled `Arena`. Shared by [`Arena::create`]
    /// (a standalone allocation, owner fields left null/zero) and
    /// `manager::GroupInner::create` (one of 64 slots inside a shared
    /// allocation, owner fields pointing back to the owning group).
    ///
    /// # Safety
    ///
    /// `ptr` must point to at least `layout_for(num_cpus).size()` freshly
    /// zeroed, `ARENA_ALIGN`-aligned bytes, not currently in use as an `Arena`.
    unsafe fn init_in_place(ptr: NonNull<Arena>, num_cpus: u32, size_bytes: usize) {
        unsafe {
            let arena = ptr.as_ptr();
            (*arena).header.used_cpus = AtomicU64::new(0);
            #[cfg(feature = "weak")]
            {
                (*arena).header.used_weak_cpus = AtomicU64::new(0);
            }
            (*arena).header.num_cpus = num_cpus;
            (*arena).header.size_bytes = size_bytes;

            for cpu in 0..num_cpus {
                core::ptr::write(Self::slab_ptr(arena, cpu, false), Slab::new());
                #[cfg(feature = "weak")]
                core::ptr::write(Self::slab_ptr(arena, cpu, true), Slab::new());
            }
        }
    }

    /// Stamp a slot inside a `manager::GroupInner` allocation as a fresh
    /// Arena tagged with its owning group and slot index, so a fully
    /// released slot can be handed back to the group instead of freed.
    #[cfg(feature = "manager")]
    pub(crate) unsafe fn init_slot(
        ptr: NonNull<Arena>,
        num_cpus: u32,
        size_bytes: usize,
        owner_group: NonNull<crate::manager::GroupInner>,
        owner_slot: u32,
    ) {
        unsafe {
            Self::init_in_place(ptr, num_cpus, size_bytes);
            let arena = ptr.as_ptr();
            (*arena).header.owner_group = AtomicPtr::new(owner_group.as_ptr());
            (*arena).header.owner_slot = owner_slot;
        }
    }

    /// Like [`Arena::create`], but rejects a CPU count above [`MAX_CPUS`]
    /// instead of folding it down. Exists for callers that would rather
    /// surface a configuration error than silently share slabs across
    /// physical CPUs.
    pub fn create_strict(num_cpus: u32) -> Result<NonNull<Arena>, CpurcError> {
        if num_cpus > MAX_CPUS {
            return Err(CpurcError::TooManyCpus {
                reported: num_cpus,
                max: MAX_CPUS,
            });
        }
        Self::create(num_cpus)
    }

    /// Allocate a fresh arena with one slab per CPU, every slab starting
    /// Disabled. `num_cpus` above [`MAX_CPUS`] is clamped down rather than
    /// rejected. Use [`Arena::create_strict`] to reject instead. A CPU
    /// *index* passed to [`Arena::increment`]/[`Arena::decrement`] is
    /// separately folded onto this arena's own `num_cpus` via
    /// [`Arena::fold_cpu`].
    pub fn create(num_cpus: u32) -> Result<NonNull<Arena>, CpurcError> {
        let num_cpus = num_cpus.clamp(1, MAX_CPUS);
        let layout = Self::layout_for(num_cpus);

        // SAFETY: layout has non-zero size and a power-of-two alignment.
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw as *mut Arena) else {
            return Err(CpurcError::AllocationFailed);
        };

        // alloc_zeroed gives an all-zero buffer, but a zeroed Slab counter
        // reads as Active(0), not Disabled (i32::MIN) — every slab needs
        // explicit construction. Owner fields stay zeroed/null: this arena
        // was not carved out of a manager group.
        unsafe { Self::init_in_place(ptr, num_cpus, layout.size()) };
        crate::stat_inc!(arenas_created);

        Ok(ptr)
    }

    /// Like [`Arena::create`], but shaped by a validated [`ArenaConfig`]
    /// (e.g. `ArenaConfig::detected()`) rather than a bare CPU count.
    pub fn create_with_config(config: ArenaConfig) -> Result<NonNull<Arena>, CpurcError> {
        Self::create(config.num_cpus)
    }

    /// Free the backing allocation.
    ///
    /// # Safety
    ///
    /// The caller must guarantee no live `CounterHandle` or
    /// `WeakCounterHandle` still references this arena, and that `ptr` was
    /// returned by [`Arena::create`] and not already destroyed.
    pub unsafe fn destroy(ptr: NonNull<Arena>) {
        let arena = unsafe { ptr.as_ref() };
        debug_assert_eq!(
            arena.header.used_cpus.load(Ordering::Relaxed),
            0,
            "destroying an arena with live strong references"
        );
        #[cfg(feature = "weak")]
        debug_assert_eq!(
            arena.header.used_weak_cpus.load(Ordering::Relaxed),
            0,
            "destroying an arena with live weak references"
        );
        let layout = Self::layout_for(arena.header.num_cpus);
        unsafe { dealloc(ptr.as_ptr() as *mut u8, layout) };
        crate::stat_inc!(arenas_destroyed);
    }

    /// The manager group and slot index this arena was carved out of, if
    /// any. `None` for an arena created directly via [`Arena::create`].
    #[cfg(feature = "manager")]
    pub(crate) fn owner(&self) -> Option<(NonNull<crate::manager::GroupInner>, u32)> {
        NonNull::new(self.header.owner_group.load(Ordering::Acquire))
            .map(|group| (group, self.header.owner_slot))
    }

    /// Reclaim a fully-released arena: hand a manager-owned slot back to
    /// its group, or deallocate a standalone arena outright.
    ///
    /// # Safety
    ///
    /// Same precondition as [`Arena::destroy`]: no live strong or weak
    /// reference may remain on `ptr`.
    pub(crate) unsafe fn reclaim_or_destroy(ptr: NonNull<Arena>) {
        #[cfg(feature = "manager")]
        {
            if let Some((group, slot)) = unsafe { ptr.as_ref() }.owner() {
                unsafe { crate::manager::release_slot(group, slot) };
                return;
            }
        }
        unsafe { Self::destroy(ptr) };
    }

    /// Mark/rebase increment protocol: attempt the increment
    /// optimistically, and only fall into the slower mark path when the
    /// slab turned out to be Disabled or Initialising.
    pub fn increment(&self, cpu: u32) {
        let cpu = self.fold_cpu(cpu);
        match self.slab(cpu).try_activating_increment() {
            IncrementOutcome::AlreadyActive => {}
            IncrementOutcome::StillDisabled => {
                let bit = 1u64 << cpu;
                let prev = self.header.used_cpus.fetch_or(bit, Ordering::AcqRel);
                if prev & bit == 0 {
                    // Won the race to mark this CPU; the increment we
                    // already issued is ours to rebase.
                    self.slab(cpu).rebase_from_disabled();
                } else {
                    // Someone else already marked (or is marking) this CPU
                    // active. The increment we already issued above is
                    // accounted for by whichever call wins the rebase;
                    // issuing a second one here would double-count this
                    // single logical reference.
                    crate::stat_inc!(mark_retries);
                }
            }
        }
    }

    /// Decrement the strong slab attributed to `cpu`. `cpu` must already be
    /// the folded index stored in the handle's origin-CPU tag.
    pub fn decrement(&self, cpu: u32) -> DropOutcome {
        debug_assert!(cpu < self.header.num_cpus);
        match self.slab(cpu).decrement() {
            DecrementOutcome::StillAlive | DecrementOutcome::RaceLostStillAlive => {
                DropOutcome::StillAlive
            }
            DecrementOutcome::JustWentToZero => {
                let bit = 1u64 << cpu;
                let prev = self.header.used_cpus.fetch_and(!bit, Ordering::AcqRel);
                if prev & !bit == 0 {
                    DropOutcome::LastReference
                } else {
                    DropOutcome::StillAlive
                }
            }
        }
    }

    /// Whether both the strong and (if enabled) weak used-CPU masks are
    /// empty — the precondition for [`Arena::destroy`]. A `LastReference`
    /// result from [`Arena::decrement`] means the payload's destructor
    /// should run now; it does *not* by itself mean the arena's memory can
    /// be freed, since a live `WeakCounterHandle` (with `weak` enabled)
    /// still needs somewhere to fail its upgrade against.
    #[cfg(feature = "weak")]
    pub fn is_fully_released(&self) -> bool {
        self.header.used_cpus.load(Ordering::Acquire) == 0
            && self.header.used_weak_cpus.load(Ordering::Acquire) == 0
    }

    #[cfg(not(feature = "weak"))]
    pub fn is_fully_released(&self) -> bool {
        self.header.used_cpus.load(Ordering::Acquire) == 0
    }

    /// Mark/rebase protocol for a weak reference's slab. Mirrors
    /// `increment` exactly but operates on the shadow array.
    #[cfg(feature = "weak")]
    pub fn increment_weak(&self, cpu: u32) {
        let cpu = self.fold_cpu(cpu);
        match self.weak_slab(cpu).try_activating_increment() {
            IncrementOutcome::AlreadyActive => {}
            IncrementOutcome::StillDisabled => {
                let bit = 1u64 << cpu;
                let prev = self.header.used_weak_cpus.fetch_or(bit, Ordering::AcqRel);
                if prev & bit == 0 {
                    self.weak_slab(cpu).rebase_from_disabled();
                } else {
                    crate::stat_inc!(mark_retries);
                }
            }
        }
    }

    /// Decrement the weak slab attributed to `cpu`. Returns `true` if this
    /// call brought *both* the strong and weak masks to zero, meaning the
    /// arena is now safe to [`Arena::destroy`] (or, under `ArenaManager`,
    /// safe to hand back to [`crate::manager`] as an available slot).
    #[cfg(feature = "weak")]
    pub fn decrement_weak(&self, cpu: u32) -> bool {
        debug_assert!(cpu < self.header.num_cpus);
        match self.weak_slab(cpu).decrement() {
            DecrementOutcome::StillAlive | DecrementOutcome::RaceLostStillAlive => false,
            DecrementOutcome::JustWentToZero => {
                let bit = 1u64 << cpu;
                self.header.used_weak_cpus.fetch_and(!bit, Ordering::AcqRel);
                self.is_fully_released()
            }
        }
    }

    /// Attempt to resurrect a strong reference from a weak handle. Succeeds
    /// iff the strong slab attributed to `cpu` is currently Active.
    #[cfg(feature = "weak")]
    pub fn try_upgrade(&self, cpu: u32) -> bool {
        let cpu = self.fold_cpu(cpu);
        self.slab(cpu).try_increment()
    }

    /// Approximate live strong-reference count across every per-CPU slab.
    /// Racy by construction: a concurrent increment or
    /// decrement on another CPU is not observed atomically with this one.
    pub fn use_count(&self) -> i64 {
        (0..self.header.num_cpus)
            .map(|cpu| self.slab(cpu).approximate_count())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_destroy_roundtrip() {
        let arena = Arena::create(4).unwrap();
        unsafe {
            assert_eq!(arena.as_ref().num_cpus(), 4);
            assert_eq!(arena.as_ref().use_count(), 0);
            Arena::destroy(arena);
        }
    }

    #[test]
    fn create_with_config_matches_create() {
        let arena = Arena::create_with_config(ArenaConfig::new(4)).unwrap();
        unsafe {
            assert_eq!(arena.as_ref().num_cpus(), 4);
            Arena::destroy(arena);
        }
    }

    #[test]
    fn increment_decrement_balances() {
        let arena = Arena::create(4).unwrap();
        let a = unsafe { arena.as_ref() };
        a.increment(0);
        a.increment(0);
        a.increment(1);
        assert_eq!(a.use_count(), 3);
        assert_eq!(a.decrement(1), DropOutcome::LastReference);
        assert_eq!(a.decrement(0), DropOutcome::StillAlive);
        assert_eq!(a.decrement(0), DropOutcome::LastReference);
        unsafe { Arena::destroy(arena) };
    }

    #[test]
    fn cpu_index_above_max_is_folded() {
        let arena = Arena::create(1).unwrap();
        let a = unsafe { arena.as_ref() };
        // `increment` folds internally, against *this* arena's `num_cpus`
        // (1), not the crate-wide `MAX_CPUS` (64) — a raw index of 200
        // must land on this single-slab arena's only slab, not read/write
        // past the end of its one-slab allocation.
        a.increment(200);
        assert_eq!(a.use_count(), 1);
        assert_eq!(a.decrement(a.fold_cpu(200)), DropOutcome::LastReference);
        unsafe { Arena::destroy(arena) };
    }

    #[test]
    fn cpu_index_folds_against_arenas_own_num_cpus_not_global_max() {
        // A 4-slab arena: a CPU index that is < MAX_CPUS (64) but >= this
        // arena's own num_cpus (4) must still fold into range rather than
        // index past the end of the trailing slab array.
        let arena = Arena::create(4).unwrap();
        let a = unsafe { arena.as_ref() };
        a.increment(61); // 61 % 4 == 1
        assert_eq!(a.use_count(), 1);
        assert_eq!(a.decrement(1), DropOutcome::LastReference);
        unsafe { Arena::destroy(arena) };
    }

    #[test]
    fn num_cpus_above_mask_width_is_clamped() {
        let arena = Arena::create(1_000).unwrap();
        unsafe {
            assert_eq!(arena.as_ref().num_cpus(), MAX_CPUS);
            Arena::destroy(arena);
        }
    }

    #[test]
    fn create_strict_rejects_too_many_cpus() {
        assert_eq!(
            Arena::create_strict(MAX_CPUS + 1),
            Err(CpurcError::TooManyCpus {
                reported: MAX_CPUS + 1,
                max: MAX_CPUS,
            })
        );
    }

    #[cfg(feature = "weak")]
    #[test]
    fn weak_upgrade_fails_after_last_strong_drop() {
        let arena = Arena::create(2).unwrap();
        let a = unsafe { arena.as_ref() };
        a.increment(0);
        a.increment_weak(0);
        assert!(a.try_upgrade(0));
        a.decrement(0); // undoes the successful upgrade's increment
        assert_eq!(a.decrement(0), DropOutcome::LastReference);
        assert!(!a.try_upgrade(0));
        assert!(a.decrement_weak(0));
        unsafe { Arena::destroy(arena) };
    }

    #[test]
    fn concurrent_increments_from_distinct_cpus_are_disjoint() {
        use std::thread;

        let arena = Arena::create(8).unwrap();
        let addr = arena.as_ptr() as usize;
        let mut handles = Vec::new();
        for cpu in 0..8u32 {
            handles.push(thread::spawn(move || {
                let ptr = NonNull::new(addr as *mut Arena).unwrap();
                let a = unsafe { ptr.as_ref() };
                for _ in 0..1000 {
                    a.increment(cpu);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let a = unsafe { arena.as_ref() };
        assert_eq!(a.use_count(), 8000);
        let mut last_reference_count = 0;
        for cpu in 0..8u32 {
            for _ in 0..1000 {
                if a.decrement(cpu) == DropOutcome::LastReference {
                    last_reference_count += 1;
                }
            }
        }
        // Exactly one decrement overall observes every CPU's bit cleared.
        assert_eq!(last_reference_count, 1);
        unsafe { Arena::destroy(arena) };
    }
}
