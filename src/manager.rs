//! `ArenaManager`: slot-multiplexed arenas for many small reference counts.
//!
//! A bare [`crate::arena::Arena`] spends one whole (aligned) allocation per
//! reference-counted object. `ArenaManager` amortises this by carving each
//! allocation — a [`GroupInner`] — into [`SLOTS_PER_GROUP`] independent
//! slots, each slot laid out exactly like a standalone `Arena` (same
//! per-CPU slab array, same tagging contract), differing only in an
//! `owner_group`/`owner_slot` backlink that tells a fully-released slot to
//! return itself to the pool instead of asking the allocator to free it.
//!
//! Expressed as an explicitly-constructed object (not a hidden process-wide
//! singleton) that a caller passes into its own smart-pointer factories; its
//! intended lifecycle is still program-long, since dropping it while any
//! slot is still claimed is a bug (mirrors `Arena::destroy`'s precondition).

use alloc::alloc::{alloc_zeroed, dealloc};
use alloc::vec::Vec;
use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use crate::arena::{Arena, ARENA_ALIGN};
use crate::config::ManagerConfig;
use crate::error::CpurcError;
use crate::handle::CounterHandle;
use crate::sync::SpinMutex;

/// Independent reference counts packed into one [`GroupInner`] allocation —
/// fixed by the width of `available_slots_mask`.
pub const SLOTS_PER_GROUP: u32 = 64;

/// Header fronting [`SLOTS_PER_GROUP`] contiguous, `Arena`-shaped slots.
///
/// `available_slots_mask` bit *i* set means slot *i* is free. Claiming a
/// slot clears its bit; returning one sets it back. A slot transitioning
/// the mask from "fully full" (0) to "one slot free" is the one event that
/// needs to walk back up to the owning [`ArenaManagerInner`] and re-list
/// this group as available — see [`release_slot`].
#[repr(C, align(128))]
pub(crate) struct GroupInner {
    available_slots_mask: AtomicU64,
    num_cpus: u32,
    slot_stride: usize,
    group_size: usize,
    manager: AtomicPtr<ArenaManagerInner>,
}

impl GroupInner {
    fn header_size() -> usize {
        core::mem::size_of::<GroupInner>().next_multiple_of(ARENA_ALIGN)
    }

    fn slot_ptr(this: NonNull<GroupInner>, slot: u32) -> NonNull<Arena> {
        let stride = unsafe { (*this.as_ptr()).slot_stride };
        let base = this.as_ptr() as *mut u8;
        let offset = Self::header_size() + slot as usize * stride;
        unsafe { NonNull::new_unchecked(base.add(offset) as *mut Arena) }
    }

    /// Allocate a fresh group: `SLOTS_PER_GROUP` all-Disabled arena slots
    /// behind one header, every bit of `available_slots_mask` set.
    fn create(
        num_cpus: u32,
        manager: NonNull<ArenaManagerInner>,
    ) -> Result<NonNull<GroupInner>, CpurcError> {
        let slot_layout = Arena::layout_for(num_cpus);
        let slot_stride = slot_layout.size();
        let total = Self::header_size() + slot_stride * SLOTS_PER_GROUP as usize;
        let layout = Layout::from_size_align(total, ARENA_ALIGN).expect("group size overflow");

        let raw = unsafe { alloc_zeroed(layout) };
        let Some(group) = NonNull::new(raw as *mut GroupInner) else {
            return Err(CpurcError::AllocationFailed);
        };

        unsafe {
            (*group.as_ptr()).available_slots_mask = AtomicU64::new(u64::MAX);
            (*group.as_ptr()).num_cpus = num_cpus;
            (*group.as_ptr()).slot_stride = slot_stride;
            (*group.as_ptr()).group_size = total;
            (*group.as_ptr()).manager = AtomicPtr::new(manager.as_ptr());

            for slot in 0..SLOTS_PER_GROUP {
                let arena_ptr = Self::slot_ptr(group, slot);
                Arena::init_slot(arena_ptr, num_cpus, slot_stride, group, slot);
            }
        }

        Ok(group)
    }

    /// # Safety
    ///
    /// `group` must have no claimed slots (`available_slots_mask ==
    /// u64::MAX`) and must not be used again after this call.
    unsafe fn destroy(group: NonNull<GroupInner>) {
        let inner = unsafe { group.as_ref() };
        debug_assert_eq!(
            inner.available_slots_mask.load(Ordering::Relaxed),
            u64::MAX,
            "destroying an arena group with claimed slots outstanding"
        );
        let layout = Layout::from_size_align(inner.group_size, ARENA_ALIGN).unwrap();
        unsafe { dealloc(group.as_ptr() as *mut u8, layout) };
    }

    /// Claim the lowest-numbered free slot, if any.
    fn acquire_slot(group: NonNull<GroupInner>) -> Option<NonNull<Arena>> {
        let inner = unsafe { group.as_ref() };
        loop {
            let mask = inner.available_slots_mask.load(Ordering::Acquire);
            if mask == 0 {
                return None;
            }
            let slot = mask.trailing_zeros();
            let bit = 1u64 << slot;
            if inner
                .available_slots_mask
                .compare_exchange_weak(mask, mask & !bit, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                crate::stat_inc!(slots_acquired);
                return Some(Self::slot_ptr(group, slot));
            }
            // Lost the race for that bit to another acquirer; retry.
        }
    }

    /// Return `slot` to the pool. Returns `true` if this was the transition
    /// from "fully claimed" to "one slot free" — the signal to re-list this
    /// group with the manager.
    fn free_slot(group: NonNull<GroupInner>, slot: u32) -> bool {
        let inner = unsafe { group.as_ref() };
        let bit = 1u64 << slot;
        let prev = inner.available_slots_mask.fetch_or(bit, Ordering::AcqRel);
        crate::stat_inc!(slots_released);
        prev == 0
    }
}

unsafe impl Send for GroupInner {}
unsafe impl Sync for GroupInner {}

/// Called from `Arena::reclaim_or_destroy` once a manager-owned slot's
/// strong and weak masks have both reached zero: returns the slot to its
/// group, re-listing the group with its manager if it had been full.
///
/// # Safety
///
/// `group`/`slot` must identify a slot whose last reference has just been
/// released (the same precondition `Arena::destroy` has for a standalone
/// arena).
pub(crate) unsafe fn release_slot(group: NonNull<GroupInner>, slot: u32) {
    if GroupInner::free_slot(group, slot) {
        let inner = unsafe { group.as_ref() };
        if let Some(manager) = NonNull::new(inner.manager.load(Ordering::Acquire)) {
            unsafe { ArenaManagerInner::notify_new_availability(manager, group) };
        }
    }
}

struct ArenaManagerInner {
    current_group: AtomicPtr<GroupInner>,
    /// Groups known to have at least one free slot, available for the next
    /// `acquire_handle` to fall back to once `current_group` fills up.
    available_groups: SpinMutex<Vec<NonNull<GroupInner>>>,
    /// Every group ever allocated, for teardown in `ArenaManager::drop`.
    all_groups: SpinMutex<Vec<NonNull<GroupInner>>>,
    num_cpus: u32,
}

unsafe impl Send for ArenaManagerInner {}
unsafe impl Sync for ArenaManagerInner {}

impl ArenaManagerInner {
    unsafe fn notify_new_availability(manager: NonNull<ArenaManagerInner>, group: NonNull<GroupInner>) {
        let inner = unsafe { manager.as_ref() };
        inner.available_groups.lock().push(group);
    }

    fn acquire_handle(
        this: NonNull<ArenaManagerInner>,
        origin_cpu: u32,
    ) -> Result<CounterHandle, CpurcError> {
        let inner = unsafe { this.as_ref() };
        loop {
            let current = inner.current_group.load(Ordering::Acquire);
            if let Some(group) = NonNull::new(current) {
                if let Some(arena) = GroupInner::acquire_slot(group) {
                    return Ok(CounterHandle::from_claimed_slot(arena, origin_cpu));
                }
            }

            // `current_group` is full (or unset). Take the pool lock and
            // either swap in a group known to have a free slot, or mint a
            // new one; either way, loop back and retry the fast path.
            let mut available = inner.available_groups.lock();
            if inner.current_group.load(Ordering::Acquire) == current {
                if let Some(next) = available.pop() {
                    inner.current_group.store(next.as_ptr(), Ordering::Release);
                } else {
                    drop(available);
                    let group = GroupInner::create(inner.num_cpus, this)?;
                    inner.all_groups.lock().push(group);
                    inner.current_group.store(group.as_ptr(), Ordering::Release);
                }
            }
        }
    }
}

/// A pool of slot-multiplexed arenas. `acquire_handle` hands back a strong
/// [`CounterHandle`] whose arena is shared with up to 63 other independent
/// reference counts; each handle behaves identically to one produced by
/// [`CounterHandle::new`] from the caller's point of view.
pub struct ArenaManager {
    inner: NonNull<ArenaManagerInner>,
}

impl ArenaManager {
    pub fn new(config: ManagerConfig) -> Self {
        let inner = alloc::boxed::Box::new(ArenaManagerInner {
            current_group: AtomicPtr::new(core::ptr::null_mut()),
            available_groups: SpinMutex::new(Vec::new()),
            all_groups: SpinMutex::new(Vec::new()),
            num_cpus: config.num_cpus.clamp(1, crate::arena::MAX_CPUS),
        });
        Self {
            inner: NonNull::new(alloc::boxed::Box::into_raw(inner)).unwrap(),
        }
    }

    #[cfg(feature = "std")]
    pub fn detected() -> Self {
        Self::new(ManagerConfig::detected())
    }

    /// Acquire a strong handle from the pool, attributed to `origin_cpu`.
    pub fn acquire_handle(&self, origin_cpu: u32) -> Result<CounterHandle, CpurcError> {
        ArenaManagerInner::acquire_handle(self.inner, origin_cpu)
    }
}

impl Drop for ArenaManager {
    fn drop(&mut self) {
        unsafe {
            let inner = self.inner.as_ref();
            for &group in inner.all_groups.lock().iter() {
                GroupInner::destroy(group);
            }
            drop(alloc::boxed::Box::from_raw(self.inner.as_ptr()));
        }
    }
}

unsafe impl Send for ArenaManager {}
unsafe impl Sync for ArenaManager {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DropOutcome;

    #[test]
    fn acquire_and_destroy_one_slot() {
        let manager = ArenaManager::new(ManagerConfig::new(4));
        let h = manager.acquire_handle(0).unwrap();
        assert_eq!(h.use_count(), 1);
        assert_eq!(h.destroy(), DropOutcome::LastReference);
    }

    #[test]
    fn sixty_five_acquisitions_force_a_second_group() {
        let manager = ArenaManager::new(ManagerConfig::new(4));
        let mut handles = Vec::new();
        for cpu in 0..65u32 {
            handles.push(manager.acquire_handle(cpu % 4).unwrap());
        }
        // First 64 share one group; the 65th must have forced a new one —
        // verified indirectly: dropping every handle back to zero, then
        // acquiring once more, must still succeed without reallocating.
        for h in handles {
            h.destroy();
        }
        let h = manager.acquire_handle(0).unwrap();
        assert_eq!(h.destroy(), DropOutcome::LastReference);
    }

    #[test]
    fn freed_slot_is_reused_within_same_group() {
        let manager = ArenaManager::new(ManagerConfig::new(2));
        let mut handles = Vec::new();
        for cpu in 0..64u32 {
            handles.push(manager.acquire_handle(cpu % 2).unwrap());
        }
        for h in handles {
            assert_eq!(h.destroy(), DropOutcome::LastReference);
        }
        // Every slot in the one existing group is free again; the manager
        // must reuse it rather than allocating a second group.
        let h = manager.acquire_handle(0).unwrap();
        assert_eq!(h.use_count(), 1);
        h.destroy();
    }

    #[test]
    fn independent_slots_do_not_share_counts() {
        let manager = ArenaManager::new(ManagerConfig::new(4));
        let a = manager.acquire_handle(0).unwrap();
        let b = manager.acquire_handle(0).unwrap();
        assert_eq!(a.use_count(), 1);
        assert_eq!(b.use_count(), 1);
        let a2 = a.clone_on_current_cpu();
        assert_eq!(a.use_count(), 2);
        assert_eq!(b.use_count(), 1);
        assert_eq!(a.destroy(), DropOutcome::StillAlive);
        assert_eq!(a2.destroy(), DropOutcome::LastReference);
        assert_eq!(b.destroy(), DropOutcome::LastReference);
    }
}
