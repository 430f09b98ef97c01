//! Error taxonomy for the core.
//!
//! All three kinds are local and non-recoverable at the call site that
//! observes them — there is no retry the core itself can do that the
//! caller hasn't already triggered (the mark/rebase race in `arena.rs`
//! resolves transient contention internally and never surfaces it here).

use core::fmt;

/// Failure modes a caller can observe from this crate's entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpurcError {
    /// The backing allocator returned null while creating an arena.
    AllocationFailed,
    /// The host reported more CPUs than the 64-bit used-CPU mask can
    /// address. The caller may retry after clamping, which is what
    /// [`crate::arena::Arena::create`] does by default — this variant is
    /// only returned by the low-level constructor that refuses to clamp.
    TooManyCpus { reported: u32, max: u32 },
}

impl fmt::Display for CpurcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpurcError::AllocationFailed => {
                write!(f, "allocator returned null while creating an arena")
            }
            CpurcError::TooManyCpus { reported, max } => write!(
                f,
                "host reports {reported} CPUs, which exceeds the {max}-slot used-CPU mask"
            ),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CpurcError {}

/// Outcome of `CounterHandle::destroy` / `Arena::decrement`.
///
/// A third, non-error outcome (`NotOwned`) exists for the double-destroy
/// case; it is not part of `CpurcError` because it is not a failure — this
/// crate treats it as idempotent, expected behavior for a handle that has
/// already been destroyed or moved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropOutcome {
    /// The slab this handle was attributed to still has live references.
    StillAlive,
    /// This decrement was the one that brought the arena's used-CPU mask
    /// to zero — the caller owns the payload's destructor now.
    LastReference,
    /// The handle was already null (double-destroy or post-move use).
    NotOwned,
}
