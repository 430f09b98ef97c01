//! Linux rseq kernel ABI types and constants.
//!
//! Defines the structure shared between userspace and the kernel for
//! restartable sequences (rseq). Must match the kernel's layout exactly.
//! Only the fields this crate reads (`cpu_id`) are documented in depth;
//! the rest exist purely to keep the struct's size and layout correct.

// ── Syscall ──────────────────────────────────────────────────────────────────

/// rseq syscall number on x86_64.
pub const SYS_RSEQ: u64 = 334;

// ── Registration flags (passed to syscall `flags` parameter) ─────────────────

/// Unregister the current thread's rseq area.
pub const RSEQ_FLAG_UNREGISTER: i32 = 1 << 0;

// ── Signature ────────────────────────────────────────────────────────────────

/// Required by the syscall ABI even though this crate never opens a
/// restartable critical section (it only reads `cpu_id`).
pub const RSEQ_SIG: u32 = 0x5305_3053;

// ── CPU ID sentinel values ───────────────────────────────────────────────────

/// cpu_id value before the kernel first schedules the thread.
pub const RSEQ_CPU_ID_UNINITIALIZED: u32 = u32::MAX; // -1 as u32

/// cpu_id value if registration failed.
pub const RSEQ_CPU_ID_REGISTRATION_FAILED: u32 = u32::MAX - 1; // -2 as u32

// ── struct rseq ──────────────────────────────────────────────────────────────

/// Per-thread rseq area shared with the kernel.
///
/// Must be 32-byte aligned. The kernel writes `cpu_id` (and the other
/// fields) on every context switch; userspace only reads.
#[repr(C, align(32))]
pub struct Rseq {
    /// CPU number at the start of the current critical section. Unused by
    /// this crate (no critical sections are opened) but must be present
    /// for the struct layout to match the kernel ABI.
    pub cpu_id_start: u32,

    /// Current CPU number. Set to `RSEQ_CPU_ID_UNINITIALIZED` before the
    /// first schedule, or `RSEQ_CPU_ID_REGISTRATION_FAILED` if
    /// registration failed.
    pub cpu_id: u32,

    /// Pointer to an active critical-section descriptor. Always zero here.
    pub rseq_cs: u64,

    /// Flags controlling restart behavior. Always zero here.
    pub flags: u32,

    /// NUMA node ID (kernel >= 5.17). Unused.
    pub node_id: u32,

    /// Memory-map concurrency ID (kernel >= 5.17). Unused.
    pub mm_cid: u32,

    /// NUMA-aware memory-map concurrency ID. Unused.
    pub mm_numa_cid: u32,
}

/// Minimum size to pass to the rseq syscall for the original ABI (v0).
pub const RSEQ_MIN_SIZE: u32 = 32;

impl Rseq {
    /// Create a zeroed, uninitialized rseq area.
    pub const fn new() -> Self {
        Self {
            cpu_id_start: 0,
            cpu_id: RSEQ_CPU_ID_UNINITIALIZED,
            rseq_cs: 0,
            flags: 0,
            node_id: 0,
            mm_cid: 0,
            mm_numa_cid: 0,
        }
    }
}
