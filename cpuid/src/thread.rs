//! The CPU-id oracle: `current_cpu()` and `num_cpus()`.
//!
//! `current_cpu()` trades exactness for speed. A handle's *origin CPU* is
//! an attribution hint, not a correctness-critical value — the matching
//! decrement always finds the right slab by reading the handle's tag, not
//! by asking the oracle again. So staleness of a few microseconds (or, in
//! the degenerate no-TLS build, a syscall on every call) is acceptable;
//! see the crate-level docs.

use core::cell::Cell;

use crate::platform;

/// Calls between syscall-based refreshes of the cached CPU id.
///
/// Matches the constant used by the reference implementation this oracle
/// was modeled on — chosen empirically as a balance between staleness and
/// syscall overhead, not derived from any particular hardware limit.
const REFRESH_INTERVAL: u32 = 31;

/// Thread-local cached CPU id with a bounded refresh interval.
struct Cached {
    remaining: Cell<u32>,
    cpu: Cell<u32>,
}

impl Cached {
    const fn new() -> Self {
        Self {
            remaining: Cell::new(0),
            cpu: Cell::new(0),
        }
    }

    #[inline]
    fn get(&self) -> u32 {
        let remaining = self.remaining.get();
        if remaining > 0 {
            self.remaining.set(remaining - 1);
            return self.cpu.get();
        }
        self.refresh()
    }

    #[cold]
    fn refresh(&self) -> u32 {
        let cpu = platform::current_cpu_raw().unwrap_or(0);
        self.remaining.set(REFRESH_INTERVAL);
        self.cpu.set(cpu);
        cpu
    }
}

// Safety: a `Cached` is only ever reached through thread-local storage, so
// no two threads ever observe the same instance concurrently.
unsafe impl Sync for Cached {}

cfg_if::cfg_if! {
    if #[cfg(feature = "rseq")] {
        mod rseq_fast_path {
            use core::sync::atomic::{AtomicBool, Ordering};

            use crate::abi::{RSEQ_CPU_ID_REGISTRATION_FAILED, RSEQ_CPU_ID_UNINITIALIZED, Rseq};

            #[thread_local]
            static mut LOCAL_RSEQ: Rseq = Rseq::new();

            #[thread_local]
            static mut REGISTERED: bool = false;

            /// Set once the kernel has told us (via ENOSYS) that rseq isn't
            /// supported at all. Avoids re-attempting registration on every
            /// new thread once we know it's hopeless.
            static RSEQ_UNAVAILABLE: AtomicBool = AtomicBool::new(false);

            /// Try to read this thread's current CPU id from a self-managed
            /// rseq registration, registering it on first use.
            ///
            /// Returns `None` if rseq is unsupported by the running kernel,
            /// in which case the caller should fall back to [`super::Cached`].
            pub(super) fn current_cpu() -> Option<u32> {
                unsafe {
                    if !REGISTERED {
                        if RSEQ_UNAVAILABLE.load(Ordering::Relaxed) {
                            return None;
                        }
                        let ptr = &raw mut LOCAL_RSEQ;
                        match crate::syscall::rseq_register(ptr) {
                            Ok(()) => REGISTERED = true,
                            Err(e) => {
                                if e == crate::syscall::ENOSYS {
                                    RSEQ_UNAVAILABLE.store(true, Ordering::Relaxed);
                                }
                                return None;
                            }
                        }
                    }

                    let cpu = core::ptr::read_volatile(&(*(&raw const LOCAL_RSEQ)).cpu_id);
                    if cpu == RSEQ_CPU_ID_UNINITIALIZED || cpu == RSEQ_CPU_ID_REGISTRATION_FAILED
                    {
                        None
                    } else {
                        Some(cpu)
                    }
                }
            }
        }

        #[thread_local]
        static CACHE: Cached = Cached::new();

        /// Read the CPU the calling thread is running on.
        ///
        /// Prefers the kernel-maintained rseq area (always fresh, no
        /// syscall on the read path); falls back to the periodically
        /// refreshed cache if the kernel rejected rseq registration.
        #[inline]
        pub fn current_cpu() -> u32 {
            match rseq_fast_path::current_cpu() {
                Some(cpu) => cpu,
                None => CACHE.get(),
            }
        }
    } else if #[cfg(feature = "std")] {
        std::thread_local! {
            static CACHE: Cached = const { Cached::new() };
        }

        /// Read the CPU the calling thread is running on, from a
        /// `std::thread_local!`-cached value refreshed every
        /// [`REFRESH_INTERVAL`] calls.
        #[inline]
        pub fn current_cpu() -> u32 {
            CACHE.with(Cached::get)
        }
    } else {
        /// Read the CPU the calling thread is running on.
        ///
        /// Built without `std` or `rseq`, so there is no thread-local
        /// storage available: every call issues a fresh syscall. Always
        /// correct, just without the caching the other build modes get.
        #[inline]
        pub fn current_cpu() -> u32 {
            platform::current_cpu_raw().unwrap_or(0)
        }
    }
}

/// Number of CPUs configured for this host, queried once (callers should
/// cache this themselves — it is read fresh from the OS on every call).
pub fn num_cpus() -> u32 {
    platform::num_cpus_raw()
}
