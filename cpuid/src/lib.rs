//! `cpuid` — cheap, cached "which CPU am I on" for per-CPU sharded data
//! structures.
//!
//! Every read is a thread-local cache hit except for one refresh every
//! ~31 calls (or never, when the `rseq` fast path is active). Staleness
//! of a few microseconds is fine for callers that use the result only as
//! an attribution hint, not a correctness-critical value — see the
//! [`current_cpu`] documentation.
//!
//! # Features
//!
//! - `rseq` — Linux x86_64 nightly only. Refreshes the cached CPU id from
//!   a self-managed `rseq(2)` registration instead of a periodic
//!   `sched_getcpu(2)` syscall. Falls back to the portable path at
//!   runtime if the kernel rejects registration (`ENOSYS`).
//! - `std` — use `std::thread_local!` instead of a bare `#[thread_local]`
//!   static (works on stable, costs one extra branch per access).
//!
//! # Architecture support
//!
//! The `rseq` fast path is x86_64 Linux only. The portable fallback
//! (`sched_getcpu` / `GetCurrentProcessorNumber`) covers Unix and Windows.

#![no_std]
#![cfg_attr(feature = "rseq", feature(thread_local, linkage))]

#[cfg(any(test, feature = "std"))]
extern crate std;

#[cfg(feature = "rseq")]
pub mod abi;
#[cfg(feature = "rseq")]
pub mod syscall;

mod platform;
mod thread;

pub use thread::{current_cpu, num_cpus};

#[cfg(feature = "rseq")]
pub use abi::{RSEQ_SIG, Rseq};
