#![no_std]

//! cpurc: a CPU-sharded, lock-free reference-counting primitive.
//!
//! Conventional reference-counted smart pointers serialize every
//! acquisition through a single shared atomic counter, which becomes a
//! point of contention as core counts grow. This crate distributes the
//! count across one cache-line-isolated [`Slab`](slab::Slab) per CPU, so
//! concurrent acquisitions from distinct CPUs touch distinct cache lines
//! almost all of the time, while still presenting the exact semantics of
//! strong (and, with the `weak` feature, weak) shared ownership.
//!
//! The crate supplies the concurrency substrate only — [`CounterHandle`]
//! is a bare tagged word, not a smart pointer; pairing it with a raw
//! pointer to a managed payload is left to the caller.
//!
//! # Usage
//!
//! ```
//! use cpurc::CounterHandle;
//!
//! let h1 = CounterHandle::new(4, 0).unwrap();
//! let h2 = h1.clone_on_current_cpu();
//! assert_eq!(h1.use_count(), 2);
//! assert_eq!(h1.destroy(), cpurc::DropOutcome::StillAlive);
//! assert_eq!(h2.destroy(), cpurc::DropOutcome::LastReference);
//! ```
//!
//! # Features
//!
//! - `std` (default) — `std::error::Error` impls and an `ArenaConfig::detected`/
//!   `ManagerConfig::detected` constructor backed by `cpuid::num_cpus`.
//! - `weak` — `WeakCounterHandle`, mirroring `std::sync::Weak`.
//! - `manager` (implies `weak`) — [`ArenaManager`], amortizing one
//!   allocation across up to 64 independent reference counts.
//! - `stats` — relaxed-ordered observability counters, see [`stats`].
//! - `rseq` — forwarded to the `cpuid` dependency's Linux rseq fast path.

extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod arena;
pub mod config;
pub mod error;
pub mod handle;
#[cfg(feature = "manager")]
pub mod manager;
pub mod macros;
#[cfg(feature = "stats")]
pub mod stats;
mod sync;
pub mod slab;

pub use arena::{Arena, MAX_CPUS};
pub use config::ArenaConfig;
#[cfg(feature = "manager")]
pub use config::ManagerConfig;
pub use error::{CpurcError, DropOutcome};
pub use handle::CounterHandle;
#[cfg(feature = "weak")]
pub use handle::WeakCounterHandle;
#[cfg(feature = "manager")]
pub use manager::ArenaManager;
