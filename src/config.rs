//! Runtime configuration for arena and manager construction.
//!
//! Arena shape is a per-call runtime parameter (how many CPUs the host
//! reports), not a compile-time constant, so these are plain validated
//! structs rather than a build-time-generated table: an `assert!` at
//! construction time rather than a `Result`, because a bad value here is a
//! caller programming error, not a recoverable runtime condition.

/// Shape of a single [`crate::arena::Arena`].
#[derive(Debug, Clone, Copy)]
pub struct ArenaConfig {
    pub num_cpus: u32,
}

impl ArenaConfig {
    /// # Panics
    ///
    /// If `num_cpus` is zero.
    pub fn new(num_cpus: u32) -> Self {
        assert!(num_cpus >= 1, "ArenaConfig::num_cpus must be at least 1");
        Self { num_cpus }
    }

    /// Query the host via [`cpuid::num_cpus`] rather than hardcoding a count.
    #[cfg(feature = "std")]
    pub fn detected() -> Self {
        Self::new(cpuid::num_cpus())
    }
}

/// Shape of an [`crate::manager::ArenaManager`]'s arena pool.
#[cfg(feature = "manager")]
#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    pub num_cpus: u32,
}

#[cfg(feature = "manager")]
impl ManagerConfig {
    /// # Panics
    ///
    /// If `num_cpus` is zero.
    pub fn new(num_cpus: u32) -> Self {
        assert!(num_cpus >= 1, "ManagerConfig::num_cpus must be at least 1");
        Self { num_cpus }
    }

    #[cfg(feature = "std")]
    pub fn detected() -> Self {
        Self::new(cpuid::num_cpus())
    }
}
