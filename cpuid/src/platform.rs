//! Raw OS calls backing the portable (non-rseq) CPU-id refresh path.

#[cfg(unix)]
mod imp {
    unsafe extern "C" {
        fn sched_getcpu() -> i32;
        fn sysconf(name: i32) -> isize;
    }

    /// `_SC_NPROCESSORS_CONF` on Linux x86_64. Other Unixes define the same
    /// value for this symbol name; this is not portable beyond Linux/glibc.
    const SC_NPROCESSORS_CONF: i32 = 83;

    /// Read the CPU the calling thread is currently running on.
    ///
    /// Returns `None` if the kernel call fails (e.g. sandboxed environments
    /// without `sched_getcpu` support).
    pub fn current_cpu_raw() -> Option<u32> {
        let cpu = unsafe { sched_getcpu() };
        if cpu < 0 { None } else { Some(cpu as u32) }
    }

    /// Number of CPUs configured for this host.
    pub fn num_cpus_raw() -> u32 {
        let n = unsafe { sysconf(SC_NPROCESSORS_CONF) };
        if n <= 0 { 1 } else { n as u32 }
    }
}

#[cfg(windows)]
mod imp {
    unsafe extern "system" {
        fn GetCurrentProcessorNumber() -> u32;
    }

    #[repr(C)]
    struct SystemInfo {
        _reserved_1: [u8; 4],
        _reserved_2: [usize; 2],
        _reserved_3: usize,
        number_of_processors: u32,
        _reserved_4: [u8; 16],
    }

    unsafe extern "system" {
        fn GetSystemInfo(out: *mut SystemInfo);
    }

    pub fn current_cpu_raw() -> Option<u32> {
        Some(unsafe { GetCurrentProcessorNumber() })
    }

    pub fn num_cpus_raw() -> u32 {
        let mut info: SystemInfo = unsafe { core::mem::zeroed() };
        unsafe { GetSystemInfo(&mut info) };
        info.number_of_processors.max(1)
    }
}

#[cfg(not(any(unix, windows)))]
mod imp {
    pub fn current_cpu_raw() -> Option<u32> {
        None
    }

    pub fn num_cpus_raw() -> u32 {
        1
    }
}

pub(crate) use imp::{current_cpu_raw, num_cpus_raw};
