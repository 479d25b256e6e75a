//! Process hardening for the key-custody process
//!
//! Applied once at startup, before any key material exists. Every step is
//! best-effort: some environments (unprivileged containers, restrictive
//! seccomp profiles) deny these operations, and the enclave still has to
//! come up there, so failures are logged and ignored.

/// Applies all hardening steps in order
pub fn apply() {
    disable_core_dumps();
    lock_memory();
    exclude_from_dumps();
}

/// Hard-limits core dump size to zero so a crash never writes key
/// material to disk
fn disable_core_dumps() {
    let limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_CORE, &limit) };
    if rc != 0 {
        tracing::warn!(
            "setrlimit(RLIMIT_CORE) failed: {}",
            std::io::Error::last_os_error()
        );
    } else {
        tracing::info!("core dumps disabled");
    }
}

/// Pins all current and future pages into RAM so keys cannot be swapped
/// out; requires CAP_IPC_LOCK or a generous RLIMIT_MEMLOCK
fn lock_memory() {
    let rc = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };
    if rc != 0 {
        tracing::warn!(
            "mlockall failed (requires root): {}",
            std::io::Error::last_os_error()
        );
    } else {
        tracing::info!("memory locked, no swap");
    }
}

/// Advises the kernel to leave this memory out of dumps
#[cfg(target_os = "linux")]
fn exclude_from_dumps() {
    let rc = unsafe { libc::madvise(std::ptr::null_mut(), 0, libc::MADV_DONTDUMP) };
    if rc == 0 {
        tracing::info!("memory excluded from dumps");
    }
}

#[cfg(not(target_os = "linux"))]
fn exclude_from_dumps() {}
