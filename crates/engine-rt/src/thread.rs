//! Real-time hygiene for threads that run DSP work.

/// Enables flush-to-zero and denormals-are-zero on supported CPUs.
#[inline]
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub fn enable_ftz_daz() {
    #[cfg(target_arch = "x86")]
    use std::arch::x86::{_mm_getcsr, _mm_setcsr};
    #[cfg(target_arch = "x86_64")]
    use std::arch::x86_64::{_mm_getcsr, _mm_setcsr};

    const FTZ: u32 = 1 << 15;
    const DAZ: u32 = 1 << 6;
    // SAFETY: only the denormal control bits of this thread's MXCSR change.
    #[allow(deprecated)]
    unsafe {
        _mm_setcsr(_mm_getcsr() | FTZ | DAZ);
    }
}

#[inline]
#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
pub fn enable_ftz_daz() {}

/// Requests SCHED_FIFO scheduling for the calling thread.
///
/// Lacking the privilege is not an error: the thread keeps running under the
/// default policy and the refusal is logged.
#[cfg(target_os = "linux")]
pub fn promote_current_thread(priority: i32) -> std::io::Result<()> {
    let param = libc::sched_param {
        sched_priority: priority.clamp(1, 99),
    };
    // SAFETY: `pthread_self` is always valid for the calling thread and `param`
    // outlives the call.
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    match rc {
        0 => Ok(()),
        libc::EPERM => {
            tracing::warn!(priority, "insufficient privilege for SCHED_FIFO; staying at default policy");
            Ok(())
        }
        err => Err(std::io::Error::from_raw_os_error(err)),
    }
}

#[cfg(not(target_os = "linux"))]
pub fn promote_current_thread(_priority: i32) -> std::io::Result<()> {
    Ok(())
}
