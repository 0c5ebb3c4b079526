//! CPU pinning for looper threads
//!
//! Looper `i` is pinned to `NetConfig::poller_cpus[i]` when that entry exists.
//! Pinning is best effort: a failure is logged and the looper keeps running
//! unpinned.
//!
//! # Platform Support
//!
//! - **Linux/Android/FreeBSD**: `sched_setaffinity`
//! - **Windows**: `SetThreadAffinityMask`
//! - **Other platforms**: no-op

use std::io;

use log::{debug, warn};

use crate::error::{NativeError, Result};

/// Pins the calling thread to `cpu` (0-based).
///
/// ```rust,no_run
/// use tenet_net::affinity::pin_to_cpu;
///
/// pin_to_cpu(2)?;
/// # Ok::<(), tenet_net::Error>(())
/// ```
pub fn pin_to_cpu(cpu: usize) -> Result<()> {
    cfg_if::cfg_if! {
        if #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))] {
            pin_unix(cpu)
        } else if #[cfg(windows)] {
            pin_windows(cpu)
        } else {
            let _ = cpu;
            Ok(())
        }
    }
}

/// Pins the current looper thread if `cpus` has an entry for `index`.
pub(crate) fn pin_looper(index: usize, cpus: &[usize]) {
    let Some(&cpu) = cpus.get(index) else { return };
    match pin_to_cpu(cpu) {
        Ok(()) => debug!("looper {} pinned to cpu {}", index, cpu),
        Err(e) => warn!("looper {} could not be pinned to cpu {}: {}", index, cpu, e),
    }
}

fn last_os_code() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn pin_unix(cpu: usize) -> Result<()> {
    use libc::{cpu_set_t, sched_setaffinity, CPU_SET, CPU_SETSIZE, CPU_ZERO};

    if cpu >= CPU_SETSIZE as usize {
        return Err(NativeError::new("sched_setaffinity", libc::EINVAL).into());
    }
    // SAFETY: `set` is a plain bitmask owned by this frame and `cpu` is in range.
    let rc = unsafe {
        let mut set: cpu_set_t = std::mem::zeroed();
        CPU_ZERO(&mut set);
        CPU_SET(cpu, &mut set);
        sched_setaffinity(0, std::mem::size_of::<cpu_set_t>(), &set)
    };
    if rc != 0 {
        return Err(NativeError::new("sched_setaffinity", last_os_code()).into());
    }
    Ok(())
}

#[cfg(windows)]
fn pin_windows(cpu: usize) -> Result<()> {
    use windows_sys::Win32::Foundation::ERROR_INVALID_PARAMETER;
    use windows_sys::Win32::System::Threading::{GetCurrentThread, SetThreadAffinityMask};

    if cpu >= usize::BITS as usize {
        return Err(NativeError::new("SetThreadAffinityMask", ERROR_INVALID_PARAMETER as i32).into());
    }
    // SAFETY: the pseudo handle of the current thread is always valid.
    let previous = unsafe { SetThreadAffinityMask(GetCurrentThread(), 1usize << cpu) };
    if previous == 0 {
        return Err(NativeError::new("SetThreadAffinityMask", last_os_code()).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_to_cpu() {
        // may be refused inside restricted containers; must not panic
        let _ = pin_to_cpu(0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_pin_out_of_range() {
        let err = pin_to_cpu(1 << 20).unwrap_err();
        assert_eq!(err.native_code(), Some(libc::EINVAL));
    }

    #[test]
    fn test_pin_looper_without_entry_is_noop() {
        pin_looper(3, &[0]);
        pin_looper(0, &[]);
    }
}
