//! Futex-backed parking on a shared `AtomicU32`.
//!
//! Outside Linux the wait degrades to a short sleep and callers re-check
//! their condition in a loop.

use std::sync::atomic::AtomicU32;
use std::time::Duration;

use crate::core::{Error, Result};

/// Block while `*word == expected`, at most `timeout`. Spurious wakeups are
/// possible; callers must re-check.
#[cfg(target_os = "linux")]
pub fn futex_wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> Result<()> {
    use libc::{timespec, EAGAIN, EINTR, ETIMEDOUT, FUTEX_PRIVATE_FLAG, FUTEX_WAIT};

    let ts = timeout.map(|timeout| timespec {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_nsec: timeout.subsec_nanos() as libc::c_long,
    });
    let ts_ptr = ts
        .as_ref()
        .map_or(std::ptr::null(), |ts| ts as *const timespec);

    let res = futex(word, FUTEX_WAIT | FUTEX_PRIVATE_FLAG, expected, ts_ptr);
    if res == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == EAGAIN || code == EINTR || code == ETIMEDOUT => Ok(()),
        _ => Err(Error::Io(err)),
    }
}

/// Wake every thread parked on `word`.
#[cfg(target_os = "linux")]
pub fn futex_wake(word: &AtomicU32) -> Result<()> {
    use libc::{FUTEX_PRIVATE_FLAG, FUTEX_WAKE};

    let res = futex(
        word,
        FUTEX_WAKE | FUTEX_PRIVATE_FLAG,
        i32::MAX as u32,
        std::ptr::null(),
    );
    if res < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn futex(word: &AtomicU32, op: libc::c_int, val: u32, ts: *const libc::timespec) -> libc::c_long {
    // SAFETY: `word` is a live, aligned u32 for the duration of the call and
    // `ts` is null or points at a timespec owned by the caller.
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word as *const AtomicU32 as *const u32,
            op,
            val,
            ts,
            std::ptr::null::<u32>(),
            0,
        )
    }
}

#[cfg(not(target_os = "linux"))]
pub fn futex_wait(_word: &AtomicU32, _expected: u32, timeout: Option<Duration>) -> Result<()> {
    let nap = Duration::from_millis(1);
    std::thread::sleep(timeout.map_or(nap, |timeout| timeout.min(nap)));
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn futex_wake(_word: &AtomicU32) -> Result<()> {
    Ok(())
}
