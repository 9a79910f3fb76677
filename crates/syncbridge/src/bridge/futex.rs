//! Futex-like blocking on a 32-bit atomic.
//!
//! `wait` blocks while the word still holds `current`, until woken or until
//! `timeout` elapses. It may return spuriously; callers always reload the word
//! and decide for themselves whether the change they want has happened.
//!
//! Linux uses `futex(2)` directly. Other targets poll with short sleeps, which
//! keeps the same observable contract at a latency cost.

use std::sync::atomic::AtomicU32;
use std::time::Duration;

#[cfg(target_os = "linux")]
mod imp {
    use super::*;

    /// Relative timeout for `FUTEX_WAIT`. Seconds saturate at `time_t::MAX`;
    /// a wrapped negative value would make the kernel reject the wait.
    pub fn timespec(d: Duration) -> libc::timespec {
        libc::timespec {
            tv_sec: libc::time_t::try_from(d.as_secs()).unwrap_or(libc::time_t::MAX),
            tv_nsec: d.subsec_nanos() as _,
        }
    }

    pub fn wait(word: &AtomicU32, current: u32, timeout: Option<Duration>) {
        let ts = timeout.map(timespec);
        let ts_ptr = ts
            .as_ref()
            .map_or(std::ptr::null(), |t| t as *const libc::timespec);

        // SAFETY: `word` is a live, 4-byte aligned AtomicU32 for the duration of
        // the call; FUTEX_WAIT only reads it and the timespec outlives the call.
        // EAGAIN (value already changed), EINTR and ETIMEDOUT all mean "go and
        // reload", so the return value is not inspected.
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                word as *const AtomicU32,
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                current,
                ts_ptr,
            );
        }
    }

    pub fn wake_all(word: &AtomicU32) {
        // SAFETY: `word` is a live AtomicU32; FUTEX_WAKE does not touch memory.
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                word as *const AtomicU32,
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                i32::MAX,
            );
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Instant;

    const POLL_SLICE: Duration = Duration::from_micros(200);

    pub fn wait(word: &AtomicU32, current: u32, timeout: Option<Duration>) {
        // A timeout too large to represent as a deadline waits forever.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        while word.load(Ordering::Acquire) == current {
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return;
                    }
                    POLL_SLICE.min(deadline - now)
                }
                None => POLL_SLICE,
            };
            std::thread::sleep(slice);
        }
    }

    pub fn wake_all(_word: &AtomicU32) {
        // Pollers observe the store on their next slice.
    }
}

/// Block while `word == current`, for at most `timeout` (forever if `None`).
#[inline]
pub fn wait(word: &AtomicU32, current: u32, timeout: Option<Duration>) {
    imp::wait(word, current, timeout)
}

/// Wake every thread blocked in [`wait`] on `word`.
#[inline]
pub fn wake_all(word: &AtomicU32) {
    imp::wake_all(word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::time::Instant;

    #[test]
    fn wait_returns_immediately_when_value_differs() {
        let word = AtomicU32::new(7);
        let start = Instant::now();
        wait(&word, 3, Some(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn wait_honours_timeout() {
        let word = AtomicU32::new(0);
        let start = Instant::now();
        wait(&word, 0, Some(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn huge_timeout_saturates() {
        let ts = imp::timespec(Duration::MAX);
        assert_eq!(ts.tv_sec, libc::time_t::MAX);
        assert_eq!(ts.tv_nsec, 999_999_999);

        let ts = imp::timespec(Duration::from_millis(1500));
        assert_eq!((ts.tv_sec, ts.tv_nsec), (1, 500_000_000));
    }

    #[test]
    fn huge_timeout_still_blocks() {
        let word = Arc::new(AtomicU32::new(0));
        let waiter = {
            let word = Arc::clone(&word);
            std::thread::spawn(move || {
                let start = Instant::now();
                wait(&word, 0, Some(Duration::MAX));
                start.elapsed()
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        word.store(1, Ordering::Release);
        wake_all(&word);
        let blocked = waiter.join().unwrap();
        assert!(blocked >= Duration::from_millis(40), "returned after {blocked:?}");
    }

    #[test]
    fn wake_releases_waiter() {
        let word = Arc::new(AtomicU32::new(0));
        let waiter = {
            let word = Arc::clone(&word);
            std::thread::spawn(move || {
                while word.load(Ordering::Acquire) == 0 {
                    wait(&word, 0, Some(Duration::from_secs(5)));
                }
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        word.store(1, Ordering::Release);
        wake_all(&word);
        waiter.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
