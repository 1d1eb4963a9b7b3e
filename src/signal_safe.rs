//! Async-signal-safe building blocks.
//!
//! Everything in this module may be called from inside a signal handler. The contract is
//! narrow and reviewable:
//!
//! - no heap allocation (all buffers are fixed-size and live on the stack or in statics),
//! - no locks, including the ones hidden inside `std::io::stderr()` and `eprintln!`,
//! - only functions listed in signal-safety(7): `write`, `writev`, `sigaction`, `kill`,
//!   `getpid`, `sleep`.
//!
//! Code outside this module that runs in signal context must restrict itself to these
//! helpers plus plain reads of data prepared before the handler was installed.

use libc::{c_int, iovec};
use std::ptr;

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// A fixed-capacity byte buffer that formats without allocating.
///
/// Pushing past capacity truncates and marks the buffer as overflowed rather than failing,
/// because callers in signal context have nowhere to report an error to.
#[derive(Clone, Copy)]
pub(crate) struct StackBuf<const N: usize> {
    buf: [u8; N],
    len: usize,
    overflowed: bool,
}

impl<const N: usize> StackBuf<N> {
    pub(crate) const fn new() -> Self {
        Self {
            buf: [0; N],
            len: 0,
            overflowed: false,
        }
    }

    pub(crate) fn push_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        let room = N - self.len;
        let take = bytes.len().min(room);
        self.buf[self.len..self.len + take].copy_from_slice(&bytes[..take]);
        self.len += take;
        if take < bytes.len() {
            self.overflowed = true;
        }
        self
    }

    pub(crate) fn push_str(&mut self, s: &str) -> &mut Self {
        self.push_bytes(s.as_bytes())
    }

    pub(crate) fn push_decimal(&mut self, mut value: u64) -> &mut Self {
        // u64::MAX has 20 decimal digits
        let mut digits = [0_u8; 20];
        let mut i = digits.len();
        loop {
            i -= 1;
            digits[i] = b'0' + (value % 10) as u8;
            value /= 10;
            if value == 0 {
                break;
            }
        }
        self.push_bytes(&digits[i..])
    }

    pub(crate) fn push_hex(&mut self, mut value: usize) -> &mut Self {
        let mut digits = [0_u8; 2 * std::mem::size_of::<usize>()];
        let mut i = digits.len();
        loop {
            i -= 1;
            digits[i] = HEX_DIGITS[value & 0xf];
            value >>= 4;
            if value == 0 {
                break;
            }
        }
        self.push_bytes(&digits[i..])
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub(crate) fn overflowed(&self) -> bool {
        self.overflowed
    }
}

/// An empty iovec, used to pre-fill fixed arrays.
pub(crate) const EMPTY_IOVEC: iovec = iovec {
    iov_base: ptr::null_mut(),
    iov_len: 0,
};

/// Builds an iovec pointing at `bytes`.
///
/// The returned value borrows `bytes` without a lifetime; it must not outlive the slice.
pub(crate) fn iovec_of(bytes: &[u8]) -> iovec {
    iovec {
        iov_base: bytes.as_ptr().cast_mut().cast(),
        iov_len: bytes.len(),
    }
}

/// Result of a single vectored write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteResult {
    Complete(usize),
    Partial { written: usize, expected: usize },
    Failed(i32),
}

/// Gathers `iov` into one `writev(2)` call on `fd`. Never retries.
pub(crate) fn writev_all(fd: c_int, iov: &[iovec]) -> WriteResult {
    let expected: usize = iov.iter().map(|v| v.iov_len).sum();
    // SAFETY: every iovec points at memory that outlives this call.
    let rc = unsafe { libc::writev(fd, iov.as_ptr(), iov.len() as c_int) };
    if rc < 0 {
        return WriteResult::Failed(last_errno());
    }
    let written = rc as usize;
    if written < expected {
        WriteResult::Partial { written, expected }
    } else {
        WriteResult::Complete(written)
    }
}

/// Reads `errno` without touching the allocator.
pub(crate) fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Current process id via `getpid(2)`, which is async-signal-safe.
pub(crate) fn current_pid() -> u64 {
    // SAFETY: getpid has no preconditions.
    (unsafe { libc::getpid() }) as u64
}

/// Puts `signum` back to `SIG_DFL`. Returns false if `sigaction` failed.
pub(crate) fn restore_default_disposition(signum: c_int) -> bool {
    // SAFETY: a zeroed sigaction with an emptied mask and SIG_DFL is a valid disposition.
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = 0;
        action.sa_sigaction = libc::SIG_DFL;
        libc::sigaction(signum, &action, ptr::null_mut()) == 0
    }
}

/// Sends `signum` to the current process so the default action runs once the handler returns.
pub(crate) fn reraise(signum: c_int) {
    // SAFETY: kill and getpid are async-signal-safe and have no memory preconditions.
    unsafe {
        libc::kill(libc::getpid(), signum);
    }
}

/// Blocks the calling thread for `secs` seconds using `sleep(3)`.
pub(crate) fn pause_for(secs: u32) {
    let mut remaining = secs;
    while remaining > 0 {
        // SAFETY: sleep has no memory preconditions. It returns the unslept amount when
        // interrupted, which we keep sleeping off.
        remaining = unsafe { libc::sleep(remaining) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_formatting() {
        let mut buf = StackBuf::<32>::new();
        buf.push_decimal(0);
        buf.push_str(" ");
        buf.push_decimal(4_294_967_296);
        assert_eq!(buf.as_bytes(), b"0 4294967296");

        let mut max = StackBuf::<32>::new();
        max.push_decimal(u64::MAX);
        assert_eq!(max.as_bytes(), b"18446744073709551615");
    }

    #[test]
    fn test_hex_formatting() {
        let mut buf = StackBuf::<32>::new();
        buf.push_hex(0).push_str(",").push_hex(0xdead_beef);
        assert_eq!(buf.as_bytes(), b"0,deadbeef");
    }

    #[test]
    fn test_truncates_instead_of_failing() {
        let mut buf = StackBuf::<4>::new();
        buf.push_str("abcdef");
        assert_eq!(buf.as_bytes(), b"abcd");
        assert!(buf.overflowed());
    }

    #[test]
    fn test_writev_all_to_pipe() {
        let mut fds = [0 as c_int; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);

        let parts: [&[u8]; 3] = [b"one ", b"two ", b"three\n"];
        let iov = [iovec_of(parts[0]), iovec_of(parts[1]), iovec_of(parts[2])];
        assert_eq!(writev_all(fds[1], &iov), WriteResult::Complete(14));

        let mut out = [0_u8; 32];
        let n = unsafe { libc::read(fds[0], out.as_mut_ptr().cast(), out.len()) };
        assert_eq!(&out[..n as usize], b"one two three\n");

        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }

    #[test]
    fn test_writev_all_reports_bad_fd() {
        let iov = [iovec_of(b"x")];
        assert_eq!(writev_all(-1, &iov), WriteResult::Failed(libc::EBADF));
    }
}
