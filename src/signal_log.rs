use crate::signal_safe::{iovec_of, writev_all, StackBuf, WriteResult, EMPTY_IOVEC};
use libc::c_int;

const PREFIX_CAPACITY: usize = 64;
const MAX_PARTS: usize = 8;

/// Line-oriented logger usable from signal context.
///
/// The prefix is formatted once, when the logger is built; afterwards every line is a
/// single `writev` of borrowed fragments, so logging never allocates or locks.
#[derive(Clone, Copy)]
pub(crate) struct SignalLogger {
    prefix: StackBuf<PREFIX_CAPACITY>,
    fd: c_int,
}

impl SignalLogger {
    /// Builds a logger whose lines start with `<name>-<pid>`.
    pub(crate) fn new(name: &str, pid: u64, fd: c_int) -> Self {
        let mut prefix = StackBuf::new();
        prefix.push_str(name).push_str("-").push_decimal(pid);
        Self { prefix, fd }
    }

    /// Writes `<prefix> <parts...>\n` in one vectored write.
    ///
    /// At most `MAX_PARTS` fragments are emitted; extra fragments are dropped.
    pub(crate) fn line(&self, parts: &[&[u8]]) -> WriteResult {
        let mut iov = [EMPTY_IOVEC; MAX_PARTS + 3];
        iov[0] = iovec_of(self.prefix.as_bytes());
        iov[1] = iovec_of(b" ");
        let mut n = 2;
        for part in parts.iter().take(MAX_PARTS) {
            iov[n] = iovec_of(part);
            n += 1;
        }
        iov[n] = iovec_of(b"\n");
        n += 1;
        writev_all(self.fd, &iov[..n])
    }

    /// Writes `bytes` verbatim, without prefix or newline.
    pub(crate) fn raw(&self, bytes: &[u8]) -> WriteResult {
        writev_all(self.fd, &[iovec_of(bytes)])
    }
}
