//! Best-effort, signal-safe stack backtraces.
//!
//! `CrashReporter::dump` is meant to be called from a fatal-signal handler. It only uses
//! the helpers in `signal_safe`, fixed-size stack storage, the unwinder and `dladdr`, and
//! issues exactly one `writev` for the whole report so the block cannot interleave with
//! other writers to the same descriptor.

use crate::config::{Config, MAX_FRAMES};
use crate::signal_safe::{
    current_pid, iovec_of, writev_all, StackBuf, WriteResult, EMPTY_IOVEC,
};
use libc::{c_int, iovec};
use log::warn;

// Longest tail is "+0x" + 16 hex + ") [0x" + 16 hex + "]\n" = 43 bytes.
const TAIL_CAPACITY: usize = 48;
// header + (object, "(", symbol, tail) per frame
const MAX_IOVECS: usize = 1 + 4 * MAX_FRAMES;

/// What a single dump achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpOutcome {
    /// The unwinder produced no frames; nothing was written.
    NoFrames,
    /// The whole report was written.
    Written {
        /// Frames included in the report.
        frames: usize,
        /// Bytes written.
        bytes: usize,
    },
    /// The kernel accepted only part of the report.
    Partial {
        /// Bytes written.
        written: usize,
        /// Bytes in the full report.
        expected: usize,
    },
    /// The write failed outright with the given `errno`.
    Failed {
        /// OS error code.
        errno: i32,
    },
}

impl DumpOutcome {
    /// True when the full report reached the descriptor.
    pub fn is_complete(&self) -> bool {
        matches!(self, DumpOutcome::Written { .. })
    }
}

/// Captures and writes a symbolised backtrace of the calling thread.
#[derive(Debug, Clone, Copy)]
pub struct CrashReporter {
    fd: c_int,
    max_frames: usize,
}

impl CrashReporter {
    /// Creates a reporter writing to `fd` and capturing at most `max_frames` frames
    /// (clamped to [`MAX_FRAMES`]).
    pub fn new(fd: c_int, max_frames: usize) -> Self {
        Self {
            fd,
            max_frames: max_frames.min(MAX_FRAMES),
        }
    }

    /// Reporter configured from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.log_fd, config.frame_budget())
    }

    /// Writes `Backtrace <pid>:\n` followed by one line per captured frame.
    ///
    /// # Signal safety
    ///
    /// Performs no heap allocation and takes no locks. Failures are reported through the
    /// returned value only; this function never retries and never panics on I/O.
    pub fn dump(&self) -> DumpOutcome {
        let mut ips = [0_usize; MAX_FRAMES];
        let captured = capture(&mut ips[..self.max_frames]);
        if captured == 0 {
            return DumpOutcome::NoFrames;
        }

        let mut header = StackBuf::<32>::new();
        header
            .push_str("Backtrace ")
            .push_decimal(current_pid())
            .push_str(":\n");

        let mut tails = [StackBuf::<TAIL_CAPACITY>::new(); MAX_FRAMES];
        let mut iov = [EMPTY_IOVEC; MAX_IOVECS];
        iov[0] = iovec_of(header.as_bytes());
        let mut n = 1;

        for (ip, tail) in ips[..captured].iter().zip(tails.iter_mut()) {
            n += describe_frame(*ip, tail, &mut iov[n..]);
        }

        match writev_all(self.fd, &iov[..n]) {
            WriteResult::Complete(bytes) => DumpOutcome::Written {
                frames: captured,
                bytes,
            },
            WriteResult::Partial { written, expected } => {
                DumpOutcome::Partial { written, expected }
            }
            WriteResult::Failed(errno) => DumpOutcome::Failed { errno },
        }
    }

    /// Dumps from ordinary (non-signal) context and logs anything short of a full write.
    pub fn dump_and_log(&self) -> DumpOutcome {
        let outcome = self.dump();
        match outcome {
            DumpOutcome::Written { .. } => {}
            DumpOutcome::NoFrames => warn!("Backtrace capture produced no frames"),
            DumpOutcome::Partial { written, expected } => warn!(
                "Backtrace dump to fd {} was partial: {} of {} bytes",
                self.fd, written, expected
            ),
            DumpOutcome::Failed { errno } => warn!(
                "Failed to dump backtrace to fd {}: {}",
                self.fd,
                std::io::Error::from_raw_os_error(errno)
            ),
        }
        outcome
    }
}

/// Fills `ips` with return addresses of the current stack, innermost first.
fn capture(ips: &mut [usize]) -> usize {
    let mut count = 0;
    if ips.is_empty() {
        return 0;
    }
    // SAFETY: `trace_unsynchronized` skips the crate's global lock, which is exactly what
    // a signal handler needs. The closure only writes into the caller's fixed array.
    unsafe {
        backtrace::trace_unsynchronized(|frame| {
            let ip = frame.ip() as usize;
            // The unwinder's terminal frame carries no address.
            if ip == 0 {
                return true;
            }
            ips[count] = ip;
            count += 1;
            count < ips.len()
        });
    }
    count
}

/// Emits the iovecs for one frame into `out` and returns how many were used.
///
/// Resolved frames follow the platform convention `object(symbol+0xoff) [0xip]`; frames
/// that cannot be resolved degrade to `[0xip]`.
fn describe_frame(ip: usize, tail: &mut StackBuf<TAIL_CAPACITY>, out: &mut [iovec]) -> usize {
    match resolve(ip) {
        Some(sym) => {
            if sym.symbol.is_empty() {
                tail.push_str("+0x").push_hex(ip.wrapping_sub(sym.object_base));
            } else {
                tail.push_str("+0x").push_hex(ip.wrapping_sub(sym.symbol_addr));
            }
            tail.push_str(") [0x").push_hex(ip).push_str("]\n");
            out[0] = iovec_of(sym.object);
            out[1] = iovec_of(b"(");
            out[2] = iovec_of(sym.symbol);
            out[3] = iovec_of(tail.as_bytes());
            4
        }
        None => {
            tail.push_str("[0x").push_hex(ip).push_str("]\n");
            out[0] = iovec_of(tail.as_bytes());
            1
        }
    }
}

struct ResolvedFrame {
    object: &'static [u8],
    object_base: usize,
    symbol: &'static [u8],
    symbol_addr: usize,
}

/// Resolves `ip` with `dladdr`, which only reads the dynamic loader's tables.
#[cfg(any(target_os = "linux", target_os = "android", target_os = "macos", target_os = "ios"))]
fn resolve(ip: usize) -> Option<ResolvedFrame> {
    use std::ffi::CStr;

    let mut info = libc::Dl_info {
        dli_fname: std::ptr::null(),
        dli_fbase: std::ptr::null_mut(),
        dli_sname: std::ptr::null(),
        dli_saddr: std::ptr::null_mut(),
    };
    // SAFETY: dladdr accepts any address and only fills `info` on success.
    if unsafe { libc::dladdr(ip as *const libc::c_void, &mut info) } == 0
        || info.dli_fname.is_null()
    {
        return None;
    }
    // SAFETY: the strings belong to loaded objects, which stay mapped for as long as the
    // process is dying. `to_bytes` only runs strlen.
    let object = unsafe { CStr::from_ptr(info.dli_fname) }.to_bytes();
    let (symbol, symbol_addr) = if info.dli_sname.is_null() || info.dli_saddr.is_null() {
        (&[][..], 0)
    } else {
        (
            unsafe { CStr::from_ptr(info.dli_sname) }.to_bytes(),
            info.dli_saddr as usize,
        )
    };
    Some(ResolvedFrame {
        object,
        object_base: info.dli_fbase as usize,
        symbol,
        symbol_addr,
    })
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
)))]
fn resolve(_ip: usize) -> Option<ResolvedFrame> {
    None
}
